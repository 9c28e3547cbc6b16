use crate::domain::value::ValueType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A form field declared by a takeoff script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDeclaration {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub default_value: String,
    #[serde(default)]
    pub component_kind: Option<String>,
    #[serde(default = "empty_props")]
    pub component_props: String,
    #[serde(default)]
    pub display_order: usize,
}

/// A model-level constant, either declared by a script or created by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDeclaration {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub manually_created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCatalogEntry {
    pub name: String,
    #[serde(alias = "pricePerUnit")]
    pub unit_price: f64,
    pub currency: String,
    pub category: String,
    #[serde(default)]
    pub unit_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateLineItem {
    pub name: String,
    #[serde(with = "nan_as_null")]
    pub quantity: f64,
    pub price_lookup_key: String,
    #[serde(with = "nan_as_null")]
    pub unit_price: f64,
    pub currency: String,
    #[serde(with = "nan_as_null")]
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateSection {
    pub name: String,
    pub parts: Vec<EstimateLineItem>,
}

impl EstimateSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parts: Vec::new(),
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = ResultRow> + '_ {
        self.parts.iter().map(move |part| ResultRow {
            section: self.name.clone(),
            name: part.name.clone(),
            qty: part.quantity,
            price_lookup_key: part.price_lookup_key.clone(),
            price_per_unit: part.unit_price,
            total: part.total,
            currency: part.currency.clone(),
        })
    }
}

/// Flat, storable form of one line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub section: String,
    pub name: String,
    #[serde(with = "nan_as_null")]
    pub qty: f64,
    pub price_lookup_key: String,
    #[serde(with = "nan_as_null")]
    pub price_per_unit: f64,
    #[serde(with = "nan_as_null")]
    pub total: f64,
    pub currency: String,
}

pub fn flatten_sections(sections: &[EstimateSection]) -> Vec<ResultRow> {
    sections.iter().flat_map(|section| section.rows()).collect()
}

/// One script-time declaration, recorded by a registry during a single run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarationRecord {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub label: String,
    pub description: Option<String>,
    pub component_kind: Option<String>,
    pub component_props: String,
    pub position: usize,
}

/// A form value as it was used by a committed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormValue {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateSnapshot {
    pub results: Vec<ResultRow>,
    pub form_values: Vec<FormValue>,
    pub calculated_at: DateTime<Utc>,
}

/// The persisted script plus its declared schema and last committed results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoffModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub inputs: Vec<InputDeclaration>,
    #[serde(default)]
    pub variables: Vec<VariableDeclaration>,
    #[serde(default)]
    pub estimate: Option<EstimateSnapshot>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TakeoffModel {
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            code: code.into(),
            inputs: Vec::new(),
            variables: Vec::new(),
            estimate: None,
            updated_at: None,
        }
    }

    /// Inputs in form order.
    pub fn ordered_inputs(&self) -> Vec<&InputDeclaration> {
        let mut inputs: Vec<_> = self.inputs.iter().collect();
        inputs.sort_by_key(|input| input.display_order);
        inputs
    }

    pub fn apply_input_changes(&mut self, changes: SchemaChanges<InputDeclaration>) {
        apply_changes(&mut self.inputs, changes, |input| &input.name);
        self.inputs.sort_by_key(|input| input.display_order);
    }

    pub fn apply_variable_changes(&mut self, changes: SchemaChanges<VariableDeclaration>) {
        apply_changes(&mut self.variables, changes, |variable| &variable.name);
    }
}

fn apply_changes<E>(rows: &mut Vec<E>, changes: SchemaChanges<E>, name: impl Fn(&E) -> &String) {
    rows.retain(|row| !changes.deletes.contains(name(row)));
    for upsert in changes.upserts {
        match rows.iter_mut().find(|row| name(row) == name(&upsert)) {
            Some(row) => *row = upsert,
            None => rows.push(upsert),
        }
    }
}

/// The writes needed to bring one kind of persisted schema row in line with a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChanges<E> {
    pub upserts: Vec<E>,
    pub deletes: Vec<String>,
}

impl<E> SchemaChanges<E> {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

fn empty_props() -> String {
    "{}".to_string()
}

/// Prices and quantities may be NaN after a lookup miss; JSON has no NaN so it travels as null.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
