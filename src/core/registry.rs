use crate::core::diagnostics::{DiagnosticSource, Diagnostics};
use crate::domain::model::{DeclarationRecord, FormValue, InputDeclaration, VariableDeclaration};
use crate::domain::value::{CoercionError, DeclaredValue, ValueType};
use std::collections::HashMap;

/// A persisted schema row that script declarations resolve against and reconcile into.
pub trait SchemaEntity: Clone + PartialEq {
    /// Human name of the row kind, for logs.
    const KIND: &'static str;

    fn name(&self) -> &str;

    /// The string-encoded value a declaration resolves to when this row exists.
    fn stored_value(&self) -> &str;

    /// The row that persists `record`. `existing` is the current row of the same name.
    fn from_record(record: &DeclarationRecord, existing: Option<&Self>) -> Self;

    /// Protected rows survive pruning even when no declaration names them.
    fn is_protected(&self) -> bool {
        false
    }
}

impl SchemaEntity for InputDeclaration {
    const KIND: &'static str = "input";

    fn name(&self) -> &str {
        &self.name
    }

    fn stored_value(&self) -> &str {
        &self.default_value
    }

    fn from_record(record: &DeclarationRecord, _existing: Option<&Self>) -> Self {
        Self {
            name: record.name.clone(),
            label: record.label.clone(),
            description: record.description.clone(),
            value_type: record.value_type,
            default_value: record.value.clone(),
            component_kind: record.component_kind.clone(),
            component_props: record.component_props.clone(),
            display_order: record.position,
        }
    }
}

impl SchemaEntity for VariableDeclaration {
    const KIND: &'static str = "variable";

    fn name(&self) -> &str {
        &self.name
    }

    fn stored_value(&self) -> &str {
        &self.value
    }

    fn from_record(record: &DeclarationRecord, existing: Option<&Self>) -> Self {
        Self {
            name: record.name.clone(),
            value: record.value.clone(),
            value_type: record.value_type,
            description: record.description.clone(),
            manually_created: existing.is_some_and(|row| row.manually_created),
        }
    }

    fn is_protected(&self) -> bool {
        self.manually_created
    }
}

/// What a script asked for in one declaration call.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub default: DeclaredValue,
    pub value_type: ValueType,
    pub label: Option<String>,
    pub description: Option<String>,
    pub component_kind: Option<String>,
    /// JSON-encoded render props.
    pub component_props: String,
}

impl Declaration {
    /// A declaration typed after its default value.
    pub fn new(name: impl Into<String>, default: DeclaredValue) -> Self {
        let value_type = default.value_type();
        Self {
            name: name.into(),
            default,
            value_type,
            label: None,
            description: None,
            component_kind: None,
            component_props: "{}".to_string(),
        }
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Override,
    Persisted,
    Default,
}

/// By-name lookup over persisted rows plus the ordered record of this run's declarations.
///
/// Records live in an arena in first-call order; a repeated name replaces its record in
/// place, so the latest call wins while the first call fixes the position.
#[derive(Debug, Clone)]
pub struct SchemaRegistry<E: SchemaEntity> {
    persisted: HashMap<String, E>,
    overrides: HashMap<String, String>,
    records: Vec<DeclarationRecord>,
    index: HashMap<String, usize>,
}

impl<E: SchemaEntity> SchemaRegistry<E> {
    pub fn new(rows: impl IntoIterator<Item = E>) -> Self {
        Self {
            persisted: rows
                .into_iter()
                .map(|row| (row.name().to_string(), row))
                .collect(),
            overrides: HashMap::new(),
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Values submitted for this run (form values); they take priority over stored ones.
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Resolves `declaration` and records it.
    pub fn declare(&mut self, declaration: Declaration, diagnostics: &mut Diagnostics) -> DeclaredValue {
        let (value, source) = self.resolve(&declaration, diagnostics);
        tracing::debug!(
            "{} '{}' resolved to {:?} from {:?}",
            E::KIND,
            declaration.name,
            value,
            source
        );

        let position = match self.index.get(&declaration.name) {
            Some(&slot) => self.records[slot].position,
            None => self.records.len(),
        };
        let record = DeclarationRecord {
            label: declaration
                .label
                .unwrap_or_else(|| declaration.name.clone()),
            value: value.encode(),
            value_type: declaration.value_type,
            description: declaration.description,
            component_kind: declaration.component_kind,
            component_props: declaration.component_props,
            position,
            name: declaration.name,
        };

        match self.index.get(&record.name) {
            Some(&slot) => {
                tracing::debug!("{} '{}' declared again; keeping the latest", E::KIND, record.name);
                self.records[slot] = record;
            }
            None => {
                self.index.insert(record.name.clone(), self.records.len());
                self.records.push(record);
            }
        }
        value
    }

    fn resolve(&self, declaration: &Declaration, diagnostics: &mut Diagnostics) -> (DeclaredValue, ValueSource) {
        let value_type = declaration.value_type;

        if let Some(raw) = self.overrides.get(&declaration.name).filter(|raw| !raw.is_empty()) {
            match DeclaredValue::coerce(raw, value_type) {
                Ok(value) => return (value, ValueSource::Override),
                Err(e) => self.coercion_warning(&declaration.name, "submitted", &e, diagnostics),
            }
        }

        if let Some(row) = self.persisted.get(&declaration.name) {
            match DeclaredValue::coerce(row.stored_value(), value_type) {
                Ok(value) => return (value, ValueSource::Persisted),
                Err(e) => self.coercion_warning(&declaration.name, "stored", &e, diagnostics),
            }
        }

        if declaration.default.value_type() == value_type {
            return (declaration.default.clone(), ValueSource::Default);
        }
        match DeclaredValue::coerce(&declaration.default.encode(), value_type) {
            Ok(value) => (value, ValueSource::Default),
            Err(e) => {
                self.coercion_warning(&declaration.name, "default", &e, diagnostics);
                (declaration.default.clone(), ValueSource::Default)
            }
        }
    }

    fn coercion_warning(
        &self,
        name: &str,
        origin: &str,
        error: &CoercionError,
        diagnostics: &mut Diagnostics,
    ) {
        tracing::warn!("{} '{}': {} value unusable: {}", E::KIND, name, origin, error);
        diagnostics.warn(
            DiagnosticSource::Coercion,
            format!("{} '{}': ignoring {} value, {}", E::KIND, name, origin, error),
        );
    }

    pub fn records(&self) -> &[DeclarationRecord] {
        &self.records
    }

    /// The values this run resolved, in declaration order.
    pub fn form_values(&self) -> Vec<FormValue> {
        self.records
            .iter()
            .map(|record| FormValue {
                name: record.name.clone(),
                value: record.value.clone(),
                value_type: record.value_type,
            })
            .collect()
    }

    pub fn into_records(self) -> Vec<DeclarationRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(name: &str, value: &str, value_type: ValueType) -> VariableDeclaration {
        VariableDeclaration {
            name: name.to_string(),
            value: value.to_string(),
            value_type,
            description: None,
            manually_created: false,
        }
    }

    fn input(name: &str, default_value: &str) -> InputDeclaration {
        InputDeclaration {
            name: name.to_string(),
            label: name.to_string(),
            description: None,
            value_type: ValueType::Number,
            default_value: default_value.to_string(),
            component_kind: None,
            component_props: "{}".to_string(),
            display_order: 0,
        }
    }

    #[test]
    fn persisted_value_beats_script_default() {
        let mut registry = SchemaRegistry::new(vec![variable("wasteFactor", "5", ValueType::Number)]);
        let mut diagnostics = Diagnostics::new();

        let value = registry.declare(
            Declaration::new("wasteFactor", DeclaredValue::Number(1.0)),
            &mut diagnostics,
        );

        assert_eq!(value, DeclaredValue::Number(5.0));
        assert_eq!(registry.records()[0].value, "5");
        assert!(diagnostics.entries().is_empty());
    }

    #[test]
    fn non_empty_override_beats_persisted_value() {
        let overrides = HashMap::from([
            ("width".to_string(), "32".to_string()),
            ("length".to_string(), String::new()),
        ]);
        let mut registry =
            SchemaRegistry::new(vec![input("width", "20"), input("length", "40")]).with_overrides(overrides);
        let mut diagnostics = Diagnostics::new();

        let width = registry.declare(Declaration::new("width", DeclaredValue::Number(1.0)), &mut diagnostics);
        let length = registry.declare(Declaration::new("length", DeclaredValue::Number(1.0)), &mut diagnostics);

        assert_eq!(width, DeclaredValue::Number(32.0));
        assert_eq!(length, DeclaredValue::Number(40.0));
    }

    #[test]
    fn unreadable_stored_value_falls_back_to_default_with_warning() {
        let mut registry = SchemaRegistry::new(vec![variable("rate", "abc", ValueType::String)]);
        let mut diagnostics = Diagnostics::new();

        let value = registry.declare(Declaration::new("rate", DeclaredValue::Number(7.0)), &mut diagnostics);

        assert_eq!(value, DeclaredValue::Number(7.0));
        assert_eq!(diagnostics.entries().len(), 1);
        assert_eq!(diagnostics.entries()[0].source, DiagnosticSource::Coercion);
    }

    #[test]
    fn explicit_type_converts_the_default() {
        let mut registry: SchemaRegistry<VariableDeclaration> = SchemaRegistry::new(Vec::new());
        let mut diagnostics = Diagnostics::new();
        let mut declaration = Declaration::new("count", DeclaredValue::Text("12".to_string()));
        declaration.value_type = ValueType::Number;

        let value = registry.declare(declaration, &mut diagnostics);
        assert_eq!(value, DeclaredValue::Number(12.0));
        assert_eq!(registry.records()[0].value_type, ValueType::Number);
    }

    #[test]
    fn duplicate_names_keep_first_position_and_latest_value() {
        let mut registry: SchemaRegistry<InputDeclaration> = SchemaRegistry::new(Vec::new());
        let mut diagnostics = Diagnostics::new();

        registry.declare(Declaration::new("a", DeclaredValue::Number(1.0)), &mut diagnostics);
        registry.declare(Declaration::new("b", DeclaredValue::Number(2.0)), &mut diagnostics);
        let mut again = Declaration::new("a", DeclaredValue::Number(3.0));
        again.label = Some("Again".to_string());
        registry.declare(again, &mut diagnostics);

        let records = registry.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "a");
        assert_eq!(records[0].position, 0);
        assert_eq!(records[0].value, "3");
        assert_eq!(records[0].label, "Again");
        assert_eq!(records[1].position, 1);
    }

    #[test]
    fn label_defaults_to_name_and_values_are_encoded_per_type() {
        let mut registry: SchemaRegistry<VariableDeclaration> = SchemaRegistry::new(Vec::new());
        let mut diagnostics = Diagnostics::new();

        registry.declare(
            Declaration::new("config", DeclaredValue::Structured(serde_json::json!({"a": [1, 2]}))),
            &mut diagnostics,
        );
        registry.declare(Declaration::new("enabled", DeclaredValue::Boolean(true)), &mut diagnostics);

        let records = registry.records();
        assert_eq!(records[0].label, "config");
        assert_eq!(records[0].value, r#"{"a":[1,2]}"#);
        assert_eq!(records[0].value_type, ValueType::Object);
        assert_eq!(records[1].value, "true");
    }
}
