use crate::core::registry::SchemaEntity;
use crate::domain::model::{DeclarationRecord, InputDeclaration, SchemaChanges, VariableDeclaration};
use crate::domain::ports::ModelStore;
use crate::utils::error::{EngineError, Result};
use std::collections::{HashMap, HashSet};

/// Diffs one run's declarations against the persisted rows of the same kind.
///
/// Every declared name is upserted when its row is missing or differs; every persisted row
/// the run did not declare is deleted unless it is protected.
pub fn plan<E: SchemaEntity>(records: &[DeclarationRecord], persisted: &[E]) -> SchemaChanges<E> {
    let existing: HashMap<&str, &E> = persisted.iter().map(|row| (row.name(), row)).collect();
    let declared: HashSet<&str> = records.iter().map(|record| record.name.as_str()).collect();

    let upserts = records
        .iter()
        .filter_map(|record| {
            let current = existing.get(record.name.as_str()).copied();
            let row = E::from_record(record, current);
            (current != Some(&row)).then_some(row)
        })
        .collect();

    let deletes = persisted
        .iter()
        .filter(|row| !declared.contains(row.name()) && !row.is_protected())
        .map(|row| row.name().to_string())
        .collect();

    SchemaChanges { upserts, deletes }
}

/// Counts of what a reconciliation wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileSummary {
    pub inputs_upserted: usize,
    pub inputs_deleted: usize,
    pub variables_upserted: usize,
    pub variables_deleted: usize,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Writes the schema changes of one run through a [`ModelStore`].
pub struct Reconciler<'a, S: ModelStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ModelStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        model_id: &str,
        input_records: &[DeclarationRecord],
        persisted_inputs: &[InputDeclaration],
        variable_records: &[DeclarationRecord],
        persisted_variables: &[VariableDeclaration],
    ) -> Result<ReconcileSummary> {
        let inputs = plan(input_records, persisted_inputs);
        let variables = plan(variable_records, persisted_variables);

        let summary = ReconcileSummary {
            inputs_upserted: inputs.upserts.len(),
            inputs_deleted: inputs.deletes.len(),
            variables_upserted: variables.upserts.len(),
            variables_deleted: variables.deletes.len(),
        };

        if !inputs.is_empty() {
            tracing::debug!("Input changes for '{}': {:?}", model_id, inputs);
            self.store
                .apply_input_changes(model_id, inputs)
                .await
                .map_err(as_persistence)?;
        }
        if !variables.is_empty() {
            tracing::debug!("Variable changes for '{}': {:?}", model_id, variables);
            self.store
                .apply_variable_changes(model_id, variables)
                .await
                .map_err(as_persistence)?;
        }

        tracing::info!(
            "Schema reconciled for '{}': inputs +{} -{}, variables +{} -{}",
            model_id,
            summary.inputs_upserted,
            summary.inputs_deleted,
            summary.variables_upserted,
            summary.variables_deleted
        );
        Ok(summary)
    }
}

fn as_persistence(error: EngineError) -> EngineError {
    match error {
        EngineError::PersistenceError { .. } => error,
        other => EngineError::persistence(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::ValueType;

    fn record(name: &str, value: &str, position: usize) -> DeclarationRecord {
        DeclarationRecord {
            name: name.to_string(),
            value: value.to_string(),
            value_type: ValueType::Number,
            label: name.to_string(),
            description: None,
            component_kind: None,
            component_props: "{}".to_string(),
            position,
        }
    }

    fn input(name: &str, position: usize) -> InputDeclaration {
        InputDeclaration::from_record(&record(name, "1", position), None)
    }

    fn variable(name: &str, manually_created: bool) -> VariableDeclaration {
        VariableDeclaration {
            name: name.to_string(),
            value: "1".to_string(),
            value_type: ValueType::Number,
            description: None,
            manually_created,
        }
    }

    #[test]
    fn undeclared_inputs_are_pruned() {
        let persisted = vec![input("A", 0), input("B", 1), input("C", 2)];
        let changes = plan(&[record("A", "1", 0), record("C", "1", 1)], &persisted);

        assert_eq!(changes.deletes, vec!["B".to_string()]);
        // C moved from position 2 to 1.
        assert_eq!(changes.upserts.len(), 1);
        assert_eq!(changes.upserts[0].name, "C");
        assert_eq!(changes.upserts[0].display_order, 1);
    }

    #[test]
    fn manually_created_variables_survive() {
        let persisted = vec![variable("script", false), variable("manual", true)];
        let changes = plan::<VariableDeclaration>(&[], &persisted);

        assert_eq!(changes.deletes, vec!["script".to_string()]);
    }

    #[test]
    fn redeclaring_a_manual_variable_keeps_its_flag() {
        let persisted = vec![variable("manual", true)];
        let changes = plan(&[record("manual", "9", 0)], &persisted);

        assert_eq!(changes.upserts.len(), 1);
        assert!(changes.upserts[0].manually_created);
        assert_eq!(changes.upserts[0].value, "9");
    }

    #[test]
    fn unchanged_declarations_plan_nothing() {
        let records = vec![record("A", "1", 0), record("B", "1", 1)];
        let persisted: Vec<InputDeclaration> = records
            .iter()
            .map(|r| InputDeclaration::from_record(r, None))
            .collect();

        assert!(plan(&records, &persisted).is_empty());
    }
}
