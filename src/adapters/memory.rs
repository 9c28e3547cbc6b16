use crate::domain::model::{
    EstimateSnapshot, InputDeclaration, PriceCatalogEntry, SchemaChanges, TakeoffModel,
    VariableDeclaration,
};
use crate::domain::ports::ModelStore;
use crate::utils::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    models: HashMap<String, TakeoffModel>,
    catalogs: HashMap<String, Vec<PriceCatalogEntry>>,
    fail_writes: bool,
}

/// Keeps models and price lists in process memory. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_model(&self, model: TakeoffModel) -> Result<()> {
        self.lock()?.models.insert(model.id.clone(), model);
        Ok(())
    }

    pub fn insert_catalog(&self, catalog_id: &str, entries: Vec<PriceCatalogEntry>) -> Result<()> {
        self.lock()?.catalogs.insert(catalog_id.to_string(), entries);
        Ok(())
    }

    /// Current copy of a stored model.
    pub fn model(&self, model_id: &str) -> Option<TakeoffModel> {
        self.lock().ok()?.models.get(model_id).cloned()
    }

    /// Makes every later write fail, for exercising persistence failures.
    pub fn set_fail_writes(&self, fail: bool) -> Result<()> {
        self.lock()?.fail_writes = fail;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| EngineError::persistence("memory store lock poisoned"))
    }

    fn update<F>(&self, model_id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut TakeoffModel),
    {
        let mut state = self.lock()?;
        if state.fail_writes {
            return Err(EngineError::persistence(format!(
                "write to model '{}' rejected",
                model_id
            )));
        }
        let model = state
            .models
            .get_mut(model_id)
            .ok_or_else(|| EngineError::ModelNotFound {
                model_id: model_id.to_string(),
            })?;
        change(model);
        model.updated_at = Some(chrono::Utc::now());
        Ok(())
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn load_model(&self, model_id: &str) -> Result<TakeoffModel> {
        self.lock()?
            .models
            .get(model_id)
            .cloned()
            .ok_or_else(|| EngineError::ModelNotFound {
                model_id: model_id.to_string(),
            })
    }

    async fn load_catalog(&self, catalog_id: &str) -> Result<Vec<PriceCatalogEntry>> {
        self.lock()?
            .catalogs
            .get(catalog_id)
            .cloned()
            .ok_or_else(|| EngineError::CatalogNotFound {
                catalog_id: catalog_id.to_string(),
            })
    }

    async fn save_script(&self, model_id: &str, code: &str) -> Result<()> {
        self.update(model_id, |model| model.code = code.to_string())
    }

    async fn apply_input_changes(
        &self,
        model_id: &str,
        changes: SchemaChanges<InputDeclaration>,
    ) -> Result<()> {
        self.update(model_id, |model| model.apply_input_changes(changes))
    }

    async fn apply_variable_changes(
        &self,
        model_id: &str,
        changes: SchemaChanges<VariableDeclaration>,
    ) -> Result<()> {
        self.update(model_id, |model| model.apply_variable_changes(changes))
    }

    async fn save_estimate(&self, model_id: &str, estimate: EstimateSnapshot) -> Result<()> {
        self.update(model_id, |model| model.estimate = Some(estimate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ids_are_reported() {
        let store = MemoryStore::new();

        let model = tokio_test::block_on(store.load_model("missing"));
        assert!(matches!(model, Err(EngineError::ModelNotFound { .. })));

        let catalog = tokio_test::block_on(store.load_catalog("missing"));
        assert!(matches!(catalog, Err(EngineError::CatalogNotFound { .. })));
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryStore::new();
        store.insert_model(TakeoffModel::new("m1", "")).unwrap();

        let other = store.clone();
        tokio_test::block_on(other.save_script("m1", "getUserInput('a', 1)")).unwrap();

        let model = store.model("m1").unwrap();
        assert_eq!(model.code, "getUserInput('a', 1)");
        assert!(model.updated_at.is_some());
    }

    #[test]
    fn failing_writes_surface_as_persistence_errors() {
        let store = MemoryStore::new();
        store.insert_model(TakeoffModel::new("m1", "")).unwrap();
        store.set_fail_writes(true).unwrap();

        let result = tokio_test::block_on(store.save_script("m1", "x"));
        assert!(matches!(result, Err(EngineError::PersistenceError { .. })));
    }
}
