use crate::domain::model::{
    EstimateSnapshot, InputDeclaration, PriceCatalogEntry, SchemaChanges, TakeoffModel,
    VariableDeclaration,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Storage for takeoff models, their schema rows and committed estimates.
///
/// The engine performs no locking of its own: two runs of the same model reconcile in
/// whatever order they finish. Implementations that need stronger guarantees should
/// serialize writes per model.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn load_model(&self, model_id: &str) -> Result<TakeoffModel>;

    async fn load_catalog(&self, catalog_id: &str) -> Result<Vec<PriceCatalogEntry>>;

    async fn save_script(&self, model_id: &str, code: &str) -> Result<()>;

    async fn apply_input_changes(
        &self,
        model_id: &str,
        changes: SchemaChanges<InputDeclaration>,
    ) -> Result<()>;

    async fn apply_variable_changes(
        &self,
        model_id: &str,
        changes: SchemaChanges<VariableDeclaration>,
    ) -> Result<()>;

    async fn save_estimate(&self, model_id: &str, estimate: EstimateSnapshot) -> Result<()>;
}

pub trait ConfigProvider: Send + Sync {
    fn timeout_ms(&self) -> u64;
    fn max_call_depth(&self) -> usize;
    fn data_dir(&self) -> &str;
}
