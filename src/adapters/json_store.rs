use crate::adapters::catalog_csv;
use crate::domain::model::{
    EstimateSnapshot, InputDeclaration, PriceCatalogEntry, SchemaChanges, TakeoffModel,
    VariableDeclaration,
};
use crate::domain::ports::ModelStore;
use crate::utils::error::{EngineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One JSON document per model under `<data_dir>/models/`, price lists under
/// `<data_dir>/catalogs/` as `.json` arrays or `.csv` files.
///
/// Writes are read-modify-write of the whole document with no locking; concurrent writers
/// to the same model race.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn model_path(&self, model_id: &str) -> Result<PathBuf> {
        validate_id("model id", model_id)?;
        Ok(self.data_dir.join("models").join(format!("{}.json", model_id)))
    }

    /// Writes a model document, creating directories as needed.
    pub async fn save_model(&self, model: &TakeoffModel) -> Result<()> {
        let path = self.model_path(&model.id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(model)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("Saved model '{}' to {}", model.id, path.display());
        Ok(())
    }

    pub async fn save_catalog(&self, catalog_id: &str, entries: &[PriceCatalogEntry]) -> Result<()> {
        validate_id("catalog id", catalog_id)?;
        let dir = self.data_dir.join("catalogs");
        tokio::fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(dir.join(format!("{}.json", catalog_id)), json).await?;
        Ok(())
    }

    async fn update<F>(&self, model_id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut TakeoffModel) + Send,
    {
        let mut model = self.load_model(model_id).await?;
        change(&mut model);
        model.updated_at = Some(chrono::Utc::now());
        self.save_model(&model)
            .await
            .map_err(|e| EngineError::persistence(format!("model '{}': {}", model_id, e)))
    }
}

#[async_trait]
impl ModelStore for JsonFileStore {
    async fn load_model(&self, model_id: &str) -> Result<TakeoffModel> {
        let path = self.model_path(model_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::ModelNotFound {
                    model_id: model_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let mut model: TakeoffModel = serde_json::from_slice(&bytes)?;
        if model.id.is_empty() {
            model.id = model_id.to_string();
        }
        Ok(model)
    }

    async fn load_catalog(&self, catalog_id: &str) -> Result<Vec<PriceCatalogEntry>> {
        validate_id("catalog id", catalog_id)?;
        let dir = self.data_dir.join("catalogs");

        let json_path = dir.join(format!("{}.json", catalog_id));
        if tokio::fs::try_exists(&json_path).await? {
            let bytes = tokio::fs::read(&json_path).await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let csv_path = dir.join(format!("{}.csv", catalog_id));
        if tokio::fs::try_exists(&csv_path).await? {
            let bytes = tokio::fs::read(&csv_path).await?;
            return catalog_csv::read_price_list(bytes.as_slice());
        }

        Err(EngineError::CatalogNotFound {
            catalog_id: catalog_id.to_string(),
        })
    }

    async fn save_script(&self, model_id: &str, code: &str) -> Result<()> {
        let code = code.to_string();
        self.update(model_id, move |model| model.code = code).await
    }

    async fn apply_input_changes(
        &self,
        model_id: &str,
        changes: SchemaChanges<InputDeclaration>,
    ) -> Result<()> {
        self.update(model_id, move |model| model.apply_input_changes(changes))
            .await
    }

    async fn apply_variable_changes(
        &self,
        model_id: &str,
        changes: SchemaChanges<VariableDeclaration>,
    ) -> Result<()> {
        self.update(model_id, move |model| model.apply_variable_changes(changes))
            .await
    }

    async fn save_estimate(&self, model_id: &str, estimate: EstimateSnapshot) -> Result<()> {
        self.update(model_id, move |model| model.estimate = Some(estimate))
            .await
    }
}

/// Ids become file names; keep them to a single plain path component.
fn validate_id(field: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(EngineError::ValidationError {
            message: format!("invalid {} '{}'", field, id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ids_that_escape_the_data_dir() {
        assert!(validate_id("model id", "house-1").is_ok());
        assert!(validate_id("model id", "../etc/passwd").is_err());
        assert!(validate_id("model id", "a/b").is_err());
        assert!(validate_id("model id", "").is_err());
    }
}
