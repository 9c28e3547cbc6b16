use crate::core::catalog::{LookupEntry, PriceCatalog};
use crate::core::diagnostics::{Diagnostic, DiagnosticSource};
use crate::core::host::HostApi;
use crate::core::reconcile::{ReconcileSummary, Reconciler};
use crate::core::registry::SchemaRegistry;
use crate::core::sandbox::SandboxExecutor;
use crate::domain::model::{
    flatten_sections, EstimateSection, EstimateSnapshot, PriceCatalogEntry, ResultRow,
};
use crate::domain::ports::{ConfigProvider, ModelStore};
use crate::script::{Limits, ScriptError};
use crate::utils::error::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunMode {
    /// Successful results replace the model's stored estimate.
    #[default]
    Commit,
    /// Results are returned only; the stored estimate is left alone.
    DryRun,
}

/// One calculation request.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub model_id: String,
    /// Script text to run instead of the stored one; saved with the model on commit.
    pub script: Option<String>,
    /// Price lists loaded through the store, merged in order.
    pub catalog_ids: Vec<String>,
    /// Price entries supplied directly; merged after `catalog_ids`.
    pub prices: Vec<PriceCatalogEntry>,
    /// Submitted form values by input name.
    pub overrides: HashMap<String, String>,
    pub mode: RunMode,
}

impl RunRequest {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_catalog(mut self, catalog_id: impl Into<String>) -> Self {
        self.catalog_ids.push(catalog_id.into());
        self
    }

    pub fn with_prices(mut self, prices: Vec<PriceCatalogEntry>) -> Self {
        self.prices.extend(prices);
        self
    }

    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.mode = RunMode::DryRun;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// The result of one run. A script failure is an outcome, not an `Err`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub model_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub sections: Vec<EstimateSection>,
    pub rows: Vec<ResultRow>,
    pub diagnostics: Vec<Diagnostic>,
    pub lookups: Vec<LookupEntry>,
    pub reconciled: Option<ReconcileSummary>,
    pub committed: bool,
    #[serde(serialize_with = "error_message")]
    pub error: Option<ScriptError>,
    #[serde(rename = "durationMs", serialize_with = "millis")]
    pub duration: Duration,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn grand_total(&self) -> f64 {
        self.rows.iter().map(|row| row.total).sum()
    }
}

/// Wires catalog, registries, host and sandbox into one run against a [`ModelStore`].
pub struct TakeoffEngine<S: ModelStore> {
    store: S,
    sandbox: SandboxExecutor,
}

impl<S: ModelStore> TakeoffEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_limits(store, Limits::default())
    }

    pub fn with_limits(store: S, limits: Limits) -> Self {
        Self {
            store,
            sandbox: SandboxExecutor::new(limits),
        }
    }

    pub fn from_config(store: S, config: &dyn ConfigProvider) -> Self {
        Self::with_limits(
            store,
            Limits {
                timeout: Duration::from_millis(config.timeout_ms()),
                max_call_depth: config.max_call_depth(),
            },
        )
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        let started = Instant::now();
        let model_id = request.model_id.as_str();
        tracing::info!("Starting {:?} run of model '{}'", request.mode, model_id);

        // Load
        let model = self.store.load_model(model_id).await?;
        let mut prices = Vec::new();
        for catalog_id in &request.catalog_ids {
            let entries = self.store.load_catalog(catalog_id).await?;
            tracing::debug!("Loaded {} prices from '{}'", entries.len(), catalog_id);
            prices.extend(entries);
        }
        prices.extend(request.prices.iter().cloned());
        let catalog = PriceCatalog::from_entries(prices);
        tracing::info!(
            "Model '{}': {} inputs, {} variables, {} catalog items",
            model_id,
            model.inputs.len(),
            model.variables.len(),
            catalog.len()
        );

        let host = HostApi::new(
            SchemaRegistry::new(model.inputs.iter().cloned()).with_overrides(request.overrides.clone()),
            SchemaRegistry::new(model.variables.iter().cloned()),
            catalog,
        );
        let source = request.script.clone().unwrap_or_else(|| model.code.clone());

        // Execute
        let execution = self.sandbox.execute(source, host).await?;
        let mut host = execution.host;
        if let Err(e) = &execution.result {
            tracing::error!("Script for '{}' failed: {}", model_id, e);
            host.diagnostics_mut().error(DiagnosticSource::Script, e.to_string());
        }
        let output = host.finish();
        let parsed = !matches!(execution.result, Err(ScriptError::Syntax { .. }));

        // Reconcile
        let reconciled = if parsed {
            if let (RunMode::Commit, Some(script)) = (request.mode, &request.script) {
                self.store.save_script(model_id, script).await?;
            }
            let summary = Reconciler::new(&self.store)
                .reconcile(
                    model_id,
                    &output.input_records,
                    &model.inputs,
                    &output.variable_records,
                    &model.variables,
                )
                .await?;
            Some(summary)
        } else {
            tracing::warn!("Model '{}' not reconciled: script did not parse", model_id);
            None
        };

        let (status, sections) = match execution.result {
            Ok(()) => (RunStatus::Succeeded, output.sections),
            Err(_) => (RunStatus::Failed, Vec::new()),
        };
        let rows = flatten_sections(&sections);

        // Commit
        let committed = status == RunStatus::Succeeded && request.mode == RunMode::Commit;
        if committed {
            let snapshot = EstimateSnapshot {
                results: rows.clone(),
                form_values: output.form_values,
                calculated_at: chrono::Utc::now(),
            };
            self.store.save_estimate(model_id, snapshot).await?;
            tracing::info!("Committed {} result rows for '{}'", rows.len(), model_id);
        }

        let outcome = RunOutcome {
            model_id: request.model_id.clone(),
            mode: request.mode,
            status,
            sections,
            rows,
            diagnostics: output.diagnostics.into_vec(),
            lookups: output.lookups,
            reconciled,
            committed,
            error: execution.result.err(),
            duration: started.elapsed(),
        };
        tracing::info!(
            "Run of '{}' finished: {:?}, {} rows, {} lookup misses in {:?}",
            model_id,
            outcome.status,
            outcome.rows.len(),
            outcome.lookups.iter().filter(|l| !l.was_found).count(),
            outcome.duration
        );
        Ok(outcome)
    }
}

fn error_message<S: serde::Serializer>(error: &Option<ScriptError>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

fn millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
