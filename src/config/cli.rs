use crate::config::EngineConfig;
use crate::utils::error::{EngineError, Result};
use crate::utils::validation::{self, Validate};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "takeoff")]
#[command(about = "Run a takeoff model script and price its bill of materials")]
pub struct CliConfig {
    #[arg(long, help = "TOML configuration file")]
    pub config: Option<String>,

    #[arg(long, help = "Data directory of the JSON model store (overrides the config file)")]
    pub data_dir: Option<String>,

    #[arg(long, help = "Id of the takeoff model to run")]
    pub model: String,

    #[arg(long, help = "Script file to run instead of the stored script")]
    pub script: Option<String>,

    #[arg(long = "catalog", help = "Price list CSV file; repeat to merge several, later files win")]
    pub catalogs: Vec<String>,

    #[arg(long = "catalog-id", help = "Price list stored under the data directory")]
    pub catalog_ids: Vec<String>,

    #[arg(long = "input", help = "Submitted form value as NAME=VALUE; repeatable")]
    pub inputs: Vec<String>,

    #[arg(long, help = "Create the model when it does not exist yet (requires --script)")]
    pub create: bool,

    #[arg(long, help = "Preview results without storing them")]
    pub dry_run: bool,

    #[arg(long, help = "Script time limit in milliseconds (overrides the config file)")]
    pub timeout_ms: Option<u64>,

    #[arg(long, help = "Print the run outcome as JSON")]
    pub json: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliConfig {
    /// Config file settings with command line overrides applied.
    pub fn settings(&self) -> Result<EngineConfig> {
        let mut settings = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(data_dir) = &self.data_dir {
            settings.storage.data_dir = data_dir.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.sandbox.timeout_ms = timeout_ms;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn overrides(&self) -> Result<HashMap<String, String>> {
        self.inputs
            .iter()
            .map(|raw| validation::parse_override(raw))
            .collect()
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("model", &self.model)?;
        if let Some(script) = &self.script {
            validation::validate_path("script", script)?;
        }
        if self.create && self.script.is_none() {
            return Err(EngineError::MissingConfigError {
                field: "script".to_string(),
            });
        }
        for catalog in &self.catalogs {
            validation::validate_file_extension("catalog", catalog, &["csv"])?;
        }
        self.overrides()?;
        Ok(())
    }
}
