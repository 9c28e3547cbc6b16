pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod script;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::EngineConfig;

pub use adapters::{JsonFileStore, MemoryStore};
pub use core::{RunMode, RunOutcome, RunRequest, RunStatus, TakeoffEngine};
pub use script::ScriptError;
pub use utils::error::{EngineError, Result};
