pub mod catalog;
pub mod diagnostics;
pub mod dimensions;
pub mod engine;
pub mod host;
pub mod reconcile;
pub mod registry;
pub mod sandbox;
pub mod section;

pub use crate::domain::ports::{ConfigProvider, ModelStore};
pub use crate::utils::error::Result;
pub use engine::{RunMode, RunOutcome, RunRequest, RunStatus, TakeoffEngine};
