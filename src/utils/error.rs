use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Takeoff model not found: {model_id}")]
    ModelNotFound { model_id: String },

    #[error("Price catalog not found: {catalog_id}")]
    CatalogNotFound { catalog_id: String },

    #[error("Persistence error: {message}")]
    PersistenceError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Sandbox worker failed: {message}")]
    WorkerError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Storage,
    Data,
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit code for a failed run; never zero.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Low => 5,
            Self::Medium => 2,
            Self::High => 1,
            Self::Critical => 3,
        }
    }
}

impl EngineError {
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::IoError(_)
            | Self::PersistenceError { .. }
            | Self::ModelNotFound { .. }
            | Self::CatalogNotFound { .. } => ErrorCategory::Storage,
            Self::CsvError(_) | Self::SerializationError(_) | Self::ValidationError { .. } => {
                ErrorCategory::Data
            }
            Self::WorkerError { .. } => ErrorCategory::Runtime,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ValidationError { .. } => ErrorSeverity::Low,
            Self::ModelNotFound { .. } | Self::CatalogNotFound { .. } => ErrorSeverity::Medium,
            Self::PersistenceError { .. } | Self::WorkerError { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::ModelNotFound { model_id } => {
                format!("Takeoff model '{}' does not exist", model_id)
            }
            Self::CatalogNotFound { catalog_id } => {
                format!("Price list '{}' does not exist", catalog_id)
            }
            Self::PersistenceError { .. } => {
                "The calculation ran but its input schema could not be saved".to_string()
            }
            Self::CsvError(_) => "A price list file could not be read".to_string(),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the configuration file and CLI flags",
            ErrorCategory::Storage => match self {
                Self::PersistenceError { .. } => {
                    "Re-run the model once storage is available; the next run depends on the saved schema"
                }
                _ => "Check that the data directory and model id are correct",
            },
            ErrorCategory::Data => "Check the price list and model files for malformed rows",
            ErrorCategory::Runtime => "Retry the run; if it keeps failing report the script",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_errors_are_critical() {
        let err = EngineError::persistence("disk full");
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn every_failure_exits_non_zero() {
        let err = EngineError::ValidationError {
            message: "row 3: unit price is not a number".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Low);
        assert_ne!(err.severity().exit_code(), 0);
        for severity in [ErrorSeverity::Low, ErrorSeverity::Medium, ErrorSeverity::High, ErrorSeverity::Critical] {
            assert_ne!(severity.exit_code(), 0);
        }
    }

    #[test]
    fn config_errors_point_at_configuration() {
        let err = EngineError::MissingConfigError {
            field: "sandbox.timeout_ms".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(
            err.recovery_suggestion(),
            "Check the configuration file and CLI flags"
        );
    }
}
