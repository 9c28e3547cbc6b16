use crate::utils::error::{EngineError, Result};

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_file_extension(field_name: &str, file: &str, allowed_extensions: &[&str]) -> Result<()> {
    match std::path::Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some(extension) if allowed_extensions.contains(&extension) => Ok(()),
        Some(extension) => Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: file.to_string(),
            reason: format!(
                "Unsupported file extension: {}. Allowed extensions: {}",
                extension,
                allowed_extensions.join(", ")
            ),
        }),
        None => Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: file.to_string(),
            reason: "File has no extension or invalid filename".to_string(),
        }),
    }
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// Parses a `name=value` override passed on the command line.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| EngineError::InvalidConfigValueError {
            field: "input".to_string(),
            value: raw.to_string(),
            reason: "Expected NAME=VALUE".to_string(),
        })?;
    validate_non_empty_string("input", name)?;
    Ok((name.trim().to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("storage.data_dir", "./data").is_ok());
        assert!(validate_path("storage.data_dir", "").is_err());
        assert!(validate_path("storage.data_dir", "bad\0path").is_err());
    }

    #[test]
    fn test_validate_file_extension() {
        assert!(validate_file_extension("catalog", "prices.csv", &["csv"]).is_ok());
        assert!(validate_file_extension("catalog", "prices.xlsx", &["csv"]).is_err());
        assert!(validate_file_extension("catalog", "prices", &["csv"]).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("sandbox.timeout_ms", 3000u64, 1, 600_000).is_ok());
        assert!(validate_range("sandbox.timeout_ms", 0u64, 1, 600_000).is_err());
    }

    #[test]
    fn test_parse_override() {
        let (name, value) = parse_override("width=30").unwrap();
        assert_eq!(name, "width");
        assert_eq!(value, "30");

        let (_, value) = parse_override("note=a=b").unwrap();
        assert_eq!(value, "a=b");

        assert!(parse_override("width").is_err());
        assert!(parse_override("=3").is_err());
    }
}
