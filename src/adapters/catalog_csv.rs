use crate::domain::model::PriceCatalogEntry;
use crate::utils::error::{EngineError, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceRow {
    name: String,
    #[serde(default)]
    unit_type: Option<String>,
    #[serde(default)]
    price_per_unit: Option<f64>,
    #[serde(default)]
    unit_price: Option<f64>,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    category: String,
}

/// Reads a price list CSV with a header row.
///
/// Headers are matched case- and separator-insensitively, so `Price Per Unit`,
/// `price_per_unit` and `pricePerUnit` are the same column.
pub fn read_price_list<R: Read>(reader: R) -> Result<Vec<PriceCatalogEntry>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: StringRecord = reader.headers()?.iter().map(camel_case).collect();
    reader.set_headers(headers);

    let mut entries = Vec::new();
    for (index, row) in reader.deserialize::<PriceRow>().enumerate() {
        let row = row?;
        // Header is line 1.
        let line = index + 2;
        if row.name.is_empty() {
            return Err(EngineError::ValidationError {
                message: format!("price list line {}: missing name", line),
            });
        }
        let unit_price = row.price_per_unit.or(row.unit_price).ok_or_else(|| {
            EngineError::ValidationError {
                message: format!("price list line {}: '{}' has no price", line, row.name),
            }
        })?;

        entries.push(PriceCatalogEntry {
            name: row.name,
            unit_price,
            currency: row.currency,
            category: row.category,
            unit_type: row.unit_type.filter(|unit| !unit.is_empty()),
        });
    }

    tracing::debug!("Read {} price list entries", entries.len());
    Ok(entries)
}

pub fn read_price_list_file<P: AsRef<Path>>(path: P) -> Result<Vec<PriceCatalogEntry>> {
    let file = std::fs::File::open(path.as_ref())?;
    read_price_list(file)
}

/// `Price Per Unit` / `price_per_unit` / `PricePerUnit` -> `pricePerUnit`.
fn camel_case(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let words = header
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty());
    for (i, word) in words.enumerate() {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if i == 0 {
                out.extend(first.to_lowercase());
            } else {
                out.extend(first.to_uppercase());
            }
            out.push_str(chars.as_str());
        }
    }
    out
}
