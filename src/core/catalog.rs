use crate::domain::model::PriceCatalogEntry;
use indexmap::IndexMap;
use serde::Serialize;

/// A resolved unit price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Price {
    pub value: f64,
    pub currency: String,
}

impl Price {
    /// Returned for names the catalog does not know.
    pub fn missing() -> Self {
        Self {
            value: f64::NAN,
            currency: String::new(),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_nan()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LookupKind {
    Price,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupEntry {
    pub kind: LookupKind,
    pub name: String,
    pub was_found: bool,
}

/// Read-only price table for one run.
///
/// Lookups never fail. Every lookup is appended to the history so misses can be reported
/// after the run.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    items: IndexMap<String, PriceCatalogEntry>,
    history: Vec<LookupEntry>,
}

impl PriceCatalog {
    /// Builds a catalog from one or more price lists; a later entry replaces an earlier one
    /// with the same name.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = PriceCatalogEntry>,
    {
        let mut items = IndexMap::new();
        for entry in entries {
            if let Some(previous) = items.insert(entry.name.clone(), entry) {
                tracing::debug!("Price list entry '{}' overridden by a later list", previous.name);
            }
        }
        Self {
            items,
            history: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&mut self, name: &str) -> Price {
        let price = match self.items.get(name) {
            Some(item) => Price {
                value: item.unit_price,
                currency: item.currency.clone(),
            },
            None => Price::missing(),
        };

        if price.is_missing() {
            tracing::warn!("Price lookup miss: '{}'", name);
        } else {
            tracing::debug!("Price lookup hit: '{}' = {} {}", name, price.value, price.currency);
        }
        self.record(LookupKind::Price, name, !price.is_missing());
        price
    }

    pub fn category_items(&mut self, category: &str) -> Vec<PriceCatalogEntry> {
        let items: Vec<_> = self
            .items
            .values()
            .filter(|item| item.category == category)
            .cloned()
            .collect();

        if items.is_empty() {
            tracing::warn!("Category lookup miss: '{}'", category);
        } else {
            tracing::debug!("Category '{}' has {} items", category, items.len());
        }
        self.record(LookupKind::Category, category, !items.is_empty());
        items
    }

    pub fn history(&self) -> &[LookupEntry] {
        &self.history
    }

    pub fn into_history(self) -> Vec<LookupEntry> {
        self.history
    }

    fn record(&mut self, kind: LookupKind, name: &str, was_found: bool) {
        self.history.push(LookupEntry {
            kind,
            name: name.to_string(),
            was_found,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, price: f64, category: &str) -> PriceCatalogEntry {
        PriceCatalogEntry {
            name: name.to_string(),
            unit_price: price,
            currency: "USD".to_string(),
            category: category.to_string(),
            unit_type: None,
        }
    }

    #[test]
    fn missing_price_is_nan_sentinel() {
        let mut catalog = PriceCatalog::from_entries(vec![entry("2x4x8", 2.5, "lumber")]);

        let price = catalog.get("nonexistent");
        assert!(price.value.is_nan());
        assert_eq!(price.currency, "");

        let hit = catalog.get("2x4x8");
        assert_eq!(hit.value, 2.5);
        assert_eq!(hit.currency, "USD");

        assert_eq!(
            catalog.history(),
            &[
                LookupEntry {
                    kind: LookupKind::Price,
                    name: "nonexistent".to_string(),
                    was_found: false
                },
                LookupEntry {
                    kind: LookupKind::Price,
                    name: "2x4x8".to_string(),
                    was_found: true
                },
            ]
        );
    }

    #[test]
    fn later_lists_override_earlier_ones() {
        let mut catalog = PriceCatalog::from_entries(vec![
            entry("nail", 0.1, "fasteners"),
            entry("screw", 0.2, "fasteners"),
            entry("nail", 0.15, "fasteners"),
        ]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("nail").value, 0.15);
    }

    #[test]
    fn category_items_keep_catalog_order() {
        let mut catalog = PriceCatalog::from_entries(vec![
            entry("a", 1.0, "lumber"),
            entry("b", 2.0, "roofing"),
            entry("c", 3.0, "lumber"),
        ]);

        let names: Vec<_> = catalog
            .category_items("lumber")
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);

        assert!(catalog.category_items("plumbing").is_empty());
        assert_eq!(catalog.history().iter().filter(|e| !e.was_found).count(), 1);
    }
}
