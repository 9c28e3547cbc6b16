use crate::core::catalog::PriceCatalog;
use crate::domain::model::{EstimateLineItem, EstimateSection};

/// Accumulates priced line items into named sections, in creation order.
#[derive(Debug, Clone, Default)]
pub struct SectionBuilder {
    sections: Vec<EstimateSection>,
}

impl SectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new section and returns its handle. Names need not be unique.
    pub fn create(&mut self, name: &str) -> usize {
        self.sections.push(EstimateSection::new(name));
        self.sections.len() - 1
    }

    pub fn name(&self, section: usize) -> Option<&str> {
        self.sections.get(section).map(|s| s.name.as_str())
    }

    pub fn get(&self, section: usize) -> Option<&EstimateSection> {
        self.sections.get(section)
    }

    /// Prices the part against `catalog` now and appends it.
    ///
    /// The total is fixed at this point; a miss yields NaN price and total.
    pub fn add_part(
        &mut self,
        section: usize,
        name: &str,
        quantity: f64,
        price_lookup_key: &str,
        catalog: &mut PriceCatalog,
    ) -> Option<&EstimateLineItem> {
        let target = self.sections.get_mut(section)?;
        let price = catalog.get(price_lookup_key);
        let item = EstimateLineItem {
            name: name.to_string(),
            quantity,
            price_lookup_key: price_lookup_key.to_string(),
            unit_price: price.value,
            currency: price.currency,
            total: quantity * price.value,
        };
        tracing::debug!(
            "{} / {}: {} x {} = {}",
            target.name,
            item.name,
            item.quantity,
            item.unit_price,
            item.total
        );
        target.parts.push(item);
        target.parts.last()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn into_sections(self) -> Vec<EstimateSection> {
        self.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::PriceCatalogEntry;

    fn catalog(price: f64) -> PriceCatalog {
        PriceCatalog::from_entries(vec![PriceCatalogEntry {
            name: "x".to_string(),
            unit_price: price,
            currency: "USD".to_string(),
            category: "misc".to_string(),
            unit_type: None,
        }])
    }

    #[test]
    fn totals_are_fixed_when_the_part_is_added() {
        let mut builder = SectionBuilder::new();
        let section = builder.create("Misc");

        let mut first = catalog(2.5);
        builder.add_part(section, "Widget", 10.0, "x", &mut first);

        let mut repriced = catalog(99.0);
        builder.add_part(section, "Widget again", 1.0, "x", &mut repriced);

        let sections = builder.into_sections();
        assert_eq!(sections[0].parts[0].total, 25.0);
        assert_eq!(sections[0].parts[1].total, 99.0);
    }

    #[test]
    fn unknown_keys_produce_nan_totals() {
        let mut builder = SectionBuilder::new();
        let section = builder.create("Misc");
        let mut prices = catalog(1.0);

        let item = builder
            .add_part(section, "Mystery", 3.0, "missing", &mut prices)
            .cloned()
            .unwrap();
        assert!(item.total.is_nan());
        assert_eq!(item.currency, "");
    }

    #[test]
    fn unknown_section_handle_is_rejected() {
        let mut builder = SectionBuilder::new();
        let mut prices = catalog(1.0);
        assert!(builder.add_part(7, "Nope", 1.0, "x", &mut prices).is_none());
    }
}
