use std::collections::HashMap;

use idmapper_core::{value_to_text, Result, Table};

use crate::pipeline::processing::normalize::IdentifierNormalizer;

/// Hash index from normalized key to the distinct target ids that produce it.
///
/// Lookups go through the same normalizer that built the index, so a resolved id
/// coming back from the authority service is compared on equal terms.
#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    entries: HashMap<String, Vec<String>>,
    normalizer: IdentifierNormalizer,
    target_count: usize,
}

impl TargetIndex {
    pub fn from_ids<'a, I>(ids: I, normalizer: IdentifierNormalizer) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = Self {
            entries: HashMap::new(),
            normalizer,
            target_count: 0,
        };
        for id in ids {
            index.insert(id);
        }
        index
    }

    /// Index one column of a target table. Null and blank cells are skipped.
    pub fn from_table(table: &Table, column: &str, normalizer: IdentifierNormalizer) -> Result<Self> {
        let values: Vec<String> = table.column_values(column)?.into_iter().filter_map(value_to_text).collect();
        Ok(Self::from_ids(values.iter().map(String::as_str), normalizer))
    }

    fn insert(&mut self, id: &str) {
        let Some(key) = self.normalizer.normalize_value(id) else {
            return;
        };
        let target = id.trim().to_string();
        let slot = self.entries.entry(key).or_default();
        if !slot.contains(&target) {
            slot.push(target);
            self.target_count += 1;
        }
    }

    /// Targets whose normalized form equals `key`. `key` must already be normalized.
    pub fn lookup(&self, key: &str) -> &[String] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Normalize `raw` with the index's own rules, then look it up.
    pub fn lookup_raw(&self, raw: &str) -> &[String] {
        match self.normalizer.normalize_value(raw) {
            Some(key) => self.lookup(&key),
            None => &[],
        }
    }

    pub fn normalizer(&self) -> &IdentifierNormalizer {
        &self.normalizer
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }
}
