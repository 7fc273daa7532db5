use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;

use idmapper_core::IdentifierRecord;

use crate::constants::DEFAULT_COMPOSITE_SEPARATOR;

static ISOFORM_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\d+$").unwrap());
static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\d+$").unwrap());

fn default_true() -> bool {
    true
}

fn default_separator() -> Option<String> {
    Some(DEFAULT_COMPOSITE_SEPARATOR.to_string())
}

/// How raw identifier strings are turned into lookup keys
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizationRules {
    /// Namespace prefixes removed from the front of an id (first match wins), e.g. `UniProtKB:`
    pub strip_prefixes: Vec<String>,
    /// Drop a trailing isoform marker such as `-2`
    pub strip_isoform: bool,
    /// Drop a trailing version marker such as `.3`
    pub strip_version: bool,
    #[serde(default = "default_true")]
    pub uppercase: bool,
    /// Separator used to detect composite ids; `None` disables composite detection
    #[serde(default = "default_separator")]
    pub composite_separator: Option<String>,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        Self {
            strip_prefixes: Vec::new(),
            strip_isoform: false,
            strip_version: false,
            uppercase: true,
            composite_separator: default_separator(),
        }
    }
}

/// Applies [`NormalizationRules`] to identifier values
#[derive(Debug, Clone, Default)]
pub struct IdentifierNormalizer {
    rules: NormalizationRules,
}

impl IdentifierNormalizer {
    pub fn new(rules: NormalizationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &NormalizationRules {
        &self.rules
    }

    /// Normalize a single (non-composite) value. Blank input yields `None`.
    pub fn normalize_value(&self, raw: &str) -> Option<String> {
        let mut value = raw.trim();
        if let Some(prefix) = self.rules.strip_prefixes.iter().find(|p| !p.is_empty() && value.starts_with(p.as_str())) {
            value = value[prefix.len()..].trim_start();
        }

        let mut value = value.to_string();
        if self.rules.strip_version {
            value = VERSION_SUFFIX.replace(&value, "").into_owned();
        }
        if self.rules.strip_isoform {
            value = ISOFORM_SUFFIX.replace(&value, "").into_owned();
        }
        if self.rules.uppercase {
            value = value.to_uppercase();
        }

        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Build the [`IdentifierRecord`] for a raw value, splitting composites into
    /// their normalized components.
    pub fn to_record(&self, raw: &str) -> Option<IdentifierRecord> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(separator) = self.rules.composite_separator.as_deref().filter(|s| !s.is_empty()) {
            if trimmed.contains(separator) {
                let components: Vec<String> = trimmed
                    .split(separator)
                    .filter_map(|part| self.normalize_value(part))
                    .collect();
                return match components.len() {
                    0 => None,
                    1 => Some(IdentifierRecord::simple(raw, components[0].clone())),
                    _ => {
                        let joined = components.join(separator);
                        Some(IdentifierRecord::composite(raw, joined, components))
                    }
                };
            }
        }

        self.normalize_value(trimmed).map(|normalized| IdentifierRecord::simple(raw, normalized))
    }

    /// Normalize a sequence of raw values. Blank values are skipped; repeated raw
    /// values are kept once, in first-seen order.
    pub fn normalize_all<'a, I>(&self, raw_values: I) -> Vec<IdentifierRecord>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.normalize_batch(raw_values).records
    }

    /// Like [`normalize_all`](Self::normalize_all), but also reports the non-blank
    /// raw values that normalized to nothing (a lone prefix, a bare separator).
    pub fn normalize_batch<'a, I>(&self, raw_values: I) -> NormalizedBatch
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        let mut batch = NormalizedBatch::default();
        for raw in raw_values {
            if !seen.insert(raw) {
                continue;
            }
            match self.to_record(raw) {
                Some(record) => batch.records.push(record),
                None if !raw.trim().is_empty() => batch.discarded.push(raw.to_string()),
                None => {}
            }
        }
        batch
    }
}

/// Records produced from a column, plus the raw values that yielded no identifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub records: Vec<IdentifierRecord>,
    pub discarded: Vec<String>,
}
