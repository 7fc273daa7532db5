pub mod table;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use table::{value_to_text, Row, Table, TableRecord};

/// An identifier as read from a source dataset, together with its normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierRecord {
    /// The value exactly as it appeared in the source
    pub raw_id: String,
    /// The value used for index lookups
    pub normalized_id: String,
    /// Whether the raw value encodes several identifiers joined by a separator
    #[serde(default)]
    pub is_composite: bool,
    /// Normalized components of a composite identifier, in source order
    #[serde(default)]
    pub components: Vec<String>,
}

impl IdentifierRecord {
    pub fn simple(raw_id: impl Into<String>, normalized_id: impl Into<String>) -> Self {
        Self {
            raw_id: raw_id.into(),
            normalized_id: normalized_id.into(),
            is_composite: false,
            components: Vec::new(),
        }
    }

    pub fn composite(raw_id: impl Into<String>, normalized_id: impl Into<String>, components: Vec<String>) -> Self {
        Self {
            raw_id: raw_id.into(),
            normalized_id: normalized_id.into(),
            is_composite: true,
            components,
        }
    }
}

impl TableRecord for IdentifierRecord {
    const COLUMNS: &'static [&'static str] = &["raw_id", "normalized_id", "is_composite", "components"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Direct,
    Composite,
    ExternalResolved,
    Unmatched,
}

/// One source-to-target pairing produced by a matching stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    pub match_type: MatchType,
    pub confidence: f64,
    #[serde(default)]
    pub resolution_detail: Option<Value>,
}

impl MatchRecord {
    pub fn matched(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        match_type: MatchType,
        confidence: f64,
        resolution_detail: Option<Value>,
    ) -> Self {
        Self {
            source_id: Some(source_id.into()),
            target_id: Some(target_id.into()),
            match_type,
            confidence,
            resolution_detail,
        }
    }

    /// A source that no stage could place.
    pub fn unmatched(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            target_id: None,
            match_type: MatchType::Unmatched,
            confidence: 0.0,
            resolution_detail: None,
        }
    }
}

impl TableRecord for MatchRecord {
    const COLUMNS: &'static [&'static str] = &["source_id", "target_id", "match_type", "confidence", "resolution_detail"];
}

/// A match record annotated with its multiplicity relative to the whole mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    #[serde(flatten)]
    pub record: MatchRecord,
    /// The source maps to more than one distinct target
    pub is_one_to_many_source: bool,
    /// The target is reached from more than one distinct source
    pub is_one_to_many_target: bool,
    pub is_canonical: bool,
}

impl ReconciledRecord {
    pub fn unflagged(record: MatchRecord) -> Self {
        Self {
            record,
            is_one_to_many_source: false,
            is_one_to_many_target: false,
            is_canonical: false,
        }
    }
}

impl TableRecord for ReconciledRecord {
    const COLUMNS: &'static [&'static str] = &[
        "source_id",
        "target_id",
        "match_type",
        "confidence",
        "resolution_detail",
        "is_one_to_many_source",
        "is_one_to_many_target",
        "is_canonical",
    ];
}

/// How the authority service accounted for a queried identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    Primary,
    Secondary,
    Merged,
    Demerged,
    Obsolete,
    /// The authority gave no answer for this id (unknown to it, or unreachable)
    Unresolved,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionType::Primary => "primary",
            ResolutionType::Secondary => "secondary",
            ResolutionType::Merged => "merged",
            ResolutionType::Demerged => "demerged",
            ResolutionType::Obsolete => "obsolete",
            ResolutionType::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCacheEntry {
    pub query_id: String,
    pub resolved_id: Option<String>,
    pub resolution_type: ResolutionType,
    pub fetched_at: DateTime<Utc>,
}

impl ResolutionCacheEntry {
    pub fn new(query_id: impl Into<String>, resolved_id: Option<String>, resolution_type: ResolutionType) -> Self {
        Self {
            query_id: query_id.into(),
            resolved_id,
            resolution_type,
            fetched_at: Utc::now(),
        }
    }

    pub fn unresolved(query_id: impl Into<String>) -> Self {
        Self::new(query_id, None, ResolutionType::Unresolved)
    }
}
