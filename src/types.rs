use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::key::KeyFamily;

/// Row selection for a count query. The default filter counts every item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub campus:        Option<String>,
    pub letter:        Option<char>,
    pub created_since: Option<DateTime<Utc>>,
}

impl ItemFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_campus<S: Into<String>>(campus: S) -> Self {
        Self {
            campus: Some(campus.into()),
            ..Self::default()
        }
    }

    pub fn created_since(since: DateTime<Utc>) -> Self {
        Self {
            created_since: Some(since),
            ..Self::default()
        }
    }

    pub fn with_letter(mut self, letter: char) -> Self {
        self.letter = Some(letter);
        self
    }

    pub fn is_unfiltered(&self) -> bool {
        self.campus.is_none() && self.letter.is_none() && self.created_since.is_none()
    }
}

/// Item columns an update may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    Title,
    Url,
    Letter,
    Campus,
}

impl ItemField {
    /// Whether a change of this column can move an item between count buckets.
    pub fn affects_counts(&self) -> bool {
        matches!(self, Self::Letter | Self::Campus)
    }
}

/// A committed write to the item table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemMutation {
    Created,
    Updated { fields: Vec<ItemField> },
    Deleted,
}

impl ItemMutation {
    pub fn updated<I: IntoIterator<Item = ItemField>>(fields: I) -> Self {
        Self::Updated {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn affects_counts(&self) -> bool {
        match self {
            Self::Created | Self::Deleted => true,
            Self::Updated { fields } => fields.iter().any(ItemField::affects_counts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampusCount {
    pub campus: String,
    pub count:  u64,
}

/// Snapshot displayed on the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_items:   u64,
    pub campus_counts: Vec<CampusCount>,
    pub recent_items:  u64,
    pub last_updated:  DateTime<Utc>,
}

/// Presence of a cached value per key family. Values themselves are never exposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CacheStats {
    pub families: BTreeMap<KeyFamily, bool>,
}

impl CacheStats {
    pub fn is_cached(&self, family: KeyFamily) -> bool {
        self.families.get(&family).copied().unwrap_or(false)
    }
}

/// What an invalidation pass managed to do. Failed evictions leave stale values behind until their TTL runs out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub evicted: Vec<KeyFamily>,
    pub failed:  Vec<(KeyFamily, String)>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
