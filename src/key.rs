//! Cache key families and canonical request keys.
//!
//! Key names follow the `cache:<domain>:<qualifier>` convention so operators can inspect them with plain
//! key-value store tooling.
use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;
use strum::EnumIter;
use strum::IntoStaticStr;

const REQUEST_KEY_DELIMITER: &str = "|";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeyFamily {
    TotalCount,
    CampusCounts,
    RecentCount,
    HealthCount,
    DashboardStats,
}

impl KeyFamily {
    pub fn key(&self) -> &'static str {
        match self {
            Self::TotalCount => "cache:count:total_items",
            Self::CampusCounts => "cache:count:campus_items",
            Self::RecentCount => "cache:count:recent_items",
            Self::HealthCount => "cache:health:item_count",
            Self::DashboardStats => "cache:dashboard:stats",
        }
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Every family currently derives from item row counts. A family that doesn't must return false here so
    /// item writes leave it alone.
    pub fn is_count_derived(&self) -> bool {
        match self {
            Self::TotalCount | Self::CampusCounts | Self::RecentCount | Self::HealthCount | Self::DashboardStats => {
                true
            }
        }
    }
}

impl Display for KeyFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the canonical coalescing key out of request parameters: names are sorted and `name:value` pairs are joined
/// with `|`. Parameter order never matters.
pub fn request_key<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Display,
{
    let mut pairs = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.to_string()))
        .collect::<Vec<_>>();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(REQUEST_KEY_DELIMITER)
}
