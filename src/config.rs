use std::time::Duration;

use fieldx::fxstruct;

use crate::error::CacheError;
use crate::error::Result;
use crate::key::KeyFamily;

/// Cache policy knobs. TTLs and coalescer timings are policy choices, not protocol requirements.
///
/// ```ignore
/// let config = CacheConfig::builder()
///     .campuses(vec!["North".to_string(), "South".to_string()])
///     .production(true)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
#[fxstruct(no_new, builder, get(copy))]
pub struct CacheConfig {
    /// Campuses counted individually, in the order they are reported.
    #[fieldx(get(clone), default(Vec::new()))]
    campuses: Vec<String>,

    #[fieldx(default(Duration::from_secs(30 * 60)))]
    total_count_ttl:    Duration,
    #[fieldx(default(Duration::from_secs(30 * 60)))]
    campus_counts_ttl:  Duration,
    #[fieldx(default(Duration::from_secs(5 * 60)))]
    recent_count_ttl:   Duration,
    #[fieldx(default(Duration::from_secs(5 * 60)))]
    health_count_ttl:   Duration,
    #[fieldx(default(Duration::from_secs(15 * 60)))]
    dashboard_ttl:      Duration,
    /// How far back an item still counts as recent.
    #[fieldx(default(chrono::Duration::days(7)))]
    recent_window:      chrono::Duration,

    /// In-flight queries older than this are never joined.
    #[fieldx(default(Duration::from_secs(5)))]
    coalesce_max_age:   Duration,
    /// Delay between a query settling and its coalescing entry being dropped.
    #[fieldx(default(Duration::from_millis(100)))]
    coalesce_grace:     Duration,
    #[fieldx(default(Duration::from_secs(60)))]
    sweep_interval:     Duration,

    /// Production instances warm the cache on start.
    #[fieldx(default(false))]
    production:         bool,
    #[fieldx(default(Duration::from_secs(5)))]
    warmup_delay:       Duration,
}

impl CacheConfig {
    /// Default policy for the given campus list.
    pub fn for_campuses<I, S>(campuses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder()
            .campuses(campuses.into_iter().map(Into::into).collect())
            .build()
            .map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn ttl_for(&self, family: KeyFamily) -> Duration {
        match family {
            KeyFamily::TotalCount => self.total_count_ttl(),
            KeyFamily::CampusCounts => self.campus_counts_ttl(),
            KeyFamily::RecentCount => self.recent_count_ttl(),
            KeyFamily::HealthCount => self.health_count_ttl(),
            KeyFamily::DashboardStats => self.dashboard_ttl(),
        }
    }
}
