use std::sync::Arc;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use fieldx::fxstruct;
use garde::Validate;
use index_cache::db::SeaOrmStore;
use index_cache::store::RedisStore;
use index_cache::CacheConfig;
use index_cache::IndexCache;
use serde::Serialize;
use tracing::info;
use tracing::warn;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show which key families currently hold a cached value.
    Stats,
    /// Print the dashboard snapshot, serving it from cache when possible.
    Dashboard,
    /// Print every count the cache maintains.
    Counts,
    /// Populate total, per-campus and recent counts now.
    Warm,
    /// Evict every count-derived family.
    Invalidate,
    /// Create the index_items table if it is missing.
    InitDb,
    /// Keep the coalescer sweep and warm-up running until interrupted.
    Serve,
}

#[derive(Debug, Clone, clap::Parser, Validate)]
#[fxstruct(no_new, get(copy))]
#[clap(about, version, author, name = "index-cache")]
struct Cli {
    #[clap(subcommand)]
    #[fieldx(get(clone))]
    #[garde(skip)]
    command: Command,

    /// Redis URL of the shared cache.
    #[clap(long, env = "INDEX_CACHE_REDIS_URL", default_value = "redis://127.0.0.1:6379/")]
    #[fieldx(get(clone))]
    #[garde(length(min = 1))]
    redis_url: String,

    /// Database holding the index_items table.
    #[clap(long, env = "INDEX_CACHE_DATABASE_URL", default_value = "sqlite://index.db?mode=rwc")]
    #[fieldx(get(clone))]
    #[garde(length(min = 1))]
    database_url: String,

    /// Campuses counted individually, in display order. Comma-separated when given through the environment.
    #[clap(long = "campus", env = "INDEX_CACHE_CAMPUSES", value_delimiter = ',')]
    #[fieldx(get(clone))]
    #[garde(length(min = 1), inner(length(min = 1)))]
    campuses: Vec<String>,

    /// Run as a production instance: warm the cache shortly after start.
    #[clap(long, env = "INDEX_CACHE_PRODUCTION", default_value_t = false)]
    #[garde(skip)]
    production: bool,

    /// Warm-up delay after start, in seconds.
    #[clap(long, env = "INDEX_CACHE_WARMUP_DELAY", default_value_t = 5)]
    #[garde(skip)]
    warmup_delay: u64,

    /// TTL of total and per-campus counts, in seconds.
    #[clap(long, env = "INDEX_CACHE_COUNT_TTL", default_value_t = 30 * 60)]
    #[garde(range(min = 1))]
    count_ttl: u64,

    /// TTL of the recent and health counts, in seconds.
    #[clap(long, env = "INDEX_CACHE_SHORT_TTL", default_value_t = 5 * 60)]
    #[garde(range(min = 1))]
    short_ttl: u64,

    /// TTL of the dashboard snapshot, in seconds.
    #[clap(long, env = "INDEX_CACHE_DASHBOARD_TTL", default_value_t = 15 * 60)]
    #[garde(range(min = 1))]
    dashboard_ttl: u64,

    /// How many days back an item counts as recent.
    #[clap(long, env = "INDEX_CACHE_RECENT_DAYS", default_value_t = 7)]
    #[garde(range(min = 1))]
    recent_days: i64,
}

impl Cli {
    fn cache_config(&self) -> CliResult<CacheConfig> {
        Ok(CacheConfig::builder()
            .campuses(self.campuses())
            .production(self.production())
            .warmup_delay(Duration::from_secs(self.warmup_delay()))
            .total_count_ttl(Duration::from_secs(self.count_ttl()))
            .campus_counts_ttl(Duration::from_secs(self.count_ttl()))
            .recent_count_ttl(Duration::from_secs(self.short_ttl()))
            .health_count_ttl(Duration::from_secs(self.short_ttl()))
            .dashboard_ttl(Duration::from_secs(self.dashboard_ttl()))
            .recent_window(chrono::Duration::days(self.recent_days()))
            .build()
            .map_err(|e| e.to_string())?)
    }
}

fn setup_tracing() -> CliResult {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("index_cache=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(cli: Cli) -> CliResult {
    let store = Arc::new(SeaOrmStore::connect(&cli.database_url()).await?);

    // Schema setup must not depend on Redis being reachable.
    if let Command::InitDb = cli.command() {
        store.create_schema().await?;
        info!("index_items table is in place");
        return Ok(());
    }

    let kv = RedisStore::connect(&cli.redis_url()).await?;
    let cache = IndexCache::new(cli.cache_config()?, Arc::new(kv), store.clone());

    match cli.command() {
        Command::Stats => print_json(&cache.cache_stats().await)?,
        Command::Dashboard => print_json(&cache.dashboard_stats().await?)?,
        Command::Counts => {
            let (total, campuses, recent, health) = tokio::try_join!(
                cache.total_items_count(),
                cache.campus_items_counts(),
                cache.recent_items_count(),
                cache.health_items_count()
            )?;
            print_json(&serde_json::json!({
                "total": total,
                "campuses": campuses,
                "recent": recent,
                "health": health,
            }))?;
        }
        Command::Warm => {
            let report = cache.warm().await;
            for (family, err) in &report.failed {
                warn!("{family} not warmed: {err}");
            }
            println!("warmed: {:?}", report.warmed);
        }
        Command::Invalidate => {
            let report = cache.invalidate_item_caches().await;
            println!("evicted: {:?}", report.evicted);
            if !report.is_complete() {
                return Err(format!("failed to evict {:?}", report.failed).into());
            }
        }
        Command::Serve => {
            cache.start();
            info!("cache services running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            cache.stop();
        }
        Command::InitDb => store.create_schema().await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };

    if let Err(err) = cli.validate() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::InvalidValue, err).exit();
    }

    setup_tracing()?;
    execute(cli).await
}
