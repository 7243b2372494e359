//! In-process request coalescing.
//!
//! Identical concurrent reads share one execution of the underlying query. The query runs on its own task, so it
//! completes (and populates the cache downstream) even if every caller loses interest. Entries live until shortly
//! after the query settles; a periodic sweep drops anything older than the max age that slipped through.
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::error::SharedResult;

type Outcome<V> = Option<SharedResult<V>>;

struct InFlight<V> {
    id:         u64,
    created_at: Instant,
    outcome:    watch::Receiver<Outcome<V>>,
}

struct Inner<V> {
    entries:        Mutex<HashMap<String, InFlight<V>>>,
    next_id:        AtomicU64,
    max_age:        Duration,
    grace:          Duration,
    sweep_interval: Duration,
}

impl<V> Inner<V> {
    // Only drop the entry we registered; a newer query may have taken the key over meanwhile.
    fn remove_if_current(&self, key: &str, id: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.id == id) {
            entries.remove(key);
        }
    }

    fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.created_at.elapsed() < self.max_age);
        before - entries.len()
    }
}

// Owned by the query task. Dropping it removes the entry before the outcome channel closes, so a panicking or
// aborted query never leaves behind an entry that callers would join.
struct Settlement<V> {
    inner: Arc<Inner<V>>,
    key:   String,
    id:    u64,
    tx:    watch::Sender<Outcome<V>>,
}

impl<V> Drop for Settlement<V> {
    fn drop(&mut self) {
        self.inner.remove_if_current(&self.key, self.id);
    }
}

pub struct RequestCoalescer<V> {
    inner:   Arc<Inner<V>>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<V> Clone for RequestCoalescer<V> {
    fn clone(&self) -> Self {
        Self {
            inner:   Arc::clone(&self.inner),
            sweeper: Arc::clone(&self.sweeper),
        }
    }
}

impl<V> RequestCoalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_age: Duration, grace: Duration, sweep_interval: Duration) -> Self {
        Self {
            inner:   Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                max_age,
                grace,
                sweep_interval,
            }),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.coalesce_max_age(),
            config.coalesce_grace(),
            config.sweep_interval(),
        )
    }

    /// Run `query` unless an identical one younger than the max age is already in flight, in which case its outcome
    /// is shared. Failures are shared too and are never remembered past the grace delay.
    pub async fn coalesce<F, Fut, E>(&self, key: &str, query: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Arc<CacheError>> + Send + 'static,
    {
        let mut outcome = {
            let mut entries = self.inner.entries.lock();
            let fresh = entries
                .get(key)
                .filter(|e| e.created_at.elapsed() < self.inner.max_age)
                .map(|e| e.outcome.clone());

            match fresh {
                Some(rx) => {
                    debug!("joining in-flight query '{key}'");
                    rx
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    entries.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            created_at: Instant::now(),
                            outcome: rx.clone(),
                        },
                    );

                    let fut = query();
                    let settlement = Settlement {
                        inner: Arc::clone(&self.inner),
                        key: key.to_string(),
                        id,
                        tx,
                    };
                    tokio::spawn(async move {
                        let result = fut.await.map_err(Into::into);
                        settlement.tx.send_replace(Some(result));
                        tokio::time::sleep(settlement.inner.grace).await;
                    });

                    debug!("started query '{key}'");
                    rx
                }
            }
        };

        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Arc::new(CacheError::Abandoned(key.to_string())))?;

        match &*settled {
            Some(result) => result.clone(),
            None => Err(Arc::new(CacheError::Abandoned(key.to_string()))),
        }
    }

    /// Start the periodic sweep. Calling it again while the sweep is running does nothing.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak: Weak<Inner<V>> = Arc::downgrade(&self.inner);
        let period = self.inner.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade()
                else {
                    break;
                };
                let purged = inner.sweep();
                if purged > 0 {
                    info!("coalescer sweep purged {purged} stale entries");
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Drop the entry for `key`, settled or not. Waiters already attached still get its outcome; the next call starts
    /// a fresh query. Returns true if there was an entry.
    pub fn forget(&self, key: &str) -> bool {
        let removed = self.inner.entries.lock().remove(key).is_some();
        if removed {
            debug!("forgot query '{key}'");
        }
        removed
    }

    /// Drop every entry older than the max age right away.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Debug for RequestCoalescer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("in_flight", &self.inner.entries.lock().len())
            .field("max_age", &self.inner.max_age)
            .finish()
    }
}
