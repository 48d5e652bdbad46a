//! Two-tier save policy: debounced fast-tier saves, periodic slow-tier
//! saves, and a synchronous final flush on teardown.
//!
//! ```text
//!  mutation ──► FlushScheduler ── quiet for `debounce` ──► save_fast()
//!                    │                                     │ state > limit?
//!                    │                                     └──► save_slow()
//!                    └──── every `flush_interval` ────────────► save_slow()
//!
//!  last disconnect ──► shutdown scheduler ──► flush_now() = save_fast + save_slow
//! ```
//!
//! Every save failure is logged with document id, tier and byte size and
//! counted; nothing is retried beyond the next natural debounce or
//! periodic cycle.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::document::Document;
use crate::metrics::CoordinatorStats;
use crate::storage::{FastStore, PersistenceRecord, SlowStore, StoreError, Tier};

/// Where a room's initial state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationSource {
    Fast,
    Slow,
    Empty,
}

/// Front end over both storage tiers.
#[derive(Clone)]
pub struct PersistenceManager {
    fast: Arc<dyn FastStore>,
    slow: Arc<dyn SlowStore>,
    fast_tier_limit: usize,
    stats: Arc<CoordinatorStats>,
}

impl PersistenceManager {
    pub fn new(
        fast: Arc<dyn FastStore>,
        slow: Arc<dyn SlowStore>,
        fast_tier_limit: usize,
        stats: Arc<CoordinatorStats>,
    ) -> Self {
        Self {
            fast,
            slow,
            fast_tier_limit,
            stats,
        }
    }

    /// Load a document from the fast tier, falling back to the slow tier,
    /// falling back to an empty document. Never fails.
    pub async fn hydrate(&self, document_id: &str) -> (Document, HydrationSource) {
        let fast = self.fast.clone();
        let id = document_id.to_string();
        match blocking(move || fast.load(&id)).await {
            Ok(Some(state)) => match Document::from_state(&state) {
                Ok(doc) => {
                    log::info!(
                        "Hydrated doc {document_id} from fast tier ({} bytes)",
                        state.len()
                    );
                    return (doc, HydrationSource::Fast);
                }
                Err(e) => log::warn!(
                    "Fast-tier state for doc {document_id} is unreadable ({} bytes): {e}",
                    state.len()
                ),
            },
            Ok(None) => {}
            Err(e) => log::warn!("Fast-tier load failed for doc {document_id}: {e}"),
        }

        let slow = self.slow.clone();
        let id = document_id.to_string();
        match blocking(move || slow.load(&id)).await {
            Ok(Some(record)) => match Document::from_state(&record.state) {
                Ok(doc) => {
                    log::info!(
                        "Hydrated doc {document_id} from slow tier ({} bytes, updated_at {})",
                        record.state.len(),
                        record.updated_at
                    );
                    return (doc, HydrationSource::Slow);
                }
                Err(e) => log::warn!(
                    "Slow-tier state for doc {document_id} is unreadable ({} bytes): {e}",
                    record.state.len()
                ),
            },
            Ok(None) => {}
            Err(e) => log::warn!("Slow-tier load failed for doc {document_id}: {e}"),
        }

        log::info!("Starting doc {document_id} empty");
        (Document::new(), HydrationSource::Empty)
    }

    /// Save to the fast tier, or to the slow tier when the state exceeds
    /// the fast-tier limit. The size is re-evaluated on every call.
    ///
    /// Returns the tier that was written.
    pub async fn save_fast(&self, document_id: &str, state: Arc<Vec<u8>>) -> Result<Tier, StoreError> {
        let size = state.len();
        if size > self.fast_tier_limit {
            log::warn!(
                "State of doc {document_id} is {size} bytes (limit {}), saving to slow tier instead",
                self.fast_tier_limit
            );
            self.stats.size_fallback();
            return self.save_slow(document_id, state).await.map(|()| Tier::Slow);
        }

        let fast = self.fast.clone();
        let id = document_id.to_string();
        let bytes = state.clone();
        let result = blocking(move || fast.save(&id, &bytes)).await;
        self.record(document_id, Tier::Fast, size, &result);
        result.map(|()| Tier::Fast)
    }

    /// Upsert the full state into the slow tier.
    pub async fn save_slow(&self, document_id: &str, state: Arc<Vec<u8>>) -> Result<(), StoreError> {
        let size = state.len();
        let slow = self.slow.clone();
        let record = PersistenceRecord::new(document_id, state.to_vec());
        let result = blocking(move || slow.upsert(&record)).await;
        self.record(document_id, Tier::Slow, size, &result);
        result
    }

    /// One fast-tier save and one slow-tier save. When the fast-tier save
    /// was diverted to the slow tier, that write already is the slow save.
    ///
    /// Both tiers are attempted even if the first fails; the first error
    /// is returned.
    pub async fn flush_now(&self, document_id: &str, state: Vec<u8>) -> Result<(), StoreError> {
        let state = Arc::new(state);
        let fast = self.save_fast(document_id, state.clone()).await;
        match fast {
            Ok(Tier::Slow) => Ok(()),
            Ok(Tier::Fast) => self.save_slow(document_id, state).await,
            Err(e) => {
                let _ = self.save_slow(document_id, state).await;
                Err(e)
            }
        }
    }

    fn record(&self, document_id: &str, tier: Tier, size: usize, result: &Result<(), StoreError>) {
        match result {
            Ok(()) => {
                log::debug!("Saved doc {document_id} to {tier} tier ({size} bytes)");
                self.stats.persisted(tier, size, true);
            }
            Err(e) => {
                log::error!("Failed to save doc {document_id} to {tier} tier ({size} bytes): {e}");
                self.stats.persisted(tier, size, false);
            }
        }
    }
}

/// Run a storage call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

// ─── Scheduler ────────────────────────────────────────────────────────

/// Something that can hand out the current serialized document.
///
/// Returns `None` once the owner stopped accepting writes.
pub(crate) trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(&self) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

enum FlushSignal {
    Mutated,
    Shutdown,
}

/// Per-room timer task owning both the debounce deadline and the
/// periodic interval. All saves for a room run inside this one task, so
/// they never overlap; awaiting [`FlushScheduler::shutdown`] guarantees
/// no save is in flight afterwards.
pub struct FlushScheduler {
    signals: mpsc::UnboundedSender<FlushSignal>,
    task: JoinHandle<()>,
}

impl FlushScheduler {
    pub(crate) fn spawn<S: SnapshotSource>(
        document_id: Arc<str>,
        source: Weak<S>,
        persistence: PersistenceManager,
        debounce: Duration,
        flush_interval: Duration,
    ) -> Self {
        let (signals, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_scheduler(
            document_id,
            source,
            persistence,
            debounce,
            flush_interval,
            rx,
        ));
        Self { signals, task }
    }

    /// Restart the debounce window.
    pub fn notify_mutation(&self) {
        let _ = self.signals.send(FlushSignal::Mutated);
    }

    /// Cancel both timers and wait for any in-flight save to finish.
    pub async fn shutdown(self) {
        let _ = self.signals.send(FlushSignal::Shutdown);
        if let Err(e) = self.task.await {
            log::warn!("Flush scheduler ended abnormally: {e}");
        }
    }
}

async fn run_scheduler<S: SnapshotSource>(
    document_id: Arc<str>,
    source: Weak<S>,
    persistence: PersistenceManager,
    debounce: Duration,
    flush_interval: Duration,
    mut signals: mpsc::UnboundedReceiver<FlushSignal>,
) {
    let mut periodic = tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
    periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(FlushSignal::Mutated) => deadline = Some(Instant::now() + debounce),
                Some(FlushSignal::Shutdown) | None => break,
            },

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let state = match source.upgrade() {
                    Some(src) => src.snapshot().await,
                    None => break,
                };
                if let Some(state) = state {
                    // Failure is logged inside; the next cycle retries.
                    let _ = persistence.save_fast(&document_id, Arc::new(state)).await;
                }
            }

            _ = periodic.tick() => {
                let state = match source.upgrade() {
                    Some(src) => src.snapshot().await,
                    None => break,
                };
                if let Some(state) = state {
                    log::debug!("Periodic flush of doc {document_id}");
                    let _ = persistence.save_slow(&document_id, Arc::new(state)).await;
                }
            }
        }
    }

    log::debug!("Flush scheduler for doc {document_id} stopped");
}
