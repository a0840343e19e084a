//! Cancellable multi-worker scan that streams duplicate groups.
//!
//! Layout of one scan:
//!
//! ```text
//! coordinator ──batches──▶ bounded channel ──▶ worker × N ──┐
//!      │                                          │         │
//!      │                                   Mutex<UnionFind> │
//!      └──terminal event──▶ event channel ◀──groups/progress┘
//!                                 │
//!                            sink thread ──▶ callback
//! ```
//!
//! Workers check the cancellation flag before every batch and drain the
//! remaining batches without scoring them once it is set. A batch that
//! panics is counted as failed and cancels the scan, so the terminal event
//! is still delivered with the groups found so far. Only the sink
//! thread calls the callback, so callbacks never run concurrently. The
//! coordinator and sink are joined by `ScanHandle::wait` (or on drop) and
//! workers are scoped to the coordinator, so no thread outlives the scan.

use crossbeam_channel::{bounded, unbounded, Sender};
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::blocking::ScanMode;
use crate::config::MatchConfig;
use crate::error::{EngineError, Result};
use crate::grouping::{group_from_component, AnchorResult, PreparedCatalog, UnionFind};
use crate::models::{validate_entries, CatalogEntry, DuplicateGroup, ScanStats};

/// Anchors per work unit
pub const DEFAULT_BATCH_SIZE: usize = 64;

// ============================================================================
// Cancellation and Accounting
// ============================================================================

/// Cooperative cancellation flag shared between a caller and one scan.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Count of scanner threads (coordinator, sink, workers) currently alive.
#[derive(Debug, Clone, Default)]
pub struct WorkerGauge(Arc<AtomicUsize>);

impl WorkerGauge {
    pub fn live(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> GaugeGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        GaugeGuard(Arc::clone(&self.0))
    }
}

/// Decrements the gauge when the owning thread ends, panics included.
struct GaugeGuard(Arc<AtomicUsize>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Events
// ============================================================================

/// State of a scan when it reached its terminal event.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    /// Authoritative groups known at the end, ordered by id
    pub groups: Vec<DuplicateGroup>,
    pub stats: ScanStats,
    pub batches_done: usize,
    pub batches_total: usize,
    /// Batches that panicked; any failure ends the scan as cancelled
    pub failed_batches: usize,
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Current membership of a group touched by a batch. Supersedes any
    /// earlier group sharing a member with it.
    Group(DuplicateGroup),
    Progress {
        batches_done: usize,
        batches_total: usize,
    },
    Completed(ScanSummary),
    Cancelled(ScanSummary),
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::Completed(_) | ScanEvent::Cancelled(_))
    }
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Completed(ScanSummary),
    Cancelled(ScanSummary),
}

impl ScanOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanOutcome::Cancelled(_))
    }

    pub fn summary(&self) -> &ScanSummary {
        match self {
            ScanOutcome::Completed(s) | ScanOutcome::Cancelled(s) => s,
        }
    }

    pub fn into_summary(self) -> ScanSummary {
        match self {
            ScanOutcome::Completed(s) | ScanOutcome::Cancelled(s) => s,
        }
    }

    fn to_event(&self) -> ScanEvent {
        match self {
            ScanOutcome::Completed(s) => ScanEvent::Completed(s.clone()),
            ScanOutcome::Cancelled(s) => ScanEvent::Cancelled(s.clone()),
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Running scan. Dropping it cancels the scan and joins its threads.
pub struct ScanHandle {
    token: CancellationToken,
    coordinator: Option<JoinHandle<ScanOutcome>>,
    sink: Option<JoinHandle<()>>,
}

impl ScanHandle {
    /// Request cancellation; the terminal event follows once in-flight
    /// batches finish.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.coordinator.as_ref().map_or(true, JoinHandle::is_finished)
            && self.sink.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the terminal event has been delivered.
    pub fn wait(mut self) -> Result<ScanOutcome> {
        let outcome = match self.coordinator.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| EngineError::ScannerSpawn("scan coordinator panicked".into())),
            None => Err(EngineError::ScannerSpawn("scan already joined".into())),
        };
        // The sink exits once the coordinator drops its event sender
        if let Some(sink) = self.sink.take() {
            sink.join()
                .map_err(|_| EngineError::ScannerSpawn("scan callback panicked".into()))?;
        }
        outcome
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        if self.coordinator.is_none() && self.sink.is_none() {
            return;
        }
        self.token.cancel();
        if let Some(handle) = self.coordinator.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.sink.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Worker-pool settings reused across scans.
#[derive(Debug, Clone)]
pub struct ParallelScanner {
    workers: usize,
    batch_size: usize,
    mode: ScanMode,
    gauge: WorkerGauge,
    #[cfg(test)]
    fail_batch: Option<usize>,
}

impl ParallelScanner {
    /// `workers == 0` uses the available parallelism.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            workers
        };
        Self {
            workers,
            batch_size: DEFAULT_BATCH_SIZE,
            mode: ScanMode::Blocked,
            gauge: WorkerGauge::default(),
            #[cfg(test)]
            fail_batch: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn gauge(&self) -> WorkerGauge {
        self.gauge.clone()
    }

    pub fn scan_parallel<F>(
        &self,
        entries: Vec<CatalogEntry>,
        config: &MatchConfig,
        on_event: F,
    ) -> Result<ScanHandle>
    where
        F: FnMut(ScanEvent) + Send + 'static,
    {
        self.scan_with_token(entries, config, CancellationToken::new(), on_event)
    }

    /// Start a scan controlled by a caller-owned token.
    ///
    /// Invalid config or entries are rejected here, before any thread starts.
    pub fn scan_with_token<F>(
        &self,
        entries: Vec<CatalogEntry>,
        config: &MatchConfig,
        token: CancellationToken,
        mut on_event: F,
    ) -> Result<ScanHandle>
    where
        F: FnMut(ScanEvent) + Send + 'static,
    {
        config.validate()?;
        validate_entries(&entries)?;

        let (event_tx, event_rx) = unbounded::<ScanEvent>();

        let sink_guard = self.gauge.enter();
        let sink = thread::Builder::new()
            .name("scan-sink".into())
            .spawn(move || {
                let _guard = sink_guard;
                for event in event_rx.iter() {
                    on_event(event);
                }
            })
            .map_err(|e| EngineError::ScannerSpawn(e.to_string()))?;

        let job = ScanJob {
            config: config.clone(),
            mode: self.mode,
            workers: self.workers,
            batch_size: self.batch_size,
            token: token.clone(),
            gauge: self.gauge.clone(),
            #[cfg(test)]
            fail_batch: self.fail_batch,
        };
        let coordinator_guard = self.gauge.enter();
        let coordinator = thread::Builder::new()
            .name("scan-coordinator".into())
            .spawn(move || {
                let _guard = coordinator_guard;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run(&entries, &event_tx)))
                    .unwrap_or_else(|_| {
                        tracing::error!("parallel scan aborted before its summary");
                        job.token.cancel();
                        ScanOutcome::Cancelled(ScanSummary {
                            groups: Vec::new(),
                            stats: ScanStats {
                                entries: entries.len(),
                                ..ScanStats::default()
                            },
                            batches_done: 0,
                            batches_total: 0,
                            failed_batches: 0,
                        })
                    });
                let _ = event_tx.send(outcome.to_event());
                outcome
            });

        let coordinator = match coordinator {
            Ok(handle) => handle,
            Err(e) => {
                // The event sender went down with the closure, so the sink exits
                let _ = sink.join();
                return Err(EngineError::ScannerSpawn(e.to_string()));
            }
        };

        Ok(ScanHandle {
            token,
            coordinator: Some(coordinator),
            sink: Some(sink),
        })
    }
}

// ============================================================================
// Scan Execution
// ============================================================================

struct ScanJob {
    config: MatchConfig,
    mode: ScanMode,
    workers: usize,
    batch_size: usize,
    token: CancellationToken,
    gauge: WorkerGauge,
    #[cfg(test)]
    fail_batch: Option<usize>,
}

/// Union-find and counters shared by the workers of one scan.
struct SharedState {
    uf: UnionFind,
    stats: ScanStats,
    batches_done: usize,
    failed_batches: usize,
}

fn lock(state: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScanJob {
    fn run(&self, entries: &[CatalogEntry], events: &Sender<ScanEvent>) -> ScanOutcome {
        let start = Instant::now();
        let catalog = PreparedCatalog::prepare(entries, &self.config, self.mode);
        let n = catalog.len();

        let batches: Vec<Range<usize>> = (0..n)
            .step_by(self.batch_size)
            .map(|s| s..(s + self.batch_size).min(n))
            .collect();
        let batches_total = batches.len();

        tracing::debug!(
            entries = n,
            batches = batches_total,
            workers = self.workers,
            "starting parallel scan"
        );

        let state = Mutex::new(SharedState {
            uf: UnionFind::new(n),
            stats: ScanStats::default(),
            batches_done: 0,
            failed_batches: 0,
        });

        let (batch_tx, batch_rx) = bounded::<Range<usize>>(self.workers);

        thread::scope(|scope| {
            let catalog = &catalog;
            let state = &state;
            let mut spawned = 0usize;

            for worker_idx in 0..self.workers {
                let rx = batch_rx.clone();
                let guard = self.gauge.enter();
                let handle = thread::Builder::new()
                    .name(format!("scan-worker-{worker_idx}"))
                    .spawn_scoped(scope, move || {
                        let _guard = guard;
                        // Keep draining after cancellation so the feeder never blocks
                        for batch in rx.iter() {
                            if self.token.is_cancelled() {
                                continue;
                            }
                            self.run_batch(batch, catalog, state, events, batches_total);
                        }
                    });
                match handle {
                    Ok(_) => spawned += 1,
                    Err(e) => tracing::warn!(worker = worker_idx, error = %e, "scan worker failed to start"),
                }
            }
            // Workers hold the only receivers now
            drop(batch_rx);

            if spawned == 0 {
                tracing::warn!("no scan workers started, scanning on the coordinator");
                drop(batch_tx);
                for batch in batches {
                    if self.token.is_cancelled() {
                        break;
                    }
                    self.run_batch(batch, catalog, state, events, batches_total);
                }
                return;
            }

            for batch in batches {
                if self.token.is_cancelled() || batch_tx.send(batch).is_err() {
                    break;
                }
            }
            drop(batch_tx);
        });

        let mut shared = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let groups: Vec<DuplicateGroup> = shared
            .uf
            .components()
            .iter()
            .map(|c| group_from_component(c, entries))
            .collect();

        let mut stats = shared.stats;
        stats.entries = n;
        stats.exhaustive = self.mode == ScanMode::Exhaustive;
        stats.groups = groups.len();
        stats.grouped_entries = groups.iter().map(DuplicateGroup::len).sum();
        stats.elapsed_seconds = start.elapsed().as_secs_f64();
        stats.log_phase("scan");

        let summary = ScanSummary {
            groups,
            stats,
            batches_done: shared.batches_done,
            batches_total,
            failed_batches: shared.failed_batches,
        };

        if self.token.is_cancelled() {
            tracing::info!(
                batches_done = summary.batches_done,
                batches_total,
                failed = summary.failed_batches,
                groups = summary.groups.len(),
                "parallel scan cancelled"
            );
            ScanOutcome::Cancelled(summary)
        } else {
            tracing::info!(groups = summary.groups.len(), "parallel scan completed");
            ScanOutcome::Completed(summary)
        }
    }

    /// Run one batch, turning a panic into a failed batch and a cancel.
    fn run_batch(
        &self,
        batch: Range<usize>,
        catalog: &PreparedCatalog<'_>,
        state: &Mutex<SharedState>,
        events: &Sender<ScanEvent>,
        batches_total: usize,
    ) {
        let start = batch.start;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_batch(batch, catalog, state, events, batches_total)
        }));
        if result.is_err() {
            tracing::error!(batch_start = start, "scan batch panicked, cancelling scan");
            self.token.cancel();
            lock(state).failed_batches += 1;
        }
    }

    /// Score one batch of anchors, then publish the groups it touched.
    fn process_batch(
        &self,
        batch: Range<usize>,
        catalog: &PreparedCatalog<'_>,
        state: &Mutex<SharedState>,
        events: &Sender<ScanEvent>,
        batches_total: usize,
    ) {
        #[cfg(test)]
        if self.fail_batch == Some(batch.start) {
            panic!("batch starting at {} failed", batch.start);
        }

        let result = batch
            .map(|anchor| catalog.scan_anchor(anchor, &self.config))
            .fold(AnchorResult::default(), AnchorResult::merge);

        // Events are sent under the lock so a group update never overtakes
        // a newer one from another worker
        let mut shared = lock(state);
        let mut roots: Vec<usize> = Vec::with_capacity(result.edges.len());
        for &(a, b) in &result.edges {
            shared.uf.union(a, b);
            roots.push(a);
        }
        let mut roots: Vec<usize> = roots.into_iter().map(|a| shared.uf.find(a)).collect();
        roots.sort_unstable();
        roots.dedup();

        for root in roots {
            let group = group_from_component(shared.uf.members(root), catalog.entries);
            let _ = events.send(ScanEvent::Group(group));
        }

        shared.stats.absorb(&result.stats);
        shared.batches_done += 1;
        let _ = events.send(ScanEvent::Progress {
            batches_done: shared.batches_done,
            batches_total,
        });
    }
}
