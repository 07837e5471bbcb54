//! Net registry and tick scheduler.
//!
//! The net owns the set of places and transitions and advances every
//! transition by one tick per round, either sequentially in registration
//! order or as a parallel fan-out on a rayon pool. Structural mutation is
//! rejected outright while a round is outstanding.

use crate::arc::NetArc;
use crate::cancel::CancelSignal;
use crate::error::NetError;
use crate::handle::{NetId, PlaceId, TransitionId};
use crate::place::{Place, UNBOUNDED};
use crate::token::Token;
use crate::transition::{FiringOutcome, Transition};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Worker threads for parallel ticks (0 = shared global rayon pool).
    pub worker_threads: usize,
    /// Name prefix for dedicated worker threads.
    pub thread_name_prefix: String,
}

impl NetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name_prefix: "petrel-tick".to_string(),
        }
    }
}

/// Firing outcomes of one tick round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub committed: usize,
    pub cancelled: usize,
    pub idle: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: FiringOutcome) {
        match outcome {
            FiringOutcome::Committed => self.committed += 1,
            FiringOutcome::Cancelled => self.cancelled += 1,
            FiringOutcome::Idle => self.idle += 1,
        }
    }

    /// Number of transitions that ran this round.
    pub fn total(&self) -> usize {
        self.committed + self.cancelled + self.idle
    }
}

#[derive(Default)]
struct SummaryCounter {
    committed: AtomicUsize,
    cancelled: AtomicUsize,
    idle: AtomicUsize,
}

impl SummaryCounter {
    fn record(&self, outcome: FiringOutcome) {
        let slot = match outcome {
            FiringOutcome::Committed => &self.committed,
            FiringOutcome::Cancelled => &self.cancelled,
            FiringOutcome::Idle => &self.idle,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> TickSummary {
        TickSummary {
            committed: self.committed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
        }
    }
}

/// Marks a round as outstanding for as long as it is alive.
struct TickGuard {
    flag: Arc<AtomicBool>,
}

impl TickGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, NetError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| NetError::TickInProgress { operation: "tick" })?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A Petri net: registry of places and transitions plus the scheduler.
pub struct Net<T: Token> {
    id: NetId,

    /// Places indexed by handle.
    places: DashMap<PlaceId, Arc<Place<T>>>,

    /// Transitions indexed by handle.
    transitions: DashMap<TransitionId, Arc<Transition<T>>>,

    /// Next handle sequence number, shared by places and transitions.
    next_seq: AtomicU64,

    /// Set while a tick round is outstanding.
    ticking: Arc<AtomicBool>,

    /// Dedicated worker pool; `None` uses the global rayon pool.
    pool: Option<rayon::ThreadPool>,
}

impl<T: Token> Net<T> {
    /// Creates an empty net that ticks on the global rayon pool.
    pub fn new() -> Self {
        Self {
            id: NetId::next(),
            places: DashMap::new(),
            transitions: DashMap::new(),
            next_seq: AtomicU64::new(1),
            ticking: Arc::new(AtomicBool::new(false)),
            pool: None,
        }
    }

    /// Creates an empty net with the given scheduler configuration.
    pub fn with_config(config: &NetConfig) -> Result<Self, NetError> {
        let mut net = Self::new();
        if config.worker_threads > 0 {
            let prefix = config.thread_name_prefix.clone();
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_threads)
                .thread_name(move |i| format!("{}-{}", prefix, i))
                .build()
                .map_err(|e| NetError::Scheduler(e.to_string()))?;
            net.pool = Some(pool);
        }
        Ok(net)
    }

    pub fn id(&self) -> NetId {
        self.id
    }

    /// Returns whether a tick round is outstanding.
    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::Acquire)
    }

    fn ensure_idle(&self, operation: &'static str) -> Result<(), NetError> {
        if self.is_ticking() {
            return Err(NetError::TickInProgress { operation });
        }
        Ok(())
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// Creates an unbounded place.
    pub fn create_place(&self, description: Option<&str>) -> Result<Arc<Place<T>>, NetError> {
        self.create_place_with_capacity(description, UNBOUNDED)
    }

    /// Creates a place holding at most `capacity` total volume.
    pub fn create_place_with_capacity(
        &self,
        description: Option<&str>,
        capacity: u64,
    ) -> Result<Arc<Place<T>>, NetError> {
        self.ensure_idle("create_place")?;

        let id = PlaceId::new(self.id, self.next_seq());
        let place = Arc::new(Place::new(
            id,
            description.map(str::to_string),
            capacity,
        ));
        self.places.insert(id, Arc::clone(&place));

        tracing::debug!("Created {} (capacity={})", id, capacity);
        Ok(place)
    }

    /// Creates a transition with the given period.
    pub fn create_transition(
        &self,
        period: u64,
        description: Option<&str>,
    ) -> Result<Arc<Transition<T>>, NetError> {
        self.ensure_idle("create_transition")?;

        let id = TransitionId::new(self.id, self.next_seq());
        let transition = Arc::new(Transition::new(
            id,
            period,
            description.map(str::to_string),
        ));
        self.transitions.insert(id, Arc::clone(&transition));

        tracing::debug!("Created {} (period={})", id, period);
        Ok(transition)
    }

    /// Returns whether `place` could be removed right now.
    pub fn can_remove(&self, place: PlaceId) -> Result<bool, NetError> {
        self.ensure_idle("can_remove")?;
        let place = self.place(place).ok_or(NetError::PlaceNotFound { place })?;
        Ok(place.is_empty())
    }

    /// Removes an empty place and purges every arc referencing it.
    pub fn remove_place(&self, place: PlaceId) -> Result<Arc<Place<T>>, NetError> {
        self.ensure_idle("remove_place")?;

        let existing = self.place(place).ok_or(NetError::PlaceNotFound { place })?;
        if !existing.is_empty() {
            return Err(NetError::PlaceNotEmpty { place });
        }

        let (_, removed) = self
            .places
            .remove(&place)
            .ok_or(NetError::PlaceNotFound { place })?;
        removed.dispose();

        let mut purged = 0;
        for entry in self.transitions.iter() {
            purged += entry.value().remove_all_arcs(place);
        }

        tracing::debug!("Removed {} ({} arcs purged)", place, purged);
        Ok(removed)
    }

    /// Removes a transition. Its arcs go with it.
    pub fn remove_transition(
        &self,
        transition: TransitionId,
    ) -> Result<Arc<Transition<T>>, NetError> {
        self.ensure_idle("remove_transition")?;

        let (_, removed) = self
            .transitions
            .remove(&transition)
            .ok_or(NetError::TransitionNotFound { transition })?;
        removed.dispose();

        tracing::debug!("Removed {}", transition);
        Ok(removed)
    }

    pub fn contains_place(&self, place: PlaceId) -> bool {
        self.places.contains_key(&place)
    }

    pub fn contains_transition(&self, transition: TransitionId) -> bool {
        self.transitions.contains_key(&transition)
    }

    pub fn place(&self, place: PlaceId) -> Option<Arc<Place<T>>> {
        self.places.get(&place).map(|r| Arc::clone(r.value()))
    }

    pub fn transition(&self, transition: TransitionId) -> Option<Arc<Transition<T>>> {
        self.transitions
            .get(&transition)
            .map(|r| Arc::clone(r.value()))
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn place_count(&self) -> usize {
        self.places.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Point-in-time list of places, in registration order.
    pub fn places(&self) -> Vec<Arc<Place<T>>> {
        let mut places: Vec<_> = self.places.iter().map(|r| Arc::clone(r.value())).collect();
        places.sort_by_key(|p| p.id());
        places
    }

    /// Point-in-time list of transitions, in registration order.
    pub fn transitions(&self) -> Vec<Arc<Transition<T>>> {
        let mut transitions: Vec<_> = self
            .transitions
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        transitions.sort_by_key(|t| t.id());
        transitions
    }

    /// Committed token counts summed over every place.
    pub fn aggregate_token_counts(&self) -> HashMap<T, i64> {
        let mut totals: HashMap<T, i64> = HashMap::new();
        for entry in self.places.iter() {
            for (token, count) in entry.value().tokens() {
                *totals.entry(token).or_default() += count;
            }
        }
        totals
    }

    /// Committed token counts per place.
    pub fn marking(&self) -> HashMap<PlaceId, Vec<(T, i64)>> {
        self.places
            .iter()
            .map(|r| (*r.key(), r.value().tokens()))
            .collect()
    }

    /// Every producer arc of every transition.
    pub fn producers(&self) -> Vec<NetArc<T>> {
        self.transitions()
            .iter()
            .flat_map(|t| t.producers().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Every consumer arc of every transition.
    pub fn consumers(&self) -> Vec<NetArc<T>> {
        self.transitions()
            .iter()
            .flat_map(|t| t.consumers().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Ticks every transition on the calling thread, in registration order.
    pub fn tick(&self) -> Result<TickSummary, NetError> {
        let _guard = TickGuard::acquire(&self.ticking)?;

        let mut summary = TickSummary::default();
        for transition in self.transitions() {
            summary.record(transition.tick()?);
        }

        tracing::debug!(
            "Tick complete: committed={} cancelled={} idle={}",
            summary.committed,
            summary.cancelled,
            summary.idle
        );
        Ok(summary)
    }

    /// Ticks every transition as a parallel fan-out and waits for it.
    ///
    /// `cancel` is checked before each transition's unit of work. A round
    /// that does not run every transition fails as a whole.
    pub fn tick_parallel(&self, cancel: &CancelSignal) -> Result<TickSummary, NetError> {
        let _guard = TickGuard::acquire(&self.ticking)?;
        self.run_parallel(cancel)
    }

    /// Runs [`tick_parallel`](Net::tick_parallel) on tokio's blocking pool.
    ///
    /// The net counts as ticking from the moment this is called until the
    /// round finishes, even if the returned future is dropped early.
    pub async fn tick_async(self: &Arc<Self>, cancel: CancelSignal) -> Result<TickSummary, NetError> {
        let guard = TickGuard::acquire(&self.ticking)?;
        let net = Arc::clone(self);

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            net.run_parallel(&cancel)
        })
        .await
        .map_err(|e| NetError::Scheduler(format!("tick task failed: {}", e)))?
    }

    fn run_parallel(&self, cancel: &CancelSignal) -> Result<TickSummary, NetError> {
        let transitions = self.transitions();
        let total = transitions.len();
        let counter = SummaryCounter::default();

        let result = self.install(|| {
            transitions
                .par_iter()
                .try_for_each(|transition| -> Result<(), Option<NetError>> {
                    if cancel.is_cancelled() {
                        return Err(None);
                    }
                    let outcome = transition.tick().map_err(Some)?;
                    counter.record(outcome);
                    Ok(())
                })
        });

        let summary = counter.summary();
        let completed = summary.total();
        match result {
            Ok(()) if completed == total => {
                tracing::debug!(
                    "Parallel tick complete: committed={} cancelled={} idle={}",
                    summary.committed,
                    summary.cancelled,
                    summary.idle
                );
                Ok(summary)
            }
            // Every unit that returned Ok recorded its outcome; a mismatch
            // means the counters drifted.
            Ok(()) => {
                tracing::error!("Tick incomplete: {} of {} transitions ran", completed, total);
                Err(NetError::TickIncomplete { completed, total })
            }
            Err(None) => {
                tracing::warn!("Tick cancelled after {} of {} transitions", completed, total);
                Err(NetError::Cancelled { completed, total })
            }
            Err(Some(e)) => {
                tracing::error!("Tick aborted: {}", e);
                Err(e)
            }
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl<T: Token> Default for Net<T> {
    fn default() -> Self {
        Self::new()
    }
}
