//! Transitions and the two-phase firing state machine.
//!
//! Each firing attempt claims every consumer arc in order, then every
//! producer arc, stopping at the first refusal. If every claim succeeded the
//! requests are completed (consumers first, then producers); otherwise every
//! acquired request is disposed and nothing changes.
//!
//! Deposit admission does not look at the committed count, so a producer
//! into a full bounded place is admitted and then fails at commit. That
//! failure is a fatal [`NetError::Synchronization`]: requests completed
//! before it (all consumers, at least) stay committed and the rest are
//! released, so the consumed tokens are lost.
//!
//! The `period` gate only applies after a successful firing: a cancelled
//! attempt is retried on the very next tick.

use crate::arc::NetArc;
use crate::error::NetError;
use crate::handle::{NetId, PlaceId, TransitionId};
use crate::observer::{Observer, ObserverSet, Subscription};
use crate::place::{Place, Request};
use crate::token::Token;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;

/// Result of ticking a transition once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringOutcome {
    /// The tick counter was below the period; nothing was attempted.
    Idle,
    /// Every reservation succeeded and was committed.
    Committed,
    /// A reservation was refused; every acquired claim was released.
    Cancelled,
}

/// Signal emitted when a firing attempt reaches a terminal state.
///
/// The payload does not distinguish committed from cancelled attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEvent {
    pub transition: TransitionId,
}

/// Arc list replaced wholesale on every mutation.
///
/// Readers clone the current `Arc<Vec<_>>` and never observe a partially
/// built list.
struct ArcList<T: Token> {
    arcs: RwLock<Arc<Vec<NetArc<T>>>>,
}

impl<T: Token> ArcList<T> {
    fn new() -> Self {
        Self {
            arcs: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn snapshot(&self) -> Arc<Vec<NetArc<T>>> {
        Arc::clone(&self.arcs.read())
    }

    fn push(&self, arc: NetArc<T>) {
        let mut current = self.arcs.write();
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(arc);
        *current = Arc::new(next);
    }

    /// Keeps only the arcs matching `keep`, returning how many were dropped.
    fn retain(&self, keep: impl Fn(&NetArc<T>) -> bool) -> usize {
        let mut current = self.arcs.write();
        let next: Vec<NetArc<T>> = current.iter().filter(|arc| keep(arc)).cloned().collect();
        let removed = current.len() - next.len();
        if removed > 0 {
            *current = Arc::new(next);
        }
        removed
    }

    fn clear(&self) {
        *self.arcs.write() = Arc::new(Vec::new());
    }
}

struct FiringState<T: Token> {
    tick: u64,
    consumer_requests: Vec<Request<T>>,
    producer_requests: Vec<Request<T>>,
}

/// A schedulable unit moving tokens between places.
pub struct Transition<T: Token> {
    id: TransitionId,
    description: Option<String>,
    period: u64,
    consumers: ArcList<T>,
    producers: ArcList<T>,
    firing: Mutex<FiringState<T>>,
    observers: ObserverSet<TransitionEvent>,
}

impl<T: Token> Transition<T> {
    pub(crate) fn new(id: TransitionId, period: u64, description: Option<String>) -> Self {
        Self {
            id,
            description,
            period,
            consumers: ArcList::new(),
            producers: ArcList::new(),
            firing: Mutex::new(FiringState {
                tick: 0,
                consumer_requests: Vec::new(),
                producer_requests: Vec::new(),
            }),
            observers: ObserverSet::new(),
        }
    }

    pub fn id(&self) -> TransitionId {
        self.id
    }

    pub fn net_id(&self) -> NetId {
        self.id.net()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Minimum number of ticks between a successful firing and the next
    /// attempt.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Current value of the tick counter.
    pub fn tick_counter(&self) -> u64 {
        self.firing.lock().tick
    }

    /// Snapshot of the consumer arcs, in firing order.
    pub fn consumers(&self) -> Arc<Vec<NetArc<T>>> {
        self.consumers.snapshot()
    }

    /// Snapshot of the producer arcs, in firing order.
    pub fn producers(&self) -> Arc<Vec<NetArc<T>>> {
        self.producers.snapshot()
    }

    /// Appends an arc withdrawing `quantity` of `token` from `place`.
    pub fn add_consumer(
        &self,
        place: &Arc<Place<T>>,
        token: T,
        quantity: i64,
        description: Option<&str>,
    ) -> Result<&Self, NetError> {
        let arc = self.arc(place, token, quantity, description)?;
        self.consumers.push(arc);
        tracing::trace!("{} consumes from {}", self.id, place.id());
        Ok(self)
    }

    /// Appends an arc depositing `quantity` of `token` into `place`.
    pub fn add_producer(
        &self,
        place: &Arc<Place<T>>,
        token: T,
        quantity: i64,
        description: Option<&str>,
    ) -> Result<&Self, NetError> {
        let arc = self.arc(place, token, quantity, description)?;
        self.producers.push(arc);
        tracing::trace!("{} produces into {}", self.id, place.id());
        Ok(self)
    }

    /// Drops every arc referencing `place`. Returns the number removed.
    pub fn remove_all_arcs(&self, place: PlaceId) -> usize {
        self.consumers.retain(|arc| arc.place_id() != place)
            + self.producers.retain(|arc| arc.place_id() != place)
    }

    /// Registers an observer notified after every firing attempt.
    pub fn subscribe(&self, observer: Arc<dyn Observer<TransitionEvent>>) -> Subscription {
        self.observers.subscribe(observer)
    }

    /// Advances the transition by one tick.
    ///
    /// Must not be called by two threads at once; a concurrent call is
    /// reported as [`NetError::ConcurrentTick`].
    pub fn tick(&self) -> Result<FiringOutcome, NetError> {
        let mut guard = self
            .firing
            .try_lock()
            .ok_or(NetError::ConcurrentTick {
                transition: self.id,
            })?;

        if guard.tick < self.period {
            guard.tick += 1;
            return Ok(FiringOutcome::Idle);
        }

        let outcome = {
            let state = &mut *guard;
            let consumers = self.consumers.snapshot();
            let producers = self.producers.snapshot();

            let acquired = acquire(&consumers, NetArc::try_consume, &mut state.consumer_requests)
                && acquire(&producers, NetArc::try_produce, &mut state.producer_requests);

            if acquired {
                for request in state
                    .consumer_requests
                    .drain(..)
                    .chain(state.producer_requests.drain(..))
                {
                    request.complete()?;
                }
                state.tick = 0;
                FiringOutcome::Committed
            } else {
                for request in state
                    .consumer_requests
                    .drain(..)
                    .chain(state.producer_requests.drain(..))
                {
                    request.dispose();
                }
                state.tick = state.tick.saturating_add(1);
                FiringOutcome::Cancelled
            }
        };
        drop(guard);

        tracing::trace!("{} {:?}", self.id, outcome);
        self.observers.notify(&TransitionEvent {
            transition: self.id,
        });
        Ok(outcome)
    }

    /// Cancels any queued requests, clears both arc lists, and releases all
    /// observers.
    pub fn dispose(&self) {
        {
            let mut state = self.firing.lock();
            let state = &mut *state;
            for request in state
                .consumer_requests
                .drain(..)
                .chain(state.producer_requests.drain(..))
            {
                request.dispose();
            }
        }
        self.consumers.clear();
        self.producers.clear();
        self.observers.complete();
        tracing::debug!("Disposed {}", self.id);
    }

    fn arc(
        &self,
        place: &Arc<Place<T>>,
        token: T,
        quantity: i64,
        description: Option<&str>,
    ) -> Result<NetArc<T>, NetError> {
        NetArc::new(
            Arc::clone(place),
            self.id,
            token,
            quantity,
            description.map(str::to_string),
        )
    }
}

/// Claims one request per arc, stopping at the first refusal.
fn acquire<T: Token>(
    arcs: &[NetArc<T>],
    reserve: impl Fn(&NetArc<T>) -> Option<Request<T>>,
    queue: &mut Vec<Request<T>>,
) -> bool {
    for arc in arcs {
        match reserve(arc) {
            Some(request) => queue.push(request),
            None => return false,
        }
    }
    true
}

impl<T: Token> fmt::Debug for Transition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("period", &self.period)
            .field("consumers", &self.consumers.snapshot().len())
            .field("producers", &self.producers.snapshot().len())
            .finish()
    }
}
