//! Places and the token reservation protocol.
//!
//! A place keeps, per token kind, a committed count and a reserved count of
//! outstanding withdrawal claims. Both live in atomics and are only ever
//! changed through read-validate-exchange loops, so any number of
//! transitions may reserve against the same place at once without a lock.
//!
//! Admission rules for `try_reserve(token, delta)`:
//!
//! - `delta >= 0` (deposit): admitted when `(reserved + delta) * volume`
//!   fits the capacity and the committed count plus `delta` does not
//!   overflow. The reserved count is left as is.
//! - `delta < 0` (withdrawal): admitted when the committed count covers
//!   `reserved - delta`; the reserved count is advanced to that value in the
//!   same exchange that validated it.
//!
//! Deposits are therefore not fenced against each other. Their commit
//! re-validates the capacity bound and reports a synchronisation failure
//! rather than ever storing an out-of-bounds count.

use crate::error::NetError;
use crate::handle::{NetId, PlaceId};
use crate::observer::{Observer, ObserverSet, Subscription};
use crate::token::Token;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Capacity of a place created without an explicit bound.
pub const UNBOUNDED: u64 = u64::MAX;

/// Signal emitted whenever a committed count changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceEvent<T> {
    pub place: PlaceId,
    pub token: T,
    pub count: i64,
}

#[derive(Debug, Default)]
struct TokenAccount {
    committed: AtomicI64,
    reserved: AtomicI64,
}

/// A resource pool holding countable tokens.
pub struct Place<T: Token> {
    id: PlaceId,
    description: Option<String>,
    capacity: u64,
    accounts: DashMap<T, Arc<TokenAccount>>,
    blocked: AtomicBool,
    observers: ObserverSet<PlaceEvent<T>>,
}

impl<T: Token> Place<T> {
    pub(crate) fn new(id: PlaceId, description: Option<String>, capacity: u64) -> Self {
        Self {
            id,
            description,
            capacity,
            accounts: DashMap::new(),
            blocked: AtomicBool::new(false),
            observers: ObserverSet::new(),
        }
    }

    pub fn id(&self) -> PlaceId {
        self.id
    }

    /// Returns the net this place is bound to.
    pub fn net_id(&self) -> NetId {
        self.id.net()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Maximum total volume this place may hold.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity != UNBOUNDED
    }

    /// Reserves and immediately completes a change of `count` tokens.
    ///
    /// Returns `Ok(false)` if the reservation was refused.
    pub fn add_token(self: &Arc<Self>, token: &T, count: i64) -> Result<bool, NetError> {
        match self.try_reserve(token, count) {
            Some(request) => {
                request.complete()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Attempts to claim a change of `delta` tokens.
    ///
    /// Returns `None` when the place is blocked or the admission test fails.
    /// The returned request must be completed or disposed; dropping it
    /// disposes it.
    pub fn try_reserve(self: &Arc<Self>, token: &T, delta: i64) -> Option<Request<T>> {
        if self.is_blocked() {
            return None;
        }

        let volume = i128::from(token.volume().get());
        let account = self.account(token);

        loop {
            let committed = account.committed.load(Ordering::Acquire);
            let reserved = account.reserved.load(Ordering::Acquire);

            let next = if delta >= 0 {
                if !self.fits(i128::from(reserved) + i128::from(delta), volume) {
                    return None;
                }
                // A count that can not be represented is refused like a full place.
                committed.checked_add(delta)?;
                reserved
            } else {
                let next = reserved.checked_sub(delta)?;
                if committed < next {
                    return None;
                }
                next
            };

            if account
                .reserved
                .compare_exchange(reserved, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        Some(Request {
            place: Arc::clone(self),
            token: token.clone(),
            account,
            delta,
            live: true,
        })
    }

    /// Returns the committed count of `token`.
    ///
    /// This is a point-in-time read, not synchronised with in-flight
    /// reservations.
    pub fn get_token_count(&self, token: &T) -> i64 {
        self.accounts
            .get(token)
            .map(|r| r.committed.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Returns the outstanding withdrawal claims on `token`.
    pub fn reserved_count(&self, token: &T) -> i64 {
        self.accounts
            .get(token)
            .map(|r| r.reserved.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Snapshot of all non-zero committed counts.
    pub fn tokens(&self) -> Vec<(T, i64)> {
        self.accounts
            .iter()
            .filter_map(|r| {
                let count = r.value().committed.load(Ordering::Acquire);
                (count != 0).then(|| (r.key().clone(), count))
            })
            .collect()
    }

    /// True when every committed count and every claim is zero.
    pub fn is_empty(&self) -> bool {
        self.accounts.iter().all(|r| {
            r.value().committed.load(Ordering::Acquire) == 0
                && r.value().reserved.load(Ordering::Acquire) == 0
        })
    }

    /// Makes every later reservation attempt fail. Irreversible.
    pub fn block_requests(&self) {
        self.blocked.store(true, Ordering::Release);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Registers an observer for committed count changes.
    pub fn subscribe(&self, observer: Arc<dyn Observer<PlaceEvent<T>>>) -> Subscription {
        self.observers.subscribe(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Blocks the place and releases all observers.
    pub fn dispose(&self) {
        self.block_requests();
        self.observers.complete();
        tracing::debug!("Disposed {}", self.id);
    }

    fn account(&self, token: &T) -> Arc<TokenAccount> {
        if let Some(account) = self.accounts.get(token) {
            return Arc::clone(account.value());
        }
        Arc::clone(self.accounts.entry(token.clone()).or_default().value())
    }

    fn fits(&self, count: i128, volume: i128) -> bool {
        count * volume <= i128::from(self.capacity)
    }

    fn is_valid_count(&self, count: i64, volume: i128) -> bool {
        count >= 0 && self.fits(i128::from(count), volume)
    }

    /// Applies `delta` to the committed count of `token`.
    fn commit(&self, token: &T, account: &TokenAccount, delta: i64) -> Result<i64, NetError> {
        let volume = i128::from(token.volume().get());
        let mut current = account.committed.load(Ordering::Acquire);

        loop {
            let next = match current.checked_add(delta) {
                Some(next) if self.is_valid_count(next, volume) => next,
                _ => {
                    tracing::error!(
                        "Invalid synchronisation state on {}: {:?} count {} cannot change by {}",
                        self.id,
                        token,
                        current,
                        delta
                    );
                    return Err(NetError::Synchronization {
                        place: self.id,
                        reason: format!(
                            "count {} of {:?} cannot change by {} within capacity {}",
                            current, token, delta, self.capacity
                        ),
                    });
                }
            };

            match account.committed.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.observers.notify(&PlaceEvent {
                        place: self.id,
                        token: token.clone(),
                        count: next,
                    });
                    return Ok(next);
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl<T: Token> fmt::Debug for Place<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Place")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("capacity", &self.capacity)
            .field("blocked", &self.is_blocked())
            .finish()
    }
}

/// A live claim against a place.
///
/// Exactly one of [`complete`](Request::complete) or
/// [`dispose`](Request::dispose) takes effect; dropping a live request
/// disposes it.
#[must_use = "a request holds a claim on its place until completed or disposed"]
pub struct Request<T: Token> {
    place: Arc<Place<T>>,
    token: T,
    account: Arc<TokenAccount>,
    delta: i64,
    live: bool,
}

impl<T: Token> Request<T> {
    pub fn place(&self) -> PlaceId {
        self.place.id
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    /// Commits the change and releases the claim.
    ///
    /// Returns the new committed count. A failed post-condition is a
    /// synchronisation error; the claim is released either way.
    pub fn complete(mut self) -> Result<i64, NetError> {
        self.live = false;
        let result = self.place.commit(&self.token, &self.account, self.delta);
        self.release();
        result
    }

    /// Releases the claim without committing.
    pub fn dispose(mut self) {
        self.live = false;
        self.release();
    }

    fn release(&self) {
        // Only withdrawals were recorded in the reserved count.
        if self.delta < 0 {
            self.account
                .reserved
                .fetch_add(self.delta, Ordering::AcqRel);
        }
    }
}

impl<T: Token> Drop for Request<T> {
    fn drop(&mut self) {
        if self.live {
            self.live = false;
            self.release();
            tracing::trace!("Request on {} dropped without completion", self.place.id);
        }
    }
}

impl<T: Token> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("place", &self.place.id)
            .field("token", &self.token)
            .field("delta", &self.delta)
            .field("live", &self.live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::NamedToken;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::thread;

    fn place(capacity: u64) -> Arc<Place<NamedToken>> {
        Arc::new(Place::new(
            PlaceId::new(NetId::next(), 1),
            Some("test".to_string()),
            capacity,
        ))
    }

    #[test]
    fn test_add_token() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");

        assert!(place.add_token(&token, 2).unwrap());
        assert_eq!(place.get_token_count(&token), 2);
        assert_eq!(place.tokens(), vec![(token.clone(), 2)]);
        assert_eq!(place.reserved_count(&token), 0);
    }

    #[test]
    fn test_missing_token_counts_zero() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("absent");
        assert_eq!(place.get_token_count(&token), 0);
        assert!(place.tokens().is_empty());
    }

    #[test]
    fn test_withdrawal_claims_then_completes() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        place.add_token(&token, 2).unwrap();

        let request = place.try_reserve(&token, -2).unwrap();
        assert_eq!(request.delta(), -2);
        assert_eq!(place.reserved_count(&token), 2);
        // Committed count is untouched until completion
        assert_eq!(place.get_token_count(&token), 2);

        // Everything is already claimed
        assert!(place.try_reserve(&token, -1).is_none());

        assert_eq!(request.complete().unwrap(), 0);
        assert_eq!(place.get_token_count(&token), 0);
        assert_eq!(place.reserved_count(&token), 0);
        assert!(place.is_empty());
    }

    #[test]
    fn test_withdrawal_refused_when_insufficient() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        place.add_token(&token, 1).unwrap();

        assert!(place.try_reserve(&token, -2).is_none());
        assert_eq!(place.reserved_count(&token), 0);
        assert!(!place.add_token(&token, -2).unwrap());
        assert_eq!(place.get_token_count(&token), 1);
    }

    #[test]
    fn test_dispose_releases_claim() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        place.add_token(&token, 1).unwrap();

        let request = place.try_reserve(&token, -1).unwrap();
        assert!(place.try_reserve(&token, -1).is_none());

        request.dispose();
        assert_eq!(place.reserved_count(&token), 0);
        assert_eq!(place.get_token_count(&token), 1);
        assert!(place.try_reserve(&token, -1).is_some());
    }

    #[test]
    fn test_drop_disposes_claim() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        place.add_token(&token, 3).unwrap();

        {
            let _request = place.try_reserve(&token, -3).unwrap();
            assert_eq!(place.reserved_count(&token), 3);
        }
        assert_eq!(place.reserved_count(&token), 0);
        assert_eq!(place.get_token_count(&token), 3);
    }

    #[test]
    fn test_deposit_respects_capacity() {
        let place = place(4);
        let token = NamedToken::new("crate", 2).unwrap();

        assert!(place.try_reserve(&token, 3).is_none());

        let request = place.try_reserve(&token, 2).unwrap();
        // Deposits do not record a claim
        assert_eq!(place.reserved_count(&token), 0);
        assert_eq!(request.complete().unwrap(), 2);
        assert_eq!(place.get_token_count(&token), 2);
    }

    #[test]
    fn test_deposit_admission_ignores_committed_count() {
        let place = place(2);
        let token = NamedToken::unit("black");
        assert!(place.add_token(&token, 2).unwrap());

        // Admission only looks at claims, so the deposit is admitted...
        let request = place.try_reserve(&token, 1).unwrap();

        // ...and the commit refuses to exceed the capacity.
        let result = request.complete();
        assert!(matches!(result, Err(NetError::Synchronization { .. })));
        assert_eq!(place.get_token_count(&token), 2);
        assert_eq!(place.reserved_count(&token), 0);
    }

    #[test]
    fn test_unrepresentable_deposit_refused() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        assert!(place.add_token(&token, i64::MAX).unwrap());

        assert!(place.try_reserve(&token, 1).is_none());
        assert!(!place.add_token(&token, 1).unwrap());
        assert_eq!(place.get_token_count(&token), i64::MAX);

        // Withdrawals still work
        assert!(place.add_token(&token, -1).unwrap());
        assert!(place.add_token(&token, 1).unwrap());
    }

    #[test]
    fn test_blocked_place_refuses() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        place.add_token(&token, 1).unwrap();

        place.block_requests();
        assert!(place.is_blocked());
        assert!(place.try_reserve(&token, -1).is_none());
        assert!(place.try_reserve(&token, 1).is_none());
        assert!(!place.add_token(&token, 1).unwrap());
    }

    #[test]
    fn test_is_empty_tracks_claims() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        assert!(place.is_empty());

        place.add_token(&token, 1).unwrap();
        assert!(!place.is_empty());

        let request = place.try_reserve(&token, -1).unwrap();
        request.complete().unwrap();
        assert!(place.is_empty());
    }

    #[test]
    fn test_observer_sees_commits() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _sub = place.subscribe(Arc::new(move |event: &PlaceEvent<NamedToken>| {
            sink.lock().push(event.count);
        }));

        place.add_token(&token, 2).unwrap();
        place.try_reserve(&token, -1).unwrap().complete().unwrap();
        // Disposed requests change nothing observable
        place.try_reserve(&token, -1).unwrap().dispose();

        assert_eq!(*seen.lock(), vec![2, 1]);
    }

    #[test]
    fn test_dispose_completes_observers() {
        let place = place(UNBOUNDED);
        let _sub = place.subscribe(Arc::new(|_: &PlaceEvent<NamedToken>| {}));
        assert_eq!(place.observer_count(), 1);

        place.dispose();
        assert_eq!(place.observer_count(), 0);
        assert!(place.is_blocked());
    }

    #[test]
    fn test_contending_withdrawals_never_overdraw() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        place.add_token(&token, 100).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let place = place.clone();
                let token = token.clone();
                thread::spawn(move || {
                    let mut won = 0;
                    for _ in 0..50 {
                        if let Some(request) = place.try_reserve(&token, -1) {
                            let count = request.complete().unwrap();
                            assert!(count >= 0);
                            won += 1;
                        }
                    }
                    won
                })
            })
            .collect();

        let won: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(won, 100);
        assert_eq!(place.get_token_count(&token), 0);
        assert_eq!(place.reserved_count(&token), 0);
    }

    #[test]
    fn test_last_unit_claimed_once() {
        let place = place(UNBOUNDED);
        let token = NamedToken::unit("black");
        place.add_token(&token, 1).unwrap();

        let first = place.try_reserve(&token, -1);
        let second = place.try_reserve(&token, -1);
        assert!(first.is_some());
        assert!(second.is_none());
    }

    proptest! {
        #[test]
        fn prop_counts_stay_within_bounds(
            volume in 1u32..=3,
            ops in proptest::collection::vec((-5i64..=5, 0u8..3), 1..64),
        ) {
            let capacity = 20u64;
            let place = place(capacity);
            let token = NamedToken::new("t", volume).unwrap();
            let mut held = Vec::new();

            for (delta, action) in ops {
                if let Some(request) = place.try_reserve(&token, delta) {
                    match action {
                        0 => {
                            // Failed commits leave the count untouched
                            let _ = request.complete();
                        }
                        1 => request.dispose(),
                        _ => held.push(request),
                    }
                }

                let count = place.get_token_count(&token);
                let reserved = place.reserved_count(&token);
                prop_assert!(count >= 0);
                prop_assert!(count as u64 * u64::from(volume) <= capacity);
                prop_assert!(reserved >= 0);
                prop_assert!(reserved <= count);
            }

            for request in held {
                let _ = request.complete();
            }
            prop_assert_eq!(place.reserved_count(&token), 0);
            prop_assert!(place.get_token_count(&token) >= 0);
        }
    }
}
