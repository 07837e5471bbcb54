//! Stable handles for nets, places, and transitions.
//!
//! Places and transitions are addressed by handle rather than by reference.
//! A handle carries the id of the net that issued it, so handles from two
//! different nets never compare equal.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetId(u64);

impl NetId {
    /// Allocates a fresh net id.
    pub fn next() -> Self {
        Self(NEXT_NET_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net#{}", self.0)
    }
}

/// Handle of a place within a net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceId {
    net: NetId,
    seq: u64,
}

impl PlaceId {
    pub(crate) fn new(net: NetId, seq: u64) -> Self {
        Self { net, seq }
    }

    /// Returns the net that issued this handle.
    pub fn net(&self) -> NetId {
        self.net
    }

    /// Returns the registration sequence number within the net.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "place#{}", self.seq)
    }
}

/// Handle of a transition within a net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId {
    net: NetId,
    seq: u64,
}

impl TransitionId {
    pub(crate) fn new(net: NetId, seq: u64) -> Self {
        Self { net, seq }
    }

    pub fn net(&self) -> NetId {
        self.net
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transition#{}", self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_ids_are_unique() {
        let a = NetId::next();
        let b = NetId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_handles_from_different_nets_differ() {
        let a = PlaceId::new(NetId::next(), 1);
        let b = PlaceId::new(NetId::next(), 1);
        assert_eq!(a.seq(), b.seq());
        assert_ne!(a, b);
    }

    #[test]
    fn test_handle_ordering_follows_registration() {
        let net = NetId::next();
        let first = TransitionId::new(net, 1);
        let second = TransitionId::new(net, 2);
        assert!(first < second);
        assert_eq!(second.to_string(), "transition#2");
    }
}
