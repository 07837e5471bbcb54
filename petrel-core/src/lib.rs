//! # petrel-core
//!
//! Concurrent Petri net engine for petrel.
//!
//! This crate provides:
//! - Places with lock-free two-phase token reservation
//! - Transitions that fire atomically across all of their arcs
//! - A net registry with sequential, parallel and async tick scheduling
//! - Declarative net definitions in JSON or YAML

pub mod arc;
pub mod cancel;
pub mod definition;
pub mod error;
pub mod handle;
pub mod net;
pub mod observer;
pub mod place;
pub mod token;
pub mod transition;

pub use arc::NetArc;
pub use cancel::CancelSignal;
pub use definition::{NetDefinition, NetDefinitionRaw, NetLayout};
pub use error::NetError;
pub use handle::{NetId, PlaceId, TransitionId};
pub use net::{Net, NetConfig, TickSummary};
pub use observer::{Observer, Subscription};
pub use place::{Place, PlaceEvent, Request, UNBOUNDED};
pub use token::{NamedToken, Token};
pub use transition::{FiringOutcome, Transition, TransitionEvent};
