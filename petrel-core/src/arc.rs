//! Weighted edges between places and transitions.
//!
//! An arc does not know its own direction: it is a consumer or a producer
//! depending on which list of its transition holds it.

use crate::error::NetError;
use crate::handle::{NetId, PlaceId, TransitionId};
use crate::place::{Place, Request};
use crate::token::Token;
use std::fmt;
use std::sync::Arc;

/// An immutable arc owned by a transition.
#[derive(Clone)]
pub struct NetArc<T: Token> {
    place: Arc<Place<T>>,
    transition: TransitionId,
    token: T,
    quantity: i64,
    description: Option<String>,
}

impl<T: Token> NetArc<T> {
    /// Creates an arc, rejecting a non-positive quantity.
    pub(crate) fn new(
        place: Arc<Place<T>>,
        transition: TransitionId,
        token: T,
        quantity: i64,
        description: Option<String>,
    ) -> Result<Self, NetError> {
        if quantity <= 0 {
            return Err(NetError::InvalidQuantity { quantity });
        }
        if place.net_id() != transition.net() {
            return Err(NetError::ForeignPlace { place: place.id() });
        }

        Ok(Self {
            place,
            transition,
            token,
            quantity,
            description,
        })
    }

    pub fn net_id(&self) -> NetId {
        self.transition.net()
    }

    pub fn place(&self) -> &Arc<Place<T>> {
        &self.place
    }

    pub fn place_id(&self) -> PlaceId {
        self.place.id()
    }

    pub fn transition(&self) -> TransitionId {
        self.transition
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Claims a withdrawal of `quantity` tokens from the place.
    pub fn try_consume(&self) -> Option<Request<T>> {
        self.place.try_reserve(&self.token, -self.quantity)
    }

    /// Claims a deposit of `quantity` tokens into the place.
    pub fn try_produce(&self) -> Option<Request<T>> {
        self.place.try_reserve(&self.token, self.quantity)
    }
}

impl<T: Token> fmt::Debug for NetArc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetArc")
            .field("place", &self.place.id())
            .field("transition", &self.transition)
            .field("token", &self.token)
            .field("quantity", &self.quantity)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::place::UNBOUNDED;
    use crate::token::NamedToken;

    fn fixture() -> (Arc<Place<NamedToken>>, TransitionId) {
        let net = NetId::next();
        let place = Arc::new(Place::new(PlaceId::new(net, 1), None, UNBOUNDED));
        (place, TransitionId::new(net, 2))
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let (place, transition) = fixture();
        let token = NamedToken::unit("black");

        for quantity in [0, -1, i64::MIN] {
            let result = NetArc::new(place.clone(), transition, token.clone(), quantity, None);
            assert!(matches!(
                result,
                Err(NetError::InvalidQuantity { quantity: q }) if q == quantity
            ));
        }
    }

    #[test]
    fn test_foreign_place_rejected() {
        let (place, _) = fixture();
        let other = TransitionId::new(NetId::next(), 1);

        let result = NetArc::new(place, other, NamedToken::unit("black"), 1, None);
        assert!(matches!(result, Err(NetError::ForeignPlace { .. })));
    }

    #[test]
    fn test_consume_and_produce_requests() {
        let (place, transition) = fixture();
        let token = NamedToken::unit("black");
        place.add_token(&token, 2).unwrap();

        let arc = NetArc::new(
            place.clone(),
            transition,
            token.clone(),
            2,
            Some("drain".to_string()),
        )
        .unwrap();
        assert_eq!(arc.quantity(), 2);
        assert_eq!(arc.place_id(), place.id());
        assert_eq!(arc.description(), Some("drain"));

        let consume = arc.try_consume().unwrap();
        assert_eq!(consume.delta(), -2);
        consume.complete().unwrap();
        assert_eq!(place.get_token_count(&token), 0);
        assert!(arc.try_consume().is_none());

        let produce = arc.try_produce().unwrap();
        assert_eq!(produce.delta(), 2);
        produce.complete().unwrap();
        assert_eq!(place.get_token_count(&token), 2);
    }
}
