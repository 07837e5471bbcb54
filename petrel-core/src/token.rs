//! Token identity.
//!
//! Tokens are opaque, caller-supplied values. The engine only needs equality,
//! hashing, and a positive unit volume for capacity accounting.

use crate::error::NetError;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::Arc;

/// A token kind that places can hold.
pub trait Token: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Unit size of one token, used for capacity arithmetic.
    fn volume(&self) -> NonZeroU32;
}

/// A named token kind with a fixed volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedToken {
    name: Arc<str>,
    volume: NonZeroU32,
}

impl NamedToken {
    /// Creates a token kind, rejecting a zero volume.
    pub fn new(name: impl AsRef<str>, volume: u32) -> Result<Self, NetError> {
        let volume = NonZeroU32::new(volume).ok_or_else(|| NetError::InvalidToken {
            reason: format!("token '{}' must have a positive volume", name.as_ref()),
        })?;
        Ok(Self {
            name: Arc::from(name.as_ref()),
            volume,
        })
    }

    /// Creates a token kind of volume 1.
    pub fn unit(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            volume: NonZeroU32::MIN,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Token for NamedToken {
    fn volume(&self) -> NonZeroU32 {
        self.volume
    }
}

impl fmt::Display for NamedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
