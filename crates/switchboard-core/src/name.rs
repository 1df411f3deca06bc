//! Claimed user names.
//!
//! Names are raw byte strings: the protocol never requires UTF-8, and
//! equality and ordering are bytewise. The single byte `~` is reserved as
//! the group-chat channel identifier and can never be claimed by a user.

use std::fmt;

use thiserror::Error;

/// Maximum name length in bytes, dictated by the wire's single length byte.
pub const MAX_NAME_LEN: usize = 255;

/// The reserved group-chat channel identifier.
pub const GROUP_CHANNEL: &[u8] = b"~";

/// A claimed user name: 1..=255 raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(Vec<u8>);

impl Name {
    /// Validate and take ownership of a name.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, NameError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(NameError::Empty);
        }
        if bytes.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// The name that addresses the group channel.
    pub fn group_channel() -> Self {
        Self(GROUP_CHANNEL.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this name is the reserved group-chat channel identifier.
    pub fn is_group_channel(&self) -> bool {
        self.0 == GROUP_CHANNEL
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Error constructing a [`Name`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name is {0} bytes, maximum is {MAX_NAME_LEN}")]
    TooLong(usize),
}
