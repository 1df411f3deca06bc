//! Core types for the Switchboard chat protocol.
//!
//! This crate holds the transport-free half of the server: names, presence,
//! the binary wire codec, bounded chat histories, channel keys, and the
//! roster of connected users. It performs no I/O; sockets, locks, and tasks
//! live in the server crate.

mod channel;
mod codec;
mod history;
mod name;
mod presence;
mod roster;

pub use channel::{ChannelKey, PAIR_SEPARATOR};
pub use codec::{EncodeError, ErrorCode, Event, ProtocolError, Request};
pub use history::{ChatEntry, ChatHistory, GROUP_HISTORY_CAPACITY, PAIR_HISTORY_CAPACITY};
pub use name::{Name, NameError, GROUP_CHANNEL, MAX_NAME_LEN};
pub use presence::Presence;
pub use roster::{DuplicateName, Roster, User};
