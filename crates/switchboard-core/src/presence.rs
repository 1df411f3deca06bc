//! Presence states and the client transition rules.

use std::fmt;

/// Connection presence as carried on the wire.
///
/// `Disconnected` never appears in the roster; it is only broadcast to
/// announce a departure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Presence {
    Disconnected = 0,
    Active = 1,
    Busy = 2,
    Inactive = 3,
}

impl Presence {
    /// The wire code for this state.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Disconnected),
            1 => Some(Self::Active),
            2 => Some(Self::Busy),
            3 => Some(Self::Inactive),
            _ => None,
        }
    }

    /// Whether a client may request the transition `self -> to`.
    ///
    /// Clients toggle between ACTIVE and BUSY and may leave INACTIVE; only
    /// the idle detector moves a user into INACTIVE, and only the transport
    /// closing produces DISCONNECTED.
    pub fn client_may_switch_to(self, to: Presence) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Busy)
                | (Self::Busy, Self::Active)
                | (Self::Inactive, Self::Active)
                | (Self::Inactive, Self::Busy)
        )
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Active => "ACTIVE",
            Self::Busy => "BUSY",
            Self::Inactive => "INACTIVE",
        };
        f.write_str(label)
    }
}
