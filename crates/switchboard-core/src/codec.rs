//! Binary wire codec.
//!
//! Every protocol message travels as one WebSocket binary frame. Byte 0 is
//! the opcode and every variable-length field carries a single length byte
//! in front of it. No magic, no version field, no padding.
//!
//! ```text
//! client -> server                      server -> client
//!   LIST_USERS    [1]                     ERROR           [50][code]
//!   GET_USER      [2][L][name]            LISTED_USERS    [51][N] ([L][name][state]) * N
//!   CHANGE_STATUS [3][L][name][state]     GOT_USER        [52][L][name][state]
//!   SEND_MESSAGE  [4][L][name]            REGISTERED_USER [53][L][name][state]
//!                    [L][content]         CHANGED_STATUS  [54][L][name][state]
//!   GET_MESSAGES  [5][L][name]            GOT_MESSAGE     [55][L][origin][L][content]
//!                                         GOT_MESSAGES    [56][N] ([L][origin][L][content]) * N
//! ```
//!
//! Decoding is strict: unknown opcodes, truncated fields, and trailing bytes
//! are all protocol errors, and a protocol error drops the frame. The one
//! deliberate exception is `SEND_MESSAGE`, whose target and content may be
//! empty on the wire; the engine answers those with logical error frames
//! instead of dropping the request.

use thiserror::Error;

use crate::history::ChatEntry;
use crate::name::Name;
use crate::presence::Presence;

mod opcode {
    pub const LIST_USERS: u8 = 1;
    pub const GET_USER: u8 = 2;
    pub const CHANGE_STATUS: u8 = 3;
    pub const SEND_MESSAGE: u8 = 4;
    pub const GET_MESSAGES: u8 = 5;

    pub const ERROR: u8 = 50;
    pub const LISTED_USERS: u8 = 51;
    pub const GOT_USER: u8 = 52;
    pub const REGISTERED_USER: u8 = 53;
    pub const CHANGED_STATUS: u8 = 54;
    pub const GOT_MESSAGE: u8 = 55;
    pub const GOT_MESSAGES: u8 = 56;
}

/// Logical error codes carried by an ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    UserNotFound = 0,
    InvalidStatus = 1,
    EmptyMessage = 2,
    /// Reserved for implementations that surface the send/departure race
    /// distinctly; the reference flow reports it as [`Self::UserNotFound`].
    UserAlreadyDisconnected = 3,
}

impl ErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::UserNotFound),
            1 => Some(Self::InvalidStatus),
            2 => Some(Self::EmptyMessage),
            3 => Some(Self::UserAlreadyDisconnected),
            _ => None,
        }
    }
}

/// A request decoded from a client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListUsers,
    GetUser {
        name: Name,
    },
    /// The status byte is carried raw; the engine decides whether it names a
    /// state a client may request.
    ChangeStatus {
        name: Name,
        status: u8,
    },
    /// Target and content may be empty on the wire; the engine owns those
    /// logical errors.
    SendMessage {
        target: Vec<u8>,
        content: Vec<u8>,
    },
    GetMessages {
        target: Name,
    },
}

/// An event to encode into a server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Error { code: ErrorCode },
    ListedUsers { users: Vec<(Name, Presence)> },
    GotUser { name: Name, status: Presence },
    RegisteredUser { name: Name, status: Presence },
    ChangedStatus { name: Name, status: Presence },
    GotMessage { origin: Name, content: Vec<u8> },
    GotMessages { entries: Vec<ChatEntry> },
}

/// Why a frame failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("truncated frame: wanted {wanted} bytes, frame holds {held}")]
    Truncated { wanted: usize, held: usize },
    #[error("{0} trailing bytes after a complete message")]
    TrailingBytes(usize),
    #[error("zero-length name")]
    EmptyName,
    #[error("unknown presence code {0}")]
    UnknownPresence(u8),
    #[error("unknown error code {0}")]
    UnknownErrorCode(u8),
}

/// Why an in-memory message could not be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{field} count {count} does not fit the count byte")]
    CountOverflow { field: &'static str, count: usize },
    #[error("{field} is {len} bytes, maximum is 255")]
    FieldTooLong { field: &'static str, len: usize },
}

impl Request {
    /// Decode one client frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(frame);
        let request = match reader.byte()? {
            opcode::LIST_USERS => Request::ListUsers,
            opcode::GET_USER => Request::GetUser {
                name: reader.name()?,
            },
            opcode::CHANGE_STATUS => Request::ChangeStatus {
                name: reader.name()?,
                status: reader.byte()?,
            },
            opcode::SEND_MESSAGE => {
                let target = reader.short_bytes()?.to_vec();
                let content = reader.short_bytes()?.to_vec();
                Request::SendMessage { target, content }
            }
            opcode::GET_MESSAGES => Request::GetMessages {
                target: reader.name()?,
            },
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        reader.finish()?;
        Ok(request)
    }

    /// Encode this request into a frame.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut frame = Vec::new();
        match self {
            Request::ListUsers => frame.push(opcode::LIST_USERS),
            Request::GetUser { name } => {
                frame.push(opcode::GET_USER);
                push_name(&mut frame, name);
            }
            Request::ChangeStatus { name, status } => {
                frame.push(opcode::CHANGE_STATUS);
                push_name(&mut frame, name);
                frame.push(*status);
            }
            Request::SendMessage { target, content } => {
                frame.push(opcode::SEND_MESSAGE);
                push_short_bytes(&mut frame, "target", target)?;
                push_short_bytes(&mut frame, "content", content)?;
            }
            Request::GetMessages { target } => {
                frame.push(opcode::GET_MESSAGES);
                push_name(&mut frame, target);
            }
        }
        Ok(frame)
    }
}

impl Event {
    /// Encode this event into a frame.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut frame = Vec::new();
        match self {
            Event::Error { code } => {
                frame.push(opcode::ERROR);
                frame.push(code.code());
            }
            Event::ListedUsers { users } => {
                frame.push(opcode::LISTED_USERS);
                frame.push(count_byte("users", users.len())?);
                for (name, status) in users {
                    push_name(&mut frame, name);
                    frame.push(status.code());
                }
            }
            Event::GotUser { name, status } => {
                push_user_frame(&mut frame, opcode::GOT_USER, name, *status);
            }
            Event::RegisteredUser { name, status } => {
                push_user_frame(&mut frame, opcode::REGISTERED_USER, name, *status);
            }
            Event::ChangedStatus { name, status } => {
                push_user_frame(&mut frame, opcode::CHANGED_STATUS, name, *status);
            }
            Event::GotMessage { origin, content } => {
                frame.push(opcode::GOT_MESSAGE);
                push_name(&mut frame, origin);
                push_short_bytes(&mut frame, "content", content)?;
            }
            Event::GotMessages { entries } => {
                frame.push(opcode::GOT_MESSAGES);
                frame.push(count_byte("entries", entries.len())?);
                for entry in entries {
                    push_name(&mut frame, &entry.origin);
                    push_short_bytes(&mut frame, "content", &entry.content)?;
                }
            }
        }
        Ok(frame)
    }

    /// Decode one server frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(frame);
        let event = match reader.byte()? {
            opcode::ERROR => {
                let raw = reader.byte()?;
                let code =
                    ErrorCode::from_code(raw).ok_or(ProtocolError::UnknownErrorCode(raw))?;
                Event::Error { code }
            }
            opcode::LISTED_USERS => {
                let count = reader.byte()?;
                let mut users = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    users.push((reader.name()?, reader.presence()?));
                }
                Event::ListedUsers { users }
            }
            opcode::GOT_USER => {
                let (name, status) = reader.user()?;
                Event::GotUser { name, status }
            }
            opcode::REGISTERED_USER => {
                let (name, status) = reader.user()?;
                Event::RegisteredUser { name, status }
            }
            opcode::CHANGED_STATUS => {
                let (name, status) = reader.user()?;
                Event::ChangedStatus { name, status }
            }
            opcode::GOT_MESSAGE => Event::GotMessage {
                origin: reader.name()?,
                content: reader.short_bytes()?.to_vec(),
            },
            opcode::GOT_MESSAGES => {
                let count = reader.byte()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(ChatEntry {
                        origin: reader.name()?,
                        content: reader.short_bytes()?.to_vec(),
                    });
                }
                Event::GotMessages { entries }
            }
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        reader.finish()?;
        Ok(event)
    }
}

fn push_name(frame: &mut Vec<u8>, name: &Name) {
    frame.push(name.as_bytes().len() as u8);
    frame.extend_from_slice(name.as_bytes());
}

fn push_short_bytes(
    frame: &mut Vec<u8>,
    field: &'static str,
    bytes: &[u8],
) -> Result<(), EncodeError> {
    if bytes.len() > 255 {
        return Err(EncodeError::FieldTooLong {
            field,
            len: bytes.len(),
        });
    }
    frame.push(bytes.len() as u8);
    frame.extend_from_slice(bytes);
    Ok(())
}

fn push_user_frame(frame: &mut Vec<u8>, op: u8, name: &Name, status: Presence) {
    frame.push(op);
    push_name(frame, name);
    frame.push(status.code());
}

fn count_byte(field: &'static str, count: usize) -> Result<u8, EncodeError> {
    u8::try_from(count).map_err(|_| EncodeError::CountOverflow { field, count })
}

/// Cursor over a frame; every read is bounds-checked against the frame end.
struct Reader<'a> {
    frame: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(frame: &'a [u8]) -> Self {
        Self { frame, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, ProtocolError> {
        if self.frame.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        let byte = *self
            .frame
            .get(self.pos)
            .ok_or(ProtocolError::Truncated {
                wanted: self.pos + 1,
                held: self.frame.len(),
            })?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos + len;
        if end > self.frame.len() {
            return Err(ProtocolError::Truncated {
                wanted: end,
                held: self.frame.len(),
            });
        }
        let bytes = &self.frame[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// A length-prefixed field that may legally be empty.
    fn short_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.byte()?;
        self.take(len as usize)
    }

    /// A length-prefixed name; a zero length is a protocol error here.
    fn name(&mut self) -> Result<Name, ProtocolError> {
        let len = self.byte()?;
        if len == 0 {
            return Err(ProtocolError::EmptyName);
        }
        let bytes = self.take(len as usize)?;
        Name::new(bytes).map_err(|_| ProtocolError::EmptyName)
    }

    fn presence(&mut self) -> Result<Presence, ProtocolError> {
        let raw = self.byte()?;
        Presence::from_code(raw).ok_or(ProtocolError::UnknownPresence(raw))
    }

    fn user(&mut self) -> Result<(Name, Presence), ProtocolError> {
        Ok((self.name()?, self.presence()?))
    }

    fn finish(self) -> Result<(), ProtocolError> {
        let rest = self.frame.len() - self.pos;
        if rest > 0 {
            return Err(ProtocolError::TrailingBytes(rest));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    // -- requests ----------------------------------------------------------

    #[test]
    fn decodes_list_users() {
        assert_eq!(Request::decode(&[0x01]).unwrap(), Request::ListUsers);
    }

    #[test]
    fn decodes_change_status() {
        let frame = [0x03, 0x03, b'B', b'o', b'b', 0x02];
        assert_eq!(
            Request::decode(&frame).unwrap(),
            Request::ChangeStatus {
                name: name("Bob"),
                status: 2,
            }
        );
    }

    #[test]
    fn decodes_send_message() {
        let frame = [0x04, 0x03, b'A', b'n', b'a', 0x02, b'h', b'i'];
        assert_eq!(
            Request::decode(&frame).unwrap(),
            Request::SendMessage {
                target: b"Ana".to_vec(),
                content: b"hi".to_vec(),
            }
        );
    }

    #[test]
    fn decodes_send_message_with_empty_fields() {
        // The engine answers these with logical errors, so they must decode.
        assert_eq!(
            Request::decode(&[0x04, 0x00, 0x00]).unwrap(),
            Request::SendMessage {
                target: Vec::new(),
                content: Vec::new(),
            }
        );
        assert_eq!(
            Request::decode(&[0x04, 0x01, b'~', 0x00]).unwrap(),
            Request::SendMessage {
                target: b"~".to_vec(),
                content: Vec::new(),
            }
        );
    }

    #[test]
    fn decodes_get_messages() {
        let frame = [0x05, 0x03, b'B', b'o', b'b'];
        assert_eq!(
            Request::decode(&frame).unwrap(),
            Request::GetMessages {
                target: name("Bob"),
            }
        );
    }

    #[test]
    fn request_round_trips() {
        let requests = [
            Request::ListUsers,
            Request::GetUser { name: name("Ana") },
            Request::ChangeStatus {
                name: name("Ana"),
                status: 3,
            },
            Request::SendMessage {
                target: b"~".to_vec(),
                content: b"hey".to_vec(),
            },
            Request::GetMessages { target: name("~") },
        ];
        for request in requests {
            let frame = request.encode().unwrap();
            assert_eq!(Request::decode(&frame).unwrap(), request);
        }
    }

    #[test]
    fn rejects_malformed_requests() {
        assert_eq!(Request::decode(&[]).unwrap_err(), ProtocolError::EmptyFrame);
        assert_eq!(
            Request::decode(&[0x63]).unwrap_err(),
            ProtocolError::UnknownOpcode(0x63)
        );
        assert_eq!(
            Request::decode(&[0x02, 0x00]).unwrap_err(),
            ProtocolError::EmptyName
        );
        assert_eq!(
            Request::decode(&[0x02, 0x05, b'A']).unwrap_err(),
            ProtocolError::Truncated { wanted: 7, held: 3 }
        );
        // CHANGE_STATUS missing its state byte.
        assert!(matches!(
            Request::decode(&[0x03, 0x03, b'B', b'o', b'b']).unwrap_err(),
            ProtocolError::Truncated { .. }
        ));
        assert_eq!(
            Request::decode(&[0x01, 0xFF]).unwrap_err(),
            ProtocolError::TrailingBytes(1)
        );
    }

    // -- events ------------------------------------------------------------

    #[test]
    fn encodes_listed_users() {
        let event = Event::ListedUsers {
            users: vec![(name("Ana"), Presence::Active)],
        };
        assert_eq!(
            event.encode().unwrap(),
            [0x33, 0x01, 0x03, b'A', b'n', b'a', 0x01]
        );
    }

    #[test]
    fn encodes_changed_status() {
        let busy = Event::ChangedStatus {
            name: name("Bob"),
            status: Presence::Busy,
        };
        assert_eq!(busy.encode().unwrap(), [0x36, 0x03, b'B', b'o', b'b', 0x02]);

        let gone = Event::ChangedStatus {
            name: name("Bob"),
            status: Presence::Disconnected,
        };
        assert_eq!(gone.encode().unwrap(), [0x36, 0x03, b'B', b'o', b'b', 0x00]);
    }

    #[test]
    fn encodes_got_message() {
        let event = Event::GotMessage {
            origin: name("Bob"),
            content: b"hi".to_vec(),
        };
        assert_eq!(
            event.encode().unwrap(),
            [0x37, 0x03, b'B', b'o', b'b', 0x02, b'h', b'i']
        );

        let group = Event::GotMessage {
            origin: name("~"),
            content: b"hey".to_vec(),
        };
        assert_eq!(
            group.encode().unwrap(),
            [0x37, 0x01, b'~', 0x03, b'h', b'e', b'y']
        );
    }

    #[test]
    fn encodes_got_messages() {
        let event = Event::GotMessages {
            entries: vec![ChatEntry {
                origin: name("Bob"),
                content: b"hi".to_vec(),
            }],
        };
        assert_eq!(
            event.encode().unwrap(),
            [0x38, 0x01, 0x03, b'B', b'o', b'b', 0x02, b'h', b'i']
        );
    }

    #[test]
    fn encodes_error() {
        let event = Event::Error {
            code: ErrorCode::EmptyMessage,
        };
        assert_eq!(event.encode().unwrap(), [0x32, 0x02]);
    }

    #[test]
    fn event_round_trips() {
        let events = [
            Event::Error {
                code: ErrorCode::UserNotFound,
            },
            Event::ListedUsers {
                users: vec![
                    (name("Ana"), Presence::Active),
                    (name("Bob"), Presence::Busy),
                ],
            },
            Event::ListedUsers { users: Vec::new() },
            Event::GotUser {
                name: name("Ana"),
                status: Presence::Inactive,
            },
            Event::RegisteredUser {
                name: name("Cleo"),
                status: Presence::Active,
            },
            Event::ChangedStatus {
                name: name("Bob"),
                status: Presence::Disconnected,
            },
            Event::GotMessage {
                origin: name("~"),
                content: b"hey".to_vec(),
            },
            Event::GotMessages {
                entries: vec![
                    ChatEntry {
                        origin: name("Ana"),
                        content: b"first".to_vec(),
                    },
                    ChatEntry {
                        origin: name("Bob"),
                        content: b"second".to_vec(),
                    },
                ],
            },
            Event::GotMessages {
                entries: Vec::new(),
            },
        ];
        for event in events {
            let frame = event.encode().unwrap();
            assert_eq!(Event::decode(&frame).unwrap(), event);
        }
    }

    #[test]
    fn rejects_malformed_events() {
        assert_eq!(Event::decode(&[]).unwrap_err(), ProtocolError::EmptyFrame);
        assert_eq!(
            Event::decode(&[0x31]).unwrap_err(),
            ProtocolError::UnknownOpcode(0x31)
        );
        assert_eq!(
            Event::decode(&[0x32, 0x09]).unwrap_err(),
            ProtocolError::UnknownErrorCode(9)
        );
        assert_eq!(
            Event::decode(&[0x36, 0x03, b'B', b'o', b'b', 0x07]).unwrap_err(),
            ProtocolError::UnknownPresence(7)
        );
        assert_eq!(
            Event::decode(&[0x33, 0x02, 0x03, b'A', b'n', b'a', 0x01]).unwrap_err(),
            ProtocolError::Truncated { wanted: 8, held: 7 }
        );
    }

    #[test]
    fn refuses_unrepresentable_counts() {
        let crowd: Vec<(Name, Presence)> = (0..=255)
            .map(|i| (name(&format!("user-{i}")), Presence::Active))
            .collect();
        let event = Event::ListedUsers { users: crowd };
        assert_eq!(
            event.encode().unwrap_err(),
            EncodeError::CountOverflow {
                field: "users",
                count: 256,
            }
        );
    }
}
