//! The protocol engine: admission, request dispatch, disconnect, and the
//! idle sweep.
//!
//! Handlers are synchronous functions over [`ServerState`]. Outbound frames
//! are pushes into per-connection channels, so a handler can hold the roster
//! lock across a broadcast and no user joins or leaves mid-broadcast.

use std::time::{Duration, Instant};

use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

use switchboard_core::{
    ChannelKey, ChatEntry, DuplicateName, ErrorCode, Event, Name, Presence, Request, Roster, User,
    GROUP_CHANNEL, GROUP_HISTORY_CAPACITY, PAIR_HISTORY_CAPACITY,
};

use crate::session::OutboundTx;
use crate::state::ServerState;

/// Admit a validated user: roster insert, pair histories with everyone
/// already present, and a REGISTERED_USER broadcast to the others.
pub(crate) fn admit(
    state: &ServerState,
    name: Name,
    handle: OutboundTx,
) -> Result<(), DuplicateName> {
    let mut roster = state.roster();
    roster.insert_end(User {
        name: name.clone(),
        presence: Presence::Active,
        last_action: Instant::now(),
        handle,
    })?;

    for user in roster.iter() {
        if user.name != name {
            state
                .chats()
                .get_or_create(ChannelKey::pair(&user.name, &name), PAIR_HISTORY_CAPACITY);
        }
    }

    if let Some(frame) = encode(&Event::RegisteredUser {
        name: name.clone(),
        status: Presence::Active,
    }) {
        for user in roster.iter().filter(|u| u.name != name) {
            send(user, frame.clone());
        }
    }
    Ok(())
}

/// Tear down a departed user: roster removal, pair-history destruction, and
/// a DISCONNECTED broadcast to everyone left.
pub(crate) fn disconnect(state: &ServerState, name: &Name) {
    let mut roster = state.roster();
    if roster.remove_by_name(name).is_none() {
        return;
    }
    state.chats().remove_matching(|key| key.involves(name));
    if let Some(frame) = encode(&Event::ChangedStatus {
        name: name.clone(),
        status: Presence::Disconnected,
    }) {
        broadcast(&roster, &frame);
    }
}

/// Dispatch one decoded request from the session claiming `me`.
pub(crate) fn handle_request(state: &ServerState, me: &Name, request: Request) {
    match request {
        Request::ListUsers => list_users(state, me),
        Request::GetUser { name } => get_user(state, me, &name),
        Request::ChangeStatus { name, status } => change_status(state, me, &name, status),
        Request::SendMessage { target, content } => send_message(state, me, target, content),
        Request::GetMessages { target } => get_messages(state, me, &target),
    }
}

/// Demote every ACTIVE user whose last action is older than `idle_limit`,
/// broadcasting each demotion.
pub(crate) fn sweep_idle(state: &ServerState, idle_limit: Duration) {
    let mut roster = state.roster();
    let now = Instant::now();
    let mut frames = Vec::new();
    for user in roster.iter_mut() {
        if user.presence == Presence::Active
            && now.duration_since(user.last_action) >= idle_limit
        {
            user.presence = Presence::Inactive;
            info!(user = %user.name, "user idled out");
            if let Some(frame) = encode(&Event::ChangedStatus {
                name: user.name.clone(),
                status: Presence::Inactive,
            }) {
                frames.push(frame);
            }
        }
    }
    for frame in &frames {
        broadcast(&roster, frame);
    }
}

fn list_users(state: &ServerState, me: &Name) {
    let mut roster = state.roster();
    if let Some(user) = roster.find_by_name(me) {
        user.last_action = Instant::now();
    }
    let users = roster
        .iter()
        .map(|u| (u.name.clone(), u.presence))
        .collect();
    if let Some(user) = roster.get(me) {
        send_event(user, &Event::ListedUsers { users });
    }
}

fn get_user(state: &ServerState, me: &Name, target: &Name) {
    let roster = state.roster();
    let event = match roster.get(target) {
        Some(user) => Event::GotUser {
            name: user.name.clone(),
            status: user.presence,
        },
        None => Event::Error {
            code: ErrorCode::UserNotFound,
        },
    };
    if let Some(user) = roster.get(me) {
        send_event(user, &event);
    }
}

fn change_status(state: &ServerState, me: &Name, name: &Name, status: u8) {
    let mut roster = state.roster();
    let outcome = if name != me {
        // A session may only change its own state.
        Err(ErrorCode::InvalidStatus)
    } else {
        match Presence::from_code(status) {
            None => Err(ErrorCode::InvalidStatus),
            Some(next) => {
                let Some(user) = roster.find_by_name(me) else {
                    return;
                };
                if next == user.presence {
                    // Same state: silently ignored.
                    return;
                }
                if user.presence.client_may_switch_to(next) {
                    user.presence = next;
                    user.last_action = Instant::now();
                    Ok(next)
                } else {
                    Err(ErrorCode::InvalidStatus)
                }
            }
        }
    };
    match outcome {
        Ok(next) => {
            if let Some(frame) = encode(&Event::ChangedStatus {
                name: me.clone(),
                status: next,
            }) {
                broadcast(&roster, &frame);
            }
        }
        Err(code) => reply_error(&roster, me, code),
    }
}

fn send_message(state: &ServerState, me: &Name, target: Vec<u8>, content: Vec<u8>) {
    let mut roster = state.roster();
    if content.is_empty() {
        reply_error(&roster, me, ErrorCode::EmptyMessage);
        return;
    }
    if target.is_empty() {
        reply_error(&roster, me, ErrorCode::UserNotFound);
        return;
    }

    if target == GROUP_CHANNEL {
        let history = state
            .chats()
            .get_or_create(ChannelKey::group(), GROUP_HISTORY_CAPACITY);
        history
            .lock()
            .expect("chat history lock poisoned")
            .append(ChatEntry {
                origin: Name::group_channel(),
                content: content.clone(),
            });
        if let Some(frame) = encode(&Event::GotMessage {
            origin: Name::group_channel(),
            content,
        }) {
            broadcast(&roster, &frame);
        }
        touch_and_revive(&mut roster, me);
        return;
    }

    let Ok(target) = Name::new(target) else {
        // Length is bounded by the wire's length byte and empty was handled
        // above, so this arm is unreachable.
        return;
    };
    if roster.get(&target).is_none() {
        reply_error(&roster, me, ErrorCode::UserNotFound);
        return;
    }

    let key = ChannelKey::pair(me, &target);
    let history = state.chats().get_or_create(key, PAIR_HISTORY_CAPACITY);
    history
        .lock()
        .expect("chat history lock poisoned")
        .append(ChatEntry {
            origin: me.clone(),
            content: content.clone(),
        });

    if let Some(frame) = encode(&Event::GotMessage {
        origin: me.clone(),
        content,
    }) {
        if let Some(sender) = roster.get(me) {
            send(sender, frame.clone());
        }
        if target != *me {
            if let Some(receiver) = roster.get(&target) {
                send(receiver, frame);
            }
        }
    }
    touch_and_revive(&mut roster, me);
}

fn get_messages(state: &ServerState, me: &Name, target: &Name) {
    let roster = state.roster();
    let key = if target.is_group_channel() {
        ChannelKey::group()
    } else {
        ChannelKey::pair(me, target)
    };
    let entries = match state.chats().get(&key) {
        Some(history) => history
            .lock()
            .expect("chat history lock poisoned")
            .iter()
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    if let Some(user) = roster.get(me) {
        send_event(user, &Event::GotMessages { entries });
    }
}

/// Mark activity for `me` and, if the user had idled out, promote back to
/// ACTIVE with a broadcast.
fn touch_and_revive(roster: &mut Roster<OutboundTx>, me: &Name) {
    let Some(user) = roster.find_by_name(me) else {
        return;
    };
    user.last_action = Instant::now();
    if user.presence != Presence::Inactive {
        return;
    }
    user.presence = Presence::Active;
    if let Some(frame) = encode(&Event::ChangedStatus {
        name: me.clone(),
        status: Presence::Active,
    }) {
        broadcast(roster, &frame);
    }
}

fn encode(event: &Event) -> Option<Message> {
    match event.encode() {
        Ok(bytes) => Some(Message::Binary(bytes.into())),
        Err(e) => {
            error!(error = %e, "failed to encode event");
            None
        }
    }
}

fn send(user: &User<OutboundTx>, frame: Message) {
    if user.handle.send(frame).is_err() {
        debug!(user = %user.name, "dropped frame for closing connection");
    }
}

fn send_event(user: &User<OutboundTx>, event: &Event) {
    if let Some(frame) = encode(event) {
        send(user, frame);
    }
}

fn broadcast(roster: &Roster<OutboundTx>, frame: &Message) {
    for user in roster.iter() {
        send(user, frame.clone());
    }
}

fn reply_error(roster: &Roster<OutboundTx>, me: &Name, code: ErrorCode) {
    if let Some(user) = roster.get(me) {
        send_event(user, &Event::Error { code });
    }
}
