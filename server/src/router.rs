//! Audience-scoped fan-out of registry changes and chat.
//!
//! Every function here is pure: it turns one accepted event into the list of
//! messages to deliver and who should receive each one. Transport code only
//! has to check [`Audience::includes`] for its own connection.

use presence_shared::protocol::{
    ChatBubbleMsg, ConnectionId, JoinRejectedMsg, ServerMsg, UserLeftMsg,
};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    AllExcept(ConnectionId),
    Only(ConnectionId),
}

impl Audience {
    pub fn includes(&self, id: ConnectionId) -> bool {
        match self {
            Audience::All => true,
            Audience::AllExcept(excluded) => *excluded != id,
            Audience::Only(target) => *target == id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub audience: Audience,
    pub msg: ServerMsg,
}

impl Delivery {
    pub fn new(audience: Audience, msg: ServerMsg) -> Self {
        Self { audience, msg }
    }
}

/// `joined` was just registered; `others` is everyone else at that instant
/// and `roster` the full name list including `joined`.
pub fn join_accepted(joined: &Session, others: &[Session], roster: Vec<String>) -> Vec<Delivery> {
    let id = joined.id;
    let mut out = vec![Delivery::new(Audience::All, ServerMsg::UserList(roster))];

    if !others.is_empty() {
        out.push(Delivery::new(
            Audience::Only(id),
            ServerMsg::ExistingUsers(others.iter().map(Session::to_user_state).collect()),
        ));
    }

    out.push(Delivery::new(
        Audience::AllExcept(id),
        ServerMsg::UserJoined(joined.to_user_state()),
    ));
    out.push(Delivery::new(
        Audience::AllExcept(id),
        ServerMsg::ChatMessage(format!("{} joined the scene.", joined.display_name)),
    ));
    out.push(Delivery::new(
        Audience::Only(id),
        ServerMsg::ChatMessage(format!("Welcome, {}!", joined.display_name)),
    ));
    out
}

pub fn join_rejected(id: ConnectionId, reason: impl Into<String>) -> Vec<Delivery> {
    vec![Delivery::new(
        Audience::Only(id),
        ServerMsg::JoinRejected(JoinRejectedMsg {
            reason: reason.into(),
        }),
    )]
}

/// Chat goes to everyone, the sender included: once as a log line and once
/// as a structured record that drives speech bubbles on remote avatars.
pub fn chat(sender: &Session, text: &str, timestamp_ms: u64) -> Vec<Delivery> {
    vec![
        Delivery::new(
            Audience::All,
            ServerMsg::ChatMessage(format!("{}: {}", sender.display_name, text)),
        ),
        Delivery::new(
            Audience::All,
            ServerMsg::ChatBubble(ChatBubbleMsg {
                username: sender.display_name.clone(),
                user_id: sender.id,
                message: text.to_string(),
                timestamp: timestamp_ms,
            }),
        ),
    ]
}

/// The mover already knows where it is.
pub fn moved(session: &Session) -> Vec<Delivery> {
    vec![Delivery::new(
        Audience::AllExcept(session.id),
        ServerMsg::UserMoved(session.to_user_moved()),
    )]
}

/// `left` is already gone from the registry; `roster` is what remains.
pub fn left(left: &Session, roster: Vec<String>) -> Vec<Delivery> {
    vec![
        Delivery::new(Audience::All, ServerMsg::UserList(roster)),
        Delivery::new(
            Audience::All,
            ServerMsg::ChatMessage(format!("{} left the scene.", left.display_name)),
        ),
        Delivery::new(
            Audience::All,
            ServerMsg::UserLeft(UserLeftMsg { user_id: left.id }),
        ),
    ]
}
