//! Messages exchanged between session actors and the server actor.
use actix::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::ServerMessage;

/// A connection opened; `addr` receives everything routed to it.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub id: Uuid,
    pub addr: Recipient<ServerMessage>,
}

/// A connection closed; drops it from every local group.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub id: Uuid,
}

/// Binds an authenticated connection to its user's personal group.
#[derive(Message)]
#[rtype(result = "()")]
pub struct BindUser {
    pub session_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct JoinRoom {
    pub session_id: Uuid,
    pub conversation_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveRoom {
    pub session_id: Uuid,
    pub conversation_id: Uuid,
}

/// Anything that can be fanned out across instances. Serialized as-is into
/// the fanout envelope.
#[derive(Message, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[rtype(result = "()")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Broadcast {
    /// To every connection in a conversation room, optionally skipping one.
    Room {
        conversation_id: Uuid,
        message: ServerMessage,
        skip_connection: Option<Uuid>,
    },
    /// To every connection of one user.
    User { user_id: Uuid, message: ServerMessage },
    /// To every connection of each listed user.
    Users { user_ids: Vec<Uuid>, message: ServerMessage },
    /// Adds every connection of the listed users to a conversation room.
    JoinRoom { user_ids: Vec<Uuid>, conversation_id: Uuid },
}

impl Broadcast {
    pub fn room(conversation_id: Uuid, message: ServerMessage) -> Self {
        Broadcast::Room { conversation_id, message, skip_connection: None }
    }

    pub fn room_except(conversation_id: Uuid, message: ServerMessage, skip: Option<Uuid>) -> Self {
        Broadcast::Room { conversation_id, message, skip_connection: skip }
    }
}
