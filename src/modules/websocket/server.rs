//! Instance-local routing table.
//!
//! Tracks every connection held by this process, which user each one is
//! bound to, and which conversation rooms it has joined. It is a routing hint
//! only: membership is authorized against the store before anything is
//! joined here.
use actix::prelude::*;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::events::*;
use super::message::ServerMessage;

#[derive(Default)]
pub struct WebSocketServer {
    /// session_id -> recipient
    sessions: HashMap<Uuid, Recipient<ServerMessage>>,

    /// session_id -> user_id, for authenticated sessions
    session_users: HashMap<Uuid, Uuid>,

    /// user_id -> session_ids (multi-device)
    users: HashMap<Uuid, HashSet<Uuid>>,

    /// conversation_id -> session_ids
    rooms: HashMap<Uuid, HashSet<Uuid>>,

    /// session_id -> conversation_ids, to clean up on disconnect
    session_rooms: HashMap<Uuid, HashSet<Uuid>>,
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn send_to_session(&self, session_id: &Uuid, message: ServerMessage) {
        if let Some(recipient) = self.sessions.get(session_id) {
            recipient.do_send(message);
        }
    }

    fn send_to_user(&self, user_id: &Uuid, message: &ServerMessage) -> usize {
        let Some(session_ids) = self.users.get(user_id) else {
            return 0;
        };
        for session_id in session_ids {
            self.send_to_session(session_id, message.clone());
        }
        session_ids.len()
    }

    fn join(&mut self, session_id: Uuid, conversation_id: Uuid) {
        if !self.sessions.contains_key(&session_id) {
            return;
        }
        self.rooms.entry(conversation_id).or_default().insert(session_id);
        self.session_rooms.entry(session_id).or_default().insert(conversation_id);
    }

    fn leave(&mut self, session_id: &Uuid, conversation_id: &Uuid) {
        if let Some(room) = self.rooms.get_mut(conversation_id) {
            room.remove(session_id);
            if room.is_empty() {
                self.rooms.remove(conversation_id);
            }
        }
        if let Some(joined) = self.session_rooms.get_mut(session_id) {
            joined.remove(conversation_id);
        }
    }
}

impl Actor for WebSocketServer {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("WebSocket server started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("WebSocket server stopped");
    }
}

impl Handler<Connect> for WebSocketServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        tracing::debug!("New WebSocket session connected: {}", msg.id);
        self.sessions.insert(msg.id, msg.addr);
    }
}

impl Handler<Disconnect> for WebSocketServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        tracing::debug!("WebSocket session disconnected: {}", msg.id);

        self.sessions.remove(&msg.id);

        if let Some(joined) = self.session_rooms.remove(&msg.id) {
            for conversation_id in joined {
                if let Some(room) = self.rooms.get_mut(&conversation_id) {
                    room.remove(&msg.id);
                    if room.is_empty() {
                        self.rooms.remove(&conversation_id);
                    }
                }
            }
        }

        if let Some(user_id) = self.session_users.remove(&msg.id) {
            if let Some(sessions) = self.users.get_mut(&user_id) {
                sessions.remove(&msg.id);
                if sessions.is_empty() {
                    self.users.remove(&user_id);
                    tracing::info!("User {} has no more local sessions", user_id);
                }
            }
        }
    }
}

impl Handler<BindUser> for WebSocketServer {
    type Result = ();

    fn handle(&mut self, msg: BindUser, _: &mut Context<Self>) {
        if !self.sessions.contains_key(&msg.session_id) {
            tracing::debug!("Ignoring bind for closed session {}", msg.session_id);
            return;
        }

        self.session_users.insert(msg.session_id, msg.user_id);
        let sessions = self.users.entry(msg.user_id).or_default();
        sessions.insert(msg.session_id);

        tracing::info!("User {} now has {} local session(s)", msg.user_id, sessions.len());
    }
}

impl Handler<JoinRoom> for WebSocketServer {
    type Result = ();

    fn handle(&mut self, msg: JoinRoom, _: &mut Context<Self>) {
        self.join(msg.session_id, msg.conversation_id);
        tracing::debug!(
            "Session {} joined conversation {} ({} local sessions in room)",
            msg.session_id,
            msg.conversation_id,
            self.rooms.get(&msg.conversation_id).map_or(0, HashSet::len)
        );
    }
}

impl Handler<LeaveRoom> for WebSocketServer {
    type Result = ();

    fn handle(&mut self, msg: LeaveRoom, _: &mut Context<Self>) {
        self.leave(&msg.session_id, &msg.conversation_id);
        tracing::debug!("Session {} left conversation {}", msg.session_id, msg.conversation_id);
    }
}

impl Handler<Broadcast> for WebSocketServer {
    type Result = ();

    fn handle(&mut self, msg: Broadcast, _: &mut Context<Self>) {
        match msg {
            Broadcast::Room { conversation_id, message, skip_connection } => {
                let Some(room) = self.rooms.get(&conversation_id) else {
                    tracing::debug!("No local sessions in room {}", conversation_id);
                    return;
                };
                let mut sent = 0;
                for session_id in room {
                    if Some(*session_id) == skip_connection {
                        continue;
                    }
                    self.send_to_session(session_id, message.clone());
                    sent += 1;
                }
                tracing::debug!("Broadcast to room {}: {} sessions", conversation_id, sent);
            }
            Broadcast::User { user_id, message } => {
                let sent = self.send_to_user(&user_id, &message);
                tracing::debug!("Sent to user {} ({} sessions)", user_id, sent);
            }
            Broadcast::Users { user_ids, message } => {
                let sent: usize =
                    user_ids.iter().map(|user_id| self.send_to_user(user_id, &message)).sum();
                tracing::debug!("Sent to {} users ({} sessions)", user_ids.len(), sent);
            }
            Broadcast::JoinRoom { user_ids, conversation_id } => {
                let session_ids: Vec<Uuid> = user_ids
                    .iter()
                    .filter_map(|user_id| self.users.get(user_id))
                    .flatten()
                    .copied()
                    .collect();
                for session_id in session_ids {
                    self.join(session_id, conversation_id);
                }
            }
        }
    }
}

impl Message for ServerMessage {
    type Result = ();
}
