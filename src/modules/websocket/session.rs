//! One actor per WebSocket connection.
//!
//! The session owns connection state (authentication, typing timers,
//! heartbeat) and forwards outbound frames to the socket loop in `handler`
//! through an mpsc channel. Storage work runs through `GatewayService` in
//! futures spawned on the actor context.
use actix::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::error;

use super::events::*;
use super::gateway::{AuthenticatedUser, GatewayService};
use super::message::{ClientMessage, ServerMessage};
use super::server::WebSocketServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated { user_id: Uuid },
}

pub struct WebSocketSession {
    pub id: Uuid,
    state: AuthState,
    server: Addr<WebSocketServer>,
    gateway: Arc<GatewayService>,
    tx: mpsc::UnboundedSender<String>,
    /// conversation_id -> timer that announces a lapsed typing flag
    typing: HashMap<Uuid, SpawnHandle>,
}

/// Sent by the socket loop when the client side is gone.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Close;

impl WebSocketSession {
    pub fn new(
        server: Addr<WebSocketServer>,
        gateway: Arc<GatewayService>,
        tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            state: AuthState::Unauthenticated,
            server,
            gateway,
            tx,
            typing: HashMap::new(),
        }
    }

    fn send_to_client(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => {
                if self.tx.send(json).is_err() {
                    tracing::debug!("Client channel closed for session {}", self.id);
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize ServerMessage (session {}): {}", self.id, e);
            }
        }
    }

    fn send_error(&self, err: error::SystemError, temp_id: Option<String>) {
        let err = error::Error::from(err);
        tracing::debug!("Session {} event failed: {}", self.id, err);
        self.send_to_client(&ServerMessage::error(&err, temp_id));
    }

    fn reply(
        &self,
        result: Result<Option<ServerMessage>, error::SystemError>,
        temp_id: Option<String>,
    ) {
        match result {
            Ok(Some(msg)) => self.send_to_client(&msg),
            Ok(None) => {}
            Err(e) => self.send_error(e, temp_id),
        }
    }

    fn handle_client_message(&mut self, msg: ClientMessage, ctx: &mut Context<Self>) {
        let user_id = match (self.state, &msg) {
            (AuthState::Unauthenticated, ClientMessage::Authenticate { token }) => {
                self.handle_authenticate(token.clone(), ctx);
                return;
            }
            (AuthState::Authenticated { .. }, ClientMessage::Authenticate { .. }) => {
                self.send_error(error::SystemError::bad_request("Already authenticated"), None);
                return;
            }
            (AuthState::Authenticated { user_id }, _) => user_id,
            (_, msg) => {
                self.send_error(
                    error::SystemError::unauthorized("Authenticate before sending events"),
                    msg.temp_id(),
                );
                return;
            }
        };

        let gateway = self.gateway.clone();
        let connection_id = self.id;

        match msg {
            ClientMessage::Authenticate { .. } => {}

            ClientMessage::MessageSend(payload) => {
                let temp_id = payload.temp_id.clone();
                // Waits so one connection's messages keep their send order.
                ctx.wait(
                    async move { gateway.send_message(user_id, connection_id, payload).await }
                        .into_actor(self)
                        .map(move |res, act, _| act.reply(res.map(Some), temp_id)),
                );
            }

            ClientMessage::MessageDelivered { message_id } => {
                ctx.spawn(
                    async move { gateway.mark_delivered(user_id, message_id).await }
                        .into_actor(self)
                        .map(|res, act, _| act.reply(res.map(|_| None), None)),
                );
            }

            ClientMessage::MessageRead { conversation_id, message_id } => {
                ctx.spawn(
                    async move { gateway.mark_read(user_id, conversation_id, message_id).await }
                        .into_actor(self)
                        .map(|res, act, _| act.reply(res.map(|_| None), None)),
                );
            }

            ClientMessage::TypingStart { conversation_id } => {
                ctx.spawn(
                    async move { gateway.typing_start(user_id, connection_id, conversation_id).await }
                        .into_actor(self)
                        .map(move |res, act, ctx| match res {
                            Ok(()) => act.arm_typing_timer(user_id, conversation_id, ctx),
                            Err(e) => act.send_error(e, None),
                        }),
                );
            }

            ClientMessage::TypingStop { conversation_id } => {
                if let Some(handle) = self.typing.remove(&conversation_id) {
                    ctx.cancel_future(handle);
                }
                ctx.spawn(
                    async move { gateway.typing_stop(user_id, connection_id, conversation_id).await }
                        .into_actor(self)
                        .map(|res, act, _| act.reply(res.map(|_| None), None)),
                );
            }

            ClientMessage::ConversationJoin { conversation_id } => {
                ctx.spawn(
                    async move { gateway.join(user_id, conversation_id).await }
                        .into_actor(self)
                        .map(move |res, act, _| match res {
                            Ok(()) => {
                                act.server.do_send(JoinRoom { session_id: act.id, conversation_id })
                            }
                            Err(e) => act.send_error(e, None),
                        }),
                );
            }

            ClientMessage::ConversationLeave { conversation_id } => {
                self.server.do_send(LeaveRoom { session_id: self.id, conversation_id });
            }

            ClientMessage::PresenceUpdate { status } => {
                actix_web::rt::spawn(async move { gateway.update_presence(user_id, status).await });
            }

            ClientMessage::KeysGet { user_id: target_id } => {
                ctx.spawn(
                    async move { gateway.get_keys(target_id).await }
                        .into_actor(self)
                        .map(|res, act, _| act.reply(res.map(Some), None)),
                );
            }

            ClientMessage::Ping => {
                self.send_to_client(&ServerMessage::Pong);
            }
        }
    }

    fn handle_authenticate(&mut self, token: String, ctx: &mut Context<Self>) {
        self.state = AuthState::Authenticating;
        let gateway = self.gateway.clone();
        let connection_id = self.id;

        ctx.wait(
            async move { gateway.authenticate(&token, connection_id).await }
                .into_actor(self)
                .map(|res, act, ctx| match res {
                    Ok(auth) => act.complete_authentication(auth, ctx),
                    Err(e) => {
                        tracing::warn!("Authentication failed on session {}: {}", act.id, e);
                        act.state = AuthState::Unauthenticated;
                        act.send_to_client(&ServerMessage::error(
                            &error::Error::unauthorized("Token invalid or expired"),
                            None,
                        ));
                    }
                }),
        );
    }

    fn complete_authentication(&mut self, auth: AuthenticatedUser, ctx: &mut Context<Self>) {
        let AuthenticatedUser { user_id, conversation_ids, connected_at } = auth;
        self.state = AuthState::Authenticated { user_id };

        self.server.do_send(BindUser { session_id: self.id, user_id });
        for conversation_id in conversation_ids {
            self.server.do_send(JoinRoom { session_id: self.id, conversation_id });
        }

        let interval = Duration::from_secs(self.gateway.config().heartbeat_interval);
        // Tied to the actor so a stopped session cannot refresh presence.
        ctx.run_interval(interval, move |act, ctx| {
            let gateway = act.gateway.clone();
            let connection_id = act.id;
            ctx.spawn(
                async move { gateway.heartbeat(user_id, connection_id).await }.into_actor(act),
            );
        });

        self.send_to_client(&ServerMessage::Authenticated {
            user_id,
            session_id: self.id,
            connected_at,
        });
    }

    /// (Re)starts the timer that announces a stop if the client never sends
    /// `typing:stop` and the flag lapses.
    fn arm_typing_timer(&mut self, user_id: Uuid, conversation_id: Uuid, ctx: &mut Context<Self>) {
        if let Some(handle) = self.typing.remove(&conversation_id) {
            ctx.cancel_future(handle);
        }

        let after = Duration::from_secs(self.gateway.typing_ttl() + 1);
        let handle = ctx.run_later(after, move |act, _| {
            act.typing.remove(&conversation_id);
            let gateway = act.gateway.clone();
            let connection_id = act.id;
            actix_web::rt::spawn(async move {
                gateway.typing_lapsed(user_id, connection_id, conversation_id).await
            });
        });
        self.typing.insert(conversation_id, handle);
    }
}

impl Actor for WebSocketSession {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("WebSocket session started: {}", self.id);
        self.server.do_send(Connect { id: self.id, addr: ctx.address().recipient() });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("WebSocket session stopped: {}", self.id);
        self.server.do_send(Disconnect { id: self.id });

        if let AuthState::Authenticated { user_id } = self.state {
            let gateway = self.gateway.clone();
            let connection_id = self.id;
            let typing_in: Vec<Uuid> = self.typing.keys().copied().collect();
            actix_web::rt::spawn(async move {
                gateway.disconnect(user_id, connection_id, typing_in).await
            });
        }
    }
}

impl Message for ClientMessage {
    type Result = ();
}

impl Handler<ClientMessage> for WebSocketSession {
    type Result = ();

    fn handle(&mut self, msg: ClientMessage, ctx: &mut Context<Self>) {
        self.handle_client_message(msg, ctx);
    }
}

impl Handler<ServerMessage> for WebSocketSession {
    type Result = ();

    fn handle(&mut self, msg: ServerMessage, _ctx: &mut Context<Self>) {
        self.send_to_client(&msg);
    }
}

impl Handler<Close> for WebSocketSession {
    type Result = ();

    fn handle(&mut self, _: Close, ctx: &mut Context<Self>) {
        ctx.stop();
    }
}
