//! HTTP upgrade and the per-connection socket loop.
//!
//! - Inbound:  client -> WebSocket -> `ClientMessage` -> session actor
//! - Outbound: server actor -> session actor -> mpsc channel -> WebSocket -> client
use actix::{Actor, Addr};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_ws::Message;
use tokio::sync::mpsc;

use super::gateway::GatewayService;
use super::message::{ClientMessage, ServerMessage};
use super::server::WebSocketServer;
use super::session::{Close, WebSocketSession};
use crate::api::error;

/// Decodes a text frame. A frame that does not fit any event is answered
/// with a validation error that still echoes `data.tempId` when the client
/// sent one, so a failed `message:send` can be matched to its optimistic copy.
fn parse_frame(text: &str) -> Result<ClientMessage, ServerMessage> {
    serde_json::from_str::<ClientMessage>(text).map_err(|e| {
        tracing::warn!("Unparseable client frame: {}", e);
        let temp_id = serde_json::from_str::<serde_json::Value>(text).ok().and_then(|frame| {
            frame.get("data")?.get("tempId")?.as_str().map(str::to_owned)
        });
        ServerMessage::error(&error::Error::bad_request(format!("Invalid event: {e}")), temp_id)
    })
}

/// Authentication happens in-band with an `authenticate` event, so the
/// upgrade itself is not behind the auth middleware.
#[get("/ws")]
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    server: web::Data<Addr<WebSocketServer>>,
    gateway: web::Data<GatewayService>,
) -> Result<HttpResponse, Error> {
    tracing::debug!("WebSocket upgrade request from {:?}", req.peer_addr());

    let (response, mut ws_session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let reject_tx = tx.clone();

    let addr =
        WebSocketSession::new(server.get_ref().clone(), gateway.into_inner(), tx).start();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                msg = msg_stream.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                            Ok(client_msg) => addr.do_send(client_msg),
                            Err(rejection) => {
                                if let Ok(json) = serde_json::to_string(&rejection) {
                                    let _ = reject_tx.send(json);
                                }
                            }
                        },

                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_session.pong(&data).await {
                                tracing::error!("Failed to send pong: {}", e);
                                break;
                            }
                        }

                        Some(Ok(Message::Pong(_))) => {}

                        Some(Ok(Message::Close(reason))) => {
                            tracing::info!("WebSocket close frame: {:?}", reason);
                            break;
                        }

                        Some(Ok(Message::Binary(_))) => {
                            tracing::warn!("Binary frames are not supported");
                        }

                        Some(Ok(Message::Continuation(_) | Message::Nop)) => {}

                        Some(Err(e)) => {
                            tracing::error!("WebSocket protocol error: {}", e);
                            break;
                        }

                        None => break,
                    }
                }

                Some(json) = rx.recv() => {
                    if ws_session.text(json).await.is_err() {
                        tracing::error!("Failed to write to WebSocket client");
                        break;
                    }
                }
            }
        }

        addr.do_send(Close);
        let _ = ws_session.close(None).await;
        tracing::debug!("WebSocket message loop finished");
    });

    Ok(response)
}
