//! Realtime layer.
//!
//! - Event protocol (`ClientMessage` / `ServerMessage`)
//! - Instance-local routing actor and one session actor per connection
//! - Presence and typing state in the shared key-value store
//! - Cross-instance fanout and the offline hand-off
pub mod events;
pub mod fanout;
pub mod gateway;
pub mod handler;
pub mod message;
pub mod notifier;
pub mod presence;
pub mod server;
pub mod session;
pub mod typing;
