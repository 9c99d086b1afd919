//! # logtail-server
//!
//! WebSocket gateway that streams job log topics to watching clients.
//!
//! - [`session`]: per-connection state, topic flags and the send queue
//! - [`registry`]: live sessions by id
//! - [`dispatcher`]: envelope decoding and routing on `action`
//! - [`handlers`]: `watch_log`, `heart_beat`, `worker_push_log`
//! - [`streamer`]: one task per watched (session, topic)
//! - [`websocket`]: axum transport driving a session
//! - [`server`]: router, health, metrics and graceful shutdown

#![deny(unsafe_code)]

pub mod context;
pub mod dispatcher;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod streamer;
pub mod websocket;

pub use context::GatewayContext;
pub use dispatcher::{ActionHandler, DispatchOutcome, Dispatcher, DispatcherBuilder};
pub use handlers::HandlerError;
pub use registry::SessionRegistry;
pub use server::LogtailServer;
pub use session::{SendError, Session};
pub use streamer::{StreamExit, StreamerConfig};
