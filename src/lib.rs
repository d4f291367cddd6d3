//! A resilient, reconnecting WebSocket client implementation.
//!
//! This crate implements the client side of [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455)
//! on top of `tokio`: framing, message assembly, the HTTP Upgrade handshake, a
//! connection-lifecycle state machine, a PING/PONG heartbeat, graceful close,
//! and automatic reconnection with pluggable backoff strategies.
//!
//! The entry point is [`Client`], built from a [`ClientConfig`] and connected
//! with [`Client::connect`]. Connection-lifecycle, heartbeat, and reconnect
//! notifications are available either as a [`futures::Stream`] via
//! [`Client::events`] or by querying [`Client::state`] / [`Client::heartbeat_stats`]
//! directly.

pub mod assembler;
pub mod client;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod event;
pub mod extensions;
pub mod frame;
pub mod handshake;
pub mod heartbeat;
pub mod message;
pub mod reconnect;
pub mod request;
pub mod state;
pub mod transport;
mod utils;

pub use client::Client;
pub use config::{ClientConfig, ReconnectStrategyConfig, WebSocketConfig};
pub use error::{Error, ErrorCategory, ProtocolError};
pub use event::{ClientEvent, EventStream, HeartbeatEvent};
pub use message::Message;
pub use reconnect::{ReconnectEvent, ReconnectState};
pub use state::ConnectionState;
pub use transport::{TcpClientTransport, Transport};
