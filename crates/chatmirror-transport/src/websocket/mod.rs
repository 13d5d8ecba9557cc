//! WebSocket transport.

mod client;

pub use client::{WsClient, WsClientConfig, WsConnection, WsHandler, WsSender};
