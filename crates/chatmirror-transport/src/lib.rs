//! # chatmirror transport
//!
//! Network plumbing shared by chatmirror endpoint adapters.
//!
//! ## Features
//!
//! - `ws-client`: reconnecting WebSocket client for push-style backends
//! - `http-client`: JSON HTTP client and polling loop for pull-style backends
//! - `full`: both
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Adapters            │  (Twitch, YouTube)
//! ├──────────────────────┤
//! │  chatmirror-transport│  <- This crate
//! ├──────────────────────┤
//! │  Network (TCP/HTTP)  │
//! └──────────────────────┘
//! ```
//!
//! | Transport | Model | Use Case |
//! |-----------|-------|----------|
//! | [`WsClient`](websocket::WsClient) | persistent stream | IRC-over-WebSocket chat |
//! | [`run_poll_loop`](http::run_poll_loop) | periodic polling | REST chat APIs |
//!
//! Both models share [`RetryPolicy`] for backoff.

pub mod error;
pub mod retry;

#[cfg(feature = "http-client")]
pub mod http;

#[cfg(feature = "ws-client")]
pub mod websocket;

pub use error::{TransportError, TransportResult};
pub use retry::{Backoff, RetryPolicy, retry, retry_if};

#[cfg(feature = "http-client")]
pub use http::{HttpClient, PollControl, PollExit, Poller, run_poll_loop};

#[cfg(feature = "ws-client")]
pub use websocket::{WsClient, WsClientConfig, WsConnection, WsHandler, WsSender};
