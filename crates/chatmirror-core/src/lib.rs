//! # chatmirror core
//!
//! The relay engine of chatmirror: a bidirectional message forwarder between
//! two independent live-stream chat backends.
//!
//! ## Building Blocks
//!
//! - [`ChatEndpoint`]: capability contract every backend adapter implements
//!   (connect, disconnect, send, inbound message sink).
//! - [`MessageSink`]: bounded delivery path from an adapter to the relay.
//! - [`Formatter`]: turns a [`ChatMessage`] into the forwarded text.
//! - [`Relay`]: owns two endpoints and forwards A to B and B to A.
//!
//! ```text
//! ┌────────────┐        ┌───────────────────────┐        ┌────────────┐
//! │ Endpoint A │──msg──▶│ Relay ─▶ Formatter ─▶ │──send─▶│ Endpoint B │
//! │  (stream)  │◀─send──│ ◀─ Formatter ◀─       │◀──msg──│  (polling) │
//! └────────────┘        └───────────────────────┘        └────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatmirror_core::{Relay, RelayOptions};
//!
//! let relay = Relay::new(Box::new(twitch), Box::new(youtube), RelayOptions::default());
//! relay.start().await?;
//! relay.join().await;
//! relay.stop().await?;
//! ```

pub mod endpoint;
pub mod error;
pub mod format;
pub mod message;
pub mod relay;

pub use endpoint::{
    BoxedEndpoint, ChatEndpoint, ConnectionState, DEFAULT_DELIVERY_TIMEOUT, MessageSink,
    SinkSlot, StateCell,
};
pub use error::{
    ConnectResult, ConnectionError, DeliveryError, DisconnectError, SendError, SendErrorKind,
    SendResult, ShutdownError, StartupError, SubscribeError,
};
pub use format::{Formatter, format};
pub use message::{ChatMessage, EndpointId};
pub use relay::{DEFAULT_QUEUE_CAPACITY, Relay, RelayOptions, RelayState};
