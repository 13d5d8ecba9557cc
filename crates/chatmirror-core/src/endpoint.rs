//! The capability contract every chat backend adapter implements.
//!
//! # Delivery Path
//!
//! Inbound messages flow through a [`MessageSink`] handed to the adapter by
//! [`ChatEndpoint::on_message`]. The sink is a bounded queue consumed by one
//! relay task per endpoint:
//!
//! ```text
//! ┌──────────────┐ deliver() ┌────────────┐ recv() ┌──────────────┐ send() ┌──────────────┐
//! │ Adapter A    │──────────▶│ queue (A)  │───────▶│ relay task A │───────▶│ Adapter B    │
//! │ reader task  │           │ bounded    │        │ + Formatter  │        │              │
//! └──────────────┘           └────────────┘        └──────────────┘        └──────────────┘
//! ```
//!
//! Adapters call [`MessageSink::deliver`] from their own reader or poll task,
//! one message at a time, in backend arrival order. Dropping the sink signals
//! terminal disconnect to the relay.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

use crate::error::{
    ConnectResult, DeliveryError, DisconnectError, SendResult, SubscribeError,
};
use crate::message::{ChatMessage, EndpointId};

/// Connection state of an endpoint, owned by its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No backend session.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Tearing the session down.
    Stopping,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// The uniform operations any chat backend adapter supports.
///
/// Whether the backend pushes messages over a persistent stream or is polled
/// is hidden behind this trait. All methods take `&self`: `send` in particular
/// may be called from the relay task of the *other* endpoint while this
/// endpoint's own reader task is running.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Backend label used in logs and errors (e.g. "twitch").
    fn name(&self) -> &str;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Establishes the backend session.
    ///
    /// May block until the initial handshake completes.
    async fn connect(&self) -> ConnectResult<()>;

    /// Releases all backend resources.
    ///
    /// Idempotent: calling it on a disconnected endpoint returns `Ok(())`.
    /// Cancels any in-flight `connect()` or `send()`.
    async fn disconnect(&self) -> Result<(), DisconnectError>;

    /// Delivers one message to the backend's chat.
    async fn send(&self, text: &str) -> SendResult<()>;

    /// Registers the sink that receives every inbound message.
    ///
    /// Exactly one sink may be registered per endpoint.
    fn on_message(&self, sink: MessageSink) -> Result<(), SubscribeError>;
}

/// A boxed endpoint trait object.
pub type BoxedEndpoint = Box<dyn ChatEndpoint>;

// =============================================================================
// Message Sink
// =============================================================================

/// Default time a sink waits for queue space before dropping a message.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// The adapter side of an endpoint's inbound queue.
///
/// Stamps every delivered message with the endpoint's [`EndpointId`].
#[derive(Debug, Clone)]
pub struct MessageSink {
    origin: EndpointId,
    tx: mpsc::Sender<ChatMessage>,
    delivery_timeout: Duration,
}

impl MessageSink {
    /// Creates a sink and the receiver the relay consumes.
    pub fn channel(
        origin: EndpointId,
        capacity: usize,
        delivery_timeout: Duration,
    ) -> (Self, mpsc::Receiver<ChatMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            origin,
            tx,
            delivery_timeout,
        };
        (sink, rx)
    }

    /// The endpoint this sink belongs to.
    pub fn origin(&self) -> EndpointId {
        self.origin
    }

    /// Returns true once the relay has stopped consuming.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Hands one inbound message to the relay.
    ///
    /// If the queue is full this logs a warning and waits up to the delivery
    /// timeout; a message that still cannot be queued is dropped.
    pub async fn deliver(
        &self,
        sender_display_name: impl Into<String>,
        sender_login: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), DeliveryError> {
        let message = ChatMessage::new(self.origin, sender_display_name, sender_login, text);

        let message = match self.tx.try_send(message) {
            Ok(()) => {
                trace!(endpoint = %self.origin, "Message queued");
                return Ok(());
            }
            Err(TrySendError::Closed(_)) => return Err(DeliveryError::Closed),
            Err(TrySendError::Full(message)) => message,
        };

        warn!(
            endpoint = %self.origin,
            timeout = ?self.delivery_timeout,
            "Relay queue full, waiting for space"
        );

        match tokio::time::timeout(self.delivery_timeout, self.tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::Stalled(self.delivery_timeout)),
        }
    }
}

/// Holds the single sink an adapter may have registered.
///
/// Adapters embed this to implement [`ChatEndpoint::on_message`].
#[derive(Debug, Default)]
pub struct SinkSlot {
    sink: Mutex<Option<MessageSink>>,
    registered: Mutex<bool>,
}

impl SinkSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the sink; fails if one was ever registered before.
    pub fn register(&self, sink: MessageSink) -> Result<(), SubscribeError> {
        let mut registered = self.registered.lock();
        if *registered {
            return Err(SubscribeError::AlreadySubscribed);
        }
        *registered = true;
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    /// Returns a clone of the registered sink, if any.
    pub fn get(&self) -> Option<MessageSink> {
        self.sink.lock().clone()
    }

    /// Drops the stored sink, signalling terminal disconnect once every clone
    /// held by reader tasks is gone too.
    pub fn release(&self) {
        self.sink.lock().take();
    }
}

/// Shared connection state an adapter can read from any task.
#[derive(Debug, Default)]
pub struct StateCell(Mutex<ConnectionState>);

impl StateCell {
    /// Creates a cell in the `Disconnected` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the current state.
    pub fn get(&self) -> ConnectionState {
        *self.0.lock()
    }

    /// Overwrites the state.
    pub fn set(&self, state: ConnectionState) {
        *self.0.lock() = state;
    }

    /// Moves from `from` to `to` if the current state is `from`.
    ///
    /// Returns the state observed before the call.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> ConnectionState {
        let mut state = self.0.lock();
        let previous = *state;
        if previous == from {
            *state = to;
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_stamps_origin() {
        let (sink, mut rx) = MessageSink::channel(EndpointId::B, 4, DEFAULT_DELIVERY_TIMEOUT);
        sink.deliver("Ann", "ann_1", "hi").await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.origin(), EndpointId::B);
        assert_eq!(msg.text(), "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_drops_after_stall() {
        let (sink, _rx) = MessageSink::channel(EndpointId::A, 1, Duration::from_millis(50));
        sink.deliver("a", "a", "first").await.unwrap();

        let result = sink.deliver("a", "a", "second").await;
        assert!(matches!(result, Err(DeliveryError::Stalled(_))));
    }

    #[tokio::test]
    async fn test_deliver_reports_closed() {
        let (sink, rx) = MessageSink::channel(EndpointId::A, 1, DEFAULT_DELIVERY_TIMEOUT);
        drop(rx);
        assert!(sink.is_closed());
        assert!(matches!(
            sink.deliver("a", "a", "x").await,
            Err(DeliveryError::Closed)
        ));
    }

    #[test]
    fn test_sink_slot_accepts_one_registration() {
        let slot = SinkSlot::new();
        let (sink, _rx) = MessageSink::channel(EndpointId::A, 1, DEFAULT_DELIVERY_TIMEOUT);
        assert!(slot.register(sink.clone()).is_ok());
        assert!(matches!(
            slot.register(sink),
            Err(SubscribeError::AlreadySubscribed)
        ));

        slot.release();
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_state_transition() {
        let cell = StateCell::new();
        let prev = cell.transition(ConnectionState::Disconnected, ConnectionState::Connecting);
        assert_eq!(prev, ConnectionState::Disconnected);
        assert_eq!(cell.get(), ConnectionState::Connecting);

        let prev = cell.transition(ConnectionState::Disconnected, ConnectionState::Connected);
        assert_eq!(prev, ConnectionState::Connecting);
        assert_eq!(cell.get(), ConnectionState::Connecting);
    }
}
