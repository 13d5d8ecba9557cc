//! The relay: forwards every message from one endpoint to the other.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Starting ──both connected──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//!                      │                                                ▲
//!                      └──────── connect failure / stop() ──────────────┘
//! ```
//!
//! `Stopped` is terminal; build a new relay to run again.
//!
//! # Forwarding
//!
//! One task per endpoint drains that endpoint's inbound queue in order,
//! formats each message and sends it to the counterpart. The two directions
//! run independently and are never serialized against each other.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::endpoint::{BoxedEndpoint, ChatEndpoint, DEFAULT_DELIVERY_TIMEOUT, MessageSink};
use crate::error::{ConnectionError, ShutdownError, StartupError};
use crate::format::Formatter;
use crate::message::{ChatMessage, EndpointId};

/// Default capacity of each endpoint's inbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Relay lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Constructed, not started.
    Idle,
    /// Connecting both endpoints.
    Starting,
    /// Both endpoints connected; messages are being forwarded.
    Running,
    /// Disconnecting both endpoints.
    Stopping,
    /// Terminal.
    Stopped,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Tunables for a [`Relay`].
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Formatting policy for forwarded messages.
    pub formatter: Formatter,
    /// Capacity of each endpoint's inbound queue.
    pub queue_capacity: usize,
    /// How long an adapter may block on a full queue before dropping a message.
    pub delivery_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            formatter: Formatter::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

impl RelayOptions {
    /// Sets the formatter.
    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Sets the inbound queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the delivery timeout.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }
}

/// Bidirectional relay between exactly two chat endpoints.
///
/// The relay owns both endpoints; the routing (A to B, B to A) is fixed at
/// construction.
pub struct Relay {
    endpoint_a: Arc<dyn ChatEndpoint>,
    endpoint_b: Arc<dyn ChatEndpoint>,
    options: RelayOptions,
    state: Mutex<RelayState>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    tasks: TaskTracker,
}

impl Relay {
    /// Creates an idle relay over two endpoints.
    pub fn new(endpoint_a: BoxedEndpoint, endpoint_b: BoxedEndpoint, options: RelayOptions) -> Self {
        let tasks = TaskTracker::new();
        // Closed up front so `join()` on a relay that never started returns.
        tasks.close();

        Self {
            endpoint_a: Arc::from(endpoint_a),
            endpoint_b: Arc::from(endpoint_b),
            options,
            state: Mutex::new(RelayState::Idle),
            shutdown: CancellationToken::new(),
            stopped: CancellationToken::new(),
            tasks,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> RelayState {
        *self.state.lock()
    }

    /// Returns the endpoint for an identifier.
    pub fn endpoint(&self, id: EndpointId) -> &Arc<dyn ChatEndpoint> {
        match id {
            EndpointId::A => &self.endpoint_a,
            EndpointId::B => &self.endpoint_b,
        }
    }

    /// Connects both endpoints and begins forwarding.
    ///
    /// On failure every endpoint that did connect is disconnected again and
    /// the relay ends in [`RelayState::Stopped`].
    pub async fn start(&self) -> Result<(), StartupError> {
        {
            let mut state = self.state.lock();
            if *state != RelayState::Idle {
                return Err(StartupError::InvalidState(*state));
            }
            *state = RelayState::Starting;
        }

        info!(
            endpoint_a = self.endpoint_a.name(),
            endpoint_b = self.endpoint_b.name(),
            "Starting relay"
        );

        // Sinks go in before connecting so nothing received during the
        // handshake is lost.
        for id in [EndpointId::A, EndpointId::B] {
            let (sink, inbound) = MessageSink::channel(
                id,
                self.options.queue_capacity,
                self.options.delivery_timeout,
            );
            if let Err(source) = self.endpoint(id).on_message(sink) {
                self.abort_start(&[]).await;
                return Err(StartupError::Subscribe {
                    endpoint: id,
                    source,
                });
            }
            self.spawn_forwarder(id, inbound);
        }

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            results = async {
                tokio::join!(self.endpoint_a.connect(), self.endpoint_b.connect())
            } => Some(results),
        };

        let Some((result_a, result_b)) = outcome else {
            info!("Relay start cancelled");
            // the concurrent stop() owns the disconnects
            self.abort_start(&[]).await;
            return Err(StartupError::Cancelled);
        };

        let connected: Vec<EndpointId> = [(EndpointId::A, &result_a), (EndpointId::B, &result_b)]
            .into_iter()
            .filter_map(|(id, result)| result.is_ok().then_some(id))
            .collect();

        match (result_a, result_b) {
            (Ok(()), Ok(())) => {}
            (Err(source), _) => {
                return Err(self.fail_start(EndpointId::A, source, &connected).await);
            }
            (Ok(()), Err(source)) => {
                return Err(self.fail_start(EndpointId::B, source, &connected).await);
            }
        }

        {
            let mut state = self.state.lock();
            if *state != RelayState::Starting {
                // stop() won the race after both connects returned.
                return Err(StartupError::Cancelled);
            }
            *state = RelayState::Running;
        }

        info!("Relay running");
        Ok(())
    }

    /// Waits until both endpoints have terminally disconnected.
    ///
    /// Returns immediately on a relay that never started.
    pub async fn join(&self) {
        self.tasks.wait().await;
    }

    /// Disconnects both endpoints and stops forwarding.
    ///
    /// Idempotent: calling it again after the relay stopped returns `Ok(())`
    /// without touching the endpoints. A call made while another `stop()` is
    /// in progress waits for that one to finish. Both disconnects are always
    /// attempted; their failures are aggregated and reported to the first
    /// caller only.
    pub async fn stop(&self) -> Result<(), ShutdownError> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            match previous {
                RelayState::Idle => *state = RelayState::Stopped,
                RelayState::Starting | RelayState::Running => *state = RelayState::Stopping,
                RelayState::Stopping | RelayState::Stopped => {}
            }
            previous
        };

        match previous {
            RelayState::Idle => {
                self.stopped.cancel();
                Ok(())
            }
            RelayState::Starting | RelayState::Running => self.shut_down().await,
            RelayState::Stopping => {
                debug!("Stop already in progress, waiting for it");
                self.stopped.cancelled().await;
                Ok(())
            }
            RelayState::Stopped => Ok(()),
        }
    }

    async fn shut_down(&self) -> Result<(), ShutdownError> {
        info!("Stopping relay");
        self.shutdown.cancel();

        let (result_a, result_b) =
            tokio::join!(self.endpoint_a.disconnect(), self.endpoint_b.disconnect());

        let mut failures = Vec::new();
        for (id, result) in [(EndpointId::A, result_a), (EndpointId::B, result_b)] {
            if let Err(e) = result {
                error!(endpoint = %id, backend = self.endpoint(id).name(), error = %e, "Failed to disconnect endpoint");
                failures.push((id, e));
            }
        }

        self.tasks.wait().await;
        *self.state.lock() = RelayState::Stopped;
        self.stopped.cancel();
        info!("Relay stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }

    /// Cleans up after a connect failure and builds the error to return.
    async fn fail_start(
        &self,
        endpoint: EndpointId,
        source: ConnectionError,
        connected: &[EndpointId],
    ) -> StartupError {
        let backend = self.endpoint(endpoint).name().to_string();
        error!(endpoint = %endpoint, backend = %backend, error = %source, "Endpoint failed to connect");
        self.abort_start(connected).await;
        StartupError::Connection {
            endpoint,
            backend,
            source,
        }
    }

    /// Disconnects the given endpoints and moves to `Stopped`.
    async fn abort_start(&self, connected: &[EndpointId]) {
        self.shutdown.cancel();
        for id in connected {
            if let Err(e) = self.endpoint(*id).disconnect().await {
                warn!(endpoint = %id, error = %e, "Disconnect after failed start also failed");
            }
        }
        self.tasks.wait().await;

        let mut state = self.state.lock();
        if *state == RelayState::Starting {
            *state = RelayState::Stopped;
            self.stopped.cancel();
        }
    }

    fn spawn_forwarder(&self, origin: EndpointId, inbound: mpsc::Receiver<ChatMessage>) {
        let target = Arc::clone(self.endpoint(origin.counterpart()));
        let formatter = self.options.formatter;
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(forward(origin, inbound, target, formatter, shutdown));
    }
}

/// Drains one endpoint's inbound queue into its counterpart.
async fn forward(
    origin: EndpointId,
    mut inbound: mpsc::Receiver<ChatMessage>,
    target: Arc<dyn ChatEndpoint>,
    formatter: Formatter,
    shutdown: CancellationToken,
) {
    let destination = origin.counterpart();

    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let dropped = discard_pending(&mut inbound);
                if dropped > 0 {
                    warn!(endpoint = %origin, dropped, "Relay stopped with messages still queued");
                }
                break;
            }
            msg = inbound.recv() => match msg {
                Some(msg) => msg,
                None => {
                    info!(endpoint = %origin, "Endpoint delivery path closed");
                    break;
                }
            },
        };

        if msg.origin() != origin {
            error!(
                endpoint = %origin,
                claimed = %msg.origin(),
                "Message arrived on the wrong queue, dropping"
            );
            continue;
        }

        let Some(text) = formatter.render(&msg) else {
            debug!(from = %origin, login = msg.sender_login(), "Skipping empty message");
            continue;
        };

        debug!(from = %origin, to = %destination, "{text}");

        if let Err(e) = target.send(&text).await {
            error!(
                from = %origin,
                to = %destination,
                backend = target.name(),
                transient = e.is_transient(),
                error = %e,
                "Failed to forward message"
            );
        }
    }
}

/// Closes the queue and empties it, returning how many messages were lost.
fn discard_pending(inbound: &mut mpsc::Receiver<ChatMessage>) -> usize {
    inbound.close();
    let mut dropped = 0;
    while inbound.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}
