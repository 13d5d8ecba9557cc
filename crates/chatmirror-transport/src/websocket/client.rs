//! Reconnecting WebSocket client.
//!
//! A [`WsClient`] opens one text-frame WebSocket session and keeps it alive on
//! a background task:
//!
//! - frames queued through [`WsSender`] are written to the socket,
//! - inbound text frames are handed to the [`WsHandler`] in arrival order,
//!   and the reply frames it returns are written before anything queued,
//! - on close or error the session is re-established with exponential backoff,
//!   replaying [`WsHandler::handshake`] frames after every reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::retry::{Backoff, RetryPolicy};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Callbacks driven by the client task.
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    /// Frames sent right after every successful (re)connect.
    fn handshake(&self) -> Vec<String>;

    /// Called for every inbound text frame.
    ///
    /// Returned frames are written straight to the socket. Protocol replies
    /// (keep-alives and the like) must go this way: the outgoing queue is
    /// drained by the same task that runs this callback.
    async fn on_text(&self, text: &str, sender: &WsSender) -> Vec<String>;

    /// Called when the session dropped and a reconnect is about to start.
    async fn on_reconnecting(&self, _reason: &str) {}

    /// Called after the session was re-established.
    async fn on_reconnect(&self) {}

    /// Called once when the client task ends for good.
    async fn on_disconnect(&self, reason: Option<&str>);
}

/// Configuration for a WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Server URL (`ws://` or `wss://`).
    pub url: String,
    /// Whether to reconnect after the server drops the session.
    pub auto_reconnect: bool,
    /// Reconnect backoff.
    pub retry: RetryPolicy,
    /// Timeout for each connection attempt.
    pub connect_timeout: Duration,
    /// Capacity of the outgoing frame queue.
    pub outgoing_capacity: usize,
}

impl WsClientConfig {
    /// Creates a config with default settings for a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: true,
            retry: RetryPolicy::default().with_max_retries(None),
            connect_timeout: Duration::from_secs(10),
            outgoing_capacity: 256,
        }
    }

    /// Disables reconnection.
    pub fn no_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Cloneable handle for queueing outgoing frames.
#[derive(Clone)]
pub struct WsSender {
    tx: mpsc::Sender<String>,
    reconnect: Arc<Notify>,
}

impl WsSender {
    /// Queues a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> TransportResult<()> {
        self.tx
            .send(text.into())
            .await
            .map_err(|_| TransportError::ConnectionClosed {
                reason: "client task ended".into(),
            })
    }

    /// Asks the client task to drop the session and reconnect.
    ///
    /// Never blocks and is never lost to a full outgoing queue; repeated
    /// requests before the client task reacts collapse into one.
    pub fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Returns true once the client task has ended.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A live client session.
pub struct WsConnection {
    sender: WsSender,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl WsConnection {
    /// Returns a sender for outgoing frames.
    pub fn sender(&self) -> &WsSender {
        &self.sender
    }

    /// Closes the session and waits for the client task to finish.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "WebSocket client task panicked");
        }
    }
}

/// WebSocket client.
pub struct WsClient {
    config: WsClientConfig,
}

impl WsClient {
    /// Creates a client.
    pub fn new(config: WsClientConfig) -> Self {
        Self { config }
    }

    /// Opens the session, sends the handshake frames and spawns the client task.
    ///
    /// `shutdown` aborts the initial attempt as well as the running task.
    pub async fn connect(
        &self,
        handler: Arc<dyn WsHandler>,
        shutdown: CancellationToken,
    ) -> TransportResult<WsConnection> {
        let config = self.config.clone();
        info!(url = %config.url, "Connecting to WebSocket server");

        let ws_stream = tokio::select! {
            _ = shutdown.cancelled() => return Err(TransportError::Cancelled),
            result = open(&config) => result?,
        };
        let (mut ws_tx, ws_rx) = ws_stream.split();
        send_frames(&mut ws_tx, handler.handshake()).await?;

        info!(url = %config.url, "WebSocket client connected");

        let (tx, rx) = mpsc::channel(config.outgoing_capacity.max(1));
        let reconnect = Arc::new(Notify::new());
        let sender = WsSender {
            tx,
            reconnect: Arc::clone(&reconnect),
        };
        let task = tokio::spawn(run_client_loop(
            ws_tx,
            ws_rx,
            rx,
            reconnect,
            sender.clone(),
            shutdown.clone(),
            handler,
            config,
        ));

        Ok(WsConnection {
            sender,
            shutdown,
            task,
        })
    }
}

async fn open(config: &WsClientConfig) -> TransportResult<WsStream> {
    let attempt = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()));
    match attempt.await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed {
            url: config.url.clone(),
            reason: format!("WebSocket connection failed: {e}"),
        }),
        Err(_) => Err(TransportError::Timeout),
    }
}

async fn send_frames(ws_tx: &mut WsSink, frames: Vec<String>) -> TransportResult<()> {
    for frame in frames {
        ws_tx
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    }
    Ok(())
}

/// Runs the client loop with reconnection support.
async fn run_client_loop(
    ws_tx: WsSink,
    ws_rx: WsSource,
    mut outgoing: mpsc::Receiver<String>,
    reconnect_requested: Arc<Notify>,
    sender: WsSender,
    shutdown: CancellationToken,
    handler: Arc<dyn WsHandler>,
    config: WsClientConfig,
) {
    let mut current_ws_tx = ws_tx;
    let mut current_ws_rx = ws_rx;
    let mut backoff = config.retry.backoff();

    let reason = loop {
        let dropped = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(url = %config.url, "WebSocket client shutting down");
                // frames queued before the shutdown still go out
                while let Ok(text) = outgoing.try_recv() {
                    if current_ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                let _ = current_ws_tx.close().await;
                break None;
            }

            _ = reconnect_requested.notified() => {
                info!(url = %config.url, "Reconnect requested by handler");
                let _ = current_ws_tx.close().await;
                "reconnect requested".to_string()
            }

            Some(text) = outgoing.recv() => {
                trace!(len = text.len(), "Sending text frame");
                match current_ws_tx.send(Message::Text(text.into())).await {
                    Ok(()) => continue,
                    Err(e) => {
                        warn!(error = %e, "Failed to send frame");
                        format!("send failed: {e}")
                    }
                }
            }

            msg = current_ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "Received text");
                    let replies = handler.on_text(text.as_str(), &sender).await;
                    backoff.reset();
                    match send_frames(&mut current_ws_tx, replies).await {
                        Ok(()) => continue,
                        Err(e) => {
                            warn!(error = %e, "Failed to send reply frame");
                            e.to_string()
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!("Received ping, sending pong");
                    let _ = current_ws_tx.send(Message::Pong(data)).await;
                    continue;
                }
                Some(Ok(Message::Binary(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    info!(url = %config.url, "Server closed connection");
                    frame.map(|f| f.reason.to_string()).unwrap_or_else(|| "closed by server".into())
                }
                Some(Err(e)) => {
                    warn!(url = %config.url, error = %e, "WebSocket error");
                    e.to_string()
                }
                None => {
                    info!(url = %config.url, "WebSocket stream ended");
                    "stream ended".to_string()
                }
            },
        };

        if !config.auto_reconnect {
            break Some(dropped);
        }

        handler.on_reconnecting(&dropped).await;
        match reconnect(&config, handler.as_ref(), &mut backoff, &shutdown).await {
            Some((new_tx, new_rx)) => {
                current_ws_tx = new_tx;
                current_ws_rx = new_rx;
                handler.on_reconnect().await;
            }
            None => break Some(dropped),
        }
    };

    handler.on_disconnect(reason.as_deref()).await;
}

/// Attempts to reconnect with exponential backoff.
///
/// Returns `None` when the retry budget is spent or shutdown was requested.
async fn reconnect(
    config: &WsClientConfig,
    handler: &dyn WsHandler,
    backoff: &mut Backoff,
    shutdown: &CancellationToken,
) -> Option<(WsSink, WsSource)> {
    loop {
        let Some(delay) = backoff.next_delay() else {
            error!(url = %config.url, "Max retries reached, giving up");
            return None;
        };

        warn!(url = %config.url, delay = ?delay, "Reconnecting...");
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        let stream = tokio::select! {
            _ = shutdown.cancelled() => return None,
            result = open(config) => result,
        };

        match stream {
            Ok(stream) => {
                let (mut new_tx, new_rx) = stream.split();
                if let Err(e) = send_frames(&mut new_tx, handler.handshake()).await {
                    warn!(url = %config.url, error = %e, "Handshake after reconnect failed");
                    continue;
                }
                info!(url = %config.url, "Reconnected successfully");
                debug!(retries = backoff.retries(), "Reconnect backoff reset");
                backoff.reset();
                return Some((new_tx, new_rx));
            }
            Err(e) => {
                warn!(url = %config.url, error = %e, "Reconnection failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    const HELLO: &str = "HELLO";

    #[derive(Default)]
    struct Recorder {
        hold_ping: bool,
        entered: Notify,
        release: Notify,
        reconnects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl WsHandler for Recorder {
        fn handshake(&self) -> Vec<String> {
            vec![HELLO.to_string()]
        }

        async fn on_text(&self, text: &str, _sender: &WsSender) -> Vec<String> {
            if text != "PING" {
                return Vec::new();
            }
            if self.hold_ping {
                self.entered.notify_one();
                self.release.notified().await;
            }
            vec!["PONG".to_string()]
        }

        async fn on_reconnect(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_disconnect(&self, _reason: Option<&str>) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        }
    }

    async fn next_frame(frames: &mut mpsc::UnboundedReceiver<(usize, String)>) -> (usize, String) {
        tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server ended")
    }

    /// Accepts `sessions` connections in turn and reports every text frame
    /// tagged with its session number. When `drop_first` is set the server
    /// closes the first session right after the handshake; otherwise it opens
    /// the first session with a `PING`.
    async fn spawn_server(
        sessions: usize,
        drop_first: bool,
    ) -> (String, mpsc::UnboundedReceiver<(usize, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for session in 0..sessions {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                if session == 0 && !drop_first {
                    ws.send(Message::text("PING".to_string())).await.unwrap();
                }
                while let Some(Ok(msg)) = ws.next().await {
                    let text = match msg {
                        Message::Text(text) => text.as_str().to_string(),
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    let handshake = text == HELLO;
                    let _ = tx.send((session, text));
                    if handshake && session == 0 && drop_first {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
        });

        (url, rx)
    }

    #[tokio::test]
    async fn test_replies_bypass_a_full_outgoing_queue() {
        let (url, mut frames) = spawn_server(1, false).await;
        let handler = Arc::new(Recorder {
            hold_ping: true,
            ..Default::default()
        });
        let mut config = WsClientConfig::new(url).no_reconnect();
        config.outgoing_capacity = 1;

        let conn = WsClient::new(config)
            .connect(handler.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(next_frame(&mut frames).await, (0, HELLO.to_string()));

        // The client task is parked inside on_text; fill the queue behind it.
        handler.entered.notified().await;
        tokio::time::timeout(Duration::from_secs(1), conn.sender().send_text("queued"))
            .await
            .expect("queue has room for one frame")
            .unwrap();
        handler.release.notify_one();

        assert_eq!(next_frame(&mut frames).await, (0, "PONG".to_string()));
        assert_eq!(next_frame(&mut frames).await, (0, "queued".to_string()));

        conn.close().await;
        assert_eq!(handler.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_replays_handshake() {
        let (url, mut frames) = spawn_server(3, true).await;
        let handler = Arc::new(Recorder::default());
        let config = WsClientConfig::new(url).with_retry(fast_retry());

        let conn = WsClient::new(config)
            .connect(handler.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(next_frame(&mut frames).await, (0, HELLO.to_string()));
        // dropped by the server
        assert_eq!(next_frame(&mut frames).await, (1, HELLO.to_string()));

        // requested by the handler side
        conn.sender().request_reconnect();
        assert_eq!(next_frame(&mut frames).await, (2, HELLO.to_string()));

        conn.close().await;
        assert_eq!(handler.reconnects.load(Ordering::SeqCst), 2);
        assert_eq!(handler.disconnects.load(Ordering::SeqCst), 1);
    }
}
