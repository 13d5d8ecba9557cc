//! Twitch implementation of [`ChatEndpoint`].
//!
//! The endpoint keeps one IRC-over-WebSocket session. Inbound lines are parsed
//! on the WebSocket client task, which is also the endpoint's delivery path:
//! each `PRIVMSG` for the mirrored channel is handed to the [`MessageSink`]
//! before the next frame is read, so delivery order equals arrival order.
//! `send` only queues a frame on the client task and never touches the socket
//! directly.

use std::sync::Arc;

use async_trait::async_trait;
use chatmirror_core::{
    ChatEndpoint, ConnectResult, ConnectionError, ConnectionState, DeliveryError,
    DisconnectError, MessageSink, SendError, SendResult, SinkSlot, StateCell, SubscribeError,
};
use chatmirror_transport::{TransportError, WsClient, WsClientConfig, WsConnection, WsHandler, WsSender};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{MAX_MESSAGE_BYTES, TwitchConfig};
use crate::irc::{IrcMessage, TwitchEvent, privmsg};

/// Progress of the login handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Handshake {
    Pending,
    Welcomed,
    Rejected(String),
    Closed(String),
}

/// A live session: the client task handle and its cancel token.
struct Session {
    connection: WsConnection,
    shutdown: CancellationToken,
}

/// Twitch chat endpoint.
pub struct TwitchEndpoint {
    config: TwitchConfig,
    state: Arc<StateCell>,
    sink: Arc<SinkSlot>,
    sender: Mutex<Option<WsSender>>,
    connecting: Mutex<Option<CancellationToken>>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl TwitchEndpoint {
    /// Creates a disconnected endpoint.
    pub fn new(config: TwitchConfig) -> Self {
        Self {
            config,
            state: Arc::new(StateCell::new()),
            sink: Arc::new(SinkSlot::new()),
            sender: Mutex::new(None),
            connecting: Mutex::new(None),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns the endpoint configuration.
    pub fn config(&self) -> &TwitchConfig {
        &self.config
    }

    fn client_config(&self) -> WsClientConfig {
        WsClientConfig::new(&self.config.url).with_retry(self.config.reconnect.clone())
    }

    async fn await_handshake(
        &self,
        status: &mut watch::Receiver<Handshake>,
        shutdown: &CancellationToken,
    ) -> ConnectResult<()> {
        let timeout = self.config.handshake_timeout;
        let settled = tokio::select! {
            _ = shutdown.cancelled() => return Err(ConnectionError::Cancelled),
            settled = tokio::time::timeout(timeout, status.wait_for(|s| *s != Handshake::Pending)) => settled,
        };

        let outcome = match settled {
            Ok(Ok(outcome)) => outcome.clone(),
            Ok(Err(_)) => Handshake::Closed("handshake channel dropped".into()),
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    secs: timeout.as_secs(),
                });
            }
        };

        match outcome {
            Handshake::Rejected(reason) => Err(ConnectionError::authentication(reason)),
            Handshake::Closed(reason) => Err(ConnectionError::network(reason)),
            Handshake::Welcomed | Handshake::Pending => Ok(()),
        }
    }
}

#[async_trait]
impl ChatEndpoint for TwitchEndpoint {
    fn name(&self) -> &str {
        "twitch"
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self) -> ConnectResult<()> {
        match self
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected => return Ok(()),
            other => {
                return Err(ConnectionError::Protocol(format!(
                    "cannot connect while {other}"
                )));
            }
        }

        let shutdown = CancellationToken::new();
        *self.connecting.lock() = Some(shutdown.clone());

        let (status_tx, mut status_rx) = watch::channel(Handshake::Pending);
        let handler = Arc::new(TwitchHandler {
            channel: self.config.channel_name(),
            login_frames: self.config.login_frames(),
            state: Arc::clone(&self.state),
            sink: Arc::clone(&self.sink),
            handshake: status_tx,
        });

        info!(channel = %self.config.channel_name(), "Connecting to Twitch chat");

        let client_config = self.client_config();
        let connect_timeout = client_config.connect_timeout;
        let client = WsClient::new(client_config);

        let result = match client.connect(handler, shutdown.clone()).await {
            Ok(connection) => match self.await_handshake(&mut status_rx, &shutdown).await {
                Ok(()) => Ok(connection),
                Err(e) => {
                    connection.close().await;
                    Err(e)
                }
            },
            Err(TransportError::Cancelled) => Err(ConnectionError::Cancelled),
            Err(TransportError::Timeout) => Err(ConnectionError::Timeout {
                secs: connect_timeout.as_secs(),
            }),
            Err(e) => Err(ConnectionError::network(e.to_string())),
        };
        self.connecting.lock().take();

        match result {
            Ok(connection) => {
                *self.sender.lock() = Some(connection.sender().clone());
                *self.session.lock().await = Some(Session {
                    connection,
                    shutdown,
                });
                self.state.set(ConnectionState::Connected);
                info!(channel = %self.config.channel_name(), "Joined Twitch chat");
                Ok(())
            }
            Err(e) => {
                shutdown.cancel();
                self.state.set(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), DisconnectError> {
        if let Some(token) = self.connecting.lock().take() {
            token.cancel();
        }

        let session = self.session.lock().await.take();
        let Some(session) = session else {
            self.sink.release();
            if self.state.get() != ConnectionState::Connecting {
                self.state.set(ConnectionState::Disconnected);
            }
            return Ok(());
        };

        self.state.set(ConnectionState::Stopping);
        self.sender.lock().take();

        let part = format!("PART #{}", self.config.channel_name());
        if let Err(e) = session.connection.sender().send_text(part).await {
            debug!(error = %e, "PART not sent");
        }

        session.shutdown.cancel();
        session.connection.close().await;
        self.sink.release();
        self.state.set(ConnectionState::Disconnected);
        info!(channel = %self.config.channel_name(), "Disconnected from Twitch chat");
        Ok(())
    }

    async fn send(&self, text: &str) -> SendResult<()> {
        if text.contains(['\r', '\n']) {
            return Err(SendError::permanent("Twitch chat lines cannot contain line breaks"));
        }
        if text.len() > MAX_MESSAGE_BYTES {
            return Err(SendError::permanent(format!(
                "message is {} bytes, Twitch allows {MAX_MESSAGE_BYTES}",
                text.len()
            )));
        }

        if self.state.get() == ConnectionState::Disconnected {
            return Err(SendError::not_connected());
        }
        let sender = self
            .sender
            .lock()
            .clone()
            .filter(|sender| !sender.is_closed())
            .ok_or_else(SendError::not_connected)?;
        let frame = privmsg(&self.config.channel_name(), text);

        match tokio::time::timeout(self.config.send_timeout, sender.send_text(frame)).await {
            Ok(Ok(())) => {
                trace!(len = text.len(), "PRIVMSG queued");
                Ok(())
            }
            Ok(Err(e)) => Err(SendError::permanent(e.to_string())),
            Err(_) => Err(SendError::transient("outgoing queue full")),
        }
    }

    fn on_message(&self, sink: MessageSink) -> Result<(), SubscribeError> {
        self.sink.register(sink)
    }
}

/// Receives frames on the WebSocket client task.
struct TwitchHandler {
    channel: String,
    login_frames: Vec<String>,
    state: Arc<StateCell>,
    sink: Arc<SinkSlot>,
    handshake: watch::Sender<Handshake>,
}

impl TwitchHandler {
    /// Handles one IRC line; returns the frame to answer it with, if any.
    async fn handle_line(&self, line: &str, sender: &WsSender) -> Option<String> {
        let msg = match IrcMessage::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Ignoring unparsable line");
                return None;
            }
        };

        match TwitchEvent::from(&msg) {
            TwitchEvent::Ping(server) => {
                trace!("Answering PING");
                return Some(format!("PONG :{server}"));
            }
            TwitchEvent::Welcome => {
                debug!("Twitch login accepted");
                self.state.set(ConnectionState::Connected);
                self.handshake.send_replace(Handshake::Welcomed);
            }
            TwitchEvent::AuthFailed(reason) => {
                error!(reason = %reason, "Twitch login rejected");
                self.handshake.send_replace(Handshake::Rejected(reason));
            }
            TwitchEvent::Reconnect => {
                info!("Twitch requested a reconnect");
                sender.request_reconnect();
            }
            TwitchEvent::Privmsg {
                channel,
                display_name,
                login,
                text,
            } if channel == self.channel => self.deliver(display_name, login, text).await,
            TwitchEvent::Privmsg { .. } | TwitchEvent::Other => {
                trace!(command = %msg.command, "Ignoring line");
            }
        }
        None
    }

    async fn deliver(&self, display_name: String, login: String, text: String) {
        let Some(sink) = self.sink.get() else {
            trace!("No sink registered, dropping message");
            return;
        };
        match sink.deliver(display_name, login, text).await {
            Ok(()) => {}
            Err(DeliveryError::Closed) => debug!("Relay no longer consuming Twitch messages"),
            Err(e) => error!(error = %e, "Dropped inbound Twitch message"),
        }
    }
}

#[async_trait]
impl WsHandler for TwitchHandler {
    fn handshake(&self) -> Vec<String> {
        self.login_frames.clone()
    }

    async fn on_text(&self, text: &str, sender: &WsSender) -> Vec<String> {
        let mut replies = Vec::new();
        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
            replies.extend(self.handle_line(line, sender).await);
        }
        replies
    }

    async fn on_reconnecting(&self, reason: &str) {
        warn!(reason = %reason, "Twitch session dropped");
        self.state
            .transition(ConnectionState::Connected, ConnectionState::Connecting);
    }

    async fn on_reconnect(&self) {
        info!("Twitch session re-established, waiting for welcome");
    }

    async fn on_disconnect(&self, reason: Option<&str>) {
        if let Some(reason) = reason {
            warn!(reason = %reason, "Twitch session ended");
        }
        self.handshake.send_if_modified(|status| {
            if *status == Handshake::Pending {
                *status = Handshake::Closed(reason.unwrap_or("closed").to_string());
                true
            } else {
                false
            }
        });
        self.sink.release();
        if self.state.get() != ConnectionState::Stopping {
            self.state.set(ConnectionState::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chatmirror_core::{EndpointId, SendErrorKind};
    use chatmirror_transport::RetryPolicy;
    use futures::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{WebSocketStream, accept_async};

    use super::*;

    const WELCOME: &str = ":tmi.twitch.tv 001 mirrorbot :Welcome, GLHF!";

    fn endpoint() -> TwitchEndpoint {
        TwitchEndpoint::new(TwitchConfig::new("mirrorbot", "token", "chan1"))
    }

    /// One scripted action of the fake chat server.
    enum Step {
        /// Read frames until one starts with the prefix.
        Expect(&'static str),
        /// Send a raw IRC line.
        Send(&'static str),
        /// Close the session.
        Close,
        /// Read frames until the client goes away.
        Hold,
    }

    type Frames = mpsc::UnboundedReceiver<(usize, String)>;

    async fn read_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => return Some(text.as_str().to_string()),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    /// Serves one script per accepted session and reports every frame the
    /// endpoint sends, tagged with the session number.
    async fn spawn_chat(sessions: Vec<Vec<Step>>) -> (String, Frames) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (session, steps) in sessions.into_iter().enumerate() {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                for step in steps {
                    match step {
                        Step::Expect(prefix) => {
                            while let Some(text) = read_text(&mut ws).await {
                                let done = text.starts_with(prefix);
                                let _ = tx.send((session, text));
                                if done {
                                    break;
                                }
                            }
                        }
                        Step::Send(line) => {
                            let _ = ws.send(Message::text(line.to_string())).await;
                        }
                        Step::Close => {
                            let _ = ws.close(None).await;
                            break;
                        }
                        Step::Hold => {
                            while let Some(text) = read_text(&mut ws).await {
                                let _ = tx.send((session, text));
                            }
                        }
                    }
                }
            }
        });

        (url, rx)
    }

    /// Collects frames of `session` up to and including one starting with `prefix`.
    async fn frames_until(frames: &mut Frames, session: usize, prefix: &str) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            while let Some((from, text)) = frames.recv().await {
                if from != session {
                    continue;
                }
                let done = text.starts_with(prefix);
                seen.push(text);
                if done {
                    return seen;
                }
            }
            panic!("server ended before {prefix:?}");
        })
        .await
        .expect("timed out waiting for frames")
    }

    async fn wait_for_state(endpoint: &TwitchEndpoint, expected: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while endpoint.state() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("endpoint did not reach the expected state");
    }

    fn local_endpoint(url: &str, reconnect: RetryPolicy) -> TwitchEndpoint {
        let config = TwitchConfig::new("mirrorbot", "token", "chan1")
            .with_url(url)
            .with_reconnect(reconnect);
        TwitchEndpoint::new(config)
    }

    fn fast_reconnect() -> RetryPolicy {
        RetryPolicy {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_session_relays_own_channel_and_answers_ping() {
        let (url, mut frames) = spawn_chat(vec![vec![
            Step::Expect("JOIN"),
            Step::Send(WELCOME),
            Step::Send(":eve!eve@eve.tmi.twitch.tv PRIVMSG #elsewhere :not for us"),
            Step::Send("@display-name=Ann;user-id=42 :ann_1!ann_1@ann_1.tmi.twitch.tv PRIVMSG #chan1 :hi"),
            Step::Send("PING :tmi.twitch.tv"),
            Step::Hold,
        ]])
        .await;

        let endpoint = local_endpoint(&url, RetryPolicy::none());
        let (sink, mut inbound) = MessageSink::channel(EndpointId::A, 8, Duration::from_secs(1));
        endpoint.on_message(sink).unwrap();

        endpoint.connect().await.unwrap();
        assert_eq!(endpoint.state(), ConnectionState::Connected);

        let login = frames_until(&mut frames, 0, "JOIN").await;
        assert_eq!(
            login,
            vec![
                "CAP REQ :twitch.tv/tags twitch.tv/commands",
                "PASS oauth:token",
                "NICK mirrorbot",
                "JOIN #chan1",
            ]
        );

        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.sender_display_name(), "Ann");
        assert_eq!(msg.sender_login(), "ann_1");
        assert_eq!(msg.text(), "hi");
        assert_eq!(msg.origin(), EndpointId::A);

        frames_until(&mut frames, 0, "PONG :tmi.twitch.tv").await;

        endpoint.send("Bob : yo").await.unwrap();
        frames_until(&mut frames, 0, "PRIVMSG #chan1 :Bob : yo").await;

        endpoint.disconnect().await.unwrap();
        frames_until(&mut frames, 0, "PART #chan1").await;
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_auth_notice_fails_connect() {
        let (url, _frames) = spawn_chat(vec![vec![
            Step::Expect("JOIN"),
            Step::Send(":tmi.twitch.tv NOTICE * :Login authentication failed"),
            Step::Hold,
        ]])
        .await;

        let endpoint = local_endpoint(&url, RetryPolicy::none());
        let err = endpoint.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Authentication { .. }), "{err:?}");
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_request_replays_login() {
        let (url, mut frames) = spawn_chat(vec![
            vec![
                Step::Expect("JOIN"),
                Step::Send(WELCOME),
                Step::Send(":tmi.twitch.tv RECONNECT"),
                Step::Hold,
            ],
            vec![Step::Expect("JOIN"), Step::Send(WELCOME), Step::Hold],
        ])
        .await;

        let endpoint = local_endpoint(&url, fast_reconnect());
        endpoint.connect().await.unwrap();

        let login = frames_until(&mut frames, 1, "JOIN").await;
        assert_eq!(login.len(), 4);
        assert_eq!(login[1], "PASS oauth:token");
        assert_eq!(login[3], "JOIN #chan1");

        wait_for_state(&endpoint, ConnectionState::Connected).await;
        endpoint.send("still here").await.unwrap();
        frames_until(&mut frames, 1, "PRIVMSG #chan1 :still here").await;

        endpoint.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_close_releases_sink() {
        let (url, _frames) = spawn_chat(vec![vec![
            Step::Expect("JOIN"),
            Step::Send(WELCOME),
            Step::Close,
        ]])
        .await;

        let endpoint = local_endpoint(&url, RetryPolicy::none());
        let (sink, mut inbound) = MessageSink::channel(EndpointId::B, 8, Duration::from_secs(1));
        endpoint.on_message(sink).unwrap();
        endpoint.connect().await.unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(5), inbound.recv()).await;
        assert!(matches!(closed, Ok(None)), "sink should be released");
        wait_for_state(&endpoint, ConnectionState::Disconnected).await;

        let err = endpoint.send("too late").await.unwrap_err();
        assert!(!err.is_transient());
        endpoint.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejects_line_breaks() {
        let err = endpoint().send("one\ntwo").await.unwrap_err();
        assert_eq!(err.kind(), SendErrorKind::Permanent);

        let err = endpoint().send("one\rtwo").await.unwrap_err();
        assert_eq!(err.kind(), SendErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_send_rejects_oversized_text() {
        let text = "x".repeat(MAX_MESSAGE_BYTES + 1);
        let err = endpoint().send(&text).await.unwrap_err();
        assert_eq!(err.kind(), SendErrorKind::Permanent);
        assert!(err.reason().contains("500"));
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let err = endpoint().send("hello").await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.reason(), SendError::not_connected().reason());
    }

    #[tokio::test]
    async fn test_single_subscription() {
        let endpoint = endpoint();
        let (sink, _rx) = MessageSink::channel(EndpointId::A, 4, Duration::from_secs(1));
        endpoint.on_message(sink.clone()).unwrap();
        assert!(matches!(
            endpoint.on_message(sink),
            Err(SubscribeError::AlreadySubscribed)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let endpoint = endpoint();
        endpoint.disconnect().await.unwrap();
        endpoint.disconnect().await.unwrap();
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused_is_network_error() {
        let config = TwitchConfig::new("mirrorbot", "token", "chan1")
            .with_url("ws://127.0.0.1:1")
            .with_reconnect(RetryPolicy::none());
        let endpoint = TwitchEndpoint::new(config);

        let err = endpoint.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Network { .. }), "{err:?}");
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
    }
}
