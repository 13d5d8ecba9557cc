//! YouTube implementation of [`ChatEndpoint`].
//!
//! Messages this endpoint posts show up in its own poll results. They are
//! recognised by id once the insert has answered, and by author plus text
//! while the insert is still in flight or its outcome is unknown.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatmirror_core::{
    ChatEndpoint, ConnectResult, ConnectionError, ConnectionState, DeliveryError,
    DisconnectError, MessageSink, SendError, SendResult, SinkSlot, StateCell, SubscribeError,
};
use chatmirror_transport::{
    HttpClient, PollControl, PollExit, Poller, TransportError, TransportResult, retry, retry_if,
    run_poll_loop,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::api::{
    ChannelList, InsertMessage, LiveBroadcastList, LiveChatMessage, LiveChatMessageList,
    connection_error, insert_not_posted, insert_retryable, is_chat_gone, send_error,
};
use crate::config::{LiveChatTarget, MAX_MESSAGE_CHARS, YoutubeConfig};

const MESSAGES_PATH: &str = "liveChat/messages";
const BROADCASTS_PATH: &str = "liveBroadcasts";
const CHANNELS_PATH: &str = "channels";

/// Bounded memory of what this endpoint posted.
#[derive(Debug)]
struct SentLog {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
    /// Texts posted without a confirmed id yet, oldest first.
    pending: VecDeque<String>,
}

impl SentLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    /// Records an insert about to be sent.
    fn begin(&mut self, text: &str) {
        self.pending.push_back(text.to_string());
        while self.pending.len() > self.capacity {
            self.pending.pop_front();
        }
    }

    /// Records the id the server assigned to a posted text.
    fn confirm(&mut self, text: &str, id: String) {
        // already matched by the poller, which consumed its pending entry
        if self.ids.contains(&id) {
            return;
        }
        self.settle(text);
        self.remember(id);
    }

    /// Forgets one pending entry for `text`.
    fn settle(&mut self, text: &str) {
        if let Some(pos) = self.pending.iter().position(|t| t == text) {
            self.pending.remove(pos);
        }
    }

    /// Returns true if `message` was posted by this endpoint.
    ///
    /// A match on a pending text consumes that entry and remembers the id.
    fn is_own(&mut self, message: &LiveChatMessage, own_channel: Option<&str>) -> bool {
        if self.ids.contains(&message.id) {
            return true;
        }
        let Some((_, author, text)) = message.text_event() else {
            return false;
        };
        if own_channel.is_some_and(|own| own != author) {
            return false;
        }
        let Some(pos) = self.pending.iter().position(|t| t == text) else {
            return false;
        };
        self.pending.remove(pos);
        self.remember(message.id.clone());
        true
    }

    fn remember(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

/// YouTube live chat endpoint.
///
/// Polls `liveChat/messages` on a background task and posts outgoing text
/// with `liveChat/messages.insert`.
pub struct YoutubeEndpoint {
    config: YoutubeConfig,
    client: HttpClient,
    state: Arc<StateCell>,
    sink: Arc<SinkSlot>,
    sent: Arc<Mutex<SentLog>>,
    live_chat_id: Mutex<Option<String>>,
    shutdown: Mutex<CancellationToken>,
    poll_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl YoutubeEndpoint {
    /// Creates a disconnected endpoint.
    pub fn new(config: YoutubeConfig) -> TransportResult<Self> {
        let client = HttpClient::new(&config.api_url, config.request_timeout)?
            .with_bearer_token(config.access_token.trim());
        let sent = SentLog::new(config.remembered_ids);

        Ok(Self {
            config,
            client,
            state: Arc::new(StateCell::new()),
            sink: Arc::new(SinkSlot::new()),
            sent: Arc::new(Mutex::new(sent)),
            live_chat_id: Mutex::new(None),
            shutdown: Mutex::new(CancellationToken::new()),
            poll_task: tokio::sync::Mutex::new(None),
        })
    }

    /// Returns the endpoint configuration.
    pub fn config(&self) -> &YoutubeConfig {
        &self.config
    }

    /// Live chat id of the current session.
    pub fn live_chat_id(&self) -> Option<String> {
        self.live_chat_id.lock().clone()
    }

    async fn resolve_live_chat(&self, shutdown: &CancellationToken) -> TransportResult<String> {
        match &self.config.target {
            LiveChatTarget::LiveChat(id) => Ok(id.clone()),
            LiveChatTarget::ActiveBroadcast => {
                let query = [("part", "snippet"), ("broadcastStatus", "active"), ("broadcastType", "all")];
                let list: LiveBroadcastList = retry(&self.config.retry, shutdown, || {
                    self.client.get_json(BROADCASTS_PATH, &query)
                })
                .await?;

                let id = list.live_chat_id().ok_or_else(|| {
                    TransportError::Decode("no active broadcast with a live chat".into())
                })?;
                info!(live_chat_id = %id, "Resolved active broadcast");
                Ok(id.to_string())
            }
        }
    }

    async fn resolve_own_channel(&self, shutdown: &CancellationToken) -> TransportResult<Option<String>> {
        let query = [("part", "id"), ("mine", "true")];
        let list: ChannelList = retry(&self.config.retry, shutdown, || {
            self.client.get_json(CHANNELS_PATH, &query)
        })
        .await?;

        let own = list.own_channel_id().map(str::to_string);
        match &own {
            Some(id) => debug!(channel_id = %id, "Resolved own channel"),
            None => warn!("Token has no channel; own messages are matched by text only"),
        }
        Ok(own)
    }

    async fn open_session(&self, shutdown: &CancellationToken) -> TransportResult<ChatPoller> {
        let live_chat_id = self.resolve_live_chat(shutdown).await?;
        let own_channel = self.resolve_own_channel(shutdown).await?;

        let mut poller = ChatPoller {
            client: self.client.clone(),
            live_chat_id,
            own_channel,
            page_token: None,
            min_interval: self.config.min_poll_interval,
            sink: Arc::clone(&self.sink),
            sent: Arc::clone(&self.sent),
        };

        // First page only positions the cursor; backlog is not relayed.
        let page = retry(&self.config.retry, shutdown, || poller.fetch()).await?;
        debug!(skipped = page.items.len(), "Skipped live chat backlog");
        poller.page_token = page.next_page_token;
        Ok(poller)
    }
}

#[async_trait]
impl ChatEndpoint for YoutubeEndpoint {
    fn name(&self) -> &str {
        "youtube"
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
        *self.shutdown.lock() = shutdown.clone();

        let poller = match self.open_session(&shutdown).await {
            Ok(poller) => poller,
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                return Err(connection_error(e, self.config.request_timeout.as_secs()));
            }
        };

        let live_chat_id = poller.live_chat_id.clone();
        *self.live_chat_id.lock() = Some(live_chat_id.clone());

        self.state
            .transition(ConnectionState::Connecting, ConnectionState::Connected);

        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let policy = self.config.retry.clone();
        let task = tokio::spawn(async move {
            match run_poll_loop(poller, policy, shutdown).await {
                PollExit::Cancelled => debug!("YouTube poll loop cancelled"),
                PollExit::Finished => info!("YouTube live chat ended"),
                PollExit::Failed(e) => error!(error = %e, "YouTube poll loop failed"),
            }
            sink.release();
            state.transition(ConnectionState::Connected, ConnectionState::Disconnected);
        });
        *self.poll_task.lock().await = Some(task);

        info!(live_chat_id = %live_chat_id, "Polling YouTube live chat");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DisconnectError> {
        self.shutdown.lock().cancel();

        let task = self.poll_task.lock().await.take();
        let Some(task) = task else {
            self.sink.release();
            if self.state.get() == ConnectionState::Connected {
                self.state.set(ConnectionState::Disconnected);
            }
            return Ok(());
        };

        self.state.set(ConnectionState::Stopping);
        let joined = task.await;
        self.live_chat_id.lock().take();
        self.sink.release();
        self.state.set(ConnectionState::Disconnected);

        match joined {
            Ok(()) => {
                info!("Disconnected from YouTube live chat");
                Ok(())
            }
            Err(e) => Err(DisconnectError(format!("poll task failed: {e}"))),
        }
    }

    async fn send(&self, text: &str) -> SendResult<()> {
        let chars = text.chars().count();
        if chars > MAX_MESSAGE_CHARS {
            return Err(SendError::permanent(format!(
                "message is {chars} characters, YouTube allows {MAX_MESSAGE_CHARS}"
            )));
        }
        if text.trim().is_empty() {
            return Err(SendError::permanent("YouTube rejects blank messages"));
        }

        let live_chat_id = self.live_chat_id().ok_or_else(SendError::not_connected)?;
        let shutdown = self.shutdown.lock().clone();
        let body = InsertMessage::text(&live_chat_id, text);
        let query = [("part", "snippet")];

        // Inserts are not idempotent: only failures that certainly did not
        // post are retried.
        self.sent.lock().begin(text);
        let result: TransportResult<LiveChatMessage> =
            retry_if(&self.config.retry, &shutdown, insert_retryable, || {
                self.client.post_json(MESSAGES_PATH, &query, &body)
            })
            .await;

        match result {
            Ok(inserted) => {
                trace!(id = %inserted.id, "Inserted live chat message");
                self.sent.lock().confirm(text, inserted.id);
                Ok(())
            }
            Err(e) => {
                if insert_not_posted(&e) {
                    self.sent.lock().settle(text);
                } else {
                    warn!(error = %e, "Insert outcome unknown, not resending");
                }
                Err(send_error(e))
            }
        }
    }

    fn on_message(&self, sink: MessageSink) -> Result<(), SubscribeError> {
        self.sink.register(sink)
    }
}

/// Pages through one live chat.
struct ChatPoller {
    client: HttpClient,
    live_chat_id: String,
    own_channel: Option<String>,
    page_token: Option<String>,
    min_interval: Duration,
    sink: Arc<SinkSlot>,
    sent: Arc<Mutex<SentLog>>,
}

impl ChatPoller {
    async fn fetch(&self) -> TransportResult<LiveChatMessageList> {
        let mut query = vec![
            ("liveChatId", self.live_chat_id.as_str()),
            ("part", "snippet,authorDetails"),
        ];
        if let Some(token) = &self.page_token {
            query.push(("pageToken", token.as_str()));
        }
        self.client.get_json(MESSAGES_PATH, &query).await
    }

    /// Hands one message to the relay; `false` once the relay is gone.
    async fn deliver(&self, message: &LiveChatMessage) -> bool {
        if self.sent.lock().is_own(message, self.own_channel.as_deref()) {
            trace!(id = %message.id, "Skipping own message");
            return true;
        }
        let Some((display_name, login, text)) = message.text_event() else {
            trace!(kind = %message.snippet.kind, "Ignoring non-text event");
            return true;
        };
        let Some(sink) = self.sink.get() else {
            return true;
        };

        match sink.deliver(display_name, login, text).await {
            Ok(()) => true,
            Err(DeliveryError::Closed) => false,
            Err(e) => {
                error!(error = %e, id = %message.id, "Dropped inbound YouTube message");
                true
            }
        }
    }
}

#[async_trait]
impl Poller for ChatPoller {
    async fn poll(&mut self) -> TransportResult<PollControl> {
        let page = match self.fetch().await {
            Ok(page) => page,
            Err(e) if is_chat_gone(&e) => {
                warn!(error = %e, "Live chat is gone");
                return Ok(PollControl::Stop);
            }
            Err(e) => return Err(e),
        };

        for message in &page.items {
            if !self.deliver(message).await {
                debug!("Relay no longer consuming YouTube messages");
                return Ok(PollControl::Stop);
            }
        }

        if page.offline_at.is_some() {
            return Ok(PollControl::Stop);
        }
        if page.next_page_token.is_some() {
            self.page_token = page.next_page_token;
        }

        let suggested = Duration::from_millis(page.polling_interval_millis.unwrap_or_default());
        Ok(PollControl::Continue(suggested.max(self.min_interval)))
    }
}
