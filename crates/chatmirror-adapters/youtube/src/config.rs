//! YouTube endpoint configuration.

use std::time::Duration;

use chatmirror_transport::RetryPolicy;

/// Data API base URL.
pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Longest message text the Live Chat API accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Channel id value selecting the account's currently live broadcast.
pub const ACTIVE_BROADCAST: &str = "active";

/// Which live chat to mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveChatTarget {
    /// Discover the live chat of the authenticated account's active broadcast.
    ActiveBroadcast,
    /// A known live chat id.
    LiveChat(String),
}

impl LiveChatTarget {
    /// Interprets a configured channel id.
    pub fn from_channel_id(channel_id: &str) -> Self {
        let channel_id = channel_id.trim();
        if channel_id.eq_ignore_ascii_case(ACTIVE_BROADCAST) {
            Self::ActiveBroadcast
        } else {
            Self::LiveChat(channel_id.to_string())
        }
    }
}

/// Settings for one [`YoutubeEndpoint`](crate::YoutubeEndpoint).
#[derive(Debug, Clone)]
pub struct YoutubeConfig {
    /// OAuth2 access token with the `youtube` scope.
    pub access_token: String,
    /// Live chat to mirror.
    pub target: LiveChatTarget,
    /// Data API base URL.
    pub api_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Backoff for transient poll and send failures.
    pub retry: RetryPolicy,
    /// Lower bound for the server-suggested poll interval.
    pub min_poll_interval: Duration,
    /// How many inserted message ids are remembered for echo suppression.
    pub remembered_ids: usize,
}

impl YoutubeConfig {
    /// Creates a config with default timeouts.
    pub fn new(access_token: impl Into<String>, channel_id: &str) -> Self {
        Self {
            access_token: access_token.into(),
            target: LiveChatTarget::from_channel_id(channel_id),
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            min_poll_interval: Duration::from_secs(2),
            remembered_ids: 256,
        }
    }

    /// Overrides the API base URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
