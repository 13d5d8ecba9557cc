//! Twitch endpoint configuration.

use std::time::Duration;

use chatmirror_transport::RetryPolicy;

/// Default Twitch chat WebSocket URL.
pub const DEFAULT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// Twitch rejects chat lines longer than this many bytes.
pub const MAX_MESSAGE_BYTES: usize = 500;

/// Settings for one Twitch chat endpoint.
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    /// Bot account login.
    pub username: String,
    /// OAuth token, with or without the `oauth:` prefix.
    pub oauth_token: String,
    /// Channel to mirror, with or without the leading `#`.
    pub channel: String,
    /// Chat server URL.
    pub url: String,
    /// Time allowed for the login handshake.
    pub handshake_timeout: Duration,
    /// Time a send may wait for room in the outgoing queue.
    pub send_timeout: Duration,
    /// Reconnect policy for dropped sessions.
    pub reconnect: RetryPolicy,
}

impl TwitchConfig {
    /// Creates a config with default timeouts.
    pub fn new(
        username: impl Into<String>,
        oauth_token: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            oauth_token: oauth_token.into(),
            channel: channel.into(),
            url: DEFAULT_URL.to_string(),
            handshake_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(5),
            reconnect: RetryPolicy::default().with_max_retries(None),
        }
    }

    /// Overrides the server URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Overrides the reconnect policy.
    pub fn with_reconnect(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Channel name as used on the wire: lowercase, no `#`.
    pub fn channel_name(&self) -> String {
        self.channel.trim().trim_start_matches('#').to_lowercase()
    }

    /// Login as used on the wire: lowercase.
    pub fn nick(&self) -> String {
        self.username.trim().to_lowercase()
    }

    /// Token as sent in `PASS`, always with the `oauth:` prefix.
    pub fn pass(&self) -> String {
        let token = self.oauth_token.trim();
        if token.starts_with("oauth:") {
            token.to_string()
        } else {
            format!("oauth:{token}")
        }
    }

    /// Frames sent after every (re)connect.
    pub fn login_frames(&self) -> Vec<String> {
        vec![
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            format!("PASS {}", self.pass()),
            format!("NICK {}", self.nick()),
            format!("JOIN #{}", self.channel_name()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_frames_normalize_inputs() {
        let config = TwitchConfig::new("MirrorBot", "abc123", "#Chan1");
        assert_eq!(
            config.login_frames(),
            vec![
                "CAP REQ :twitch.tv/tags twitch.tv/commands",
                "PASS oauth:abc123",
                "NICK mirrorbot",
                "JOIN #chan1",
            ]
        );
    }

    #[test]
    fn test_pass_keeps_existing_prefix() {
        let config = TwitchConfig::new("bot", "oauth:xyz", "chan");
        assert_eq!(config.pass(), "oauth:xyz");
    }
}
