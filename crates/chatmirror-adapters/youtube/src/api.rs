//! YouTube Data API v3 wire types used by the live chat endpoint.
//!
//! Only the fields the endpoint reads are modeled; unknown fields are ignored.

use chatmirror_core::{ConnectionError, SendError};
use chatmirror_transport::TransportError;
use serde::{Deserialize, Serialize};

/// Message type of plain chat text.
pub const TEXT_MESSAGE_EVENT: &str = "textMessageEvent";

/// Error reasons meaning the live chat is over.
const CHAT_GONE_REASONS: [&str; 3] = ["liveChatEnded", "liveChatNotFound", "liveChatDisabled"];

/// `liveChat/messages` list response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageList {
    /// Token for the next poll.
    #[serde(default)]
    pub next_page_token: Option<String>,
    /// Server-suggested delay before the next poll.
    #[serde(default)]
    pub polling_interval_millis: Option<u64>,
    /// Set once the broadcast went offline.
    #[serde(default)]
    pub offline_at: Option<String>,
    /// Messages in publication order.
    #[serde(default)]
    pub items: Vec<LiveChatMessage>,
}

/// One live chat message resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessage {
    pub id: String,
    pub snippet: MessageSnippet,
    #[serde(default)]
    pub author_details: Option<AuthorDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnippet {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub display_message: Option<String>,
    #[serde(default)]
    pub text_message_details: Option<TextMessageDetails>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessageDetails {
    pub message_text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDetails {
    pub channel_id: String,
    #[serde(default)]
    pub display_name: String,
}

impl LiveChatMessage {
    /// Returns `(display_name, login, text)` for plain text messages.
    ///
    /// Super chats, memberships, deletions and other events yield `None`.
    pub fn text_event(&self) -> Option<(&str, &str, &str)> {
        if self.snippet.kind != TEXT_MESSAGE_EVENT {
            return None;
        }
        let author = self.author_details.as_ref()?;
        let text = self
            .snippet
            .text_message_details
            .as_ref()
            .map(|d| d.message_text.as_str())
            .or(self.snippet.display_message.as_deref())?;
        Some((author.display_name.as_str(), author.channel_id.as_str(), text))
    }
}

/// `liveBroadcasts` list response.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveBroadcastList {
    #[serde(default)]
    pub items: Vec<LiveBroadcast>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveBroadcast {
    pub id: String,
    pub snippet: BroadcastSnippet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub live_chat_id: Option<String>,
}

impl LiveBroadcastList {
    /// Live chat id of the first broadcast that has one.
    pub fn live_chat_id(&self) -> Option<&str> {
        self.items
            .iter()
            .find_map(|b| b.snippet.live_chat_id.as_deref())
    }
}

/// `channels?mine=true` list response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelList {
    #[serde(default)]
    pub items: Vec<Channel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
}

impl ChannelList {
    /// Id of the authenticated account's channel.
    pub fn own_channel_id(&self) -> Option<&str> {
        self.items.first().map(|c| c.id.as_str())
    }
}

/// `liveChat/messages` insert request body.
#[derive(Debug, Clone, Serialize)]
pub struct InsertMessage<'a> {
    snippet: InsertSnippet<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertSnippet<'a> {
    live_chat_id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text_message_details: InsertText<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertText<'a> {
    message_text: &'a str,
}

impl<'a> InsertMessage<'a> {
    /// Builds a text message for `live_chat_id`.
    pub fn text(live_chat_id: &'a str, text: &'a str) -> Self {
        Self {
            snippet: InsertSnippet {
                live_chat_id,
                kind: TEXT_MESSAGE_EVENT,
                text_message_details: InsertText { message_text: text },
            },
        }
    }
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

/// Extracts the `reason` codes of an API error response.
pub fn error_reasons(err: &TransportError) -> Vec<String> {
    let TransportError::Http { body, .. } = err else {
        return Vec::new();
    };
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.errors.into_iter().map(|e| e.reason).collect(),
        // the body may be truncated; fall back to a plain scan
        Err(_) => CHAT_GONE_REASONS
            .iter()
            .filter(|r| body.contains(*r))
            .map(|r| r.to_string())
            .collect(),
    }
}

/// Returns true if the error means the live chat no longer exists.
pub fn is_chat_gone(err: &TransportError) -> bool {
    matches!(err, TransportError::Http { status: 403 | 404, .. })
        && error_reasons(err)
            .iter()
            .any(|r| CHAT_GONE_REASONS.contains(&r.as_str()))
}

/// Maps a failure during `connect` into the endpoint contract's error.
pub fn connection_error(err: TransportError, timeout_secs: u64) -> ConnectionError {
    match err {
        TransportError::Http { status: 401, body } => ConnectionError::authentication(body),
        TransportError::Http { status: 403, .. } if !is_chat_gone(&err) => {
            ConnectionError::authentication(err.to_string())
        }
        TransportError::Timeout => ConnectionError::Timeout { secs: timeout_secs },
        TransportError::Cancelled => ConnectionError::Cancelled,
        TransportError::Decode(reason) => ConnectionError::Protocol(reason),
        other => ConnectionError::network(other.to_string()),
    }
}

/// Returns true if a failed insert certainly did not post the message.
///
/// The request either never reached the server or was answered with a
/// rejection. Timeouts, dropped connections and other server errors leave the
/// outcome unknown.
pub fn insert_not_posted(err: &TransportError) -> bool {
    match err {
        TransportError::ConnectionFailed { .. } => true,
        TransportError::Http { status, .. } => (400..500).contains(status) || *status == 503,
        _ => false,
    }
}

/// Returns true if a failed insert may be sent again without duplicating it.
pub fn insert_retryable(err: &TransportError) -> bool {
    insert_not_posted(err) && err.is_transient()
}

/// Maps a failed insert into the endpoint contract's error.
pub fn send_error(err: TransportError) -> SendError {
    if err.is_transient() {
        SendError::transient(err.to_string())
    } else {
        SendError::permanent(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use chatmirror_core::SendErrorKind;

    use super::*;

    const PAGE: &str = r#"{
        "kind": "youtube#liveChatMessageListResponse",
        "nextPageToken": "GIDx8Z",
        "pollingIntervalMillis": 3500,
        "items": [
            {
                "id": "m1",
                "snippet": {
                    "type": "textMessageEvent",
                    "liveChatId": "chat",
                    "displayMessage": "hi",
                    "textMessageDetails": { "messageText": "hi" }
                },
                "authorDetails": { "channelId": "UCann", "displayName": "Ann" }
            },
            {
                "id": "m2",
                "snippet": { "type": "superChatEvent", "displayMessage": "$5" },
                "authorDetails": { "channelId": "UCbob", "displayName": "Bob" }
            }
        ]
    }"#;

    #[test]
    fn test_parse_message_page() {
        let page: LiveChatMessageList = serde_json::from_str(PAGE).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("GIDx8Z"));
        assert_eq!(page.polling_interval_millis, Some(3500));
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].text_event(), Some(("Ann", "UCann", "hi")));
        assert_eq!(page.items[1].text_event(), None);
    }

    #[test]
    fn test_parse_empty_page() {
        let page: LiveChatMessageList = serde_json::from_str(r#"{"offlineAt": "2024-01-01T00:00:00Z"}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.offline_at.is_some());
    }

    #[test]
    fn test_active_broadcast_chat_id() {
        let list: LiveBroadcastList = serde_json::from_str(
            r#"{"items": [
                {"id": "b0", "snippet": {"title": "old"}},
                {"id": "b1", "snippet": {"title": "live", "liveChatId": "chat-1"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(list.live_chat_id(), Some("chat-1"));

        let empty: LiveBroadcastList = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.live_chat_id(), None);
    }

    #[test]
    fn test_insert_body() {
        let body = serde_json::to_value(InsertMessage::text("chat-1", "Ann : hi")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "snippet": {
                    "liveChatId": "chat-1",
                    "type": "textMessageEvent",
                    "textMessageDetails": { "messageText": "Ann : hi" }
                }
            })
        );
    }

    fn http(status: u16, reason: &str) -> TransportError {
        TransportError::Http {
            status,
            body: format!(
                r#"{{"error":{{"code":{status},"message":"x","errors":[{{"reason":"{reason}"}}]}}}}"#
            ),
        }
    }

    #[test]
    fn test_chat_gone_detection() {
        assert!(is_chat_gone(&http(403, "liveChatEnded")));
        assert!(is_chat_gone(&http(404, "liveChatNotFound")));
        assert!(!is_chat_gone(&http(403, "forbidden")));
        assert!(!is_chat_gone(&TransportError::Timeout));

        let truncated = TransportError::Http {
            status: 403,
            body: r#"{"error":{"errors":[{"reason":"liveChatEnded","mess"#.into(),
        };
        assert!(is_chat_gone(&truncated));
    }

    #[test]
    fn test_send_error_classification() {
        assert_eq!(send_error(http(429, "rateLimitExceeded")).kind(), SendErrorKind::Transient);
        assert_eq!(send_error(http(503, "backendError")).kind(), SendErrorKind::Transient);
        assert_eq!(send_error(TransportError::Timeout).kind(), SendErrorKind::Transient);
        assert_eq!(send_error(http(400, "invalidValue")).kind(), SendErrorKind::Permanent);
        assert_eq!(send_error(http(403, "forbidden")).kind(), SendErrorKind::Permanent);
    }

    #[test]
    fn test_insert_retry_only_when_not_posted() {
        let refused = TransportError::ConnectionFailed {
            url: "http://127.0.0.1:1".into(),
            reason: "connection refused".into(),
        };
        assert!(insert_retryable(&refused));
        assert!(insert_retryable(&http(429, "rateLimitExceeded")));
        assert!(insert_retryable(&http(503, "backendError")));

        assert!(!insert_retryable(&TransportError::Timeout));
        assert!(!insert_retryable(&TransportError::ConnectionClosed { reason: "reset".into() }));
        assert!(!insert_retryable(&http(500, "backendError")));
        assert!(!insert_retryable(&http(400, "invalidValue")));

        assert!(insert_not_posted(&http(400, "invalidValue")));
        assert!(!insert_not_posted(&TransportError::Timeout));
    }

    #[test]
    fn test_own_channel_id() {
        let list: ChannelList = serde_json::from_str(r#"{"items": [{"id": "UCbot"}]}"#).unwrap();
        assert_eq!(list.own_channel_id(), Some("UCbot"));
        let empty: ChannelList = serde_json::from_str(r#"{"items": []}"#).unwrap();
        assert_eq!(empty.own_channel_id(), None);
    }

    #[test]
    fn test_connection_error_mapping() {
        assert!(matches!(
            connection_error(http(401, "authError"), 30),
            ConnectionError::Authentication { .. }
        ));
        assert!(matches!(
            connection_error(http(403, "insufficientPermissions"), 30),
            ConnectionError::Authentication { .. }
        ));
        assert!(matches!(
            connection_error(TransportError::Timeout, 30),
            ConnectionError::Timeout { secs: 30 }
        ));
        assert!(matches!(
            connection_error(http(500, "backendError"), 30),
            ConnectionError::Network { .. }
        ));
    }
}
