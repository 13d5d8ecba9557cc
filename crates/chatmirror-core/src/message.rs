//! Chat message model.

use std::fmt;

/// Identifies one side of the relay.
///
/// Only used for routing inside the relay; backends never see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointId {
    /// First endpoint.
    A,
    /// Second endpoint.
    B,
}

impl EndpointId {
    /// Returns the endpoint messages from `self` are forwarded to.
    pub fn counterpart(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Returns the identifier as a string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message received from one endpoint.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    sender_display_name: String,
    sender_login: String,
    text: String,
    origin: EndpointId,
}

impl ChatMessage {
    /// Creates a new message.
    pub fn new(
        origin: EndpointId,
        sender_display_name: impl Into<String>,
        sender_login: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender_display_name: sender_display_name.into(),
            sender_login: sender_login.into(),
            text: text.into(),
            origin,
        }
    }

    /// Display name of the sender, possibly empty.
    pub fn sender_display_name(&self) -> &str {
        &self.sender_display_name
    }

    /// Login of the sender.
    pub fn sender_login(&self) -> &str {
        &self.sender_login
    }

    /// Message body.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Endpoint the message was received on.
    pub fn origin(&self) -> EndpointId {
        self.origin
    }

    /// Name to attribute the message to: display name, or login if it is empty.
    pub fn attribution(&self) -> &str {
        if self.sender_display_name.is_empty() {
            &self.sender_login
        } else {
            &self.sender_display_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterpart() {
        assert_eq!(EndpointId::A.counterpart(), EndpointId::B);
        assert_eq!(EndpointId::B.counterpart(), EndpointId::A);
    }

    #[test]
    fn test_attribution_falls_back_to_login() {
        let msg = ChatMessage::new(EndpointId::A, "", "ann_1", "hi");
        assert_eq!(msg.attribution(), "ann_1");

        let msg = ChatMessage::new(EndpointId::A, "Ann", "ann_1", "hi");
        assert_eq!(msg.attribution(), "Ann");
    }
}
