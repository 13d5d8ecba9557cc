//! Outbound text formatting.

use crate::message::ChatMessage;

/// Renders a message as `"{attribution} : {text}"`.
///
/// The attribution is the sender's display name, or the login when the display
/// name is empty. The text is copied verbatim.
pub fn format(msg: &ChatMessage) -> String {
    format!("{} : {}", msg.attribution(), msg.text())
}

/// Formatting policy applied by the relay to every forwarded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Formatter {
    /// Whether messages with empty text are forwarded (attribution only).
    pub forward_empty: bool,
}

impl Default for Formatter {
    fn default() -> Self {
        Self {
            forward_empty: true,
        }
    }
}

impl Formatter {
    /// Creates a formatter with the given empty-message policy.
    pub fn new(forward_empty: bool) -> Self {
        Self { forward_empty }
    }

    /// Returns the text to forward, or `None` if the message is skipped.
    pub fn render(&self, msg: &ChatMessage) -> Option<String> {
        if msg.text().is_empty() && !self.forward_empty {
            return None;
        }
        Some(format(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EndpointId;

    #[test]
    fn test_format_uses_display_name() {
        let msg = ChatMessage::new(EndpointId::A, "Ann", "ann_1", "hi");
        assert_eq!(format(&msg), "Ann : hi");
        assert_eq!(format(&msg), format(&msg.clone()));
    }

    #[test]
    fn test_format_falls_back_to_login() {
        let msg = ChatMessage::new(EndpointId::B, "", "ann_1", "hello there");
        assert_eq!(format(&msg), "ann_1 : hello there");
    }

    #[test]
    fn test_format_keeps_text_verbatim() {
        let msg = ChatMessage::new(EndpointId::A, "Bob", "bob", "  <b>a : b</b> ");
        assert_eq!(format(&msg), "Bob :   <b>a : b</b> ");
    }

    #[test]
    fn test_render_empty_policy() {
        let msg = ChatMessage::new(EndpointId::A, "Ann", "ann_1", "");
        assert_eq!(Formatter::default().render(&msg).as_deref(), Some("Ann : "));
        assert_eq!(Formatter::new(false).render(&msg), None);
    }
}
