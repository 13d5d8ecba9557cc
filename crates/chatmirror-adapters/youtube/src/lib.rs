//! YouTube Live Chat endpoint for chatmirror.
//!
//! Uses the YouTube Data API v3 with an OAuth2 bearer token. Inbound messages
//! are polled from `liveChat/messages` at the server-suggested interval;
//! outbound messages are inserted into the same chat. Messages the endpoint
//! inserted itself are recognized by id and never relayed back.

pub mod api;
pub mod config;
mod endpoint;

pub use config::{ACTIVE_BROADCAST, DEFAULT_API_URL, LiveChatTarget, MAX_MESSAGE_CHARS, YoutubeConfig};
pub use endpoint::YoutubeEndpoint;
