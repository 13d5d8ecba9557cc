//! Twitch chat endpoint for chatmirror.
//!
//! Speaks IRC over Twitch's WebSocket gateway: logs in with `PASS`/`NICK`,
//! joins one channel, answers keep-alives and follows `RECONNECT` notices.
//! Outgoing messages are posted with `PRIVMSG`.
//!
//! ```no_run
//! use chatmirror_adapter_twitch::{TwitchConfig, TwitchEndpoint};
//!
//! let endpoint = TwitchEndpoint::new(TwitchConfig::new("mirrorbot", "oauth:...", "somechannel"));
//! ```

pub mod config;
mod endpoint;
pub mod irc;

pub use config::{DEFAULT_URL, MAX_MESSAGE_BYTES, TwitchConfig};
pub use endpoint::TwitchEndpoint;
