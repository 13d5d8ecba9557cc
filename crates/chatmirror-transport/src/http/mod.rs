//! HTTP transport.

mod client;
mod poll;

pub use client::HttpClient;
pub use poll::{PollControl, PollExit, Poller, run_poll_loop};
