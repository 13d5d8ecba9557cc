//! chatmirror runtime: everything around the relay engine.
//!
//! This crate provides:
//! - Layered configuration loading and validation ([`config`])
//! - Logging setup ([`logging`])
//! - Endpoint construction from credentials ([`endpoints`])
//! - Process lifecycle with signal handling ([`MirrorRuntime`])
//!
//! ```ignore
//! use chatmirror_runtime::{MirrorRuntime, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let builder = MirrorRuntime::builder().config_file("chatmirror.toml");
//!     let config = builder.load_config()?;
//!     let _guard = logging::init_from_config(&config.logging);
//!
//!     MirrorRuntime::from_config(config)?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoints;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, MirrorConfig, validate_config};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, LoggingGuard};
pub use runtime::{MirrorRuntime, RuntimeBuilder, wait_for_shutdown};

// Re-export tracing for use by other crates
pub use tracing;
