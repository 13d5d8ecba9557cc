//! Configuration for the chatmirror runtime.
//!
//! Settings are layered with figment (defaults, files, environment, CLI
//! overrides) and checked by [`validate_config`] before anything connects.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    Credentials, LogFormat, LogLevel, LogOutput, LoggingConfig, MirrorConfig, NetworkConfig,
    RelayConfig, RetryConfig, TwitchCredentials, YoutubeCredentials,
};
pub use validation::validate_config;
