//! Process lifecycle: build the relay from configuration, run it until a
//! shutdown signal or until both endpoints are gone, then stop it.
//!
//! ```rust,ignore
//! use chatmirror_runtime::MirrorRuntime;
//!
//! let runtime = MirrorRuntime::builder()
//!     .config_file("chatmirror.toml")
//!     .build()?;
//! runtime.run().await?;
//! ```

use std::future::Future;

use chatmirror_core::{EndpointId, Formatter, Relay, RelayOptions, StartupError};
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, MirrorConfig, validate_config};
use crate::endpoints::build_endpoint;
use crate::error::RuntimeResult;

/// Owns the configured relay for the lifetime of the process.
pub struct MirrorRuntime {
    config: MirrorConfig,
    relay: Relay,
}

impl MirrorRuntime {
    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Validates `config` and builds both endpoints and the relay.
    ///
    /// Nothing connects until [`run`](Self::run).
    pub fn from_config(config: MirrorConfig) -> RuntimeResult<Self> {
        validate_config(&config)?;

        let endpoint_a = build_endpoint(&config, EndpointId::A)?;
        let endpoint_b = build_endpoint(&config, EndpointId::B)?;

        let options = RelayOptions::default()
            .with_formatter(Formatter::new(config.forward_empty))
            .with_queue_capacity(config.relay.queue_capacity)
            .with_delivery_timeout(config.relay.delivery_timeout());

        info!(
            endpoint_a = endpoint_a.name(),
            endpoint_b = endpoint_b.name(),
            forward_empty = config.forward_empty,
            "Runtime initialized from configuration"
        );

        Ok(Self {
            relay: Relay::new(endpoint_a, endpoint_b, options),
            config,
        })
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Returns the relay.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Runs until Ctrl+C / SIGTERM or until both endpoints disconnect.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` resolves or until both endpoints disconnect.
    ///
    /// A shutdown arriving while the relay is still starting aborts startup
    /// and is not an error.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let start = self.relay.start();
        tokio::pin!(start);

        tokio::select! {
            result = &mut start => result?,
            _ = &mut shutdown => {
                info!("Shutdown requested during startup");
                let (started, _) = tokio::join!(start, self.stop());
                return match started {
                    Ok(()) | Err(StartupError::Cancelled) => Ok(()),
                    Err(e) => Err(e.into()),
                };
            }
        }

        info!("Chat relay is running. Press Ctrl+C to stop.");

        tokio::select! {
            _ = &mut shutdown => {}
            _ = self.relay.join() => {
                warn!("Both endpoints disconnected");
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Stops the relay, logging endpoints that failed to disconnect.
    async fn stop(&self) {
        if let Err(e) = self.relay.stop().await {
            error!(error = %e, "Relay stopped with errors");
        }
    }
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a `MirrorRuntime` from layered configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Overrides a dotted configuration key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Loads the configuration without building the runtime.
    pub fn load_config(self) -> RuntimeResult<MirrorConfig> {
        Ok(self.config_loader.load()?)
    }

    /// Builds the runtime.
    pub fn build(self) -> RuntimeResult<MirrorRuntime> {
        MirrorRuntime::from_config(self.load_config()?)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, Credentials, TwitchCredentials, YoutubeCredentials};
    use crate::error::RuntimeError;

    fn config() -> MirrorConfig {
        MirrorConfig {
            endpoint_a_credentials: Some(Credentials::Twitch(TwitchCredentials {
                username: "mirrorbot".into(),
                oauth_token: "abc".into(),
                url: Some("ws://127.0.0.1:1".into()),
            })),
            endpoint_b_credentials: Some(Credentials::Youtube(YoutubeCredentials {
                access_token: "ya29".into(),
                api_url: Some("http://127.0.0.1:1".into()),
            })),
            endpoint_a_channel_id: Some("chan1".into()),
            endpoint_b_channel_id: Some("chat-1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.endpoint_a_channel_id = None;
        let err = MirrorRuntime::from_config(config).err().unwrap();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_running() {
        let runtime = MirrorRuntime::from_config(config()).unwrap();
        runtime.run_until(async {}).await.unwrap();
        assert_eq!(
            runtime.relay().state(),
            chatmirror_core::RelayState::Stopped
        );
    }
}
