//! Builds endpoint adapters from configuration.

use std::time::Duration;

use chatmirror_adapter_twitch::{TwitchConfig, TwitchEndpoint};
use chatmirror_adapter_youtube::{YoutubeConfig, YoutubeEndpoint};
use chatmirror_core::{BoxedEndpoint, EndpointId};
use tracing::debug;

use crate::config::{ConfigError, Credentials, MirrorConfig, NetworkConfig};
use crate::error::{RuntimeError, RuntimeResult};

/// Builds the adapter for one side of the relay.
pub fn build_endpoint(config: &MirrorConfig, id: EndpointId) -> RuntimeResult<BoxedEndpoint> {
    let field = format!("endpoint_{}_", id.as_str().to_lowercase());
    let credentials = config
        .credentials(id)
        .ok_or_else(|| ConfigError::missing_field(format!("{field}credentials")))?;
    let channel_id = config
        .channel_id(id)
        .ok_or_else(|| ConfigError::missing_field(format!("{field}channel_id")))?;

    debug!(endpoint = %id, backend = credentials.backend(), "Building endpoint");
    let endpoint: BoxedEndpoint = match credentials {
        Credentials::Twitch(twitch) => Box::new(TwitchEndpoint::new(twitch_config(
            twitch.username.as_str(),
            twitch.oauth_token.as_str(),
            twitch.url.as_deref(),
            channel_id,
            &config.network,
        ))),
        Credentials::Youtube(youtube) => {
            let mut yt = YoutubeConfig::new(youtube.access_token.trim(), channel_id)
                .with_request_timeout(config.network.timeout())
                .with_retry(config.network.retry.to_policy());
            if let Some(url) = &youtube.api_url {
                yt = yt.with_api_url(url);
            }
            let endpoint = YoutubeEndpoint::new(yt).map_err(|e| RuntimeError::Endpoint {
                endpoint: id,
                backend: credentials.backend(),
                reason: e.to_string(),
            })?;
            Box::new(endpoint)
        }
    };
    Ok(endpoint)
}

fn twitch_config(
    username: &str,
    oauth_token: &str,
    url: Option<&str>,
    channel: &str,
    network: &NetworkConfig,
) -> TwitchConfig {
    let mut config = TwitchConfig::new(username, oauth_token, channel)
        .with_reconnect(network.retry.to_policy().with_max_retries(None));
    config.handshake_timeout = network.timeout().min(Duration::from_secs(30));
    config.send_timeout = network.timeout();
    if let Some(url) = url {
        config = config.with_url(url);
    }
    config
}
