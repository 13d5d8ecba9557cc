//! Configuration validation utilities.

use chatmirror_core::EndpointId;

use super::error::{ConfigError, ConfigResult};
use super::schema::{Credentials, MirrorConfig, RetryConfig};

/// Longest Twitch login / channel name.
const MAX_TWITCH_NAME: usize = 25;

/// Validates the entire configuration.
///
/// Required options are checked first, in a fixed order, so the reported
/// [`ConfigError::MissingField`] always names the first absent option.
pub fn validate_config(config: &MirrorConfig) -> ConfigResult<()> {
    validate_required(config)?;
    for id in [EndpointId::A, EndpointId::B] {
        validate_endpoint(config, id)?;
    }
    validate_relay_config(config)?;

    if config.network.timeout_ms == 0 {
        return Err(ConfigError::validation("Network timeout must be greater than 0"));
    }
    validate_retry_config(&config.network.retry)?;

    Ok(())
}

fn field(id: EndpointId, name: &str) -> String {
    format!("endpoint_{}_{name}", id.as_str().to_lowercase())
}

/// Checks presence of every required option.
fn validate_required(config: &MirrorConfig) -> ConfigResult<()> {
    for id in [EndpointId::A, EndpointId::B] {
        if config.credentials(id).is_none() {
            return Err(ConfigError::missing_field(field(id, "credentials")));
        }
    }
    for id in [EndpointId::A, EndpointId::B] {
        if config.channel_id(id).is_none() {
            return Err(ConfigError::missing_field(field(id, "channel_id")));
        }
    }
    Ok(())
}

/// Validates one endpoint's credentials against its channel id.
fn validate_endpoint(config: &MirrorConfig, id: EndpointId) -> ConfigResult<()> {
    let channel = config.channel_id(id).unwrap_or_default().trim();
    if channel.is_empty() {
        return Err(ConfigError::validation(format!(
            "{} must not be empty",
            field(id, "channel_id")
        )));
    }

    let creds = field(id, "credentials");
    match config.credentials(id) {
        Some(Credentials::Twitch(twitch)) => {
            if twitch.username.trim().is_empty() {
                return Err(ConfigError::missing_field(format!("{creds}.username")));
            }
            if twitch.oauth_token.trim().is_empty() {
                return Err(ConfigError::missing_field(format!("{creds}.oauth_token")));
            }
            if twitch.oauth_token.trim().contains(char::is_whitespace) {
                return Err(ConfigError::validation(format!(
                    "{creds}.oauth_token must not contain whitespace"
                )));
            }
            validate_twitch_name(&field(id, "channel_id"), channel.trim_start_matches('#'))?;
            validate_twitch_name(&format!("{creds}.username"), twitch.username.trim())?;
            if let Some(url) = &twitch.url {
                validate_url(url, &["ws://", "wss://"])?;
            }
        }
        Some(Credentials::Youtube(youtube)) => {
            if youtube.access_token.trim().is_empty() {
                return Err(ConfigError::missing_field(format!("{creds}.access_token")));
            }
            if channel.contains(char::is_whitespace) {
                return Err(ConfigError::validation(format!(
                    "{} must not contain whitespace",
                    field(id, "channel_id")
                )));
            }
            if let Some(url) = &youtube.api_url {
                validate_url(url, &["http://", "https://"])?;
            }
        }
        None => return Err(ConfigError::missing_field(creds)),
    }

    Ok(())
}

/// Twitch logins are 1-25 characters of ASCII letters, digits and `_`.
fn validate_twitch_name(field: &str, name: &str) -> ConfigResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TWITCH_NAME
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::validation(format!(
            "{field} is not a valid Twitch name: {name:?}"
        )))
    }
}

fn validate_url(url: &str, schemes: &[&str]) -> ConfigResult<()> {
    if schemes.iter().any(|s| url.starts_with(s)) {
        Ok(())
    } else {
        Err(ConfigError::validation(format!(
            "URL {url:?} must start with one of: {schemes:?}"
        )))
    }
}

fn validate_relay_config(config: &MirrorConfig) -> ConfigResult<()> {
    if config.relay.queue_capacity == 0 {
        return Err(ConfigError::validation("Relay queue capacity must be greater than 0"));
    }
    if config.relay.delivery_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Relay delivery timeout must be greater than 0",
        ));
    }
    Ok(())
}

/// Validates retry configuration.
fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}
