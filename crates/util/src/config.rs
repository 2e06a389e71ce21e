use std::{env, fmt, net::SocketAddr, time::Duration};

use twi_relay_core::types::{BroadcasterRouting, WebhookTarget};

use super::{server_bind_address, BindAddressError};

pub const DEFAULT_TWITCH_OAUTH_BASE_URL: &str = "https://id.twitch.tv/oauth2/";
pub const DEFAULT_TWITCH_HELIX_BASE_URL: &str = "https://api.twitch.tv/helix/";
/// Replay window is off unless configured.
pub const DEFAULT_MAX_MESSAGE_AGE_SECS: u64 = 0;
pub const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 10;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Application credentials registered with Twitch.
#[derive(Clone)]
pub struct TwitchCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for TwitchCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitchCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub twitch: TwitchCredentials,
    pub eventsub_secret: String,
    pub webhooks: Vec<WebhookTarget>,
    pub routing: BroadcasterRouting,
    /// Oldest accepted message timestamp; `None` disables the replay check.
    pub max_message_age: Option<Duration>,
    pub outbound_timeout: Duration,
    pub twitch_oauth_base_url: String,
    pub twitch_helix_base_url: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("environment", &self.environment)
            .field("twitch", &self.twitch)
            .field("eventsub_secret", &"<redacted>")
            .field("webhooks", &self.webhooks.len())
            .field("routing", &self.routing)
            .field("max_message_age", &self.max_message_age)
            .field("outbound_timeout", &self.outbound_timeout)
            .field("twitch_oauth_base_url", &self.twitch_oauth_base_url)
            .field("twitch_helix_base_url", &self.twitch_helix_base_url)
            .finish()
    }
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let twitch = TwitchCredentials {
            client_id: required("TWITCH_CLIENT_ID")?,
            client_secret: required("TWITCH_CLIENT_SECRET")?,
        };
        let eventsub_secret = required("EVENTSUB_SECRET")?;

        let webhooks = match env::var("WEBHOOKS") {
            Ok(raw) if !raw.trim().is_empty() => parse_webhooks(&raw)?,
            _ => Vec::new(),
        };

        let routing = match env::var("BROADCASTER_ROUTING") {
            Ok(raw) => raw.parse().map_err(ConfigError::InvalidRouting)?,
            Err(_) => BroadcasterRouting::default(),
        };

        let max_age_secs = seconds("EVENTSUB_MAX_MESSAGE_AGE_SECS", DEFAULT_MAX_MESSAGE_AGE_SECS)?;
        let max_message_age = replay_window(max_age_secs);
        let outbound_timeout = Duration::from_secs(seconds(
            "OUTBOUND_TIMEOUT_SECS",
            DEFAULT_OUTBOUND_TIMEOUT_SECS,
        )?);

        Ok(Self {
            bind_addr,
            environment,
            twitch,
            eventsub_secret,
            webhooks,
            routing,
            max_message_age,
            outbound_timeout,
            twitch_oauth_base_url: base_url("TWITCH_OAUTH_BASE_URL", DEFAULT_TWITCH_OAUTH_BASE_URL),
            twitch_helix_base_url: base_url("TWITCH_HELIX_BASE_URL", DEFAULT_TWITCH_HELIX_BASE_URL),
        })
    }
}

/// Parses the `WEBHOOKS` JSON array.
pub fn parse_webhooks(raw: &str) -> Result<Vec<WebhookTarget>, ConfigError> {
    serde_json::from_str(raw).map_err(|err| ConfigError::InvalidWebhooks(err.to_string()))
}

/// Oldest accepted message age for `secs`; `0` disables the check.
pub fn replay_window(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn seconds(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

// Relative joins drop the last path segment unless the base ends with '/'.
fn base_url(name: &str, default: &str) -> String {
    let mut value = env::var(name).unwrap_or_else(|_| default.to_string());
    if !value.ends_with('/') {
        value.push('/');
    }
    value
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(BindAddressError),
    Missing(&'static str),
    InvalidWebhooks(String),
    InvalidRouting(String),
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "{err}"),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::InvalidWebhooks(err) => write!(
                f,
                "WEBHOOKS must be a JSON array of {{\"twitch\", \"url\", \"discord\"}} objects: {err}"
            ),
            Self::InvalidRouting(value) => write!(
                f,
                "BROADCASTER_ROUTING must be 'event' or 'first_target' (got {value})"
            ),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a whole number of seconds (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
