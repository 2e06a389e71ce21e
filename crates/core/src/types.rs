use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription type announcing that a broadcaster started streaming.
pub const STREAM_ONLINE: &str = "stream.online";
/// Subscription type announcing that a broadcaster stopped streaming.
pub const STREAM_OFFLINE: &str = "stream.offline";

/// One configured (broadcaster, destination) pair the relay posts to.
///
/// Deserialized from the `WEBHOOKS` configuration entry, which keeps the
/// historical `twitch` / `url` / `discord` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTarget {
    #[serde(rename = "twitch")]
    pub broadcaster_id: String,
    pub url: String,
    /// Text posted as the message content above the embed (mentions, etc.).
    #[serde(rename = "discord", default)]
    pub content: String,
}

impl WebhookTarget {
    pub fn key(&self) -> LiveMessageKey {
        LiveMessageKey {
            broadcaster_id: self.broadcaster_id.clone(),
            destination_url: self.url.clone(),
        }
    }
}

/// Identifies the live message posted for one webhook target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveMessageKey {
    pub broadcaster_id: String,
    pub destination_url: String,
}

impl fmt::Display for LiveMessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.broadcaster_id, self.destination_url)
    }
}

/// Message representation returned by the chat webhook when the live
/// announcement was created.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMessageRecord {
    response: Value,
}

impl LiveMessageRecord {
    pub fn new(response: Value) -> Self {
        Self { response }
    }

    /// Returns the identifier needed to retract the message later.
    pub fn message_id(&self) -> Option<&str> {
        self.response.get("id").and_then(Value::as_str)
    }

    pub fn response(&self) -> &Value {
        &self.response
    }
}

/// How the broadcaster id used for lookups and target filtering is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BroadcasterRouting {
    /// Use the `broadcaster_user_id` carried by the event.
    #[default]
    Event,
    /// Always use the first configured target's id, whichever broadcaster
    /// triggered the event. Only meaningful for single-target setups.
    FirstTarget,
}

impl BroadcasterRouting {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::FirstTarget => "first_target",
        }
    }

    /// Picks the broadcaster id for an event according to the routing mode.
    pub fn resolve<'a>(
        self,
        event_broadcaster_id: Option<&'a str>,
        targets: &'a [WebhookTarget],
    ) -> Option<&'a str> {
        match self {
            Self::Event => event_broadcaster_id,
            Self::FirstTarget => targets.first().map(|target| target.broadcaster_id.as_str()),
        }
    }
}

impl FromStr for BroadcasterRouting {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "event" => Ok(Self::Event),
            "first_target" => Ok(Self::FirstTarget),
            other => Err(other.to_string()),
        }
    }
}

/// Inbound EventSub webhook body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(default)]
    pub subscription: Option<Subscription>,
    #[serde(default)]
    pub event: Option<Value>,
    #[serde(default)]
    pub challenge: Option<String>,
}

impl NotificationEnvelope {
    pub fn subscription_type(&self) -> Option<&str> {
        self.subscription.as_ref().map(|sub| sub.kind.as_str())
    }

    /// Extracts the broadcaster fields shared by `stream.online` and
    /// `stream.offline` events. Missing fields come back as `None`.
    pub fn stream_event(&self) -> StreamEvent {
        self.event
            .as_ref()
            .and_then(|event| serde_json::from_value(event.clone()).ok())
            .unwrap_or_default()
    }
}

/// Subscription metadata attached to every EventSub message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub condition: Value,
}

/// Broadcaster identity carried by stream online/offline events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub broadcaster_user_id: Option<String>,
    #[serde(default)]
    pub broadcaster_user_login: Option<String>,
    #[serde(default)]
    pub broadcaster_user_name: Option<String>,
}

/// Enriched view of a live stream assembled from the event and Helix lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSnapshot {
    pub login: String,
    pub display_name: String,
    pub profile_image_url: Option<String>,
    pub title: Option<String>,
    pub game_name: Option<String>,
    pub viewer_count: Option<u64>,
    pub thumbnail_url: Option<String>,
}

impl StreamSnapshot {
    pub fn channel_url(&self) -> String {
        format!("https://www.twitch.tv/{}", self.login)
    }
}
