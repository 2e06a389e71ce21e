use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use twi_relay_core::{
    live_message, BroadcasterRouting, LiveMessageKey, LiveMessageRecord, NotificationEnvelope,
    StreamEvent, StreamSnapshot, WebhookTarget, STREAM_OFFLINE, STREAM_ONLINE,
};
use twi_relay_discord::DiscordWebhookClient;
use twi_relay_storage::{LiveMessageGuard, LiveMessageStore};
use twi_relay_twitch::{HelixClient, HelixError, UserFilter};

use crate::token::AppTokenCache;

/// Relays stream online/offline notifications to the configured chat webhooks.
pub struct StreamRelay {
    helix: HelixClient,
    tokens: AppTokenCache,
    discord: DiscordWebhookClient,
    targets: Arc<[WebhookTarget]>,
    routing: BroadcasterRouting,
    live_messages: LiveMessageStore,
}

/// What a dispatch did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub posted: usize,
    pub stored: usize,
    pub deleted: usize,
}

impl StreamRelay {
    pub fn new(
        helix: HelixClient,
        tokens: AppTokenCache,
        discord: DiscordWebhookClient,
        targets: Vec<WebhookTarget>,
        routing: BroadcasterRouting,
    ) -> Self {
        Self {
            helix,
            tokens,
            discord,
            targets: targets.into(),
            routing,
            live_messages: LiveMessageStore::new(),
        }
    }

    #[cfg(test)]
    pub fn live_messages(&self) -> &LiveMessageStore {
        &self.live_messages
    }

    /// Handles one `notification` message. Failures are logged, never returned.
    pub async fn dispatch(&self, envelope: &NotificationEnvelope, now: DateTime<Utc>) -> RelayOutcome {
        match envelope.subscription_type() {
            Some(STREAM_ONLINE) => self.stream_online(&envelope.stream_event(), now).await,
            Some(STREAM_OFFLINE) => self.stream_offline(&envelope.stream_event()).await,
            other => {
                let event = envelope.event.as_ref().unwrap_or(&Value::Null);
                info!(
                    stage = "relay",
                    event_type = other.unwrap_or("<missing>"),
                    event = %event,
                    "no relay action for subscription type"
                );
                RelayOutcome::default()
            }
        }
    }

    async fn stream_online(&self, event: &StreamEvent, now: DateTime<Utc>) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();
        let Some(broadcaster_id) = self.resolve_broadcaster(event, STREAM_ONLINE) else {
            return outcome;
        };

        // Slots are held from before enrichment until the reply is stored, so an
        // offline event arriving during the lookups waits for the record.
        let targets: Vec<&WebhookTarget> = self.matching_targets(broadcaster_id).collect();
        let mut slots: Vec<(LiveMessageKey, LiveMessageGuard)> = Vec::with_capacity(targets.len());
        for target in &targets {
            let key = target.key();
            if slots.iter().any(|(held, _)| *held == key) {
                continue;
            }
            let guard = self.live_messages.lock(&key).await;
            slots.push((key, guard));
        }

        let snapshot = self.enrich(broadcaster_id, event, now).await;

        for target in targets {
            let message = live_message(&snapshot, &target.content, now);
            let key = target.key();
            let Some((_, slot)) = slots.iter_mut().find(|(held, _)| *held == key) else {
                continue;
            };

            let reply = match self.discord.execute(&target.url, &message).await {
                Ok(reply) => reply,
                Err(err) => {
                    counter!("relay_posts_total", "result" => "error").increment(1);
                    error!(
                        stage = "discord",
                        broadcaster_id,
                        error = %err,
                        "stream.online - failed to post live announcement"
                    );
                    continue;
                }
            };
            outcome.posted += 1;
            info!(
                stage = "discord",
                broadcaster_id,
                status = reply.status.as_u16(),
                body = %reply.body_text(),
                "stream.online - posted live announcement"
            );

            if !reply.is_success() {
                counter!("relay_posts_total", "result" => "rejected").increment(1);
                continue;
            }
            let Some(created) = reply.into_json() else {
                counter!("relay_posts_total", "result" => "untracked").increment(1);
                warn!(
                    stage = "relay",
                    broadcaster_id,
                    "webhook reply was not JSON; the announcement cannot be retracted later"
                );
                continue;
            };

            counter!("relay_posts_total", "result" => "stored").increment(1);
            outcome.stored += 1;
            if let Some(previous) = slot.replace(LiveMessageRecord::new(created)) {
                warn!(
                    stage = "relay",
                    broadcaster_id,
                    previous_message_id = previous.message_id().unwrap_or("<none>"),
                    "replaced a live announcement that was never retracted"
                );
            }
        }

        outcome
    }

    async fn stream_offline(&self, event: &StreamEvent) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();
        let Some(broadcaster_id) = self.resolve_broadcaster(event, STREAM_OFFLINE) else {
            return outcome;
        };

        for target in self.matching_targets(broadcaster_id) {
            let mut slot = self.live_messages.lock(&target.key()).await;
            let Some(record) = slot.take() else {
                debug!(
                    stage = "relay",
                    broadcaster_id,
                    "stream.offline - no live announcement recorded for target"
                );
                continue;
            };
            let Some(message_id) = record.message_id() else {
                warn!(
                    stage = "relay",
                    broadcaster_id,
                    response = %record.response(),
                    "stream.offline - stored reply has no message id"
                );
                continue;
            };

            match self.discord.delete_message(&target.url, message_id).await {
                Ok(reply) => {
                    let result = if reply.is_success() { "ok" } else { "rejected" };
                    counter!("relay_deletes_total", "result" => result).increment(1);
                    outcome.deleted += 1;
                    info!(
                        stage = "discord",
                        broadcaster_id,
                        message_id,
                        status = reply.status.as_u16(),
                        body = %reply.body_text(),
                        "stream.offline - retracted live announcement"
                    );
                }
                Err(err) => {
                    counter!("relay_deletes_total", "result" => "error").increment(1);
                    error!(
                        stage = "discord",
                        broadcaster_id,
                        message_id,
                        error = %err,
                        "stream.offline - failed to retract live announcement"
                    );
                }
            }
        }

        outcome
    }

    fn resolve_broadcaster<'a>(&'a self, event: &'a StreamEvent, event_type: &str) -> Option<&'a str> {
        let resolved = self
            .routing
            .resolve(event.broadcaster_user_id.as_deref(), &self.targets);
        match resolved {
            Some(id) => {
                if event.broadcaster_user_id.as_deref() != Some(id) {
                    debug!(
                        stage = "relay",
                        event_type,
                        routing = self.routing.as_str(),
                        event_broadcaster = event.broadcaster_user_id.as_deref().unwrap_or("<missing>"),
                        resolved_broadcaster = id,
                        "broadcaster id taken from first configured target"
                    );
                }
                Some(id)
            }
            None => {
                warn!(
                    stage = "relay",
                    event_type,
                    routing = self.routing.as_str(),
                    "unable to resolve broadcaster id; event ignored"
                );
                None
            }
        }
    }

    fn matching_targets<'a>(
        &'a self,
        broadcaster_id: &'a str,
    ) -> impl Iterator<Item = &'a WebhookTarget> + 'a {
        self.targets
            .iter()
            .filter(move |target| target.broadcaster_id == broadcaster_id)
    }

    /// Builds the announcement view. Lookup failures leave the event's own
    /// login/name in place and the stream fields empty.
    async fn enrich(&self, broadcaster_id: &str, event: &StreamEvent, now: DateTime<Utc>) -> StreamSnapshot {
        let login = event.broadcaster_user_login.clone().unwrap_or_default();
        let mut snapshot = StreamSnapshot {
            display_name: event
                .broadcaster_user_name
                .clone()
                .unwrap_or_else(|| login.clone()),
            login,
            ..StreamSnapshot::default()
        };

        let token = match self.tokens.access_token(now).await {
            Ok(token) => token,
            Err(_) => return snapshot,
        };

        match self.helix.get_stream(&token, Some(broadcaster_id)).await {
            Ok(Some(stream)) => {
                snapshot.title = stream.title;
                snapshot.game_name = stream.game_name;
                snapshot.viewer_count = stream.viewer_count;
                snapshot.thumbnail_url = stream.thumbnail_url;
            }
            Ok(None) => info!(
                stage = "helix",
                broadcaster_id,
                "stream lookup returned no live stream"
            ),
            Err(err) => self.lookup_failed("streams", broadcaster_id, err).await,
        }

        match self.helix.get_user(&token, UserFilter::Id(broadcaster_id)).await {
            Ok(Some(user)) => {
                snapshot.login = user.login;
                snapshot.display_name = user.display_name;
                snapshot.profile_image_url = user.profile_image_url;
            }
            Ok(None) => warn!(stage = "helix", broadcaster_id, "user lookup returned no user"),
            Err(err) => self.lookup_failed("users", broadcaster_id, err).await,
        }

        snapshot
    }

    async fn lookup_failed(&self, endpoint: &'static str, broadcaster_id: &str, err: HelixError) {
        error!(
            stage = "helix",
            endpoint,
            broadcaster_id,
            error = %err,
            "helix lookup failed"
        );
        if err.is_unauthorized() {
            self.tokens.invalidate().await;
        }
    }
}
