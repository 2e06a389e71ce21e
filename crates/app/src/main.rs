mod problem;
mod relay;
mod router;
mod telemetry;
mod token;
mod webhook;

use std::{net::SocketAddr, sync::Arc};

use tracing::{info, warn};
use twi_relay_discord::DiscordWebhookClient;
use twi_relay_twitch::{HelixClient, TwitchOAuthClient};
use twi_relay_util::{load_env_file, AppConfig};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let http = reqwest::Client::builder()
        .timeout(config.outbound_timeout)
        .build()?;
    let oauth = TwitchOAuthClient::new(
        config.twitch.client_id.clone(),
        config.twitch.client_secret.clone(),
        Url::parse(&config.twitch_oauth_base_url)?,
        http.clone(),
    );
    let helix = HelixClient::new(
        config.twitch.client_id.clone(),
        Url::parse(&config.twitch_helix_base_url)?,
        http.clone(),
    );

    if config.webhooks.is_empty() {
        warn!(stage = "app", "WEBHOOKS is empty; stream events will not be relayed");
    }
    info!(
        stage = "app",
        targets = config.webhooks.len(),
        routing = config.routing.as_str(),
        max_message_age_secs = config.max_message_age.map(|age| age.as_secs()),
        outbound_timeout_secs = config.outbound_timeout.as_secs(),
        "relay configured"
    );

    let relay = relay::StreamRelay::new(
        helix,
        token::AppTokenCache::new(oauth),
        DiscordWebhookClient::new(http),
        config.webhooks.clone(),
        config.routing,
    );
    let secret: Arc<[u8]> = Arc::from(config.eventsub_secret.as_bytes());
    let state = router::AppState::new(metrics, secret, relay, config.max_message_age);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
