use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{error, info};
use twi_relay_twitch::{OAuthError, TwitchOAuthClient};

/// Tokens are renewed this long before Twitch says they expire.
const REFRESH_LEEWAY_SECS: i64 = 300;

/// App access token obtained through the client credentials grant, reused
/// until it nears expiry.
///
/// The lock is held while a token is being fetched, so concurrent events wait
/// for one request instead of each issuing their own.
pub struct AppTokenCache {
    oauth: TwitchOAuthClient,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(REFRESH_LEEWAY_SECS) > now
    }
}

impl AppTokenCache {
    pub fn new(oauth: TwitchOAuthClient) -> Self {
        Self {
            oauth,
            cached: Mutex::new(None),
        }
    }

    /// Returns a usable access token, fetching a new one when none is cached
    /// or the cached one is about to expire.
    pub async fn access_token(&self, now: DateTime<Utc>) -> Result<String, OAuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        let token = match self.oauth.client_credentials().await {
            Ok(token) => token,
            Err(err) => {
                counter!("twitch_token_fetch_total", "result" => "error").increment(1);
                error!(stage = "token", error = %err, "failed to obtain app access token");
                *cached = None;
                return Err(err);
            }
        };
        counter!("twitch_token_fetch_total", "result" => "ok").increment(1);

        let expires_at = token.expires_at(now);
        info!(
            stage = "token",
            token_type = %token.token_type,
            expires_in = token.expires_in,
            expires_at = %expires_at.to_rfc3339(),
            "obtained app access token"
        );
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    /// Drops the cached token so the next caller fetches a new one.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}
