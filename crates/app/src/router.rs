use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use twi_relay_storage::{RecentMessageIds, DEFAULT_RECENT_CAPACITY};

use crate::relay::StreamRelay;
use crate::{telemetry, webhook};

const BANNER: &str = "Twitch EventSub Webhook Endpoint";

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    webhook_secret: Arc<[u8]>,
    clock: Clock,
    relay: Arc<StreamRelay>,
    recent_messages: RecentMessageIds,
    max_message_age: Option<Duration>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        webhook_secret: Arc<[u8]>,
        relay: StreamRelay,
        max_message_age: Option<Duration>,
    ) -> Self {
        Self {
            metrics,
            webhook_secret,
            clock: Arc::new(Utc::now),
            relay: Arc::new(relay),
            recent_messages: RecentMessageIds::new(DEFAULT_RECENT_CAPACITY),
            max_message_age,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.webhook_secret
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn relay(&self) -> &StreamRelay {
        &self.relay
    }

    pub fn recent_messages(&self) -> &RecentMessageIds {
        &self.recent_messages
    }

    /// `None` when the replay window is disabled.
    pub fn max_message_age(&self) -> Option<Duration> {
        self.max_message_age
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner).post(webhook::handle))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(map_response(security_headers))
        .with_state(state)
}

async fn banner() -> &'static str {
    BANNER
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
}

async fn security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );
    response
}
