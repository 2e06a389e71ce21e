use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use metrics::{counter, histogram};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use twi_relay_core::NotificationEnvelope;
use twi_relay_storage::MessageIdOutcome;

use crate::problem::ProblemResponse;
use crate::router::AppState;

pub(crate) const HEADER_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
pub(crate) const HEADER_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
pub(crate) const HEADER_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
pub(crate) const HEADER_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";

const SIGNATURE_PREFIX: &str = "sha256=";

/// EventSub webhook entry point.
///
/// Authentication failures are answered with an empty 403. Everything that
/// passes authentication is acknowledged promptly; relay failures are logged
/// and never change the status code.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();
    let message_type = MessageType::from_header(header_value(&headers, HEADER_MESSAGE_TYPE));
    let message_label = message_type.metric_label();

    let result = process(&state, &headers, &body, message_type).await;

    histogram!("webhook_ack_latency_seconds", "type" => message_label)
        .record(start.elapsed().as_secs_f64());
    if let Err(problem) = &result {
        warn!(
            stage = "ingress",
            message_type = message_label,
            status = problem.status().as_u16(),
            "rejected signed webhook payload"
        );
    }
    result
}

async fn process(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    message_type: MessageType,
) -> Result<Response, ProblemResponse> {
    let message_label = message_type.metric_label();

    let message_id = match authenticate(state, headers, body) {
        Ok(message_id) => message_id,
        Err(rejection) => {
            counter!("eventsub_invalid_signature_total", "type" => message_label).increment(1);
            warn!(
                stage = "ingress",
                message_type = message_label,
                reason = rejection.as_str(),
                "webhook authentication failed"
            );
            return Ok(StatusCode::FORBIDDEN.into_response());
        }
    };
    counter!("eventsub_ingress_total", "type" => message_label).increment(1);

    if message_type == MessageType::Unknown {
        info!(
            stage = "ingress",
            message_id,
            message_type = header_value(headers, HEADER_MESSAGE_TYPE).unwrap_or("<missing>"),
            "unknown message type acknowledged"
        );
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let envelope: NotificationEnvelope = serde_json::from_slice(body).map_err(|err| {
        ProblemResponse::bad_request("invalid_json", format!("failed to parse payload: {err}"))
    })?;

    match message_type {
        MessageType::Verification => {
            let challenge = envelope.challenge.as_deref().ok_or_else(|| {
                ProblemResponse::bad_request(
                    "missing_challenge",
                    "verification payload must include challenge",
                )
            })?;
            info!(
                stage = "ingress",
                message_id,
                event_type = envelope.subscription_type().unwrap_or("<missing>"),
                "answered webhook callback verification"
            );
            Ok((
                [(header::CONTENT_TYPE, "text/plain")],
                challenge.to_string(),
            )
                .into_response())
        }
        MessageType::Notification => {
            if state.recent_messages().insert(message_id) == MessageIdOutcome::Duplicate {
                counter!("eventsub_duplicate_total").increment(1);
                info!(
                    stage = "ingress",
                    message_id,
                    "duplicate notification acknowledged without dispatch"
                );
                return Ok(StatusCode::NO_CONTENT.into_response());
            }

            let outcome = state.relay().dispatch(&envelope, state.now()).await;
            debug!(
                stage = "ingress",
                message_id,
                event_type = envelope.subscription_type().unwrap_or("<missing>"),
                posted = outcome.posted,
                stored = outcome.stored,
                deleted = outcome.deleted,
                "notification relayed"
            );
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        MessageType::Revocation => {
            let subscription = envelope.subscription.as_ref();
            info!(
                stage = "ingress",
                message_id,
                event_type = subscription.map(|sub| sub.kind.as_str()).unwrap_or("<missing>"),
                reason = subscription
                    .and_then(|sub| sub.status.as_deref())
                    .unwrap_or("<missing>"),
                condition = %subscription
                    .map(|sub| sub.condition.clone())
                    .unwrap_or_default(),
                "subscription revoked"
            );
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        MessageType::Unknown => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    MissingHeaders,
    SignatureMismatch,
    StaleTimestamp,
}

impl Rejection {
    fn as_str(self) -> &'static str {
        match self {
            Self::MissingHeaders => "missing_headers",
            Self::SignatureMismatch => "signature_mismatch",
            Self::StaleTimestamp => "stale_timestamp",
        }
    }
}

/// Checks the signature and, when a replay window is configured, the message
/// age. Returns the message id on success.
fn authenticate<'a>(
    state: &AppState,
    headers: &'a HeaderMap,
    body: &[u8],
) -> Result<&'a str, Rejection> {
    let (Some(message_id), Some(timestamp), Some(signature)) = (
        header_value(headers, HEADER_MESSAGE_ID),
        header_value(headers, HEADER_TIMESTAMP),
        header_value(headers, HEADER_SIGNATURE),
    ) else {
        return Err(Rejection::MissingHeaders);
    };

    if !verify_signature(state.webhook_secret(), message_id, timestamp, body, signature) {
        return Err(Rejection::SignatureMismatch);
    }

    if let Some(max_age) = state.max_message_age() {
        let now = state.now();
        let fresh = parse_timestamp(timestamp)
            .map(|sent| now.signed_duration_since(sent).num_seconds().unsigned_abs())
            .is_some_and(|skew| skew <= max_age.as_secs());
        if !fresh {
            debug!(
                stage = "ingress",
                message_id,
                timestamp,
                now = %now.to_rfc3339(),
                "message timestamp outside replay window"
            );
            return Err(Rejection::StaleTimestamp);
        }
    }

    Ok(message_id)
}

/// Recomputes `sha256=<hex hmac(id + timestamp + body)>` and compares it with
/// `provided`.
///
/// A length mismatch fails immediately; equal-length values are compared in
/// constant time over every byte.
pub(crate) fn verify_signature(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    provided: &str,
) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    let expected = format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()));

    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    Verification,
    Notification,
    Revocation,
    Unknown,
}

impl MessageType {
    fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::Unknown;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "webhook_callback_verification" => Self::Verification,
            "notification" => Self::Notification,
            "revocation" => Self::Revocation,
            _ => Self::Unknown,
        }
    }

    fn metric_label(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Notification => "notification",
            Self::Revocation => "revocation",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{HeaderValue, Method, Request},
    };
    use chrono::{Duration, SecondsFormat};
    use http_body_util::BodyExt;
    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;
    use tower::ServiceExt;
    use url::Url;

    use twi_relay_core::{BroadcasterRouting, LiveMessageKey, WebhookTarget};
    use twi_relay_discord::DiscordWebhookClient;
    use twi_relay_twitch::{HelixClient, TwitchOAuthClient};
    use twi_relay_util::{config::DEFAULT_MAX_MESSAGE_AGE_SECS, replay_window};

    use crate::relay::StreamRelay;
    use crate::router::app_router;
    use crate::telemetry;
    use crate::token::AppTokenCache;

    const SECRET: &str = "test-secret";
    const BROADCASTER_ID: &str = "141981764";
    const WEBHOOK_PATH: &str = "/api/webhooks/1/token";
    const FIXED_NOW: &str = "2024-01-01T00:00:00Z";

    struct TestContext {
        server: MockServer,
        state: AppState,
        now: DateTime<Utc>,
    }

    impl TestContext {
        fn webhook_key(&self) -> LiveMessageKey {
            LiveMessageKey {
                broadcaster_id: BROADCASTER_ID.to_string(),
                destination_url: self.server.url(WEBHOOK_PATH),
            }
        }

        fn timestamp(&self) -> String {
            self.now.to_rfc3339_opts(SecondsFormat::Millis, true)
        }

        async fn send(&self, message_type: &str, message_id: &str, body: &str) -> Response {
            let timestamp = self.timestamp();
            let signature = sign(message_id, &timestamp, body.as_bytes());
            self.send_with(message_type, message_id, &timestamp, &signature, body)
                .await
        }

        async fn send_with(
            &self,
            message_type: &str,
            message_id: &str,
            timestamp: &str,
            signature: &str,
            body: &str,
        ) -> Response {
            let mut request = Request::builder()
                .method(Method::POST)
                .uri("/")
                .body(Body::from(body.to_string()))
                .expect("request");
            let headers = request.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            for (name, value) in [
                (HEADER_MESSAGE_TYPE, message_type),
                (HEADER_MESSAGE_ID, message_id),
                (HEADER_TIMESTAMP, timestamp),
                (HEADER_SIGNATURE, signature),
            ] {
                headers.insert(name, HeaderValue::from_str(value).expect("header value"));
            }

            app_router(self.state.clone())
                .oneshot(request)
                .await
                .expect("response")
        }
    }

    async fn setup(
        routing: BroadcasterRouting,
        targets: &[(&str, &str)],
        max_message_age: Option<StdDuration>,
    ) -> TestContext {
        let server = MockServer::start_async().await;
        let metrics = telemetry::init_metrics().expect("metrics init");
        let now = DateTime::parse_from_rfc3339(FIXED_NOW)
            .expect("fixed time")
            .with_timezone(&Utc);

        let http = Client::builder().build().expect("client");
        let oauth = TwitchOAuthClient::new(
            "client",
            "secret",
            Url::parse(&server.url("/oauth2/")).expect("url"),
            http.clone(),
        );
        let helix = HelixClient::new(
            "client",
            Url::parse(&server.url("/helix/")).expect("url"),
            http.clone(),
        );
        let targets = targets
            .iter()
            .map(|(broadcaster_id, path)| WebhookTarget {
                broadcaster_id: broadcaster_id.to_string(),
                url: server.url(*path),
                content: "<@&123> we are live".to_string(),
            })
            .collect();
        let relay = StreamRelay::new(
            helix,
            AppTokenCache::new(oauth),
            DiscordWebhookClient::new(http),
            targets,
            routing,
        );

        let secret: Arc<[u8]> = Arc::from(SECRET.as_bytes().to_vec().into_boxed_slice());
        let state = AppState::new(metrics, secret, relay, max_message_age)
            .with_clock(Arc::new(move || now));

        TestContext { server, state, now }
    }

    async fn setup_default() -> TestContext {
        setup(
            BroadcasterRouting::Event,
            &[(BROADCASTER_ID, WEBHOOK_PATH)],
            replay_window(DEFAULT_MAX_MESSAGE_AGE_SECS),
        )
        .await
    }

    fn sign(message_id: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).expect("hmac");
        mac.update(message_id.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn stream_body(kind: &str, broadcaster_id: &str) -> String {
        json!({
            "subscription": {
                "id": "sub-1",
                "type": kind,
                "version": "1",
                "status": "enabled",
                "condition": {"broadcaster_user_id": broadcaster_id}
            },
            "event": {
                "broadcaster_user_id": broadcaster_id,
                "broadcaster_user_login": "wissididom",
                "broadcaster_user_name": "Wissididom"
            }
        })
        .to_string()
    }

    /// Token, stream and user lookups. Returns the token mock.
    async fn mock_twitch(server: &MockServer) -> httpmock::Mock<'_> {
        let token = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth2/token")
                    .query_param("grant_type", "client_credentials");
                then.status(200).json_body(json!({
                    "access_token": "app-token",
                    "expires_in": 5_000_000,
                    "token_type": "bearer"
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/streams")
                    .header("Client-Id", "client")
                    .header("Authorization", "Bearer app-token");
                then.status(200).json_body(json!({"data": [{
                    "id": "stream-1",
                    "user_id": BROADCASTER_ID,
                    "user_login": "wissididom",
                    "user_name": "Wissididom",
                    "game_name": "Just Chatting",
                    "title": "Building things",
                    "viewer_count": 42,
                    "thumbnail_url": "https://static-cdn.jtvnw.net/previews-ttv/live_user_wissididom-{width}x{height}.jpg",
                    "started_at": FIXED_NOW
                }]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/users").query_param("id", BROADCASTER_ID);
                then.status(200).json_body(json!({"data": [{
                    "id": BROADCASTER_ID,
                    "login": "wissididom",
                    "display_name": "Wissididom",
                    "profile_image_url": "https://static-cdn.jtvnw.net/user.png"
                }]}));
            })
            .await;
        token
    }

    async fn mock_post<'a>(server: &'a MockServer, message_id: &str) -> httpmock::Mock<'a> {
        let reply = json!({"id": message_id, "channel_id": "chan-1"}).to_string();
        server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path(WEBHOOK_PATH)
                    .query_param("wait", "true");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(reply);
            })
            .await
    }

    async fn mock_delete<'a>(server: &'a MockServer, message_id: &str) -> httpmock::Mock<'a> {
        let path = format!("{WEBHOOK_PATH}/messages/{message_id}");
        server
            .mock_async(move |when, then| {
                when.method(DELETE).path(path);
                then.status(204);
            })
            .await
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn signature_matches_expected_hmac() {
        let signature = sign("msg-1", FIXED_NOW, b"{}");
        assert!(verify_signature(SECRET.as_bytes(), "msg-1", FIXED_NOW, b"{}", &signature));
        assert!(!verify_signature(b"other-secret", "msg-1", FIXED_NOW, b"{}", &signature));
    }

    #[test]
    fn any_single_byte_mutation_fails_verification() {
        let id = "msg-1";
        let body = br#"{"subscription":{"type":"stream.online"}}"#;
        let signature = sign(id, FIXED_NOW, body);

        fn mutate(value: &[u8], index: usize) -> Vec<u8> {
            let mut bytes = value.to_vec();
            bytes[index] ^= 0x01;
            bytes
        }

        for index in 0..signature.len() {
            let mutated = String::from_utf8(mutate(signature.as_bytes(), index)).expect("ascii");
            assert!(!verify_signature(SECRET.as_bytes(), id, FIXED_NOW, body, &mutated));
        }
        for index in 0..id.len() {
            let mutated = String::from_utf8(mutate(id.as_bytes(), index)).expect("ascii");
            assert!(!verify_signature(SECRET.as_bytes(), &mutated, FIXED_NOW, body, &signature));
        }
        for index in 0..FIXED_NOW.len() {
            let mutated = String::from_utf8(mutate(FIXED_NOW.as_bytes(), index)).expect("ascii");
            assert!(!verify_signature(SECRET.as_bytes(), id, &mutated, body, &signature));
        }
        for index in 0..body.len() {
            let mutated = mutate(body, index);
            assert!(!verify_signature(SECRET.as_bytes(), id, FIXED_NOW, &mutated, &signature));
        }
    }

    #[test]
    fn truncated_or_recased_signature_fails() {
        let signature = sign("msg-1", FIXED_NOW, b"{}");
        let truncated = &signature[..signature.len() - 1];
        assert!(!verify_signature(SECRET.as_bytes(), "msg-1", FIXED_NOW, b"{}", truncated));
        let uppercase = signature.to_ascii_uppercase();
        assert!(!verify_signature(SECRET.as_bytes(), "msg-1", FIXED_NOW, b"{}", &uppercase));
    }

    #[test]
    fn message_type_parsing_ignores_case() {
        assert_eq!(
            MessageType::from_header(Some("Webhook_Callback_Verification")),
            MessageType::Verification
        );
        assert_eq!(
            MessageType::from_header(Some("NOTIFICATION")),
            MessageType::Notification
        );
        assert_eq!(
            MessageType::from_header(Some("revocation")),
            MessageType::Revocation
        );
        assert_eq!(MessageType::from_header(Some("ping")), MessageType::Unknown);
        assert_eq!(MessageType::from_header(None), MessageType::Unknown);
    }

    #[tokio::test]
    async fn verification_echoes_challenge_as_plain_text() {
        let ctx = setup_default().await;
        let body = json!({
            "challenge": "abc123",
            "subscription": {"type": "stream.online", "version": "1", "condition": {}}
        })
        .to_string();

        let response = ctx
            .send("webhook_callback_verification", "msg-verify", &body)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
        assert_eq!(body_bytes(response).await, b"abc123");
    }

    #[tokio::test]
    async fn verification_without_challenge_is_bad_request() {
        let ctx = setup_default().await;
        let body = json!({"subscription": {"type": "stream.online"}}).to_string();

        let response = ctx
            .send("webhook_callback_verification", "msg-verify", &body)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/problem+json"))
        );
    }

    #[tokio::test]
    async fn signed_invalid_json_is_bad_request() {
        let ctx = setup_default().await;

        let response = ctx.send("notification", "msg-broken", "{not json").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_signature_is_forbidden_without_outbound_calls() {
        let ctx = setup_default().await;
        let any = ctx
            .server
            .mock_async(|when, then| {
                when.path_contains("/");
                then.status(200);
            })
            .await;
        let body = stream_body("stream.online", BROADCASTER_ID);
        let timestamp = ctx.timestamp();
        let mut signature = sign("msg-1", &timestamp, body.as_bytes());
        signature.pop();
        signature.push('0');

        let response = ctx
            .send_with("notification", "msg-1", &timestamp, &signature, &body)
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_bytes(response).await.is_empty());
        any.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn missing_signature_headers_are_forbidden() {
        let ctx = setup_default().await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(HEADER_MESSAGE_TYPE, "notification")
            .body(Body::from(stream_body("stream.online", BROADCASTER_ID)))
            .expect("request");

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn stale_timestamp_is_forbidden_when_replay_window_set() {
        let ctx = setup(
            BroadcasterRouting::Event,
            &[(BROADCASTER_ID, WEBHOOK_PATH)],
            Some(StdDuration::from_secs(600)),
        )
        .await;
        let body = stream_body("stream.online", BROADCASTER_ID);
        let timestamp =
            (ctx.now - Duration::minutes(11)).to_rfc3339_opts(SecondsFormat::Millis, true);
        let signature = sign("msg-old", &timestamp, body.as_bytes());

        let response = ctx
            .send_with("notification", "msg-old", &timestamp, &signature, &body)
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn old_signed_verification_is_accepted_by_default() {
        let ctx = setup_default().await;
        let body = json!({
            "challenge": "abc123",
            "subscription": {"type": "stream.online", "version": "1", "condition": {}}
        })
        .to_string();
        let timestamp = "2023-12-31T23:00:00Z";
        let signature = sign("msg-late", timestamp, body.as_bytes());

        let response = ctx
            .send_with(
                "webhook_callback_verification",
                "msg-late",
                timestamp,
                &signature,
                &body,
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"abc123");
    }

    #[tokio::test]
    async fn unknown_message_type_is_acknowledged_without_calls() {
        let ctx = setup_default().await;
        let any = ctx
            .server
            .mock_async(|when, then| {
                when.path_contains("/");
                then.status(200);
            })
            .await;

        let response = ctx.send("ping", "msg-ping", "not even json").await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        any.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn revocation_is_acknowledged() {
        let ctx = setup_default().await;
        let body = json!({
            "subscription": {
                "id": "sub-1",
                "type": "stream.online",
                "version": "1",
                "status": "authorization_revoked",
                "condition": {"broadcaster_user_id": BROADCASTER_ID}
            }
        })
        .to_string();

        let response = ctx.send("revocation", "msg-revoke", &body).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn online_posts_once_and_stores_reply() {
        let ctx = setup_default().await;
        mock_twitch(&ctx.server).await;
        let post = ctx
            .server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(WEBHOOK_PATH)
                    .query_param("wait", "true")
                    .body_contains("<@&123> we are live")
                    .body_contains("Building things")
                    .body_contains("Just Chatting")
                    .body_contains("live_user_wissididom-400x225.jpg")
                    .body_contains("Wissididom is now live on Twitch!");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"id":"m-1"}"#);
            })
            .await;

        let response = ctx
            .send("notification", "msg-online", &stream_body("stream.online", BROADCASTER_ID))
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        post.assert_hits_async(1).await;
        let stored = ctx
            .state
            .relay()
            .live_messages()
            .get(&ctx.webhook_key())
            .await
            .expect("record stored");
        assert_eq!(stored.message_id(), Some("m-1"));
    }

    #[tokio::test]
    async fn text_reply_is_not_stored() {
        let ctx = setup_default().await;
        mock_twitch(&ctx.server).await;
        ctx.server
            .mock_async(|when, then| {
                when.method(POST).path(WEBHOOK_PATH);
                then.status(200)
                    .header("content-type", "text/plain")
                    .body("ok");
            })
            .await;
        let delete = ctx
            .server
            .mock_async(|when, then| {
                when.method(DELETE);
                then.status(204);
            })
            .await;

        ctx.send("notification", "msg-online", &stream_body("stream.online", BROADCASTER_ID))
            .await;
        assert!(ctx.state.relay().live_messages().is_empty().await);

        let response = ctx
            .send("notification", "msg-offline", &stream_body("stream.offline", BROADCASTER_ID))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        delete.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn offline_deletes_stored_message_once() {
        let ctx = setup_default().await;
        mock_twitch(&ctx.server).await;
        mock_post(&ctx.server, "m-1").await;
        let delete = mock_delete(&ctx.server, "m-1").await;

        ctx.send("notification", "msg-online", &stream_body("stream.online", BROADCASTER_ID))
            .await;
        let response = ctx
            .send("notification", "msg-offline-1", &stream_body("stream.offline", BROADCASTER_ID))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        delete.assert_hits_async(1).await;
        assert!(ctx.state.relay().live_messages().is_empty().await);

        let response = ctx
            .send("notification", "msg-offline-2", &stream_body("stream.offline", BROADCASTER_ID))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        delete.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn failed_delete_still_forgets_message() {
        let ctx = setup_default().await;
        mock_twitch(&ctx.server).await;
        mock_post(&ctx.server, "m-1").await;
        let delete = ctx
            .server
            .mock_async(|when, then| {
                when.method(DELETE).path(format!("{WEBHOOK_PATH}/messages/m-1"));
                then.status(404)
                    .header("content-type", "application/json")
                    .body(r#"{"message":"Unknown Message","code":10008}"#);
            })
            .await;

        ctx.send("notification", "msg-online", &stream_body("stream.online", BROADCASTER_ID))
            .await;
        ctx.send("notification", "msg-offline-1", &stream_body("stream.offline", BROADCASTER_ID))
            .await;
        ctx.send("notification", "msg-offline-2", &stream_body("stream.offline", BROADCASTER_ID))
            .await;

        delete.assert_hits_async(1).await;
        assert!(ctx.state.relay().live_messages().is_empty().await);
    }

    #[tokio::test]
    async fn repeated_lifecycles_use_fresh_message_ids() {
        let ctx = setup_default().await;
        mock_twitch(&ctx.server).await;

        let first_post = mock_post(&ctx.server, "m-1").await;
        let first_delete = mock_delete(&ctx.server, "m-1").await;
        ctx.send("notification", "msg-1", &stream_body("stream.online", BROADCASTER_ID))
            .await;
        ctx.send("notification", "msg-2", &stream_body("stream.offline", BROADCASTER_ID))
            .await;
        first_post.assert_hits_async(1).await;
        first_delete.assert_hits_async(1).await;
        first_post.delete_async().await;

        let second_post = mock_post(&ctx.server, "m-2").await;
        let second_delete = mock_delete(&ctx.server, "m-2").await;
        ctx.send("notification", "msg-3", &stream_body("stream.online", BROADCASTER_ID))
            .await;
        let stored = ctx
            .state
            .relay()
            .live_messages()
            .get(&ctx.webhook_key())
            .await
            .expect("record stored");
        assert_eq!(stored.message_id(), Some("m-2"));

        ctx.send("notification", "msg-4", &stream_body("stream.offline", BROADCASTER_ID))
            .await;
        second_post.assert_hits_async(1).await;
        second_delete.assert_hits_async(1).await;
        first_delete.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn redelivered_notification_is_not_dispatched_twice() {
        let ctx = setup_default().await;
        mock_twitch(&ctx.server).await;
        let post = mock_post(&ctx.server, "m-1").await;
        let body = stream_body("stream.online", BROADCASTER_ID);

        let first = ctx.send("notification", "msg-same", &body).await;
        let second = ctx.send("notification", "msg-same", &body).await;

        assert_eq!(first.status(), StatusCode::NO_CONTENT);
        assert_eq!(second.status(), StatusCode::NO_CONTENT);
        post.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn access_token_is_reused_across_events() {
        let ctx = setup_default().await;
        let token = mock_twitch(&ctx.server).await;
        mock_post(&ctx.server, "m-1").await;
        mock_delete(&ctx.server, "m-1").await;

        ctx.send("notification", "msg-1", &stream_body("stream.online", BROADCASTER_ID))
            .await;
        ctx.send("notification", "msg-2", &stream_body("stream.offline", BROADCASTER_ID))
            .await;
        ctx.send("notification", "msg-3", &stream_body("stream.online", BROADCASTER_ID))
            .await;

        token.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn first_target_routing_uses_configured_broadcaster() {
        let ctx = setup(
            BroadcasterRouting::FirstTarget,
            &[(BROADCASTER_ID, WEBHOOK_PATH)],
            None,
        )
        .await;
        mock_twitch(&ctx.server).await;
        let post = mock_post(&ctx.server, "m-1").await;

        ctx.send("notification", "msg-1", &stream_body("stream.online", "someone-else"))
            .await;

        post.assert_hits_async(1).await;
        assert!(ctx
            .state
            .relay()
            .live_messages()
            .get(&ctx.webhook_key())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn event_routing_ignores_unconfigured_broadcasters() {
        let ctx = setup_default().await;
        mock_twitch(&ctx.server).await;
        let post = mock_post(&ctx.server, "m-1").await;

        let response = ctx
            .send("notification", "msg-1", &stream_body("stream.online", "someone-else"))
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        post.assert_hits_async(0).await;
    }
}
