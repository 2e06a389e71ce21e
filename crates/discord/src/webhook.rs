use reqwest::{header::CONTENT_TYPE, Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Client for executing and retracting Discord webhook messages.
///
/// Replies are returned whatever their status so callers can log them; only
/// transport failures and malformed URLs surface as errors.
#[derive(Clone)]
pub struct DiscordWebhookClient {
    http: Client,
}

impl DiscordWebhookClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Posts `message` to `webhook_url` and asks Discord to return the created message.
    pub async fn execute<T>(
        &self,
        webhook_url: &str,
        message: &T,
    ) -> Result<WebhookReply, DiscordError>
    where
        T: Serialize + ?Sized,
    {
        let url = Url::parse(webhook_url)?;
        let response = self
            .http
            .post(url)
            .query(&[("wait", "true")])
            .json(message)
            .send()
            .await?;

        WebhookReply::read(response).await
    }

    /// Deletes a message previously posted through `webhook_url`.
    pub async fn delete_message(
        &self,
        webhook_url: &str,
        message_id: &str,
    ) -> Result<WebhookReply, DiscordError> {
        let url = message_url(webhook_url, message_id)?;
        let response = self.http.delete(url).send().await?;

        WebhookReply::read(response).await
    }
}

/// `{webhook_url}/messages/{message_id}`, keeping any query string of the webhook URL.
pub fn message_url(webhook_url: &str, message_id: &str) -> Result<Url, DiscordError> {
    let mut url = Url::parse(webhook_url)?;
    url.path_segments_mut()
        .map_err(|_| DiscordError::NotHierarchical(webhook_url.to_string()))?
        .pop_if_empty()
        .push("messages")
        .push(message_id);
    Ok(url)
}

/// Status and body of a webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookReply {
    pub status: StatusCode,
    pub body: ReplyBody,
}

/// Webhook response body: decoded JSON when the content type says so, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Json(Value),
    Text(String),
}

impl WebhookReply {
    async fn read(response: Response) -> Result<Self, DiscordError> {
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("application/json"))
            .unwrap_or(false);

        let text = response.text().await?;
        let body = if is_json {
            match serde_json::from_str(&text) {
                Ok(value) => ReplyBody::Json(value),
                Err(_) => ReplyBody::Text(text),
            }
        } else {
            ReplyBody::Text(text)
        };

        Ok(Self { status, body })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[cfg(test)]
    fn json(&self) -> Option<&Value> {
        match &self.body {
            ReplyBody::Json(value) => Some(value),
            ReplyBody::Text(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self.body {
            ReplyBody::Json(value) => Some(value),
            ReplyBody::Text(_) => None,
        }
    }

    /// Body rendered for logging.
    pub fn body_text(&self) -> String {
        match &self.body {
            ReplyBody::Json(value) => value.to_string(),
            ReplyBody::Text(text) => text.clone(),
        }
    }
}

/// Errors produced by the Discord webhook client.
#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("invalid webhook url: {0}")]
    Url(#[from] url::ParseError),
    #[error("webhook url cannot carry a path: {0}")]
    NotHierarchical(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
