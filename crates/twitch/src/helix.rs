use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use url::Url;

/// Client for the Helix user and stream lookups used to enrich live events.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    base_url: Url,
    client_id: String,
}

impl HelixClient {
    /// Creates a new Helix client with the provided configuration.
    pub fn new(client_id: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
        }
    }

    /// Looks up a single user. Returns the first entry Helix reports.
    pub async fn get_user(
        &self,
        access_token: &str,
        filter: UserFilter<'_>,
    ) -> Result<Option<HelixUser>, HelixError> {
        let mut url = self.base_url.join("users")?;
        match filter {
            UserFilter::Authenticated => {}
            UserFilter::Id(id) => {
                url.query_pairs_mut().append_pair("id", id);
            }
            UserFilter::Login(login) => {
                url.query_pairs_mut().append_pair("login", login);
            }
        }

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        parse_json::<DataResponse<HelixUser>>(response)
            .await
            .map(DataResponse::into_first)
    }

    /// Fetches the live stream of `user_id`, or `None` while the user is offline.
    pub async fn get_stream(
        &self,
        access_token: &str,
        user_id: Option<&str>,
    ) -> Result<Option<HelixStream>, HelixError> {
        let mut url = self.base_url.join("streams")?;
        if let Some(user_id) = user_id {
            url.query_pairs_mut().append_pair("user_id", user_id);
        }

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        parse_json::<DataResponse<HelixStream>>(response)
            .await
            .map(DataResponse::into_first)
    }

    fn authorized_request(
        &self,
        method: Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {access_token}"))
    }
}

/// Filter applied to `GET /users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFilter<'a> {
    /// No filter: the user owning the token (app tokens return nothing).
    Authenticated,
    Id(&'a str),
    Login(&'a str),
}

#[derive(Debug, Clone, Deserialize)]
struct DataResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> DataResponse<T> {
    fn into_first(self) -> Option<T> {
        self.data.into_iter().next()
    }
}

/// Broadcaster profile returned by `GET /users`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

/// Live stream metadata returned by `GET /streams`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HelixStream {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_login: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub game_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub viewer_count: Option<u64>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Errors produced by the Helix client.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl HelixError {
    /// Returns `true` when Helix rejected the access token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

async fn parse_json<T>(response: Response) -> Result<T, HelixError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }

    Ok(response.json().await?)
}
