//! An HTTP [`UpdateSource`] for Bot API style `getUpdates` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use longpoll_receiver::{DynError, FetchRequest, UpdateSource};
use longpoll_types::{Update, UpdateKind};
use observability_deps::tracing::trace;
use reqwest::{IntoUrl, Method, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use url::Url;

/// Extra time a request may take on top of its long-poll timeout before the client gives up on
/// it, so an idle poll is ended by the server rather than the client.
pub const DEFAULT_REQUEST_SLACK: Duration = Duration::from_secs(10);

const GET_UPDATES: &str = "getUpdates";

/// Primary error type for the [`Client`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("failed to read the API response: {0}")]
    Text(#[source] reqwest::Error),

    #[error("failed to parse JSON response: {0}")]
    Json(#[source] serde_json::Error),

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("server rejected {method} request [{code}]: {description}")]
    Rejected {
        method: &'static str,
        code: i64,
        description: String,
    },

    #[error("failed to send {method} {api_method} request: {source}")]
    RequestSend {
        method: Method,
        api_method: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    fn request_send(method: Method, api_method: &'static str, source: reqwest::Error) -> Self {
        // The request URL carries the bot token.
        Self::RequestSend {
            method,
            api_method,
            source: source.without_url(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the update API of a bot.
///
/// Every method is called as `POST {base_url}/bot{token}/{method}`.
#[derive(Debug, Clone)]
pub struct Client {
    /// The base URL of the API server
    base_url: Url,
    /// The bot token, part of every request path
    token: Secret<String>,
    /// Added to the long-poll timeout to get the request timeout
    request_slack: Duration,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`]
    ///
    /// # Example
    /// ```
    /// # use longpoll_client::Client;
    /// # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// let client = Client::new("https://api.telegram.org", "123456:secret-token")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<U: IntoUrl>(base_url: U, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into_url().map_err(Error::BaseUrl)?,
            token: Secret::new(token.into()),
            request_slack: DEFAULT_REQUEST_SLACK,
            http_client: reqwest::Client::new(),
        })
    }

    /// Set how much longer than its long-poll timeout a request may take.
    pub fn with_request_slack(mut self, request_slack: Duration) -> Self {
        self.request_slack = request_slack;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a request to the `getUpdates` API method
    ///
    /// # Example
    /// ```no_run
    /// # use std::time::Duration;
    /// # use longpoll_client::Client;
    /// # use longpoll_receiver::FetchRequest;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// let client = Client::new("https://api.telegram.org", "123456:secret-token")?;
    /// let updates = client
    ///     .get_updates(&FetchRequest {
    ///         offset: 0,
    ///         timeout: Duration::from_secs(30),
    ///         allowed_updates: vec![],
    ///         limit: 100,
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_updates(&self, request: &FetchRequest) -> Result<Vec<Update>> {
        #[derive(Debug, Serialize)]
        struct Req<'a> {
            offset: i64,
            limit: u8,
            timeout: u64,
            allowed_updates: &'a [UpdateKind],
        }

        trace!(
            offset = request.offset,
            limit = request.limit,
            timeout = ?request.timeout,
            "sending getUpdates request"
        );
        let resp = self
            .http_client
            .post(self.method_url(GET_UPDATES))
            .timeout(self.request_timeout(request))
            .json(&Req {
                offset: request.offset,
                limit: request.limit,
                timeout: request.timeout.as_secs(),
                allowed_updates: &request.allowed_updates,
            })
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, GET_UPDATES, src))?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Text)?;
        parse_response(GET_UPDATES, status, &body)
    }

    /// The whole request may take the long-poll timeout plus the slack, saturating for
    /// unbounded poll timeouts.
    fn request_timeout(&self, request: &FetchRequest) -> Duration {
        request.timeout.saturating_add(self.request_slack)
    }

    fn method_url(&self, method: &str) -> Url {
        let mut url = self.base_url.clone();
        // `IntoUrl` only accepts URLs with a host, and those always have path segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&format!("bot{}", self.token.expose_secret()))
                .push(method);
        }
        url
    }
}

#[async_trait]
impl UpdateSource for Client {
    async fn fetch_batch(
        &self,
        request: &FetchRequest,
    ) -> std::result::Result<Vec<Update>, DynError> {
        Ok(self.get_updates(request).await?)
    }
}

/// The envelope every API method answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

fn parse_response<T>(method: &'static str, status: StatusCode, body: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    match serde_json::from_str::<ApiResponse<T>>(body) {
        Ok(ApiResponse {
            ok: true,
            result: Some(result),
            ..
        }) => Ok(result),
        Ok(ApiResponse {
            error_code,
            description,
            ..
        }) => Err(Error::Rejected {
            method,
            code: error_code.unwrap_or_else(|| i64::from(status.as_u16())),
            description: description.unwrap_or_else(|| "no description".to_string()),
        }),
        Err(_) if !status.is_success() => Err(Error::ApiError {
            code: status,
            message: body.to_string(),
        }),
        Err(e) => Err(Error::Json(e)),
    }
}
