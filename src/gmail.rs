//! Gmail REST client: candidate search, per-message fetch, body decoding.
//!
//! The crawler consumes this through the [`MailService`] trait so tests can
//! script mailbox contents without network access.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::RawMessage;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/";

/// Fixed keyword OR-filter applied at the provider, ahead of the parser's
/// own gates. Trades recall for request volume.
const SEARCH_KEYWORDS: &str = r#""biên lai" OR "biến động" OR "giao dịch" OR "thanh toán""#;

const RETRY_BUDGET: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("missing or empty access token")]
    MissingCredential,
    #[error("mail provider rejected the access token: {0}")]
    Unauthorized(String),
    #[error("mail provider error {status}: {body}")]
    Provider { status: StatusCode, body: String },
    #[error("failed to reach mail provider: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid mail provider response: {0}")]
    Decode(String),
    #[error("invalid mail provider endpoint: {0}")]
    Endpoint(String),
}

/// Provider boundary the crawler drives: one search returning message ids,
/// then one fetch per id.
#[async_trait]
pub trait MailService: Send + Sync {
    async fn search_message_ids(
        &self,
        access_token: &str,
        max_results: u32,
    ) -> Result<Vec<String>, CrawlError>;

    async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<RawMessage, CrawlError>;
}

#[derive(Clone)]
pub struct GmailClient {
    http: Client,
    base_url: Url,
    search_window_days: u32,
}

impl fmt::Debug for GmailClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GmailClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GmailClient {
    pub fn new(search_window_days: u32) -> Self {
        let base_url = Url::parse(GMAIL_API_BASE).expect("valid default Gmail URL");
        Self::with_base_url(base_url, search_window_days)
    }

    pub fn with_base_url(base_url: Url, search_window_days: u32) -> Self {
        let http = Client::builder()
            .user_agent("bankmail/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            search_window_days,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, CrawlError> {
        let base_url = Url::parse(&cfg.gmail.api_base)
            .map_err(|err| CrawlError::Endpoint(err.to_string()))?;
        Ok(Self::with_base_url(base_url, cfg.gmail.search_window_days))
    }

    /// Provider query string: recency window plus the keyword OR-filter.
    pub fn search_query(&self) -> String {
        format!("newer_than:{}d ({})", self.search_window_days, SEARCH_KEYWORDS)
    }

    pub fn build_search_request(
        &self,
        access_token: &str,
        max_results: u32,
    ) -> Result<reqwest::Request, CrawlError> {
        let mut endpoint = self
            .base_url
            .join("gmail/v1/users/me/messages")
            .map_err(|err| CrawlError::Endpoint(err.to_string()))?;
        endpoint
            .query_pairs_mut()
            .append_pair("q", &self.search_query())
            .append_pair("maxResults", &max_results.to_string());
        self.http
            .get(endpoint)
            .bearer_auth(access_token)
            .build()
            .map_err(CrawlError::Network)
    }

    pub fn build_fetch_request(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<reqwest::Request, CrawlError> {
        let endpoint = self
            .base_url
            .join(&format!("gmail/v1/users/me/messages/{}", message_id))
            .map_err(|err| CrawlError::Endpoint(err.to_string()))?;
        self.http
            .get(endpoint)
            .bearer_auth(access_token)
            .build()
            .map_err(CrawlError::Network)
    }

    /// Execute a GET and decode its JSON body, retrying 429/5xx and
    /// connect/timeout failures with doubling backoff inside a fixed
    /// attempt budget. Retry lives here, in the generic HTTP layer; the
    /// crawl itself never re-runs.
    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: reqwest::Request,
    ) -> Result<T, CrawlError> {
        let mut attempt = 0u32;
        loop {
            let req = request
                .try_clone()
                .ok_or_else(|| CrawlError::Endpoint("request body is not replayable".into()))?;
            debug!(url = %req.url(), attempt, "sending gmail request");
            let result = self.http.execute(req).await;

            let transient = match &result {
                Ok(res) => {
                    res.status() == StatusCode::TOO_MANY_REQUESTS || res.status().is_server_error()
                }
                Err(err) => err.is_connect() || err.is_timeout(),
            };
            if transient && attempt + 1 < RETRY_BUDGET {
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "transient gmail failure; backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let res = result?;
            let status = res.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let body = res.text().await.unwrap_or_default();
                return Err(CrawlError::Unauthorized(body));
            }
            if !status.is_success() {
                let body = res.text().await.unwrap_or_default();
                return Err(CrawlError::Provider { status, body });
            }
            return res
                .json::<T>()
                .await
                .map_err(|err| CrawlError::Decode(err.to_string()));
        }
    }
}

#[async_trait]
impl MailService for GmailClient {
    async fn search_message_ids(
        &self,
        access_token: &str,
        max_results: u32,
    ) -> Result<Vec<String>, CrawlError> {
        let request = self.build_search_request(access_token, max_results)?;
        let payload: MessageListResponse = self.execute_json(request).await?;
        Ok(payload.messages.into_iter().map(|m| m.id).collect())
    }

    async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<RawMessage, CrawlError> {
        let request = self.build_fetch_request(access_token, message_id)?;
        let payload: MessageResponse = self.execute_json(request).await?;

        let subject = header_value(&payload.payload.headers, "Subject").unwrap_or_default();
        let sender = header_value(&payload.payload.headers, "From").unwrap_or_default();
        let received_at = parse_internal_date(&payload.internal_date)?;
        let body_text = decode_body(&payload.payload)?;

        Ok(RawMessage {
            id: payload.id,
            subject,
            sender,
            body_text,
            received_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    // Gmail omits the field entirely when the query matches nothing.
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    id: String,
    internal_date: String,
    payload: MessagePayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<MessageBody>,
    #[serde(default)]
    parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    body: Option<MessageBody>,
}

fn header_value(headers: &[Header], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn parse_internal_date(raw: &str) -> Result<DateTime<Utc>, CrawlError> {
    let millis: i64 = raw
        .parse()
        .map_err(|_| CrawlError::Decode(format!("invalid internalDate: {raw}")))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| CrawlError::Decode(format!("out-of-range internalDate: {raw}")))
}

/// Decoded message text: the first `text/plain` part of a multipart
/// payload, the first part as fallback, or the single-part body. A payload
/// with no data at all decodes to an empty string.
fn decode_body(payload: &MessagePayload) -> Result<String, CrawlError> {
    let data = if let Some(parts) = payload.parts.as_deref() {
        parts
            .iter()
            .find(|p| p.mime_type == "text/plain")
            .or_else(|| parts.first())
            .and_then(|p| p.body.as_ref())
            .and_then(|b| b.data.as_deref())
    } else {
        payload.body.as_ref().and_then(|b| b.data.as_deref())
    };
    match data {
        Some(data) => decode_base64url(data),
        None => Ok(String::new()),
    }
}

/// Gmail body payloads use the URL-safe alphabet; padding shows up
/// inconsistently, so it is trimmed before decoding.
fn decode_base64url(data: &str) -> Result<String, CrawlError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|err| CrawlError::Decode(format!("invalid base64 body: {err}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
