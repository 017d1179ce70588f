//! PlateStore - client for the backend's saved-plate API.
//!
//! The console saves confirmed plates with `POST {base_url}/items/` and lists
//! them with `GET {base_url}/items/?skip=&limit=`.

use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

/// Environment variable holding an optional bearer token for the API.
pub const API_TOKEN_ENV: &str = "PLATE_CONSOLE_API_TOKEN";

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost/api/v1";

/// Default timeout for HTTP requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const HTTP_STATUS_UNAUTHORIZED: u16 = 401;
const HTTP_STATUS_FORBIDDEN: u16 = 403;

/// Trim and upper-case a plate for storage.
pub fn normalize_plate(plate: &str) -> Result<String, StoreError> {
    let trimmed = plate.trim();
    if trimmed.is_empty() {
        return Err(StoreError::EmptyPlate);
    }
    Ok(trimmed.to_uppercase())
}

/// Request body for saving a plate.
#[derive(Debug, Serialize)]
struct CreatePlateRequest {
    plate_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tally_number: Option<String>,
}

/// Identifier of a saved entry; the backend has used both integer and UUID ids.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    Int(i64),
    Text(String),
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Int(id) => write!(f, "{}", id),
            EntryId::Text(id) => write!(f, "{}", id),
        }
    }
}

/// One saved plate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlateEntry {
    pub id: EntryId,
    pub plate_number: String,
    #[serde(default)]
    pub tally_number: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: NaiveDateTime,
}

/// A page of saved plates.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatePage {
    pub data: Vec<PlateEntry>,
    #[serde(default)]
    pub count: u64,
}

/// Accept both naive ISO timestamps and RFC 3339 with an offset.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.naive_utc());
    }
    raw.parse::<NaiveDateTime>()
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
}

/// Client for the saved-plate API.
pub struct PlateStore {
    base_url: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl fmt::Debug for PlateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlateStore")
            .field("base_url", &self.base_url)
            .field("has_token", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl PlateStore {
    /// Create a store client without authentication.
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_token(base_url, None)
    }

    /// Create a store client, reading the token from `PLATE_CONSOLE_API_TOKEN`.
    pub fn from_env(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let token = std::env::var(API_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        Self::with_token(base_url, token)
    }

    pub fn with_token(
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn items_url(&self) -> String {
        format!("{}/items/", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status.as_u16() == HTTP_STATUS_UNAUTHORIZED || status.as_u16() == HTTP_STATUS_FORBIDDEN {
            log::warn!("Plate API rejected credentials: {}", message);
            return Err(StoreError::Unauthorized(message));
        }

        Err(StoreError::ApiError {
            status: status.as_u16(),
            message,
        })
    }

    /// Save a plate. The plate is trimmed and upper-cased first.
    pub async fn save_plate(
        &self,
        plate: &str,
        tally_number: Option<&str>,
    ) -> Result<PlateEntry, StoreError> {
        let plate_number = normalize_plate(plate)?;
        let body = CreatePlateRequest {
            plate_number,
            tally_number: tally_number
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        };

        let request = self.http_client.post(self.items_url()).json(&body);
        let response = self.authorize(request).send().await?;
        let response = Self::check_status(response).await?;
        let entry: PlateEntry = response.json().await?;
        log::info!("Saved plate {} (id {})", entry.plate_number, entry.id);
        Ok(entry)
    }

    /// Fetch one page of saved plates.
    pub async fn list_plates(&self, skip: u64, limit: u64) -> Result<PlatePage, StoreError> {
        let request = self
            .http_client
            .get(self.items_url())
            .query(&[("skip", skip), ("limit", limit)]);
        let response = self.authorize(request).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }
}

/// Errors talking to the saved-plate API.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Plate number is empty")]
    EmptyPlate,

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
}
