//! External service collaborators: identity, charts, and play records.
//!
//! Trait seams so tests can inject deterministic implementations; the
//! production implementation is a thin HTTP client against the configured
//! service base URL.

use async_trait::async_trait;
use serde::Deserialize;

/// Profile returned by the identity service for a valid token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProfile {
    /// External account id.
    pub id: i32,
    /// Display name.
    pub name: String,
    /// Preferred language, BCP-47-ish.
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_owned()
}

/// Chart metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartInfo {
    /// Chart id.
    pub id: i32,
    /// Chart display name.
    pub name: String,
}

/// Uploaded play record summary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordInfo {
    /// Final score.
    #[serde(default)]
    pub score: i32,
    /// Accuracy in `[0, 1]`.
    #[serde(default)]
    pub accuracy: f32,
    /// Whether the run was a full combo.
    #[serde(default)]
    pub full_combo: bool,
}

/// Failures talking to an external service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The service rejected the credentials (401).
    #[error("unauthorized")]
    Unauthorized,

    /// The requested entity does not exist (404).
    #[error("not found")]
    NotFound,

    /// Transport failure or unexpected response.
    #[error("service error: {0}")]
    Other(String),
}

/// Token resolver.
#[async_trait]
pub trait IdentityService: Send + Sync + 'static {
    /// Resolve a bearer token into a profile.
    async fn me(&self, token: &str) -> Result<IdentityProfile, ServiceError>;
}

/// Chart and record resolver.
#[async_trait]
pub trait ChartService: Send + Sync + 'static {
    /// Resolve chart metadata by id.
    async fn chart(&self, id: i32) -> Result<ChartInfo, ServiceError>;

    /// Resolve an uploaded record summary by id.
    async fn record(&self, id: i32) -> Result<RecordInfo, ServiceError>;
}

/// HTTP implementation of both services against one base URL.
///
/// - `GET {base}/me` with `Authorization: Bearer <token>`
/// - `GET {base}/chart/<id>`
/// - `GET {base}/record/<id>`
#[derive(Debug, Clone)]
pub struct HttpServices {
    base: String,
    client: reqwest::Client,
}

impl HttpServices {
    /// Client against the given base URL (no trailing slash).
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into(), client: reqwest::Client::new() }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        bearer: Option<&str>,
    ) -> Result<T, ServiceError> {
        let mut req = self.client.get(format!("{}{path}", self.base));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| ServiceError::Other(e.to_string()))?;
        match resp.status() {
            reqwest::StatusCode::UNAUTHORIZED => Err(ServiceError::Unauthorized),
            reqwest::StatusCode::NOT_FOUND => Err(ServiceError::NotFound),
            status if status.is_success() => {
                resp.json().await.map_err(|e| ServiceError::Other(e.to_string()))
            },
            status => Err(ServiceError::Other(format!("unexpected status {status}"))),
        }
    }
}

#[async_trait]
impl IdentityService for HttpServices {
    async fn me(&self, token: &str) -> Result<IdentityProfile, ServiceError> {
        self.get_json("/me", Some(token)).await
    }
}

#[async_trait]
impl ChartService for HttpServices {
    async fn chart(&self, id: i32) -> Result<ChartInfo, ServiceError> {
        self.get_json(&format!("/chart/{id}"), None).await
    }

    async fn record(&self, id: i32) -> Result<RecordInfo, ServiceError> {
        self.get_json(&format!("/record/{id}"), None).await
    }
}
