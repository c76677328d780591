//! External result-lookup API client
//!
//! Fallback source for exam results that are not yet in the local directory.
//! Successful payloads are cached; transient failures are retried under an
//! explicit [`RetryPolicy`]. The conversation only consumes success or
//! failure — retry and caching stay inside this module.

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{
    Settings, RESULT_API_INITIAL_BACKOFF_MS, RESULT_API_MAX_ATTEMPTS, RESULT_API_MAX_BACKOFF_MS,
    RESULT_API_TIMEOUT_SECS,
};
use crate::utils::{retry_with_policy_if, RetryPolicy};

/// Failures from the external result service
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    /// The service has no result for this exam number
    #[error("result not found")]
    NotFound,
    /// Network-level failure or timeout; worth retrying
    #[error("result service unreachable: {0}")]
    Unreachable(String),
    /// The service answered with an unexpected status or body
    #[error("result service error: {0}")]
    Service(String),
}

impl LookupError {
    /// Whether a retry could plausibly succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Result payload as the external service reports it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultPayload {
    /// Student name
    #[serde(default)]
    pub name: String,
    /// Exam number
    #[serde(default)]
    pub examno: String,
    /// School name
    #[serde(default)]
    pub school: String,
    /// Governorate
    #[serde(default)]
    pub governorate: String,
    /// Gender label
    #[serde(default)]
    pub gender: String,
    /// Subject name → score
    #[serde(default)]
    pub subjects: BTreeMap<String, Value>,
    /// Total marks
    #[serde(default)]
    pub total: Value,
    /// Final average
    #[serde(default)]
    pub average: Value,
    /// Pass/fail status text
    #[serde(default)]
    pub status: String,
}

/// Lookup contract the conversation consumes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultLookup: Send + Sync {
    /// Fetch the result for an already-validated exam number
    async fn lookup(&self, examno: &str) -> Result<ResultPayload, LookupError>;
}

/// HTTP client for the hosted result service, with response caching
pub struct NajahApiClient {
    http: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
    cache: Cache<String, ResultPayload>,
}

impl NajahApiClient {
    /// Build a client from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(settings: &Settings) -> Result<Self, LookupError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(RESULT_API_TIMEOUT_SECS))
            .build()
            .map_err(|e| LookupError::Service(e.to_string()))?;

        Ok(Self {
            http,
            base_url: settings.result_api_base_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy::from_millis(
                RESULT_API_MAX_ATTEMPTS,
                RESULT_API_INITIAL_BACKOFF_MS,
                RESULT_API_MAX_BACKOFF_MS,
            ),
            cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(Duration::from_secs(settings.cache_ttl_seconds))
                .build(),
        })
    }

    async fn fetch(&self, examno: &str) -> Result<ResultPayload, LookupError> {
        let url = format!("{}/exam-result/{examno}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| LookupError::Unreachable(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => resp
                .json::<ResultPayload>()
                .await
                .map_err(|e| LookupError::Service(e.to_string())),
            reqwest::StatusCode::NOT_FOUND => Err(LookupError::NotFound),
            s => Err(LookupError::Service(format!("status {s}"))),
        }
    }
}

#[async_trait]
impl ResultLookup for NajahApiClient {
    async fn lookup(&self, examno: &str) -> Result<ResultPayload, LookupError> {
        if let Some(cached) = self.cache.get(examno).await {
            debug!("result cache hit for {examno}");
            return Ok(cached);
        }

        info!("fetching result from external service: {examno}");
        let payload = retry_with_policy_if(
            self.policy,
            || self.fetch(examno),
            LookupError::is_transient,
        )
        .await?;

        self.cache.insert(examno.to_string(), payload.clone()).await;
        Ok(payload)
    }
}
