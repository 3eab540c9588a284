//! Content scoring oracle client
//!
//! The threat classifier itself is an external service; this module owns the
//! transport: bounded concurrency, exponential backoff on transient failures,
//! and a hard timeout enforced by the caller (`analyzer`).

use crate::analyzer::ContentType;
use crate::{Result, ShroudError};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Raw verdict returned by the scoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleScore {
    /// Named violations with per-violation confidence in [0,1].
    pub violations: Vec<(String, f32)>,
    pub raw_score: f32,
}

/// External classification oracle. Must be idempotent for identical input.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    async fn score(&self, content: &str, content_type: ContentType) -> Result<OracleScore>;
}

/// Configuration for the HTTP scoring oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// API key
    pub api_key: String,
    /// Model identifier passed through to the service
    pub model: String,
    /// Maximum concurrent API calls
    pub max_concurrent_calls: usize,
    /// Per-request transport timeout
    pub timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.scoring.example/v1/classify".to_string(),
            api_key: String::new(),
            model: "content-guard-2".to_string(),
            max_concurrent_calls: 5,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    model: &'a str,
    content: &'a str,
    content_type: &'a str,
}

#[derive(Deserialize)]
struct ScoreResponse {
    violations: Vec<ViolationEntry>,
    raw_score: f32,
}

#[derive(Deserialize)]
struct ViolationEntry {
    name: String,
    confidence: f32,
}

/// HTTP client for the scoring service.
pub struct HttpScoringOracle {
    client: Client,
    config: OracleConfig,
    semaphore: Arc<Semaphore>,
}

impl HttpScoringOracle {
    pub fn new(config: OracleConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_calls));
        Ok(Self {
            client,
            config,
            semaphore,
        })
    }

    async fn call(&self, request: &ScoreRequest<'_>) -> Result<ScoreResponse> {
        debug!("scoring oracle call");

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ShroudError::Oracle(format!(
                "oracle error {}: {}",
                status, body
            )));
        }

        let parsed: ScoreResponse = response.json().await?;
        Ok(parsed)
    }
}

#[async_trait]
impl ScoringOracle for HttpScoringOracle {
    async fn score(&self, content: &str, content_type: ContentType) -> Result<OracleScore> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ShroudError::Other(format!("semaphore error: {}", e)))?;

        let request = ScoreRequest {
            model: &self.config.model,
            content,
            content_type: content_type.as_str(),
        };

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.timeout),
            ..Default::default()
        };

        let response = retry(backoff, || async {
            self.call(&request).await.map_err(|e| match e {
                ShroudError::Http(_) => backoff::Error::transient(e),
                other => backoff::Error::permanent(other),
            })
        })
        .await?;

        Ok(OracleScore {
            violations: response
                .violations
                .into_iter()
                .map(|v| (v.name, v.confidence.clamp(0.0, 1.0)))
                .collect(),
            raw_score: response.raw_score,
        })
    }
}
