//! Ledger submission endpoint
//!
//! One collection per `POST {base_url}/collections`, carrying the record id
//! both in the body and as the `Idempotency-Key` header. The ledger treats a
//! repeated id as a no-op success.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LedgerConfig;
use crate::error::{ConfigError, TransientError};
use crate::proof::ProofRef;
use crate::record::{GeoFix, PaymentMethod, PendingCollectionRecord, RecordId};

/// Longest rejection reason kept from a response body
const MAX_REASON_LEN: usize = 200;

/// Wire body of one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub id: RecordId,
    pub client_id: String,
    pub amount: i64,
    pub description: Option<String>,
    pub payment_method: PaymentMethod,
    pub geo: Option<GeoFix>,
    pub collected_at: DateTime<Utc>,
    pub proof_artifact_ref: Option<ProofRef>,
    pub device_id: String,
}

impl SubmissionRequest {
    pub fn from_record(record: &PendingCollectionRecord, device_id: &str) -> Self {
        Self {
            id: record.id.clone(),
            client_id: record.client_id.clone(),
            amount: record.amount,
            description: record.description.clone(),
            payment_method: record.payment_method,
            geo: record.geo,
            collected_at: record.collected_at,
            proof_artifact_ref: record.proof_artifact_ref.clone(),
            device_id: device_id.to_string(),
        }
    }
}

/// Definitive ledger answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerAck {
    /// Recorded, now or by an earlier submission of the same id
    Accepted,
    /// Will never be accepted; resubmitting is pointless
    Rejected { reason: String },
}

/// Remote ledger seam. `Err` means the outcome is unknown and the record must stay queued.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> Result<LedgerAck, TransientError>;
}

/// HTTP client for the ledger API
pub struct HttpLedgerClient {
    config: LedgerConfig,
    client: Client,
}

impl HttpLedgerClient {
    pub fn new(config: LedgerConfig) -> Result<Self, ConfigError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| ConfigError::Invalid(format!("ledger.api_key: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.submit_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("building HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/collections", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit(&self, request: &SubmissionRequest) -> Result<LedgerAck, TransientError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Idempotency-Key", request.id.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransientError::Timeout(Duration::from_secs(self.config.submit_timeout_secs))
                } else {
                    TransientError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        // A body we cannot read only loses the rejection detail
        let body = response.text().await.unwrap_or_default();
        debug!(record_id = %request.id, status = status.as_u16(), "Ledger responded");

        classify_response(status, &body)
    }
}

/// Map an HTTP status to a definitive answer or a transient failure
pub fn classify_response(status: StatusCode, body: &str) -> Result<LedgerAck, TransientError> {
    if status.is_success() || status == StatusCode::CONFLICT {
        return Ok(LedgerAck::Accepted);
    }

    // Auth and throttling failures say nothing about the record itself
    let transient = status.is_server_error() || matches!(status.as_u16(), 401 | 403 | 408 | 425 | 429);

    if transient || !status.is_client_error() {
        return Err(TransientError::Server {
            status: status.as_u16(),
            message: extract_reason(status, body),
        });
    }

    Ok(LedgerAck::Rejected {
        reason: extract_reason(status, body),
    })
}

/// Pull a human-readable reason out of a JSON error body, falling back to raw text
fn extract_reason(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["reason", "message", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return truncate(text);
            }
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return truncate(trimmed);
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_REASON_LEN).collect()
}
