use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, instrument};

use shared_models::{DetectOptions, DetectorError, ShiftCandidate};

use crate::collaborators::ShiftDetector;

/// Accepts both a bare array and `{"candidates": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DetectorResponse {
    List(Vec<ShiftCandidate>),
    Wrapped { candidates: Vec<ShiftCandidate> },
}

impl DetectorResponse {
    fn into_candidates(self) -> Vec<ShiftCandidate> {
        match self {
            DetectorResponse::List(candidates) | DetectorResponse::Wrapped { candidates } => candidates,
        }
    }
}

/// Shift detector reached over HTTP: `GET {base}/shifts?limit=&lookback_hours=`.
pub struct HttpShiftDetector {
    client: Client,
    base_url: String,
}

impl HttpShiftDetector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DetectorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectorError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ShiftDetector for HttpShiftDetector {
    #[instrument(skip(self))]
    async fn detect(&self, options: DetectOptions) -> Result<Vec<ShiftCandidate>, DetectorError> {
        let url = format!("{}/shifts", self.base_url);
        let lookback_hours = (options.lookback.as_secs() / 3600).max(1);
        debug!("Requesting shift candidates from {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("limit", options.limit.to_string()),
                ("lookback_hours", lookback_hours.to_string()),
            ])
            .send()
            .await
            .map_err(|e| DetectorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Shift detector error ({}): {}", status, body);
            return Err(DetectorError::Unavailable(format!("status {}", status)));
        }

        let payload: DetectorResponse = response
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;
        let mut candidates = payload.into_candidates();
        candidates.truncate(options.limit);
        Ok(candidates)
    }
}
