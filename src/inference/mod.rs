//! Stem separation delegation
//!
//! The server never separates audio itself; it forwards the request to
//! an external inference backend and passes the result through. The
//! backend may be slow, may fail, and its output shape varies, so the
//! only obligations here are a bounded timeout, faithful error
//! surfacing, and never conflating "no separation performed" with a
//! real separation result.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Which stem(s) to extract
pub type StemKind = String;

/// Outcome of a separation request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SeparationOutcome {
    /// The backend produced distinct output(s)
    Separated {
        outputs: Vec<String>,
        #[serde(rename = "type")]
        stem: StemKind,
    },
    /// The backend returned the input unchanged; no separation happened
    Passthrough {
        output: String,
        #[serde(rename = "type")]
        stem: StemKind,
    },
}

/// Stem separation backend
#[async_trait]
pub trait Separator: Send + Sync {
    async fn separate(&self, audio_url: &str, stem: &str) -> Result<SeparationOutcome, AppError>;
}

// ============================================================================
// HTTP Backend
// ============================================================================

#[derive(Serialize)]
struct BackendRequest<'a> {
    audio_url: &'a str,
    #[serde(rename = "type")]
    stem: &'a str,
}

#[derive(Deserialize)]
struct BackendResponse {
    status: String,
    /// Single URL or list, depending on the backend
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Delegates to a JSON-over-HTTP inference endpoint
pub struct HttpSeparator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSeparator {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Inference client: {}", e)))?;

        Ok(Self { client, endpoint })
    }

    fn outputs_from(value: serde_json::Value) -> Vec<String> {
        match value {
            serde_json::Value::String(url) => vec![url],
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Separator for HttpSeparator {
    async fn separate(&self, audio_url: &str, stem: &str) -> Result<SeparationOutcome, AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&BackendRequest { audio_url, stem })
            .send()
            .await
            .map_err(|e| AppError::Inference(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Inference(format!(
                "Backend returned {}: {}",
                status, body
            )));
        }

        let parsed: BackendResponse = response
            .json()
            .await
            .map_err(|e| AppError::Inference(format!("Unreadable response: {}", e)))?;

        if let Some(message) = parsed.error {
            return Err(AppError::Inference(message));
        }
        if parsed.status == "error" {
            return Err(AppError::Inference("Backend reported failure".to_string()));
        }

        let outputs = parsed.output.map(Self::outputs_from).unwrap_or_default();
        if outputs.is_empty() {
            return Err(AppError::Inference("Backend returned no output".to_string()));
        }

        // A backend that echoes the input URL has not separated anything.
        // Report that honestly instead of a generic "completed".
        if outputs.len() == 1 && outputs[0] == audio_url {
            return Ok(SeparationOutcome::Passthrough {
                output: outputs.into_iter().next().unwrap_or_default(),
                stem: stem.to_string(),
            });
        }

        Ok(SeparationOutcome::Separated {
            outputs,
            stem: stem.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_from_string_and_array() {
        let single = HttpSeparator::outputs_from(serde_json::json!("https://x/a.mp3"));
        assert_eq!(single, vec!["https://x/a.mp3"]);

        let multi = HttpSeparator::outputs_from(serde_json::json!([
            "https://x/vocals.mp3",
            "https://x/drums.mp3"
        ]));
        assert_eq!(multi.len(), 2);

        let junk = HttpSeparator::outputs_from(serde_json::json!(42));
        assert!(junk.is_empty());
    }

    #[test]
    fn test_outcome_serialization_keeps_statuses_distinct() {
        let separated = SeparationOutcome::Separated {
            outputs: vec!["https://x/vocals.mp3".to_string()],
            stem: "vocals".to_string(),
        };
        let passthrough = SeparationOutcome::Passthrough {
            output: "https://x/a.mp3".to_string(),
            stem: "vocals".to_string(),
        };

        let s = serde_json::to_value(&separated).unwrap();
        let p = serde_json::to_value(&passthrough).unwrap();

        assert_eq!(s["status"], "separated");
        assert_eq!(p["status"], "passthrough");
    }
}
