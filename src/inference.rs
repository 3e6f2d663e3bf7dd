//! Inference collaborator
//!
//! The prediction endpoint accepts one image as multipart field `file` and
//! answers `{"class": "...", "confidence": 0.97}` (newer deployments send
//! `label` instead of `class`). Failures carry a `{"detail": "..."}` body.

use std::time::Duration;

use serde::Deserialize;

use crate::config::InferenceConfig;
use crate::error::{LeafscanError, Result};
use crate::pipeline::{MediaFile, PredictionResult};
use crate::session::client::error_detail;

/// Classifies a single image.
///
/// `credential`, when present, is sent as a bearer token. Whether anonymous
/// requests are accepted is up to the service.
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync + std::fmt::Debug {
    /// Submits `file` and decodes the classification.
    ///
    /// # Errors
    ///
    /// - [`LeafscanError::Network`] on transport failure
    /// - [`LeafscanError::Inference`] on an error status or undecodable body
    /// - [`LeafscanError::SessionExpired`] when the service rejects the credential
    async fn classify(
        &self,
        file: &MediaFile,
        credential: Option<&str>,
    ) -> Result<PredictionResult>;
}

#[derive(Debug, Deserialize)]
struct PredictionBody {
    #[serde(alias = "class")]
    label: String,
    confidence: f64,
}

/// HTTP implementation of [`InferenceClient`].
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    predict_url: String,
}

impl HttpInferenceClient {
    /// Creates a client for the endpoint described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LeafscanError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LeafscanError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Initialized inference client: url={}", config.predict_url);

        Ok(Self {
            client,
            predict_url: config.predict_url.clone(),
        })
    }

    /// Prediction endpoint URL
    pub fn predict_url(&self) -> &str {
        &self.predict_url
    }
}

#[async_trait::async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn classify(
        &self,
        file: &MediaFile,
        credential: Option<&str>,
    ) -> Result<PredictionResult> {
        let part = reqwest::multipart::Part::bytes(file.bytes().to_vec())
            .file_name(file.name().to_string())
            .mime_str(file.content_type())
            .map_err(|e| LeafscanError::Inference(format!("invalid content type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self.client.post(&self.predict_url).multipart(form);
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        tracing::debug!(
            file = file.name(),
            authenticated = credential.is_some(),
            "POST {}",
            self.predict_url
        );

        let response = request
            .send()
            .await
            .map_err(|e| LeafscanError::Network(format!("prediction request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(&response.text().await.unwrap_or_default());
            tracing::error!("Inference service returned error {}: {}", status, detail);
            return Err(match status.as_u16() {
                401 | 403 if credential.is_some() => LeafscanError::SessionExpired(detail),
                code => LeafscanError::Inference(format!("status {}: {}", code, detail)),
            }
            .into());
        }

        let body: PredictionBody = response
            .json()
            .await
            .map_err(|e| LeafscanError::Inference(format!("malformed prediction: {}", e)))?;

        tracing::info!("Prediction: {}, confidence: {}", body.label, body.confidence);
        Ok(PredictionResult::new(body.label, body.confidence)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_body_accepts_class_or_label() {
        let from_class: PredictionBody =
            serde_json::from_str(r#"{"class": "Healthy", "confidence": 0.97}"#).unwrap();
        assert_eq!(from_class.label, "Healthy");

        let from_label: PredictionBody =
            serde_json::from_str(r#"{"label": "Late Blight", "confidence": 0.5}"#).unwrap();
        assert_eq!(from_label.label, "Late Blight");
    }

    #[test]
    fn test_new_keeps_url() {
        let client = HttpInferenceClient::new(&InferenceConfig::default()).unwrap();
        assert_eq!(client.predict_url(), "http://localhost:8000/predict");
    }
}
