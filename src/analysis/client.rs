//! AnalysisClient - handles communication with the screening inference API.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};

use super::result::AnalysisResponse;
use crate::imaging::{Frame, ImageError};
use crate::session::{Patient, ScreeningType};

/// Default base URL of the inference service.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Default timeout for analysis requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// File name of the uploaded image part.
const IMAGE_FILE_NAME: &str = "screening.png";

/// Everything the service needs to analyse one screening.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub screening_type: ScreeningType,
    pub patient: Patient,
    pub image: Frame,
}

/// Client for the screening inference API.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    base_url: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl AnalysisClient {
    /// Create a client for `base_url` with a fixed request timeout.
    ///
    /// A trailing slash on the base URL is ignored.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AnalysisError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| AnalysisError::Client(e.to_string()))?;

        Ok(Self {
            base_url,
            timeout,
            http_client,
        })
    }

    /// Create a client for `base_url` with [`DEFAULT_TIMEOUT`].
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, AnalysisError> {
        Self::new(base_url, DEFAULT_TIMEOUT)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// URL of the analysis endpoint for a screening type.
    pub fn analysis_url(&self, screening_type: ScreeningType) -> String {
        format!("{}/api/{}", self.base_url, screening_type.slug())
    }

    /// URL of a server-side asset such as the annotated result image.
    pub fn asset_url(&self, image_path: &str) -> String {
        format!("{}/api/{}", self.base_url, image_path.trim_start_matches('/'))
    }

    /// Submit one screening for analysis.
    ///
    /// Sends a multipart POST with the patient fields and the image encoded
    /// as PNG. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::ImageEncode` if the frame cannot be encoded,
    /// `AnalysisError::NetworkUnreachable` or `AnalysisError::Timeout` if the
    /// request does not complete, `AnalysisError::ServerError` for a non-2xx
    /// status, or `AnalysisError::MalformedResponse` if the body is not the
    /// expected JSON.
    pub async fn submit(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        let png = request.image.to_png()?;
        let url = self.analysis_url(request.screening_type);

        let image_part = Part::bytes(png)
            .file_name(IMAGE_FILE_NAME)
            .mime_str("image/png")
            .map_err(|e| AnalysisError::Client(e.to_string()))?;
        let form = Form::new()
            .text("name", request.patient.name.clone())
            .text("age", request.patient.age.to_string())
            .text("gender", request.patient.gender.as_str().to_string())
            .part("image", image_part);

        log::info!(
            "Submitting {} screening for {} to {}",
            request.screening_type,
            request.patient.name,
            url
        );

        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::warn!("Analysis request failed with status {}: {}", status, body);
            return Err(AnalysisError::ServerError {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(|e| self.classify(&url, e))?;
        let parsed: AnalysisResponse = serde_json::from_slice(&body).map_err(|e| {
            log::warn!("Analysis response is not valid JSON: {}", e);
            AnalysisError::MalformedResponse(e.to_string())
        })?;

        log::debug!(
            "Analysis returned {} detection(s), image_path={:?}",
            parsed.detections.len(),
            parsed.image_path
        );
        Ok(parsed)
    }

    /// Download a server-side asset (the annotated result image).
    ///
    /// # Errors
    ///
    /// Same classification as [`AnalysisClient::submit`], minus JSON parsing.
    pub async fn download_asset(&self, image_path: &str) -> Result<Vec<u8>, AnalysisError> {
        let url = self.asset_url(image_path);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(&url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AnalysisError::ServerError {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(&url, e))?;
            bytes.extend_from_slice(&chunk);
        }

        log::debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }

    fn classify(&self, url: &str, error: reqwest::Error) -> AnalysisError {
        if error.is_timeout() {
            AnalysisError::Timeout(self.timeout)
        } else if error.is_decode() {
            AnalysisError::MalformedResponse(error.to_string())
        } else {
            AnalysisError::NetworkUnreachable {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// Errors that can occur while talking to the analysis service.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Connection refused, DNS failure, or the transfer broke off
    #[error("Could not reach the analysis server at {url}: {message}")]
    NetworkUnreachable { url: String, message: String },

    #[error("Request timed out after {}s; make sure the analysis server is running and the network is stable", .0.as_secs())]
    Timeout(Duration),

    #[error("Server error (HTTP {status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("Server response is not valid JSON: {0}")]
    MalformedResponse(String),

    #[error("Could not prepare the image: {0}")]
    ImageEncode(#[from] ImageError),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Analysis worker is not running")]
    WorkerStopped,
}
