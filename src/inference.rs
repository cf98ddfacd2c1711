//! Client for the external model endpoint.
//!
//! A window's feature vector is sent as a single-row table and the endpoint
//! answers with one scalar prediction. The request and response shapes are
//! always available; the HTTP clients need the `inference` feature.

use crate::core::features::{FeatureNaming, FeatureVector};
use crate::core::payload::InferenceRow;
use serde::Serialize;

pub use crate::config::InferenceConfig;

/// Inference error types.
#[derive(Debug)]
pub enum InferenceError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Endpoint returned an error response
    Server { status: u16, message: String },
    /// JSON serialization error
    Serialization(String),
    /// Endpoint answered without a usable prediction
    InvalidResponse(String),
}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceError::Config(msg) => write!(f, "Inference config error: {msg}"),
            InferenceError::Network(msg) => write!(f, "Inference network error: {msg}"),
            InferenceError::Server { status, message } => {
                write!(f, "Inference server error ({status}): {message}")
            }
            InferenceError::Serialization(msg) => {
                write!(f, "Inference serialization error: {msg}")
            }
            InferenceError::InvalidResponse(msg) => {
                write!(f, "Inference response error: {msg}")
            }
        }
    }
}

impl std::error::Error for InferenceError {}

/// Something that turns a feature row into one scalar prediction.
pub trait Predictor {
    fn predict(&self, row: &InferenceRow) -> Result<f64, InferenceError>;
}

/// Request body for the scoring endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringRequest {
    pub input_data: ScoringTable,
}

/// Single-row table in split orientation.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringTable {
    pub columns: Vec<String>,
    pub index: Vec<u32>,
    pub data: Vec<Vec<f64>>,
}

impl ScoringRequest {
    /// Build the request for one feature vector.
    pub fn new(features: &FeatureVector, naming: FeatureNaming) -> Self {
        Self {
            input_data: ScoringTable {
                columns: FeatureVector::names(naming),
                index: vec![0],
                data: vec![features.values()],
            },
        }
    }
}

/// Extract the prediction from a response body.
///
/// Accepts a JSON array (first element is the prediction) or a bare number.
pub fn parse_prediction(body: &serde_json::Value) -> Result<f64, InferenceError> {
    let value = match body {
        serde_json::Value::Array(items) => items
            .first()
            .ok_or_else(|| InferenceError::InvalidResponse("empty prediction array".to_string()))?,
        other => other,
    };

    value.as_f64().ok_or_else(|| {
        InferenceError::InvalidResponse(format!("prediction is not a number: {value}"))
    })
}

/// Async client for the scoring endpoint.
#[cfg(feature = "inference")]
pub struct InferenceClient {
    config: InferenceConfig,
    naming: FeatureNaming,
    client: reqwest::Client,
}

#[cfg(feature = "inference")]
impl InferenceClient {
    /// Create a new client.
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        if !config.is_configured() {
            return Err(InferenceError::Config(
                "endpoint URL is not configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| InferenceError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            naming: FeatureNaming::default(),
            client,
        })
    }

    /// Create a client from `AML_ENDPOINT_URL` and `AML_PRIMARY_KEY`.
    pub fn from_env() -> Result<Self, InferenceError> {
        let config =
            InferenceConfig::from_env().map_err(|e| InferenceError::Config(e.to_string()))?;
        Self::new(config)
    }

    /// Column naming the deployed model was trained with.
    pub fn with_naming(mut self, naming: FeatureNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Score one feature row.
    pub async fn predict(&self, row: &InferenceRow) -> Result<f64, InferenceError> {
        let request = ScoringRequest::new(&row.features, self.naming);

        let mut builder = self
            .client
            .post(&self.config.endpoint_url)
            .header("Content-Type", "application/json")
            .json(&request);
        if !self.config.primary_key.is_empty() {
            builder = builder.header(
                "Authorization",
                format!("Bearer {}", self.config.primary_key),
            );
        }

        let response = builder
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(InferenceError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Serialization(e.to_string()))?;

        let prediction = parse_prediction(&body)?;
        tracing::debug!(
            device_id = %row.device_id,
            window_timestamp_ms = row.window_timestamp_ms,
            prediction,
            "Received prediction"
        );
        Ok(prediction)
    }

    pub fn endpoint_url(&self) -> &str {
        &self.config.endpoint_url
    }
}

/// Blocking client for use in synchronous contexts.
#[cfg(feature = "inference")]
pub struct BlockingInferenceClient {
    inner: InferenceClient,
    runtime: tokio::runtime::Runtime,
}

#[cfg(feature = "inference")]
impl BlockingInferenceClient {
    /// Create a new blocking client.
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| InferenceError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: InferenceClient::new(config)?,
            runtime,
        })
    }

    /// Create a blocking client from the environment.
    pub fn from_env() -> Result<Self, InferenceError> {
        let config =
            InferenceConfig::from_env().map_err(|e| InferenceError::Config(e.to_string()))?;
        Self::new(config)
    }

    pub fn with_naming(mut self, naming: FeatureNaming) -> Self {
        self.inner = self.inner.with_naming(naming);
        self
    }
}

#[cfg(feature = "inference")]
impl Predictor for BlockingInferenceClient {
    fn predict(&self, row: &InferenceRow) -> Result<f64, InferenceError> {
        self.runtime.block_on(self.inner.predict(row))
    }
}
