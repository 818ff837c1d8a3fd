//! Replicate predictions API payloads.

use serde::{Deserialize, Serialize};

/// Request body for `POST /predictions`.
#[derive(Debug, Serialize)]
pub struct PredictionRequest {
    pub version: String,
    pub input: PredictionInput,
}

#[derive(Debug, Serialize)]
pub struct PredictionInput {
    pub image: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub num_outputs: u32,
    pub guidance_scale: f64,
    pub prompt_strength: f64,
    pub num_inference_steps: u32,
    pub scheduler: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Output is a single URL or a list of URLs depending on the model.
///
/// Variant order matters for `#[serde(untagged)]` decoding.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PredictionOutput {
    Single(String),
    Many(Vec<String>),
}

impl PredictionOutput {
    pub fn first_url(&self) -> Option<&str> {
        let url = match self {
            PredictionOutput::Single(url) => Some(url.as_str()),
            PredictionOutput::Many(urls) => urls.first().map(String::as_str),
        };
        url.filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionUrls {
    pub get: Option<String>,
}

/// Prediction object returned by both submit and poll calls.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: Option<String>,
    #[serde(default)]
    pub status: PredictionStatus,
    #[serde(default)]
    pub urls: Option<PredictionUrls>,
    #[serde(default)]
    pub output: Option<PredictionOutput>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Prediction {
    pub fn poll_url(&self) -> Option<&str> {
        self.urls
            .as_ref()
            .and_then(|urls| urls.get.as_deref())
            .filter(|url| !url.is_empty())
    }

    pub fn output_url(&self) -> Option<&str> {
        self.output.as_ref().and_then(PredictionOutput::first_url)
    }

    pub fn error_message(&self) -> String {
        match &self.error {
            Some(serde_json::Value::String(message)) => message.clone(),
            Some(serde_json::Value::Null) | None => "Prediction failed".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ProviderErrorBody {
    pub detail: Option<String>,
}
