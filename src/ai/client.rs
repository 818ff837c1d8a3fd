use super::types::{
    Prediction, PredictionInput, PredictionRequest, PredictionStatus, ProviderErrorBody,
};
use super::{InferenceOutcome, InferenceService, Submission, SubmittedRequest};
use crate::models::{ModelParams, DEFAULT_API_BASE, DEFAULT_SUBMIT_WAIT};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;

/// HTTP client for the Replicate predictions API.
pub struct ReplicateClient {
    client: Client,
    api_token: String,
    base_url: String,
    submit_wait: Duration,
}

impl ReplicateClient {
    pub fn new(api_token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new_with_client(api_token, client))
    }

    pub fn new_with_client(api_token: String, client: Client) -> Self {
        Self {
            client,
            api_token,
            base_url: DEFAULT_API_BASE.to_string(),
            submit_wait: DEFAULT_SUBMIT_WAIT,
        }
    }

    /// Bound how long the provider may hold a submit open. Keep this below
    /// the HTTP client timeout.
    pub fn with_submit_wait(mut self, wait: Duration) -> Self {
        self.submit_wait = wait;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn read_prediction(response: Response, action: &str) -> Result<Prediction> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            let detail = serde_json::from_str::<ProviderErrorBody>(&error_text)
                .ok()
                .and_then(|body| body.detail)
                .unwrap_or(error_text);
            tracing::error!("Replicate {} error (status {}): {}", action, status, detail);
            return Err(Error::AiProvider(format!(
                "Replicate {} error (status {}): {}",
                action, status, detail
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse Replicate {} response: {}\nBody: {}", action, e, body);
            Error::AiProvider(format!("Failed to parse Replicate {} response: {}", action, e))
        })
    }
}

#[async_trait]
impl InferenceService for ReplicateClient {
    async fn submit(
        &self,
        image_url: &str,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<Submission> {
        let request = PredictionRequest {
            version: params.model_version.clone(),
            input: PredictionInput {
                image: image_url.to_string(),
                prompt: prompt.to_string(),
                negative_prompt: params.negative_prompt.clone(),
                num_outputs: params.num_outputs,
                guidance_scale: params.guidance_scale,
                prompt_strength: params.prompt_strength,
                num_inference_steps: params.num_inference_steps,
                scheduler: params.scheduler.clone(),
            },
        };

        tracing::debug!("Submitting prediction to Replicate");

        let url = format!("{}/predictions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", format!("wait={}", self.submit_wait.as_secs()))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send prediction to Replicate: {}", e);
                e
            })?;

        let prediction = Self::read_prediction(response, "submit").await?;

        match prediction.status {
            PredictionStatus::Succeeded => {
                if let Some(output) = prediction.output_url() {
                    return Ok(Submission::Succeeded(output.to_string()));
                }
            }
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                return Ok(Submission::Failed(prediction.error_message()));
            }
            _ => {}
        }

        if let Some(poll_url) = prediction.poll_url() {
            return Ok(Submission::Pending(SubmittedRequest {
                prediction_id: prediction.id.clone(),
                poll_url: poll_url.to_string(),
            }));
        }

        match prediction.output_url() {
            Some(output) => Ok(Submission::Succeeded(output.to_string())),
            None => Err(Error::AiProvider(
                "No prediction URL returned".to_string(),
            )),
        }
    }

    async fn poll_once(&self, request: &SubmittedRequest) -> Result<InferenceOutcome> {
        let response = self
            .client
            .get(&request.poll_url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let prediction = Self::read_prediction(response, "poll").await?;

        match prediction.status {
            PredictionStatus::Succeeded => prediction
                .output_url()
                .map(|output| InferenceOutcome::Succeeded(output.to_string()))
                .ok_or_else(|| {
                    Error::AiProvider("Prediction succeeded without output".to_string())
                }),
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                Ok(InferenceOutcome::Failed(prediction.error_message()))
            }
            PredictionStatus::Starting
            | PredictionStatus::Processing
            | PredictionStatus::Unknown => Ok(InferenceOutcome::Pending),
        }
    }
}
