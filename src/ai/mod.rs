//! External inference provider integration
//!
//! Submits image-to-image restyling requests and reads back their status.
//! Clients never retry; retry policy belongs to the caller.

pub mod client;
pub mod mock;
pub mod types;

pub use client::ReplicateClient;
pub use mock::MockInferenceClient;

use crate::models::ModelParams;
use crate::Result;
use async_trait::async_trait;

/// Handle to an accepted external job. Only valid for that one job and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedRequest {
    pub prediction_id: Option<String>,
    pub poll_url: String,
}

/// Successful result of a submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Accepted; the result has to be polled for.
    Pending(SubmittedRequest),
    /// Output returned synchronously.
    Succeeded(String),
    /// Accepted and ran, but the provider reported failure in the same call.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    Pending,
    Succeeded(String),
    Failed(String),
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Any `Err` is a dispatch failure: network error, non-2xx response, or
    /// malformed payload.
    async fn submit(
        &self,
        image_url: &str,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<Submission>;

    /// Any `Err` is a poll failure for this single attempt.
    async fn poll_once(&self, request: &SubmittedRequest) -> Result<InferenceOutcome>;
}
