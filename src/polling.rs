//! Fixed-cadence polling of a submitted inference request.
//!
//! The deadline is the only circuit breaker: a failed poll attempt counts as
//! still pending and the retry loop keeps going until the deadline elapses.

use crate::ai::{InferenceOutcome, InferenceService, SubmittedRequest};
use crate::models::PollSettings;
use tokio::time;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, info, warn};

/// Terminal result of a poll loop. Timing out is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded(String),
    Failed(String),
    TimedOut,
}

/// Retryable result of one poll attempt.
#[derive(Debug)]
struct NotReady;

#[derive(Debug, Clone, Copy)]
pub struct PollingCoordinator {
    settings: PollSettings,
}

impl PollingCoordinator {
    pub fn new(settings: PollSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll `request` once per interval until it resolves or the deadline
    /// passes. The first attempt is immediate.
    pub async fn await_outcome(
        &self,
        client: &dyn InferenceService,
        request: &SubmittedRequest,
    ) -> PollOutcome {
        let label = request.prediction_id.as_deref().unwrap_or("prediction");
        let retry_strategy = FixedInterval::new(self.settings.interval);
        let mut attempt: u32 = 0;

        let poll_loop = Retry::spawn(retry_strategy, || {
            attempt += 1;
            let attempt = attempt;
            async move {
                match client.poll_once(request).await {
                    Ok(InferenceOutcome::Succeeded(output)) => {
                        info!("[{}] Succeeded after {} poll(s)", label, attempt);
                        Ok(PollOutcome::Succeeded(output))
                    }
                    Ok(InferenceOutcome::Failed(reason)) => {
                        warn!("[{}] Provider reported failure: {}", label, reason);
                        Ok(PollOutcome::Failed(reason))
                    }
                    Ok(InferenceOutcome::Pending) => {
                        debug!("[{}] Still pending (poll {})", label, attempt);
                        Err(NotReady)
                    }
                    Err(e) => {
                        warn!("[{}] Poll {} errored, treating as pending: {}", label, attempt, e);
                        Err(NotReady)
                    }
                }
            }
        });

        match time::timeout(self.settings.deadline, poll_loop).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(NotReady)) | Err(_) => {
                warn!(
                    "[{}] No result within {:?}, leaving it to status polling",
                    label, self.settings.deadline
                );
                PollOutcome::TimedOut
            }
        }
    }
}

impl Default for PollingCoordinator {
    fn default() -> Self {
        Self::new(PollSettings::default())
    }
}
