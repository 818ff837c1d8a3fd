//! Generation orchestration: reserve a credit, dispatch, poll, reconcile.
//!
//! A request moves through: validate, check balance, create the job, debit,
//! dispatch, poll. A dispatch failure is the only path that refunds. A job the
//! provider accepted and then failed keeps its debit, and a poll timeout leaves
//! the job `processing` for the client to follow up through status lookups.

use crate::ai::{InferenceService, ReplicateClient, Submission};
use crate::error::GenerationError;
use crate::ledger::CreditLedger;
use crate::models::{
    Config, GenerateRequest, GenerationOutcome, JobStatus, ModelParams, NewJob, PollSettings,
};
use crate::polling::{PollOutcome, PollingCoordinator};
use crate::prompts;
use crate::store::JobStore;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEMO_MESSAGE: &str = "Demo mode - showing original image";
const DISPATCH_FAILED_MESSAGE: &str = "AI generation failed. Please try again.";
const EXECUTION_FAILED_MESSAGE: &str = "AI generation failed while processing the image.";

/// Coordinates the ledger, job store, and inference provider for one request.
pub struct GenerationOrchestrator {
    ledger: Arc<dyn CreditLedger>,
    store: Arc<dyn JobStore>,
    inference: Option<Arc<dyn InferenceService>>,
    poller: PollingCoordinator,
    model: ModelParams,
}

/// Injectable collaborator bundle used to construct [`GenerationOrchestrator`].
pub struct OrchestratorServices {
    pub ledger: Arc<dyn CreditLedger>,
    pub store: Arc<dyn JobStore>,
    /// `None` runs in demo mode: jobs complete with the original image.
    pub inference: Option<Arc<dyn InferenceService>>,
}

struct ValidRequest {
    image_url: String,
    style: String,
    room_type: String,
    user_id: String,
}

fn validate(request: GenerateRequest) -> std::result::Result<ValidRequest, GenerationError> {
    fn present(value: Option<String>) -> Option<String> {
        value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    let image_url = present(request.image_url);
    let style = present(request.style);
    let room_type = present(request.room_type);
    let user_id = present(request.user_id);

    match (image_url, style, room_type, user_id) {
        (Some(image_url), Some(style), Some(room_type), Some(user_id)) => Ok(ValidRequest {
            image_url,
            style,
            room_type,
            user_id,
        }),
        (image_url, style, room_type, user_id) => {
            let missing: Vec<&str> = [
                ("imageUrl", image_url.is_none()),
                ("style", style.is_none()),
                ("roomType", room_type.is_none()),
                ("userId", user_id.is_none()),
            ]
            .iter()
            .filter(|(_, missing)| *missing)
            .map(|(name, _)| *name)
            .collect();
            Err(GenerationError::InvalidRequest(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

impl GenerationOrchestrator {
    /// Build an orchestrator from concrete collaborators.
    pub fn with_services(
        services: OrchestratorServices,
        model: ModelParams,
        poll: PollSettings,
    ) -> Self {
        Self {
            ledger: services.ledger,
            store: services.store,
            inference: services.inference,
            poller: PollingCoordinator::new(poll),
            model,
        }
    }

    /// Build an orchestrator whose provider client comes from `config`.
    pub fn from_config(
        config: &Config,
        ledger: Arc<dyn CreditLedger>,
        store: Arc<dyn JobStore>,
    ) -> Result<Self> {
        let inference: Option<Arc<dyn InferenceService>> = match &config.replicate_api_token {
            Some(token) => {
                info!(
                    "Inference provider: Replicate (model version: {})",
                    config.model.model_version
                );
                let client = ReplicateClient::new(token.clone(), config.provider_timeout)?
                    .with_base_url(config.replicate_api_base.clone())
                    .with_submit_wait(config.submit_wait);
                Some(Arc::new(client))
            }
            None => {
                warn!("REPLICATE_API_TOKEN not configured, running in demo mode");
                None
            }
        };

        Ok(Self::with_services(
            OrchestratorServices {
                ledger,
                store,
                inference,
            },
            config.model.clone(),
            config.poll,
        ))
    }

    pub fn is_demo_mode(&self) -> bool {
        self.inference.is_none()
    }

    /// Run one generation request to completion, failure, or poll timeout.
    pub async fn generate(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<GenerationOutcome, GenerationError> {
        let ValidRequest {
            image_url,
            style,
            room_type,
            user_id,
        } = validate(request)?;

        let balance = self.ledger.balance(&user_id).await.map_err(|e| {
            warn!("Balance lookup failed for {}: {}", user_id, e);
            GenerationError::from(e)
        })?;
        if balance == 0 {
            info!("Rejecting generation for {}: no credits left", user_id);
            return Err(GenerationError::InsufficientCredit(
                "Insufficient credits".to_string(),
            ));
        }

        if !prompts::is_known_style(&style) || !prompts::is_known_room(&room_type) {
            debug!(
                "Unrecognized style/room '{}' / '{}', using prompt defaults",
                style, room_type
            );
        }
        let prompt = prompts::build_prompt(&style, &room_type);

        let job = self
            .store
            .create(NewJob {
                user_id: user_id.clone(),
                original_image_url: image_url.clone(),
                style,
                room_type,
                prompt,
            })
            .await
            .map_err(|e| {
                error!("Failed to create generation record: {}", e);
                GenerationError::Internal("Failed to create generation record".to_string())
            })?;
        info!(
            "[{}] Created generation for {} ({} / {})",
            job.id, user_id, job.style, job.room_type
        );

        match self.ledger.debit(&user_id, job.id).await {
            Ok(remaining) => info!("[{}] Reserved 1 credit ({} remaining)", job.id, remaining),
            Err(e) => {
                // Lost a race since the balance check; nothing was charged.
                warn!("[{}] Credit reservation failed: {}", job.id, e);
                self.mark_failed(job.id).await;
                return Err(GenerationError::from(e));
            }
        }

        let Some(inference) = &self.inference else {
            warn!("[{}] No provider configured, returning demo response", job.id);
            let mut outcome = self.complete(job.id, image_url).await?;
            outcome.message = Some(DEMO_MESSAGE.to_string());
            return Ok(outcome);
        };

        let submission = match inference.submit(&image_url, &job.prompt, &self.model).await {
            Ok(submission) => submission,
            Err(e) => {
                error!("[{}] Dispatch failed: {}", job.id, e);
                return Err(self.compensate_dispatch_failure(job.id, &user_id).await);
            }
        };

        let handle = match submission {
            Submission::Succeeded(output) => {
                info!("[{}] Provider returned output synchronously", job.id);
                return self.complete(job.id, output).await;
            }
            Submission::Failed(reason) => {
                warn!("[{}] Provider rejected the job: {}", job.id, reason);
                return Err(self.fail_after_execution(job.id).await);
            }
            Submission::Pending(handle) => handle,
        };

        info!(
            "[{}] Prediction accepted, polling every {:?} for up to {:?}",
            job.id,
            self.poller.settings().interval,
            self.poller.settings().deadline
        );

        match self.poller.await_outcome(inference.as_ref(), &handle).await {
            PollOutcome::Succeeded(output) => self.complete(job.id, output).await,
            PollOutcome::Failed(_) => Err(self.fail_after_execution(job.id).await),
            PollOutcome::TimedOut => {
                info!("[{}] Still processing after deadline", job.id);
                Ok(GenerationOutcome::processing(job.id))
            }
        }
    }

    async fn complete(
        &self,
        job_id: Uuid,
        output_url: String,
    ) -> std::result::Result<GenerationOutcome, GenerationError> {
        let job = self
            .store
            .update(job_id, JobStatus::Completed, Some(output_url))
            .await
            .map_err(|e| {
                error!("[{}] Failed to record completion: {}", job_id, e);
                GenerationError::Internal("Failed to update generation record".to_string())
            })?;

        match (job.status, job.generated_image_url) {
            (JobStatus::Completed, Some(url)) => {
                info!("[{}] Generation completed", job_id);
                Ok(GenerationOutcome::completed(job_id, url))
            }
            (status, _) => {
                warn!("[{}] Completion ignored, job already {}", job_id, status);
                Err(GenerationError::GenerationFailed(format!(
                    "Generation already {}",
                    status
                )))
            }
        }
    }

    async fn mark_failed(&self, job_id: Uuid) {
        if let Err(e) = self.store.update(job_id, JobStatus::Failed, None).await {
            error!("[{}] Failed to mark generation as failed: {}", job_id, e);
        }
    }

    /// The provider never accepted the job: fail it and return the credit.
    async fn compensate_dispatch_failure(&self, job_id: Uuid, user_id: &str) -> GenerationError {
        self.mark_failed(job_id).await;

        if let Err(e) = self.ledger.credit(user_id, job_id, 1).await {
            // Left for the reconciliation sweep.
            error!("[{}] Refund to {} failed: {}", job_id, user_id, e);
        }

        GenerationError::GenerationFailed(DISPATCH_FAILED_MESSAGE.to_string())
    }

    /// The provider accepted and ran the job but it failed. The debit stands.
    async fn fail_after_execution(&self, job_id: Uuid) -> GenerationError {
        self.mark_failed(job_id).await;
        GenerationError::GenerationFailed(EXECUTION_FAILED_MESSAGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{GenerationOrchestrator, OrchestratorServices};
    use crate::ai::{InferenceOutcome, InferenceService, MockInferenceClient, Submission};
    use crate::error::GenerationError;
    use crate::ledger::{CreditLedger, EntryKind, InMemoryCreditLedger, LedgerEntry};
    use crate::models::{GenerateRequest, JobStatus, ModelParams, PollSettings};
    use crate::prompts;
    use crate::store::{InMemoryJobStore, JobStore};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    const IMAGE: &str = "https://img.test/living-room.png";
    const OUTPUT: &str = "https://out.test/restyled.png";

    struct Harness {
        orchestrator: GenerationOrchestrator,
        ledger: Arc<InMemoryCreditLedger>,
        store: Arc<InMemoryJobStore>,
    }

    fn fast_poll() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(10),
            deadline: Duration::from_millis(80),
        }
    }

    fn build(balance: Option<u32>, inference: Option<MockInferenceClient>) -> Harness {
        let ledger = match balance {
            Some(credits) => InMemoryCreditLedger::new().with_account("alice", credits),
            None => InMemoryCreditLedger::new(),
        };
        let ledger = Arc::new(ledger);
        let store = Arc::new(InMemoryJobStore::new());
        let orchestrator = GenerationOrchestrator::with_services(
            OrchestratorServices {
                ledger: ledger.clone(),
                store: store.clone(),
                inference: inference.map(|m| Arc::new(m) as Arc<dyn InferenceService>),
            },
            ModelParams::default(),
            fast_poll(),
        );
        Harness {
            orchestrator,
            ledger,
            store,
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest::new(IMAGE, "japanese", "living-room", "alice")
    }

    #[tokio::test]
    async fn test_generate_completes_after_polling() {
        let mock = MockInferenceClient::new()
            .with_poll_response(Ok(InferenceOutcome::Pending))
            .with_poll_response(Ok(InferenceOutcome::Succeeded(OUTPUT.to_string())));
        let h = build(Some(1), Some(mock.clone()));

        let outcome = h.orchestrator.generate(request()).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.generated_image_url.as_deref(), Some(OUTPUT));
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 0);

        let job = h.store.get(outcome.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.generated_image_url.as_deref(), Some(OUTPUT));
        assert_eq!(job.prompt, prompts::build_prompt("japanese", "living-room"));
        assert_eq!(mock.get_poll_count(), 2);
    }

    #[tokio::test]
    async fn test_generate_passes_prompt_and_model_params_to_provider() {
        let mock = MockInferenceClient::new()
            .with_submit_response(Ok(Submission::Succeeded(OUTPUT.to_string())));
        let h = build(Some(1), Some(mock.clone()));

        h.orchestrator.generate(request()).await.unwrap();

        let submitted = mock.last_submission().unwrap();
        assert_eq!(submitted.image_url, IMAGE);
        assert_eq!(
            submitted.prompt,
            prompts::build_prompt("japanese", "living-room")
        );
        assert_eq!(submitted.params, ModelParams::default());
    }

    #[tokio::test]
    async fn test_synchronous_output_skips_polling() {
        let mock = MockInferenceClient::new()
            .with_submit_response(Ok(Submission::Succeeded(OUTPUT.to_string())));
        let h = build(Some(2), Some(mock.clone()));

        let outcome = h.orchestrator.generate(request()).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(mock.get_poll_count(), 0);
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_credits_rejected_without_side_effects() {
        let mock = MockInferenceClient::new();
        let h = build(Some(0), Some(mock.clone()));

        let err = h.orchestrator.generate(request()).await.unwrap_err();

        assert!(matches!(err, GenerationError::InsufficientCredit(_)));
        assert!(h.store.is_empty());
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 0);
        assert_eq!(mock.get_submit_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let h = build(None, Some(MockInferenceClient::new()));

        let err = h.orchestrator.generate(request()).await.unwrap_err();

        assert_eq!(err.code(), "unknown_user");
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_rejected_before_any_lookup() {
        let h = build(Some(1), Some(MockInferenceClient::new()));
        let mut req = request();
        req.style = None;
        req.image_url = Some("   ".to_string());

        let err = h.orchestrator.generate(req).await.unwrap_err();

        match err {
            GenerationError::InvalidRequest(message) => {
                assert!(message.contains("imageUrl"));
                assert!(message.contains("style"));
                assert!(!message.contains("userId"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(h.store.is_empty());
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_refunds_credit() {
        let mock = MockInferenceClient::new()
            .with_submit_response(Err("connection refused".to_string()));
        let h = build(Some(1), Some(mock.clone()));

        let err = h.orchestrator.generate(request()).await.unwrap_err();

        assert_eq!(err.code(), "generation_failed");
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 1);
        assert_eq!(mock.get_poll_count(), 0);

        let jobs = h.store.list_for_user("alice").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);

        let entries: Vec<(Uuid, EntryKind)> = h
            .ledger
            .entries("alice")
            .await
            .unwrap()
            .iter()
            .map(|e: &LedgerEntry| (e.job_id, e.kind))
            .collect();
        assert_eq!(
            entries,
            vec![
                (jobs[0].id, EntryKind::Debit),
                (jobs[0].id, EntryKind::Refund)
            ]
        );
    }

    #[tokio::test]
    async fn test_execution_failure_keeps_debit() {
        let mock = MockInferenceClient::new()
            .with_poll_response(Ok(InferenceOutcome::Failed("NSFW detected".to_string())));
        let h = build(Some(1), Some(mock));

        let err = h.orchestrator.generate(request()).await.unwrap_err();

        assert_eq!(err.code(), "generation_failed");
        assert!(!err.to_string().contains("NSFW"));
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 0);
        let jobs = h.store.list_for_user("alice").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(jobs[0].generated_image_url.is_none());
    }

    #[tokio::test]
    async fn test_synchronous_provider_failure_keeps_debit() {
        let mock = MockInferenceClient::new()
            .with_submit_response(Ok(Submission::Failed("bad input".to_string())));
        let h = build(Some(1), Some(mock));

        let err = h.orchestrator.generate(request()).await.unwrap_err();

        assert!(matches!(err, GenerationError::GenerationFailed(_)));
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_poll_timeout_leaves_job_processing() {
        let mock = MockInferenceClient::new();
        let h = build(Some(1), Some(mock.clone()));

        let outcome = h.orchestrator.generate(request()).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Processing);
        assert!(outcome.generated_image_url.is_none());
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 0);
        assert_eq!(
            h.store.get(outcome.id).await.unwrap().status,
            JobStatus::Processing
        );
        assert!(mock.get_poll_count() >= 2);
    }

    #[tokio::test]
    async fn test_demo_mode_returns_original_image_without_refund() {
        let h = build(Some(1), None);
        assert!(h.orchestrator.is_demo_mode());

        let outcome = h.orchestrator.generate(request()).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.generated_image_url.as_deref(), Some(IMAGE));
        assert_eq!(outcome.message.as_deref(), Some(super::DEMO_MESSAGE));
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 0);
    }

    /// Reports a positive balance but loses every debit, as if a concurrent
    /// request drained the account between the check and the reservation.
    struct DrainedLedger;

    #[async_trait]
    impl CreditLedger for DrainedLedger {
        async fn open_account(&self, _user_id: &str, credits: u32) -> Result<u32> {
            Ok(credits)
        }

        async fn balance(&self, _user_id: &str) -> Result<u32> {
            Ok(1)
        }

        async fn debit(&self, user_id: &str, _job_id: Uuid) -> Result<u32> {
            Err(Error::InsufficientCredit(user_id.to_string()))
        }

        async fn credit(&self, _user_id: &str, _job_id: Uuid, _amount: u32) -> Result<u32> {
            panic!("nothing was debited, nothing to refund")
        }

        async fn entries(&self, _user_id: &str) -> Result<Vec<LedgerEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_lost_debit_race_is_insufficient_credit_and_not_dispatched() {
        let mock = MockInferenceClient::new();
        let store = Arc::new(InMemoryJobStore::new());
        let orchestrator = GenerationOrchestrator::with_services(
            OrchestratorServices {
                ledger: Arc::new(DrainedLedger),
                store: store.clone(),
                inference: Some(Arc::new(mock.clone())),
            },
            ModelParams::default(),
            fast_poll(),
        );

        let err = orchestrator.generate(request()).await.unwrap_err();

        assert!(matches!(err, GenerationError::InsufficientCredit(_)));
        assert_eq!(mock.get_submit_count(), 0);
        let jobs = store.list_for_user("alice").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
    }
}
