use super::{InferenceOutcome, InferenceService, Submission, SubmittedRequest};
use crate::models::ModelParams;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted reply; `Err` text becomes an [`Error::AiProvider`].
pub type MockReply<T> = std::result::Result<T, String>;

/// What the mock received on its most recent `submit` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSubmission {
    pub image_url: String,
    pub prompt: String,
    pub params: ModelParams,
}

/// In-process stand-in for the inference provider.
///
/// Replies are consumed in order; the last scripted reply repeats forever.
/// With nothing scripted, `submit` returns a pending handle and `poll_once`
/// stays pending.
#[derive(Clone)]
pub struct MockInferenceClient {
    submit_responses: Arc<Mutex<VecDeque<MockReply<Submission>>>>,
    poll_responses: Arc<Mutex<VecDeque<MockReply<InferenceOutcome>>>>,
    submit_count: Arc<Mutex<usize>>,
    poll_count: Arc<Mutex<usize>>,
    last_submission: Arc<Mutex<Option<RecordedSubmission>>>,
}

impl MockInferenceClient {
    pub fn new() -> Self {
        Self {
            submit_responses: Arc::new(Mutex::new(VecDeque::new())),
            poll_responses: Arc::new(Mutex::new(VecDeque::new())),
            submit_count: Arc::new(Mutex::new(0)),
            poll_count: Arc::new(Mutex::new(0)),
            last_submission: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pending_handle() -> SubmittedRequest {
        SubmittedRequest {
            prediction_id: Some("mock-prediction".to_string()),
            poll_url: "https://mock-provider.example.com/predictions/mock-prediction".to_string(),
        }
    }

    pub fn with_submit_response(self, response: MockReply<Submission>) -> Self {
        self.submit_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_poll_response(self, response: MockReply<InferenceOutcome>) -> Self {
        self.poll_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn get_submit_count(&self) -> usize {
        *self.submit_count.lock().unwrap()
    }

    pub fn get_poll_count(&self) -> usize {
        *self.poll_count.lock().unwrap()
    }

    pub fn last_submission(&self) -> Option<RecordedSubmission> {
        self.last_submission.lock().unwrap().clone()
    }

    fn next_reply<T: Clone>(queue: &Mutex<VecDeque<MockReply<T>>>, default: T) -> Result<T> {
        let mut queue = queue.lock().unwrap();
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(Error::AiProvider(message)),
            None => Ok(default),
        }
    }
}

impl Default for MockInferenceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceService for MockInferenceClient {
    async fn submit(
        &self,
        image_url: &str,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<Submission> {
        *self.submit_count.lock().unwrap() += 1;
        *self.last_submission.lock().unwrap() = Some(RecordedSubmission {
            image_url: image_url.to_string(),
            prompt: prompt.to_string(),
            params: params.clone(),
        });

        Self::next_reply(
            &self.submit_responses,
            Submission::Pending(Self::pending_handle()),
        )
    }

    async fn poll_once(&self, _request: &SubmittedRequest) -> Result<InferenceOutcome> {
        *self.poll_count.lock().unwrap() += 1;
        Self::next_reply(&self.poll_responses, InferenceOutcome::Pending)
    }
}
