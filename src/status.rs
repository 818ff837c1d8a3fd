//! Read-only job lookups for out-of-band client polling.

use crate::models::Job;
use crate::store::JobStore;
use crate::Result;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn JobStore>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Latest stored state of a job. No side effects.
    pub async fn get(&self, job_id: Uuid) -> Result<Job> {
        self.store.get(job_id).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Job>> {
        self.store.list_for_user(user_id).await
    }
}
