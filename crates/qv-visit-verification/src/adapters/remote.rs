//! In-process remote authority.
//!
//! Credits each idempotency key at most once and answers a repeated key with
//! `RemoteError::DuplicateKey`. Failures can be scripted per call, including
//! a "lost acknowledgement" where the visit is credited but the caller sees a
//! timeout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{ClientId, VisitId};
use crate::ports::outbound::{RemoteError, RemoteVisitGateway, SubmissionReceipt, VisitSubmission};

enum Scripted {
    Fail(RemoteError),
    LoseAck,
}

#[derive(Default)]
struct RemoteState {
    credits: HashMap<VisitId, VisitSubmission>,
    credit_order: Vec<VisitId>,
    submissions: u64,
    scripted: VecDeque<Scripted>,
    rejected_clients: HashSet<ClientId>,
    unreachable: bool,
    latency: Option<Duration>,
}

/// Remote visit authority kept in memory.
#[derive(Default)]
pub struct InMemoryRemoteAuthority {
    state: Mutex<RemoteState>,
}

impl InMemoryRemoteAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a network partition: every call fails with a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Permanently refuse visits of `client_id`.
    pub fn reject_client(&self, client_id: impl Into<ClientId>) {
        self.state.lock().rejected_clients.insert(client_id.into());
    }

    /// Fail the next call with `error`, without crediting anything.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().scripted.push_back(Scripted::Fail(error));
    }

    /// Credit the next call but answer it with a timeout.
    pub fn lose_next_ack(&self) {
        self.state.lock().scripted.push_back(Scripted::LoseAck);
    }

    /// Delay every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Number of distinct visits credited.
    pub fn credit_count(&self) -> usize {
        self.state.lock().credits.len()
    }

    /// Number of visits credited to `client_id`.
    pub fn credits_for(&self, client_id: &str) -> usize {
        self.state
            .lock()
            .credits
            .values()
            .filter(|s| s.client_id == client_id)
            .count()
    }

    /// Idempotency keys in the order they were credited.
    pub fn credited_keys(&self) -> Vec<VisitId> {
        self.state.lock().credit_order.clone()
    }

    /// Total calls received, including failed ones.
    pub fn submission_count(&self) -> u64 {
        self.state.lock().submissions
    }

    fn summary_for(state: &RemoteState, client_id: &str) -> String {
        let visits = state
            .credits
            .values()
            .filter(|s| s.client_id == client_id)
            .count();
        format!("{{\"client\":\"{}\",\"visits\":{}}}", client_id, visits)
    }

    fn credit(state: &mut RemoteState, submission: VisitSubmission) -> String {
        let key = submission.idempotency_key;
        let client_id = submission.client_id.clone();
        state.credits.insert(key, submission);
        state.credit_order.push(key);
        Self::summary_for(state, &client_id)
    }
}

#[async_trait]
impl RemoteVisitGateway for InMemoryRemoteAuthority {
    async fn submit_visit(
        &self,
        submission: VisitSubmission,
    ) -> Result<SubmissionReceipt, RemoteError> {
        let latency = {
            let mut state = self.state.lock();
            state.submissions += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if state.unreachable {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }

        match state.scripted.pop_front() {
            Some(Scripted::Fail(error)) => return Err(error),
            Some(Scripted::LoseAck) => {
                if !state.credits.contains_key(&submission.idempotency_key) {
                    Self::credit(&mut state, submission);
                }
                return Err(RemoteError::Timeout);
            }
            None => {}
        }

        if state.rejected_clients.contains(&submission.client_id) {
            return Err(RemoteError::Rejected {
                reason: format!("client {} is not enrolled", submission.client_id),
            });
        }

        if state.credits.contains_key(&submission.idempotency_key) {
            let summary = Self::summary_for(&state, &submission.client_id);
            return Err(RemoteError::DuplicateKey {
                summary: Some(summary),
            });
        }

        let summary = Self::credit(&mut state, submission);
        Ok(SubmissionReceipt {
            summary: Some(summary),
        })
    }
}
