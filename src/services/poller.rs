use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{Observation, TransactionState};
use crate::error::AppError;
use crate::processor::IntentStatus;
use crate::services::coordinator::{StatusCheck, TransactionCoordinator};

const POLL_INTERVAL_SECS: u64 = 5;
const MAX_ATTEMPTS: u32 = 6;

/// Suspension point between status checks. Swapped out in tests to avoid real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(POLL_INTERVAL_SECS),
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.poll_max_attempts.max(1),
        }
    }
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Polling budget of {0} attempts exhausted")]
    BudgetExhausted(u32),

    #[error(transparent)]
    Check(#[from] AppError),
}

/// Final report of one polling session.
#[derive(Debug, Clone, Serialize)]
pub struct PollOutcome {
    pub intent_id: String,
    pub observation: Observation,
    pub status: Option<IntentStatus>,
    pub state: Option<TransactionState>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl PollOutcome {
    pub fn message(&self) -> &'static str {
        self.observation.client_message()
    }
}

/// Attempt budget for one polling session. Each `check` spends exactly one attempt.
pub struct PollSession {
    coordinator: Arc<TransactionCoordinator>,
    intent_id: String,
    max_attempts: u32,
    attempts: u32,
}

impl PollSession {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub async fn check(&mut self) -> Result<StatusCheck, PollError> {
        if self.is_exhausted() {
            return Err(PollError::BudgetExhausted(self.max_attempts));
        }
        self.attempts += 1;
        debug!(
            intent_id = %self.intent_id,
            attempt = self.attempts,
            max_attempts = self.max_attempts,
            "polling payment status"
        );
        Ok(self.coordinator.check_status(&self.intent_id).await?)
    }
}

/// Repeats status checks until a terminal outcome or the attempt budget runs out.
///
/// Sessions share nothing but the coordinator's cache, so waiting in one never
/// holds up another. Dropping the `run` future abandons the session without
/// touching the payment at the processor.
pub struct StatusPoller {
    coordinator: Arc<TransactionCoordinator>,
    policy: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl StatusPoller {
    pub fn with_sleeper(
        coordinator: Arc<TransactionCoordinator>,
        policy: PollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            coordinator,
            policy,
            sleeper,
        }
    }

    /// Starts a fresh session. Restarting polling for the same intent gets a new budget.
    pub fn session(&self, intent_id: &str) -> PollSession {
        PollSession {
            coordinator: Arc::clone(&self.coordinator),
            intent_id: intent_id.to_string(),
            max_attempts: self.policy.max_attempts,
            attempts: 0,
        }
    }

    pub async fn run(&self, intent_id: &str) -> Result<PollOutcome, AppError> {
        if intent_id.trim().is_empty() {
            return Err(AppError::Validation("payment_intent_id is required".to_string()));
        }

        let mut session = self.session(intent_id);
        let mut last_status = None;
        let mut last_state = None;
        let mut last_error = None;

        loop {
            match session.check().await {
                Ok(check) => {
                    last_error = None;
                    if check.observation.is_terminal() || check.state.is_terminal() {
                        info!(
                            intent_id,
                            status = %check.status,
                            state = %check.state,
                            attempts = session.attempts(),
                            "polling reached a final result"
                        );
                        return Ok(PollOutcome {
                            intent_id: intent_id.to_string(),
                            observation: check.observation,
                            status: Some(check.status),
                            state: Some(check.state),
                            attempts: session.attempts(),
                            last_error: None,
                        });
                    }
                    last_status = Some(check.status);
                    last_state = Some(check.state);
                }
                Err(PollError::Check(AppError::Processor(e))) if e.is_transient() => {
                    warn!(intent_id, attempt = session.attempts(), error = %e, "status check failed, will retry");
                    last_error = Some(e.message);
                }
                Err(PollError::Check(e)) => return Err(e),
                Err(PollError::BudgetExhausted(_)) => break,
            }

            if session.is_exhausted() {
                break;
            }
            self.sleeper.sleep(self.policy.interval).await;
        }

        let state = match self.coordinator.cached_state(intent_id).await {
            Some(state) => Some(state),
            None => last_state,
        };
        warn!(
            intent_id,
            attempts = session.attempts(),
            "no final payment status within the polling budget"
        );
        Ok(PollOutcome {
            intent_id: intent_id.to_string(),
            observation: Observation::Unknown,
            status: last_status,
            state,
            attempts: session.attempts(),
            last_error,
        })
    }
}
