use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{validate_intent_id, validate_reader_id, TransactionState};
use crate::error::AppError;
use crate::processor::{ProcessorError, ProcessorGateway};
use crate::services::coordinator::TransactionCoordinator;
use crate::utils::redact_opt;

/// Result of one of the independent cancellation calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// The processor refused or could not be reached.
    Failed(String),
    /// Refused locally without contacting the processor.
    Rejected(String),
    Skipped,
}

impl StepOutcome {
    fn from_result<T>(result: Option<Result<T, ProcessorError>>) -> Self {
        match result {
            Some(Ok(_)) => StepOutcome::Succeeded,
            Some(Err(e)) => StepOutcome::Failed(e.message),
            None => StepOutcome::Skipped,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StepOutcome::Failed(msg) | StepOutcome::Rejected(msg) => Some(msg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub intent_id: Option<String>,
    pub reader_id: Option<String>,
    pub intent: StepOutcome,
    pub reader_action: StepOutcome,
    pub state: Option<TransactionState>,
}

impl CancelOutcome {
    fn attempted(&self) -> impl Iterator<Item = &StepOutcome> {
        [&self.intent, &self.reader_action]
            .into_iter()
            .filter(|s| !matches!(s, StepOutcome::Skipped))
    }

    pub fn all_succeeded(&self) -> bool {
        self.attempted().all(StepOutcome::succeeded)
    }

    pub fn any_succeeded(&self) -> bool {
        self.attempted().any(StepOutcome::succeeded)
    }

    pub fn is_partial(&self) -> bool {
        self.any_succeeded() && !self.all_succeeded()
    }

    /// Messages of the calls that failed, in call order.
    pub fn errors(&self) -> Vec<&str> {
        self.attempted().filter_map(StepOutcome::error).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub intent_id: String,
    pub refund_id: String,
    pub status: String,
    pub amount: Option<i64>,
    pub state: Option<TransactionState>,
}

/// Issues compensating operations and folds their results back into the coordinator.
pub struct CompensationHandler {
    gateway: Arc<dyn ProcessorGateway>,
    coordinator: Arc<TransactionCoordinator>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl CompensationHandler {
    pub fn new(gateway: Arc<dyn ProcessorGateway>, coordinator: Arc<TransactionCoordinator>) -> Self {
        Self {
            gateway,
            coordinator,
        }
    }

    /// Refunds an intent in full, or partially when `amount_minor_units` is given.
    ///
    /// The processor enforces that only a paid intent can be refunded; on its
    /// refusal the local state is left as it was.
    pub async fn refund(
        &self,
        intent_id: &str,
        amount_minor_units: Option<i64>,
    ) -> Result<RefundOutcome, AppError> {
        validate_intent_id(intent_id)?;
        if let Some(amount) = amount_minor_units {
            if amount <= 0 {
                return Err(AppError::Validation(
                    "refund amount must be a positive integer in minor units".to_string(),
                ));
            }
        }

        let receipt = self
            .gateway
            .refund(intent_id, amount_minor_units)
            .await
            .map_err(|e| {
                warn!(intent_id, error = %e, "refund rejected by processor");
                e
            })?;

        let state = self.coordinator.record_refund(intent_id, &receipt.status).await;
        info!(
            intent_id,
            refund_id = %receipt.refund_id,
            status = %receipt.status,
            partial = amount_minor_units.is_some(),
            "refund issued"
        );

        Ok(RefundOutcome {
            intent_id: intent_id.to_string(),
            refund_id: receipt.refund_id,
            status: receipt.status,
            amount: receipt.amount.or(amount_minor_units),
            state,
        })
    }

    /// Cancels the intent and the reader action independently. Both steps are
    /// attempted even if one fails or is refused; the outcome reports each separately.
    pub async fn cancel(
        &self,
        intent_id: Option<&str>,
        reader_id: Option<&str>,
    ) -> Result<CancelOutcome, AppError> {
        let intent_id = non_empty(intent_id);
        let reader_id = non_empty(reader_id);
        if intent_id.is_none() && reader_id.is_none() {
            return Err(AppError::Validation(
                "reader_id or payment_intent_id is required".to_string(),
            ));
        }
        if let Some(id) = intent_id {
            validate_intent_id(id)?;
        }
        if let Some(reader) = reader_id {
            validate_reader_id(reader)?;
        }

        // A finished intent is not sent to the processor, but its reader may still
        // be prompting for a card and is cancelled regardless.
        let refusal = match (intent_id, reader_id) {
            (Some(id), None) => {
                self.coordinator.ensure_cancelable(id).await?;
                None
            }
            (Some(id), Some(_)) => self.coordinator.ensure_cancelable(id).await.err(),
            (None, _) => None,
        };
        let intent_id_to_cancel = intent_id.filter(|_| refusal.is_none());

        let cancel_intent = async {
            match intent_id_to_cancel {
                Some(id) => Some(self.gateway.cancel_intent(id).await),
                None => None,
            }
        };
        let cancel_reader = async {
            match reader_id {
                Some(reader) => Some(self.gateway.cancel_reader_action(reader).await),
                None => None,
            }
        };
        let (intent_result, reader_result) = tokio::join!(cancel_intent, cancel_reader);

        let mut state = None;
        if let Some(Ok(snapshot)) = &intent_result {
            state = Some(self.coordinator.record_canceled(snapshot).await);
        }
        let intent_step = match (refusal, intent_id) {
            (Some(refusal), Some(id)) => {
                state = self.coordinator.cached_state(id).await;
                StepOutcome::Rejected(match refusal {
                    AppError::AlreadyTerminal(msg) => msg,
                    other => other.to_string(),
                })
            }
            _ => StepOutcome::from_result(intent_result),
        };
        if let (Some(Ok(_)), Some(reader)) = (&reader_result, reader_id) {
            self.coordinator.release_reader(reader).await;
        }

        let outcome = CancelOutcome {
            intent_id: intent_id.map(str::to_string),
            reader_id: reader_id.map(str::to_string),
            intent: intent_step,
            reader_action: StepOutcome::from_result(reader_result),
            state,
        };

        if outcome.all_succeeded() {
            info!(
                intent_id = ?outcome.intent_id,
                reader_id = %redact_opt(reader_id),
                "cancellation complete"
            );
        } else {
            warn!(
                intent_id = ?outcome.intent_id,
                reader_id = %redact_opt(reader_id),
                intent = ?outcome.intent,
                reader_action = ?outcome.reader_action,
                "cancellation incomplete"
            );
        }

        Ok(outcome)
    }
}
