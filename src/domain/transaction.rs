//! Transaction domain entity.
//! Client-visible lifecycle of one card-present payment.
//!
//! ```text
//! Created --dispatch--> Dispatched --processing--> Processing
//! Dispatched|Processing --succeeded--> Succeeded
//! Dispatched|Processing --requires_payment_method--> Failed
//! Created|Dispatched|Processing --cancel--> Canceled
//! Succeeded --refund--> RefundRequested --confirmed--> Refunded
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::processor::{CreatedIntent, IntentSnapshot, IntentStatus};
use crate::utils::redact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Created,
    Dispatched,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    RefundRequested,
    Refunded,
}

impl TransactionState {
    /// States in which the payment is still in flight on the terminal.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            TransactionState::Created | TransactionState::Dispatched | TransactionState::Processing
        )
    }

    /// States past which polling and cancellation may no longer mutate the transaction.
    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionState::Created => "created",
            TransactionState::Dispatched => "dispatched",
            TransactionState::Processing => "processing",
            TransactionState::Succeeded => "succeeded",
            TransactionState::Failed => "failed",
            TransactionState::Canceled => "canceled",
            TransactionState::RefundRequested => "refund_requested",
            TransactionState::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one status check told us. `Unknown` is a signal, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    Processing,
    Succeeded,
    Failed,
    Unknown,
}

impl Observation {
    pub fn from_status(status: &IntentStatus) -> Self {
        match status {
            IntentStatus::Succeeded => Observation::Succeeded,
            IntentStatus::Processing => Observation::Processing,
            IntentStatus::RequiresPaymentMethod => Observation::Failed,
            IntentStatus::Other(_) => Observation::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Observation::Succeeded | Observation::Failed)
    }

    /// Dashboard status text. An ambiguous outcome is never worded as success.
    pub fn client_message(self) -> &'static str {
        match self {
            Observation::Succeeded => "Payment successful!",
            Observation::Failed => "Payment failed. Please try again.",
            Observation::Processing => "Payment processing. Waiting for terminal confirmation...",
            Observation::Unknown => "Payment status unknown. Please check manually.",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transaction is already {0}")]
    AlreadyTerminal(TransactionState),

    #[error("Cannot {action} a transaction that is {from}")]
    InvalidTransition {
        from: TransactionState,
        action: &'static str,
    },
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub amount_minor_units: i64,
    pub currency: String,
    pub reader_id: Option<String>,
    pub state: TransactionState,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field(
                "client_secret",
                &self.client_secret.as_deref().map(redact),
            )
            .field("amount_minor_units", &self.amount_minor_units)
            .field("currency", &self.currency)
            .field("reader_id", &self.reader_id)
            .field("state", &self.state)
            .field("last_checked_at", &self.last_checked_at)
            .field("attempt_count", &self.attempt_count)
            .finish()
    }
}

impl Transaction {
    pub fn created(intent: CreatedIntent) -> Self {
        let now = Utc::now();
        Self {
            id: intent.id,
            client_secret: Some(intent.client_secret),
            amount_minor_units: intent.amount,
            currency: intent.currency,
            reader_id: None,
            state: TransactionState::Created,
            last_checked_at: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a cache entry from the processor's record after the local view was lost.
    ///
    /// The reader is unknown and an intent still awaiting a card is indistinguishable
    /// from a never-dispatched one, so it comes back as `Created`.
    pub fn reconstructed(snapshot: &IntentSnapshot) -> Self {
        let now = Utc::now();
        let state = match &snapshot.status {
            IntentStatus::Succeeded => TransactionState::Succeeded,
            IntentStatus::Processing => TransactionState::Processing,
            IntentStatus::Other(raw) if raw == "canceled" => TransactionState::Canceled,
            _ => TransactionState::Created,
        };
        Self {
            id: snapshot.id.clone(),
            client_secret: None,
            amount_minor_units: snapshot.amount,
            currency: snapshot.currency.clone(),
            reader_id: None,
            state,
            last_checked_at: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Validates that the transaction may be sent to `reader_id` without changing it.
    pub fn check_dispatch(&self, reader_id: &str) -> Result<(), TransitionError> {
        validate_amount(Some(self.amount_minor_units))?;
        validate_reader_id(reader_id)?;
        match self.state {
            TransactionState::Created => Ok(()),
            state if state.is_terminal() => Err(TransitionError::AlreadyTerminal(state)),
            state => Err(TransitionError::InvalidTransition {
                from: state,
                action: "dispatch",
            }),
        }
    }

    pub fn dispatch(&mut self, reader_id: &str) -> Result<(), TransitionError> {
        self.check_dispatch(reader_id)?;
        self.reader_id = Some(reader_id.to_string());
        self.state = TransactionState::Dispatched;
        self.touch();
        Ok(())
    }

    /// Records one status check and applies it if the transaction is awaiting the terminal.
    ///
    /// Returns whether the state changed. Out-of-phase observations (before dispatch or
    /// after a terminal state) are counted but leave the state alone.
    pub fn observe(&mut self, observation: Observation, at: DateTime<Utc>) -> bool {
        self.attempt_count += 1;
        self.last_checked_at = Some(at);
        self.apply(observation)
    }

    /// Applies an observation that did not come from a status check, e.g. a webhook.
    pub fn apply(&mut self, observation: Observation) -> bool {
        let awaiting = matches!(
            self.state,
            TransactionState::Dispatched | TransactionState::Processing
        );
        let next = match observation {
            _ if !awaiting => None,
            Observation::Processing => Some(TransactionState::Processing),
            Observation::Succeeded => Some(TransactionState::Succeeded),
            Observation::Failed => Some(TransactionState::Failed),
            Observation::Unknown => None,
        };

        match next {
            Some(state) if state != self.state => {
                self.state = state;
                self.touch();
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.state));
        }
        self.state = TransactionState::Canceled;
        self.touch();
        Ok(())
    }

    /// Applies a refund the processor accepted. A `pending` refund stops at
    /// `RefundRequested` until confirmed.
    pub fn record_refund(&mut self, refund_status: &str) {
        let next = match refund_status {
            "succeeded" => TransactionState::Refunded,
            "pending" | "requires_action" => TransactionState::RefundRequested,
            _ => return,
        };
        if self.state != TransactionState::Refunded {
            self.state = next;
            self.touch();
        }
    }

    /// Marks a refund confirmed out of band. Only a paid transaction can become refunded.
    pub fn confirm_refund(&mut self) {
        if matches!(
            self.state,
            TransactionState::Succeeded | TransactionState::RefundRequested
        ) {
            self.state = TransactionState::Refunded;
            self.touch();
        }
    }
}

pub fn validate_amount(amount: Option<i64>) -> Result<i64, TransitionError> {
    match amount {
        Some(a) if a > 0 => Ok(a),
        Some(_) => Err(TransitionError::Validation(
            "amount must be a positive integer in minor units".to_string(),
        )),
        None => Err(TransitionError::Validation("amount is required".to_string())),
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<(), TransitionError> {
    if value.trim().is_empty() {
        return Err(TransitionError::Validation(format!("{} is required", field)));
    }
    // Processor ids are `<prefix>_<alphanumerics>`; anything else is rejected
    // before it can reach a request path.
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(TransitionError::Validation(format!(
            "{} may only contain letters, digits and underscores",
            field
        )));
    }
    Ok(())
}

pub fn validate_reader_id(reader_id: &str) -> Result<(), TransitionError> {
    validate_identifier("reader_id", reader_id)
}

pub fn validate_intent_id(intent_id: &str) -> Result<(), TransitionError> {
    validate_identifier("payment_intent_id", intent_id)
}

/// Normalises a currency to an upper-case ISO 4217 code, applying `default` when absent.
pub fn normalize_currency(currency: Option<&str>, default: &str) -> Result<String, TransitionError> {
    let code = match currency.map(str::trim) {
        Some(c) if !c.is_empty() => c,
        _ => default.trim(),
    };
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(TransitionError::Validation(format!(
            "currency must be a three-letter ISO 4217 code, got '{}'",
            code
        )));
    }
    Ok(code.to_uppercase())
}

/// Accepts either an intent id or the client secret handed to the dashboard,
/// which is the intent id followed by `_secret_...`.
pub fn intent_id_from_reference(reference: &str) -> &str {
    match reference.find("_secret_") {
        Some(idx) => &reference[..idx],
        None => reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(amount: i64) -> Transaction {
        Transaction::created(CreatedIntent {
            id: "pi_123".to_string(),
            client_secret: "pi_123_secret_abc".to_string(),
            amount,
            currency: "GBP".to_string(),
            status: IntentStatus::RequiresPaymentMethod,
        })
    }

    fn dispatched() -> Transaction {
        let mut tx = created(1000);
        tx.dispatch("tmr_1").unwrap();
        tx
    }

    #[test]
    fn test_dispatch_moves_to_dispatched_never_succeeded() {
        let tx = dispatched();
        assert_eq!(tx.state, TransactionState::Dispatched);
        assert_eq!(tx.reader_id.as_deref(), Some("tmr_1"));
    }

    #[test]
    fn test_dispatch_requires_reader_and_amount() {
        let mut tx = created(1000);
        assert!(matches!(tx.dispatch(""), Err(TransitionError::Validation(_))));
        assert_eq!(tx.state, TransactionState::Created);

        let mut zero = created(0);
        assert!(matches!(zero.dispatch("tmr_1"), Err(TransitionError::Validation(_))));
    }

    #[test]
    fn test_double_dispatch_rejected() {
        let mut tx = dispatched();
        assert_eq!(
            tx.dispatch("tmr_1"),
            Err(TransitionError::InvalidTransition {
                from: TransactionState::Dispatched,
                action: "dispatch"
            })
        );
    }

    #[test]
    fn test_observations_follow_state_machine() {
        let mut tx = dispatched();
        assert!(tx.observe(Observation::Processing, Utc::now()));
        assert_eq!(tx.state, TransactionState::Processing);
        assert!(!tx.observe(Observation::Processing, Utc::now()));
        assert!(tx.observe(Observation::Succeeded, Utc::now()));
        assert_eq!(tx.state, TransactionState::Succeeded);
        assert_eq!(tx.attempt_count, 3);
    }

    #[test]
    fn test_requires_payment_method_fails_dispatched() {
        let mut tx = dispatched();
        tx.observe(Observation::from_status(&IntentStatus::RequiresPaymentMethod), Utc::now());
        assert_eq!(tx.state, TransactionState::Failed);
    }

    #[test]
    fn test_unknown_leaves_state() {
        let mut tx = dispatched();
        tx.observe(Observation::Processing, Utc::now());
        let changed = tx.observe(
            Observation::from_status(&IntentStatus::from("requires_capture")),
            Utc::now(),
        );
        assert!(!changed);
        assert_eq!(tx.state, TransactionState::Processing);
    }

    #[test]
    fn test_terminal_state_ignores_observations() {
        let mut tx = dispatched();
        tx.observe(Observation::Succeeded, Utc::now());
        tx.observe(Observation::Failed, Utc::now());
        assert_eq!(tx.state, TransactionState::Succeeded);
    }

    #[test]
    fn test_created_ignores_observations() {
        let mut tx = created(1000);
        tx.observe(Observation::Failed, Utc::now());
        assert_eq!(tx.state, TransactionState::Created);
    }

    #[test]
    fn test_cancel_only_in_flight() {
        let mut tx = dispatched();
        tx.cancel().unwrap();
        assert_eq!(tx.state, TransactionState::Canceled);
        assert_eq!(
            tx.cancel(),
            Err(TransitionError::AlreadyTerminal(TransactionState::Canceled))
        );

        let mut done = dispatched();
        done.observe(Observation::Succeeded, Utc::now());
        assert_eq!(
            done.cancel(),
            Err(TransitionError::AlreadyTerminal(TransactionState::Succeeded))
        );
        assert_eq!(done.state, TransactionState::Succeeded);
    }

    #[test]
    fn test_refund_states() {
        let mut tx = dispatched();
        tx.observe(Observation::Succeeded, Utc::now());
        tx.record_refund("pending");
        assert_eq!(tx.state, TransactionState::RefundRequested);
        tx.confirm_refund();
        assert_eq!(tx.state, TransactionState::Refunded);

        let mut failed_refund = dispatched();
        failed_refund.observe(Observation::Succeeded, Utc::now());
        failed_refund.record_refund("failed");
        assert_eq!(failed_refund.state, TransactionState::Succeeded);
    }

    #[test]
    fn test_reconstructed_from_snapshot() {
        let snapshot = IntentSnapshot {
            id: "pi_9".to_string(),
            status: IntentStatus::Processing,
            amount: 250,
            currency: "GBP".to_string(),
        };
        let tx = Transaction::reconstructed(&snapshot);
        assert_eq!(tx.state, TransactionState::Processing);
        assert_eq!(tx.amount_minor_units, 250);
        assert!(tx.client_secret.is_none());
    }

    #[test]
    fn test_validate_amount() {
        assert_eq!(validate_amount(Some(1)), Ok(1));
        assert!(validate_amount(Some(0)).is_err());
        assert!(validate_amount(Some(-5)).is_err());
        assert!(validate_amount(None).is_err());
    }

    #[test]
    fn test_identifiers_limited_to_processor_charset() {
        assert!(validate_intent_id("pi_3MtwBwLkdIwHu7ix28a3tqPa").is_ok());
        assert!(validate_reader_id("tmr_FDOt2wlRZEdpd7").is_ok());
        assert!(validate_intent_id("../refunds?payment_intent=pi_victim&x=").is_err());
        assert!(validate_reader_id("tmr_1/cancel_action").is_err());
        assert!(validate_intent_id("pi 1").is_err());
        assert!(validate_intent_id("").is_err());
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency(None, "GBP").unwrap(), "GBP");
        assert_eq!(normalize_currency(Some("eur"), "GBP").unwrap(), "EUR");
        assert_eq!(normalize_currency(Some(" "), "GBP").unwrap(), "GBP");
        assert!(normalize_currency(Some("pounds"), "GBP").is_err());
    }

    #[test]
    fn test_intent_id_from_reference() {
        assert_eq!(intent_id_from_reference("pi_3Nabc_secret_xyz"), "pi_3Nabc");
        assert_eq!(intent_id_from_reference("pi_3Nabc"), "pi_3Nabc");
    }

    #[test]
    fn test_debug_redacts_client_secret() {
        let tx = created(1000);
        let rendered = format!("{:?}", tx);
        assert!(!rendered.contains("pi_123_secret_abc"));
    }
}
