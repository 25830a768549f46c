//! Abstraction over the external card-present payment processor.
//!
//! Each gateway operation is a single round trip with no business logic and
//! no retries; retrying is left to the coordinator and the status poller.

pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use stripe::StripeClient;

/// Opaque upstream failure. The message is passed to callers unmodified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProcessorError {
    pub message: String,
    transient: bool,
}

impl ProcessorError {
    /// An error the processor answered with, e.g. a rejected reader action.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    /// A transport-level failure (timeout, connection reset, 5xx).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether the failure counts against the client's circuit breaker.
    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl From<reqwest::Error> for ProcessorError {
    fn from(e: reqwest::Error) -> Self {
        ProcessorError::transport(e.to_string())
    }
}

/// Status string reported by the processor for a payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    Other(String),
}

impl IntentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for IntentStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "succeeded" => IntentStatus::Succeeded,
            "processing" => IntentStatus::Processing,
            "requires_payment_method" => IntentStatus::RequiresPaymentMethod,
            _ => IntentStatus::Other(raw),
        }
    }
}

impl From<&str> for IntentStatus {
    fn from(raw: &str) -> Self {
        IntentStatus::from(raw.to_string())
    }
}

impl From<IntentStatus> for String {
    fn from(status: IntentStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionToken {
    pub secret: String,
}

/// A freshly created intent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
}

impl std::fmt::Debug for CreatedIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedIntent")
            .field("id", &self.id)
            .field("client_secret", &crate::utils::redact(&self.client_secret))
            .field("amount", &self.amount)
            .field("currency", &self.currency)
            .field("status", &self.status)
            .finish()
    }
}

/// Processor-side view of an intent, as returned by a status lookup or a cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSnapshot {
    pub id: String,
    pub status: IntentStatus,
    pub amount: i64,
    pub currency: String,
}

/// Descriptor of the action a reader is executing after a dispatch or cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderAction {
    pub reader_id: String,
    pub action_type: Option<String>,
    pub status: Option<String>,
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: String,
    pub amount: Option<i64>,
}

#[async_trait]
pub trait ProcessorGateway: Send + Sync {
    async fn create_connection_token(&self) -> Result<ConnectionToken, ProcessorError>;

    async fn create_intent(
        &self,
        amount_minor_units: i64,
        currency: &str,
    ) -> Result<CreatedIntent, ProcessorError>;

    /// Attaches a created intent to a reader, which then prompts for a card.
    async fn dispatch_to_reader(
        &self,
        intent_id: &str,
        reader_id: &str,
    ) -> Result<ReaderAction, ProcessorError>;

    /// Puts the reader into card collection for manual amount entry flows.
    async fn collect_payment_method(&self, reader_id: &str) -> Result<ReaderAction, ProcessorError>;

    async fn cancel_reader_action(&self, reader_id: &str) -> Result<ReaderAction, ProcessorError>;

    async fn cancel_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ProcessorError>;

    /// Full refund when `amount_minor_units` is `None`, partial otherwise.
    async fn refund(
        &self,
        intent_id: &str,
        amount_minor_units: Option<i64>,
    ) -> Result<RefundReceipt, ProcessorError>;

    async fn retrieve_intent_status(&self, intent_id: &str) -> Result<IntentSnapshot, ProcessorError>;

    /// Health of the upstream connection, reported by `/health`.
    fn circuit_state(&self) -> String {
        "closed".to_string()
    }
}
