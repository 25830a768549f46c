#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use terminal_bridge::config::Config;
use terminal_bridge::processor::{
    ConnectionToken, CreatedIntent, IntentSnapshot, IntentStatus, ProcessorError,
    ProcessorGateway, ReaderAction, RefundReceipt,
};
use terminal_bridge::services::Sleeper;

pub const API_KEY: &str = "dashboard-key-0042";
pub const READER: &str = "tmr_reader_1";

/// In-memory processor that records every call and replays scripted answers.
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<String>>,
    statuses: Mutex<VecDeque<Result<IntentStatus, ProcessorError>>>,
    failures: Mutex<Vec<(String, ProcessorError)>>,
    refund_status: Mutex<Option<String>>,
    next_id: Mutex<u32>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues answers for successive status lookups. When the queue is empty
    /// lookups report `processing`.
    pub fn script_statuses(&self, statuses: &[&str]) {
        let mut queue = self.statuses.lock().unwrap();
        for status in statuses {
            queue.push_back(Ok(IntentStatus::from(*status)));
        }
    }

    pub fn script_status_error(&self, error: ProcessorError) {
        self.statuses.lock().unwrap().push_back(Err(error));
    }

    /// Makes every call to `operation` fail with `message`.
    pub fn fail(&self, operation: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((operation.to_string(), ProcessorError::new(message)));
    }

    pub fn set_refund_status(&self, status: &str) {
        *self.refund_status.lock().unwrap() = Some(status.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == operation).count()
    }

    fn record(&self, operation: &str) -> Result<(), ProcessorError> {
        self.calls.lock().unwrap().push(operation.to_string());
        match self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(op, _)| op == operation)
        {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn reader_action(reader_id: &str, action_type: &str) -> ReaderAction {
        ReaderAction {
            reader_id: reader_id.to_string(),
            action_type: Some(action_type.to_string()),
            status: Some("in_progress".to_string()),
            failure_message: None,
        }
    }
}

#[async_trait]
impl ProcessorGateway for RecordingGateway {
    async fn create_connection_token(&self) -> Result<ConnectionToken, ProcessorError> {
        self.record("create_connection_token")?;
        Ok(ConnectionToken {
            secret: "pst_test_token".to_string(),
        })
    }

    async fn create_intent(
        &self,
        amount_minor_units: i64,
        currency: &str,
    ) -> Result<CreatedIntent, ProcessorError> {
        self.record("create_intent")?;
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = format!("pi_test_{}", next);
        Ok(CreatedIntent {
            client_secret: format!("{}_secret_abcdef", id),
            id,
            amount: amount_minor_units,
            currency: currency.to_string(),
            status: IntentStatus::RequiresPaymentMethod,
        })
    }

    async fn dispatch_to_reader(
        &self,
        _intent_id: &str,
        reader_id: &str,
    ) -> Result<ReaderAction, ProcessorError> {
        self.record("dispatch_to_reader")?;
        Ok(Self::reader_action(reader_id, "process_payment_intent"))
    }

    async fn collect_payment_method(&self, reader_id: &str) -> Result<ReaderAction, ProcessorError> {
        self.record("collect_payment_method")?;
        Ok(Self::reader_action(reader_id, "collect_payment_method"))
    }

    async fn cancel_reader_action(&self, reader_id: &str) -> Result<ReaderAction, ProcessorError> {
        self.record("cancel_reader_action")?;
        Ok(ReaderAction {
            reader_id: reader_id.to_string(),
            action_type: None,
            status: None,
            failure_message: None,
        })
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ProcessorError> {
        self.record("cancel_intent")?;
        Ok(IntentSnapshot {
            id: intent_id.to_string(),
            status: IntentStatus::from("canceled"),
            amount: 1000,
            currency: "GBP".to_string(),
        })
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount_minor_units: Option<i64>,
    ) -> Result<RefundReceipt, ProcessorError> {
        self.record("refund")?;
        let status = self
            .refund_status
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "succeeded".to_string());
        Ok(RefundReceipt {
            refund_id: format!("re_{}", intent_id),
            status,
            amount: amount_minor_units.or(Some(1000)),
        })
    }

    async fn retrieve_intent_status(&self, intent_id: &str) -> Result<IntentSnapshot, ProcessorError> {
        self.record("retrieve_intent_status")?;
        let next = self.statuses.lock().unwrap().pop_front();
        let status = match next {
            Some(result) => result?,
            None => IntentStatus::Processing,
        };
        Ok(IntentSnapshot {
            id: intent_id.to_string(),
            status,
            amount: 1000,
            currency: "GBP".to_string(),
        })
    }
}

/// Records requested delays instead of waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub fn test_config() -> Config {
    Config {
        api_key: Some(API_KEY.to_string()),
        processor_secret_key: Some("sk_test_123".to_string()),
        default_reader_id: Some(READER.to_string()),
        webhook_secret: Some("whsec_test".to_string()),
        ..Config::default()
    }
}
