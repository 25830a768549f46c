use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{
    normalize_currency, validate_amount, validate_intent_id, validate_reader_id, Observation,
    Transaction, TransactionState,
};
use crate::error::AppError;
use crate::processor::webhook::WebhookEvent;
use crate::processor::{IntentSnapshot, IntentStatus, ProcessorGateway, ReaderAction};
use crate::services::cache::TransactionCache;
use crate::utils::redact;

/// How long a settled or never-dispatched transaction stays cached after its last change.
const SETTLED_RETENTION: Duration = Duration::minutes(15);
/// Dispatched transactions nobody checks on are dropped after this.
const IN_FLIGHT_RETENTION: Duration = Duration::hours(24);

/// Result of sending an intent to a reader.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub transaction: Transaction,
    pub reader_action: ReaderAction,
}

/// Outcome of one status lookup against the processor.
#[derive(Debug, Clone, Serialize)]
pub struct StatusCheck {
    pub intent_id: String,
    pub status: IntentStatus,
    pub observation: Observation,
    pub state: TransactionState,
    pub changed: bool,
}

/// Owns the client-visible lifecycle of each payment.
pub struct TransactionCoordinator {
    gateway: Arc<dyn ProcessorGateway>,
    cache: TransactionCache,
    default_currency: String,
}

fn require_intent_id(intent_id: &str) -> Result<(), AppError> {
    Ok(validate_intent_id(intent_id)?)
}

impl TransactionCoordinator {
    pub fn new(gateway: Arc<dyn ProcessorGateway>, default_currency: impl Into<String>) -> Self {
        Self {
            gateway,
            cache: TransactionCache::new(),
            default_currency: default_currency.into(),
        }
    }

    pub fn cache(&self) -> &TransactionCache {
        &self.cache
    }

    pub async fn create_intent(
        &self,
        amount_minor_units: Option<i64>,
        currency: Option<&str>,
    ) -> Result<Transaction, AppError> {
        let amount = validate_amount(amount_minor_units)?;
        let currency = normalize_currency(currency, &self.default_currency)?;

        let intent = self.gateway.create_intent(amount, &currency).await.map_err(|e| {
            warn!(amount, currency = %currency, error = %e, "failed to create payment intent");
            e
        })?;

        let tx = Transaction::created(intent);
        info!(
            intent_id = %tx.id,
            amount = tx.amount_minor_units,
            currency = %tx.currency,
            client_secret = %tx.client_secret.as_deref().map(redact).unwrap_or_default(),
            "payment intent created"
        );
        self.cache.insert(tx.clone()).await;
        self.evict_idle().await;
        Ok(tx)
    }

    /// Bounds the cache: each new payment sweeps out entries nobody has touched
    /// for a while. Anything swept is rebuilt from the processor if asked for again.
    async fn evict_idle(&self) {
        let now = Utc::now();
        let evicted = self
            .cache
            .evict_idle(now - SETTLED_RETENTION, now - IN_FLIGHT_RETENTION)
            .await;
        if evicted > 0 {
            let remaining = self.cache.len().await;
            debug!(evicted, remaining, "evicted idle transactions");
        }
    }

    /// Loads the transaction from the cache, rebuilding it from the processor when absent.
    pub async fn transaction(&self, intent_id: &str) -> Result<Transaction, AppError> {
        require_intent_id(intent_id)?;
        if let Some(tx) = self.cache.get(intent_id).await {
            return Ok(tx);
        }

        let snapshot = self.gateway.retrieve_intent_status(intent_id).await?;
        debug!(intent_id, status = %snapshot.status, "rebuilt transaction from processor record");
        Ok(self
            .cache
            .insert_if_absent(Transaction::reconstructed(&snapshot))
            .await)
    }

    pub async fn dispatch(&self, intent_id: &str, reader_id: &str) -> Result<Dispatch, AppError> {
        validate_reader_id(reader_id)?;
        require_intent_id(intent_id)?;

        let tx = self.transaction(intent_id).await?;
        tx.check_dispatch(reader_id)?;

        self.cache
            .reserve_reader(reader_id, intent_id)
            .await
            .map_err(|holder| {
                AppError::ReaderBusy(format!(
                    "reader {} has an unresolved action for {}",
                    redact(reader_id),
                    holder
                ))
            })?;

        let reader_action = match self.gateway.dispatch_to_reader(intent_id, reader_id).await {
            Ok(action) => action,
            Err(e) => {
                warn!(intent_id, reader_id = %redact(reader_id), error = %e, "dispatch to reader failed");
                self.cache.release_reader(reader_id, Some(intent_id)).await;
                return Err(e.into());
            }
        };

        let transition = self
            .cache
            .update(intent_id, |tx| tx.dispatch(reader_id))
            .await;

        let transaction = match transition {
            Some((Ok(()), tx)) => tx,
            Some((Err(e), _)) => {
                self.cache.release_reader(reader_id, Some(intent_id)).await;
                return Err(e.into());
            }
            None => {
                // Swept while the reader call was out: record what we just did.
                let mut tx = tx;
                tx.dispatch(reader_id)?;
                self.cache.insert(tx.clone()).await;
                tx
            }
        };

        info!(intent_id, reader_id = %redact(reader_id), "payment dispatched to reader");
        Ok(Dispatch {
            transaction,
            reader_action,
        })
    }

    /// Creates an intent and sends it to a reader. All input is validated before
    /// the processor is contacted.
    pub async fn create_and_dispatch(
        &self,
        amount_minor_units: Option<i64>,
        currency: Option<&str>,
        reader_id: &str,
    ) -> Result<Dispatch, AppError> {
        validate_amount(amount_minor_units)?;
        normalize_currency(currency, &self.default_currency)?;
        validate_reader_id(reader_id)?;

        if let Some(holder) = self.cache.outstanding_on_reader(reader_id).await {
            return Err(AppError::ReaderBusy(format!(
                "reader {} has an unresolved action for {}",
                redact(reader_id),
                holder
            )));
        }

        let tx = self.create_intent(amount_minor_units, currency).await?;
        self.dispatch(&tx.id, reader_id).await
    }

    pub async fn collect_payment_method(&self, reader_id: &str) -> Result<ReaderAction, AppError> {
        validate_reader_id(reader_id)?;
        let action = self.gateway.collect_payment_method(reader_id).await?;
        info!(reader_id = %redact(reader_id), "reader collecting payment method");
        Ok(action)
    }

    /// Queries the processor once and folds the result into the cached transaction.
    pub async fn check_status(&self, intent_id: &str) -> Result<StatusCheck, AppError> {
        require_intent_id(intent_id)?;

        let snapshot = self.gateway.retrieve_intent_status(intent_id).await.map_err(|e| {
            warn!(intent_id, error = %e, "status lookup failed");
            e
        })?;

        let observation = Observation::from_status(&snapshot.status);
        let now = Utc::now();
        let (changed, tx) = self
            .cache
            .upsert(
                intent_id,
                || Transaction::reconstructed(&snapshot),
                |tx| tx.observe(observation, now),
            )
            .await;

        if tx.state.is_terminal() {
            if let Some(reader_id) = tx.reader_id.as_deref() {
                self.cache.release_reader(reader_id, Some(intent_id)).await;
            }
        }

        if observation == Observation::Unknown {
            warn!(intent_id, status = %snapshot.status, "processor reported an unrecognised status");
        }
        debug!(
            intent_id,
            status = %snapshot.status,
            state = %tx.state,
            attempt = tx.attempt_count,
            "status checked"
        );

        Ok(StatusCheck {
            intent_id: intent_id.to_string(),
            status: snapshot.status,
            observation,
            state: tx.state,
            changed,
        })
    }

    pub async fn cached_state(&self, intent_id: &str) -> Option<TransactionState> {
        self.cache.get(intent_id).await.map(|tx| tx.state)
    }

    /// Rejects cancellation of a transaction known to be finished. Unknown ids pass:
    /// the processor decides for those.
    pub async fn ensure_cancelable(&self, intent_id: &str) -> Result<(), AppError> {
        match self.cache.get(intent_id).await {
            Some(tx) if tx.state.is_terminal() => Err(AppError::AlreadyTerminal(format!(
                "{} is already {}",
                intent_id, tx.state
            ))),
            _ => Ok(()),
        }
    }

    /// Reconciles the cache with a cancel the processor confirmed.
    pub async fn record_canceled(&self, snapshot: &IntentSnapshot) -> TransactionState {
        let (_, tx) = self
            .cache
            .upsert(
                &snapshot.id,
                || Transaction::reconstructed(snapshot),
                |tx| {
                    let _ = tx.cancel();
                },
            )
            .await;
        if let Some(reader_id) = tx.reader_id.as_deref() {
            self.cache.release_reader(reader_id, Some(&snapshot.id)).await;
        }
        tx.state
    }

    pub async fn release_reader(&self, reader_id: &str) {
        self.cache.release_reader(reader_id, None).await;
    }

    pub async fn record_refund(&self, intent_id: &str, refund_status: &str) -> Option<TransactionState> {
        let (_, tx) = self
            .cache
            .update(intent_id, |tx| tx.record_refund(refund_status))
            .await?;
        info!(intent_id, refund_status, state = %tx.state, "refund recorded");
        Some(tx.state)
    }

    /// Applies a verified webhook event to a tracked transaction.
    pub async fn reconcile_event(&self, event: &WebhookEvent) -> Option<TransactionState> {
        let intent_id = event.intent_id()?;
        let (_, tx) = self
            .cache
            .update(intent_id, |tx| match event.event_type.as_str() {
                "payment_intent.succeeded" => {
                    tx.apply(Observation::Succeeded);
                }
                "payment_intent.processing" => {
                    tx.apply(Observation::Processing);
                }
                "payment_intent.payment_failed" => {
                    tx.apply(Observation::Failed);
                }
                "payment_intent.canceled" => {
                    let _ = tx.cancel();
                }
                "charge.refunded" => tx.confirm_refund(),
                _ => {}
            })
            .await?;

        if tx.state.is_terminal() {
            if let Some(reader_id) = tx.reader_id.as_deref() {
                self.cache.release_reader(reader_id, Some(intent_id)).await;
            }
        }
        info!(intent_id, event_type = %event.event_type, state = %tx.state, "webhook reconciled");
        Some(tx.state)
    }
}
