use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::domain::intent_id_from_reference;
use crate::error::AppError;
use crate::processor::ProcessorError;
use crate::services::StepOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub reader_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReaderRequest {
    pub reader_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelPaymentRequest {
    pub reader_id: Option<String>,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundPaymentRequest {
    pub payment_intent_id: Option<String>,
    pub amount: Option<i64>,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

fn resolve_reader(state: &AppState, requested: Option<&str>) -> Result<String, AppError> {
    state
        .config
        .resolve_reader_id(requested)
        .ok_or_else(|| AppError::Validation("reader_id is required".to_string()))
}

fn required_intent_reference(reference: Option<&str>) -> Result<&str, AppError> {
    reference
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(intent_id_from_reference)
        .ok_or_else(|| AppError::Validation("payment_intent_id is required".to_string()))
}

/// Dashboard bootstrap: hands the shared credential to the page that serves it.
pub async fn get_api_key(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let api_key = state
        .config
        .api_key
        .as_deref()
        .ok_or_else(|| AppError::Misconfigured("API_KEY is not set".to_string()))?;

    Ok(Json(json!({ "apiKey": api_key })))
}

pub async fn get_reader_id(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let reader_id = state
        .config
        .default_reader_id
        .as_deref()
        .ok_or_else(|| AppError::Misconfigured("READER_ID is not set".to_string()))?;

    Ok(Json(json!({ "reader_id": reader_id })))
}

pub async fn create_connection_token(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let token = state.gateway.create_connection_token().await?;
    Ok(Json(json!({ "secret": token.secret })))
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    payload: Result<Json<CreatePaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    if request.amount.is_none() {
        return Err(AppError::Validation("amount is required".to_string()));
    }
    let reader_id = resolve_reader(&state, request.reader_id.as_deref())?;

    let dispatch = state
        .coordinator
        .create_and_dispatch(request.amount, request.currency.as_deref(), &reader_id)
        .await?;

    Ok(Json(json!({
        "client_secret": dispatch.transaction.client_secret,
        "payment_intent_id": dispatch.transaction.id,
        "reader_action": dispatch.reader_action,
        "state": dispatch.transaction.state,
        "message": "Payment request sent to terminal. Waiting for confirmation...",
    })))
}

/// Manual amount entry: the reader collects a card without a pre-created intent.
pub async fn collect_payment_method(
    State(state): State<AppState>,
    payload: Result<Json<ReaderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let reader_id = resolve_reader(&state, request.reader_id.as_deref())?;

    let action = state.coordinator.collect_payment_method(&reader_id).await?;
    Ok(Json(json!({
        "reader_action": action,
        "message": "Reader is collecting a payment method",
    })))
}

pub async fn check_payment_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let intent_id = required_intent_reference(query.payment_intent_id.as_deref())?;

    let check = state.coordinator.check_status(intent_id).await?;
    Ok(Json(json!({
        "payment_intent_id": check.intent_id,
        "status": check.status,
        "state": check.state,
        "observation": check.observation,
        "message": check.observation.client_message(),
    })))
}

/// Runs one server-side polling session and reports where it ended.
pub async fn await_payment_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let intent_id = required_intent_reference(query.payment_intent_id.as_deref())?;

    let outcome = state.poller.run(intent_id).await?;
    Ok(Json(json!({
        "payment_intent_id": outcome.intent_id,
        "status": outcome.status,
        "state": outcome.state,
        "observation": outcome.observation,
        "attempts": outcome.attempts,
        "last_error": outcome.last_error,
        "message": outcome.message(),
    })))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    payload: Result<Json<CancelPaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let reader_id = resolve_reader(&state, request.reader_id.as_deref())?;
    let intent_id = request
        .payment_intent_id
        .as_deref()
        .map(intent_id_from_reference);

    let outcome = state
        .compensation
        .cancel(intent_id, Some(&reader_id))
        .await?;

    if !outcome.any_succeeded() {
        if let StepOutcome::Rejected(msg) = &outcome.intent {
            return Err(AppError::AlreadyTerminal(msg.clone()));
        }
        return Err(ProcessorError::new(outcome.errors().join("; ")).into());
    }

    let message = if outcome.all_succeeded() {
        "Transaction canceled successfully on POS"
    } else {
        "Transaction partially canceled; check the failed step"
    };

    Ok(Json(json!({
        "message": message,
        "reader_id": reader_id,
        "payment_intent_id": outcome.intent_id,
        "intent": outcome.intent,
        "reader_action": outcome.reader_action,
        "state": outcome.state,
    })))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    payload: Result<Json<RefundPaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let intent_id = required_intent_reference(request.payment_intent_id.as_deref())?;

    let refund = state.compensation.refund(intent_id, request.amount).await?;
    let message = match refund.status.as_str() {
        "succeeded" => "Refund processed",
        "pending" => "Refund requested; awaiting confirmation",
        _ => "Refund submitted; check the refund status",
    };

    Ok(Json(json!({
        "refund_id": refund.refund_id,
        "status": refund.status,
        "amount": refund.amount,
        "state": refund.state,
        "message": message,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Observation;

    #[test]
    fn test_required_intent_reference() {
        assert_eq!(required_intent_reference(Some("pi_1")).unwrap(), "pi_1");
        assert_eq!(required_intent_reference(Some("pi_1_secret_zz")).unwrap(), "pi_1");
        assert!(required_intent_reference(Some("  ")).is_err());
        assert!(required_intent_reference(None).is_err());
    }

    #[test]
    fn test_unknown_message_is_not_success() {
        assert_ne!(
            Observation::Unknown.client_message(),
            Observation::Succeeded.client_message()
        );
    }
}
