use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{
    ConnectionToken, CreatedIntent, IntentSnapshot, IntentStatus, ProcessorError,
    ProcessorGateway, ReaderAction, RefundReceipt,
};

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    amount: i64,
    currency: String,
    status: IntentStatus,
    client_secret: Option<String>,
}

impl From<PaymentIntentResponse> for IntentSnapshot {
    fn from(pi: PaymentIntentResponse) -> Self {
        IntentSnapshot {
            id: pi.id,
            status: pi.status,
            amount: pi.amount,
            currency: pi.currency.to_uppercase(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReaderResponse {
    id: String,
    action: Option<ReaderActionBody>,
}

#[derive(Debug, Deserialize)]
struct ReaderActionBody {
    #[serde(rename = "type")]
    action_type: Option<String>,
    status: Option<String>,
    failure_message: Option<String>,
}

impl From<ReaderResponse> for ReaderAction {
    fn from(reader: ReaderResponse) -> Self {
        let action = reader.action;
        ReaderAction {
            reader_id: reader.id,
            action_type: action.as_ref().and_then(|a| a.action_type.clone()),
            status: action.as_ref().and_then(|a| a.status.clone()),
            failure_message: action.and_then(|a| a.failure_message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

fn counts_as_failure(err: &ProcessorError) -> bool {
    err.is_transient()
}

/// HTTP client for the payment processor's REST API
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    base_url: String,
    secret_key: Option<String>,
    circuit_breaker: Breaker,
}

impl StripeClient {
    /// Creates a new StripeClient with the specified base URL
    pub fn new(base_url: String, secret_key: Option<String>) -> Self {
        Self::with_circuit_breaker(base_url, secret_key, 3, 60)
    }

    /// Creates a new StripeClient with custom circuit breaker configuration
    pub fn with_circuit_breaker(
        base_url: String,
        secret_key: Option<String>,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        StripeClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            circuit_breaker,
        }
    }

    /// Appends `segments` under `/v1`. Each segment is percent-encoded on its own,
    /// so identifiers can never add path components or a query string.
    fn url(&self, segments: &[&str]) -> Result<Url, ProcessorError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProcessorError::new(format!("Invalid processor URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProcessorError::new("Invalid processor URL: cannot hold a path"))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    async fn post_form<T>(&self, path: &[&str], form: &[(&str, String)]) -> Result<T, ProcessorError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let url = self.url(path)?;
        self.execute(self.client.post(url).form(form)).await
    }

    async fn get<T>(&self, path: &[&str]) -> Result<T, ProcessorError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let url = self.url(path)?;
        self.execute(self.client.get(url)).await
    }

    async fn execute<T>(&self, request: RequestBuilder) -> Result<T, ProcessorError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let secret = self
            .secret_key
            .as_deref()
            .ok_or_else(|| ProcessorError::new("Processor secret key is not configured"))?;
        let request = request.bearer_auth(secret);

        let result = self
            .circuit_breaker
            .call_with(counts_as_failure, async move {
                let response = request.send().await?;
                let status = response.status();

                if status.is_success() {
                    return response.json::<T>().await.map_err(|e| {
                        ProcessorError::transport(format!("Invalid response from processor: {}", e))
                    });
                }

                let message = match response.json::<ApiErrorBody>().await {
                    Ok(body) => body
                        .error
                        .message
                        .unwrap_or_else(|| format!("Processor returned {}", status)),
                    Err(_) => format!("Processor returned {}", status),
                };

                if status.is_server_error() || status.as_u16() == 429 {
                    Err(ProcessorError::transport(message))
                } else {
                    Err(ProcessorError::new(message))
                }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(ProcessorError::transport(
                "Processor circuit breaker is open",
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[async_trait]
impl ProcessorGateway for StripeClient {
    async fn create_connection_token(&self) -> Result<ConnectionToken, ProcessorError> {
        self.post_form(&["terminal", "connection_tokens"], &[]).await
    }

    async fn create_intent(
        &self,
        amount_minor_units: i64,
        currency: &str,
    ) -> Result<CreatedIntent, ProcessorError> {
        let form = [
            ("amount", amount_minor_units.to_string()),
            ("currency", currency.to_lowercase()),
            ("payment_method_types[]", "card_present".to_string()),
            ("capture_method", "automatic".to_string()),
        ];
        let pi: PaymentIntentResponse = self.post_form(&["payment_intents"], &form).await?;
        let client_secret = pi
            .client_secret
            .ok_or_else(|| ProcessorError::new("Processor returned an intent without a client secret"))?;

        tracing::debug!(intent_id = %pi.id, amount = pi.amount, "payment intent created upstream");

        Ok(CreatedIntent {
            id: pi.id,
            client_secret,
            amount: pi.amount,
            currency: pi.currency.to_uppercase(),
            status: pi.status,
        })
    }

    async fn dispatch_to_reader(
        &self,
        intent_id: &str,
        reader_id: &str,
    ) -> Result<ReaderAction, ProcessorError> {
        let path = ["terminal", "readers", reader_id, "process_payment_intent"];
        let reader: ReaderResponse = self
            .post_form(&path, &[("payment_intent", intent_id.to_string())])
            .await?;
        Ok(reader.into())
    }

    async fn collect_payment_method(&self, reader_id: &str) -> Result<ReaderAction, ProcessorError> {
        let path = ["terminal", "readers", reader_id, "collect_payment_method"];
        let reader: ReaderResponse = self.post_form(&path, &[]).await?;
        Ok(reader.into())
    }

    async fn cancel_reader_action(&self, reader_id: &str) -> Result<ReaderAction, ProcessorError> {
        let path = ["terminal", "readers", reader_id, "cancel_action"];
        let reader: ReaderResponse = self.post_form(&path, &[]).await?;
        Ok(reader.into())
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ProcessorError> {
        let path = ["payment_intents", intent_id, "cancel"];
        let pi: PaymentIntentResponse = self.post_form(&path, &[]).await?;
        Ok(pi.into())
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount_minor_units: Option<i64>,
    ) -> Result<RefundReceipt, ProcessorError> {
        let mut form = vec![("payment_intent", intent_id.to_string())];
        if let Some(amount) = amount_minor_units {
            form.push(("amount", amount.to_string()));
        }
        let refund: RefundResponse = self.post_form(&["refunds"], &form).await?;
        Ok(RefundReceipt {
            refund_id: refund.id,
            status: refund.status,
            amount: refund.amount,
        })
    }

    async fn retrieve_intent_status(&self, intent_id: &str) -> Result<IntentSnapshot, ProcessorError> {
        let pi: PaymentIntentResponse = self.get(&["payment_intents", intent_id]).await?;
        Ok(pi.into())
    }

    fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}
