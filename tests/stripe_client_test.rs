use mockito::Matcher;
use terminal_bridge::processor::{IntentStatus, ProcessorGateway, StripeClient};

const SECRET_KEY: &str = "sk_test_51abc";

fn client(server: &mockito::Server) -> StripeClient {
    StripeClient::new(server.url(), Some(SECRET_KEY.to_string()))
}

#[tokio::test]
async fn test_create_intent_posts_card_present_form() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/payment_intents")
        .match_header("authorization", format!("Bearer {}", SECRET_KEY).as_str())
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("amount".into(), "1000".into()),
            Matcher::UrlEncoded("currency".into(), "gbp".into()),
            Matcher::UrlEncoded("payment_method_types[]".into(), "card_present".into()),
            Matcher::UrlEncoded("capture_method".into(), "automatic".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"id":"pi_123","amount":1000,"currency":"gbp","status":"requires_payment_method","client_secret":"pi_123_secret_456"}"#,
        )
        .create_async()
        .await;

    let intent = client(&server).create_intent(1000, "GBP").await.unwrap();
    mock.assert_async().await;

    assert_eq!(intent.id, "pi_123");
    assert_eq!(intent.client_secret, "pi_123_secret_456");
    assert_eq!(intent.currency, "GBP");
    assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
}

#[tokio::test]
async fn test_dispatch_targets_reader() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/terminal/readers/tmr_abc/process_payment_intent")
        .match_body(Matcher::UrlEncoded("payment_intent".into(), "pi_123".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"id":"tmr_abc","action":{"type":"process_payment_intent","status":"in_progress","failure_message":null}}"#,
        )
        .create_async()
        .await;

    let action = client(&server)
        .dispatch_to_reader("pi_123", "tmr_abc")
        .await
        .unwrap();
    mock.assert_async().await;

    assert_eq!(action.reader_id, "tmr_abc");
    assert_eq!(action.action_type.as_deref(), Some("process_payment_intent"));
    assert_eq!(action.status.as_deref(), Some("in_progress"));
}

#[tokio::test]
async fn test_processor_message_passed_through() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/terminal/readers/tmr_abc/cancel_action")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":{"message":"Reader is currently busy processing another action.","type":"invalid_request_error"}}"#)
        .create_async()
        .await;

    let err = client(&server)
        .cancel_reader_action("tmr_abc")
        .await
        .unwrap_err();

    assert_eq!(err.message, "Reader is currently busy processing another action.");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v1/payment_intents/pi_123")
        .with_status(503)
        .create_async()
        .await;

    let err = client(&server)
        .retrieve_intent_status("pi_123")
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_partial_refund_sends_amount() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/refunds")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("payment_intent".into(), "pi_123".into()),
            Matcher::UrlEncoded("amount".into(), "250".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"re_1","status":"succeeded","amount":250}"#)
        .create_async()
        .await;

    let receipt = client(&server).refund("pi_123", Some(250)).await.unwrap();
    mock.assert_async().await;

    assert_eq!(receipt.refund_id, "re_1");
    assert_eq!(receipt.status, "succeeded");
    assert_eq!(receipt.amount, Some(250));
}

#[tokio::test]
async fn test_full_refund_omits_amount() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/refunds")
        .match_body(Matcher::Regex("^payment_intent=pi_123$".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"re_2","status":"pending","amount":1000}"#)
        .create_async()
        .await;

    let receipt = client(&server).refund("pi_123", None).await.unwrap();
    mock.assert_async().await;
    assert_eq!(receipt.status, "pending");
}

#[tokio::test]
async fn test_status_lookup_keeps_unrecognised_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v1/payment_intents/pi_123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"pi_123","amount":1000,"currency":"gbp","status":"requires_capture"}"#)
        .create_async()
        .await;

    let snapshot = client(&server).retrieve_intent_status("pi_123").await.unwrap();
    assert_eq!(snapshot.status, IntentStatus::Other("requires_capture".to_string()));
}

#[tokio::test]
async fn test_circuit_breaker_opens_after_failures() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v1/payment_intents/pi_123")
        .with_status(500)
        .expect_at_least(3)
        .create_async()
        .await;

    let client = StripeClient::with_circuit_breaker(
        server.url(),
        Some(SECRET_KEY.to_string()),
        3,
        60,
    );
    for _ in 0..3 {
        let _ = client.retrieve_intent_status("pi_123").await;
    }

    let err = client.retrieve_intent_status("pi_123").await.unwrap_err();
    assert_eq!(err.message, "Processor circuit breaker is open");
    assert_eq!(client.circuit_state(), "open");
}

#[tokio::test]
async fn test_identifiers_are_encoded_as_single_path_segments() {
    let mut server = mockito::Server::new_async().await;
    let refunds = server
        .mock("POST", "/v1/refunds")
        .expect(0)
        .create_async()
        .await;
    let cancel = server
        .mock(
            "POST",
            Matcher::Regex(r"^/v1/payment_intents/\.\.%2Frefunds%3Fpayment_intent=pi_other.*/cancel$".into()),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"pi_other","amount":1000,"currency":"gbp","status":"canceled"}"#)
        .create_async()
        .await;

    client(&server)
        .cancel_intent("../refunds?payment_intent=pi_other&x=")
        .await
        .unwrap();

    cancel.assert_async().await;
    refunds.assert_async().await;
}
