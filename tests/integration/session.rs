//! Session lifecycle and generate over a mock server

use crate::integration::mock_server::{
    busy_frame, content_frame, MockServerFixture, GENERATE_PATH, LANDING_PAGE,
};
use futures::StreamExt;
use gemini_web_core::client::{GenerateRequest, SessionState};
use gemini_web_core::pipeline::RetryPolicy;
use gemini_web_core::types::{ConversationHandle, ConversationState};
use gemini_web_core::Error;
use serde_json::json;
use std::time::Duration;

fn one_quick_retry() -> RetryPolicy {
    RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1))
}

#[tokio::test]
async fn test_init_acquires_token() {
    let fixture = MockServerFixture::new().await;
    let mocks = fixture.mock_landing_page(LANDING_PAGE).await;
    let session = fixture.session();
    assert_eq!(session.state(), SessionState::Idle);

    session.init().await.unwrap();
    assert!(session.is_running());
    for mock in &mocks {
        mock.assert_async().await;
    }

    // Already running: no second probe.
    session.init().await.unwrap();
}

#[tokio::test]
async fn test_init_without_token_is_auth_error() {
    let fixture = MockServerFixture::new().await;
    let _mocks = fixture.mock_landing_page("<html>Sign in</html>").await;
    let session = fixture.session();

    let err = session.init().await.unwrap_err();
    assert!(matches!(err, Error::Auth { .. }));
    assert_eq!(err.context().and_then(|c| c.account_id.as_deref()), Some("acc-1"));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_generate_returns_text_and_updates_conversation() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let generate = fixture
        .mock_generate(&[
            content_frame("c_1", "r_1", "rc_1", "Hello", false),
            json!([["di", 42]]),
            content_frame("c_1", "r_1", "rc_1", "Hello, world", true),
        ])
        .await;
    let session = fixture.session();
    session.init().await.unwrap();

    let conversation = ConversationHandle::new();
    let output = session
        .generate(GenerateRequest::new("Hi").conversation(conversation.clone()))
        .await
        .unwrap();
    assert_eq!(output.text(), "Hello, world");
    generate.assert_async().await;

    let state = conversation.state();
    assert_eq!(state.thread_id(), Some("c_1"));
    assert_eq!(state.reply_id(), Some("r_1"));
    assert_eq!(state.reply_candidate_id(), Some("rc_1"));
}

#[tokio::test]
async fn test_generate_stream_yields_deltas() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let _generate = fixture
        .mock_generate(&[
            content_frame("c_1", "r_1", "rc_1", "The", false),
            content_frame("c_1", "r_1", "rc_1", "The answer", false),
            content_frame("c_1", "r_1", "rc_1", "The answer is 42.", true),
        ])
        .await;
    let session = fixture.session();

    // Not initialized yet: the stream initializes on demand.
    let deltas: Vec<String> = session
        .generate_stream(GenerateRequest::new("Question?"))
        .map(|p| p.unwrap().text_delta().to_string())
        .collect()
        .await;
    assert_eq!(deltas, vec!["The", " answer", " is 42."]);
    assert!(session.is_running());
}

#[tokio::test]
async fn test_retry_after_busy_reply_resends_original_conversation() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let (_generate, bodies) = fixture
        .mock_generate_sequence(vec![
            vec![busy_frame("c_busy", "r_busy")],
            vec![content_frame("c_new", "r_new", "rc_new", "Fresh answer", true)],
        ])
        .await;
    let session = fixture.session_with_retry(one_quick_retry());

    let conversation = ConversationHandle::new();
    let output = session
        .generate(GenerateRequest::new("Fresh question").conversation(conversation.clone()))
        .await
        .unwrap();
    assert_eq!(output.text(), "Fresh answer");

    let bodies = bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], bodies[1]);
    assert!(!bodies[1].contains("c_busy"));

    let state = conversation.state();
    assert_eq!(state.thread_id(), Some("c_new"));
    assert_eq!(state.reply_id(), Some("r_new"));
    assert_eq!(state.reply_candidate_id(), Some("rc_new"));
    assert_eq!(conversation.last_output().map(|o| o.text().to_string()).as_deref(), Some("Fresh answer"));
}

#[tokio::test]
async fn test_stream_retry_continues_the_callers_thread() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let (_generate, bodies) = fixture
        .mock_generate_sequence(vec![
            vec![busy_frame("c_busy", "r_busy")],
            vec![
                content_frame("c_old", "r_2", "rc_2", "Second", false),
                content_frame("c_old", "r_2", "rc_2", "Second turn", true),
            ],
        ])
        .await;
    let session = fixture.session_with_retry(one_quick_retry());

    let conversation = ConversationHandle::with_state(ConversationState::from_ids("c_old", "r_1", "rc_1"));
    let deltas: Vec<String> = session
        .generate_stream(GenerateRequest::new("Follow-up").conversation(conversation.clone()))
        .map(|p| p.unwrap().text_delta().to_string())
        .collect()
        .await;
    assert_eq!(deltas, vec!["Second", " turn"]);

    let bodies = bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], bodies[1]);
    assert!(bodies[1].contains("c_old") && bodies[1].contains("rc_1"));
    assert!(!bodies[1].contains("c_busy"));

    let state = conversation.state();
    assert_eq!(state.thread_id(), Some("c_old"));
    assert_eq!(state.reply_id(), Some("r_2"));
    assert_eq!(state.reply_candidate_id(), Some("rc_2"));
}

#[tokio::test]
async fn test_failed_attempt_leaves_conversation_untouched() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let _generate = fixture.mock_generate(&[busy_frame("c_busy", "r_busy")]).await;
    let session = fixture.session();

    let conversation = ConversationHandle::new();
    let err = session
        .generate(GenerateRequest::new("Hi").conversation(conversation.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransientService { .. }));
    assert!(conversation.state().is_empty());
    assert!(conversation.last_output().is_none());
}

#[tokio::test]
async fn test_generate_error_status_closes_session() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let _generate = fixture.mock_error_response(GENERATE_PATH, 500).await;
    let session = fixture.session();
    session.init().await.unwrap();

    let err = session.generate(GenerateRequest::new("Hi")).await.unwrap_err();
    assert!(matches!(err, Error::TransientService { .. }));
    assert_eq!(err.context().and_then(|c| c.status_code), Some(500));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_service_error_code_is_typed() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let _generate = fixture
        .mock_generate(&[json!([["wrb.fr", null, null, null, null, [null, null, [[null, [1037]]]]]])])
        .await;
    let session = fixture.session();

    let err = session.generate(GenerateRequest::new("Hi")).await.unwrap_err();
    assert!(matches!(err, Error::RateLimitExceeded { .. }));
    assert!(err.triggers_cooldown());
}

#[tokio::test]
async fn test_empty_prompt_is_rejected() {
    let fixture = MockServerFixture::new().await;
    let session = fixture.session();
    let err = session.generate(GenerateRequest::new("")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_rotate_credentials_uses_cache_window() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let rotate = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/RotateCookies")
            .match_header("cookie", mockito::Matcher::Regex("__Secure-1PSIDTS=psidts-test".to_string()))
            .with_status(200)
            .with_header("set-cookie", "__Secure-1PSIDTS=rotated; Path=/; Secure; HttpOnly")
            .expect(1)
            .create_async()
            .await
    };
    let session = fixture.session();
    session.init().await.unwrap();

    assert!(session.rotate_credentials().await.unwrap());
    // Second call lands inside the minimum interval and skips the network.
    assert!(!session.rotate_credentials().await.unwrap());
    rotate.assert_async().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_init_recovers() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let session = fixture.session();
    session.init().await.unwrap();

    session.close(std::time::Duration::ZERO).await;
    session.close(std::time::Duration::ZERO).await;
    assert_eq!(session.state(), SessionState::Closed);

    session.init().await.unwrap();
    assert!(session.is_running());
}
