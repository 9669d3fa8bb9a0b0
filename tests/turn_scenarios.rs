//! End-to-end turn scenarios driven through the turn controller

mod common;

use common::{controller, final_event, record_statuses, reply, token, FakeBackend};
use parlance::backend::{BackendClient, QueryEvent, RestBackend};
use parlance::conversation::Role;
use parlance::integration::{TurnEnvelope, TurnInput, TurnState};
use parlance::session::{Emotion, TurnPhase};
use parlance::ParlanceError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_stop_before_response_discards_late_reply() {
    let (backend, gate) = FakeBackend::gated(vec![reply(vec![
        QueryEvent::Start,
        final_event("Too late", None),
    ])]);
    let (mut controller, queue) = controller(Arc::new(backend));

    queue.push("what is an atom");
    let old = controller.start_turn().unwrap();
    controller.step().await;
    assert_eq!(controller.state(), TurnState::Querying);

    assert!(controller.stop());
    gate.notify_waiters();

    // Anything the old turn already queued is dropped on arrival
    controller.handle_input(TurnEnvelope {
        generation: old,
        input: TurnInput::Reply(QueryEvent::Start),
    });
    controller.handle_input(TurnEnvelope {
        generation: old,
        input: TurnInput::Reply(final_event("Too late", None)),
    });

    // Stopped is the idle phase reached by a manual stop
    let status = controller.status();
    assert_eq!(status.phase, TurnPhase::Stopped);
    assert!(status.phase.accepts_new_turn());
    assert_eq!(status.status_text, "Stopped");
    assert_eq!(status.emotion, Emotion::Neutral);

    let messages = &controller.store().active().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::User);
    assert!(!controller.is_turn_active());
}

#[tokio::test]
async fn test_stop_right_after_start_appends_nothing() {
    let backend = Arc::new(FakeBackend::new(vec![reply(vec![final_event("Late", None)])]));
    let (mut controller, queue) = controller(backend.clone());

    queue.push("what is an atom");
    let old = controller.start_turn().unwrap();
    // Let the capture task finish and queue its transcript
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(controller.stop());

    let late = tokio::time::timeout(Duration::from_secs(1), controller.next_input())
        .await
        .expect("capture reported before the stop")
        .expect("input channel open");
    assert_eq!(late.generation, old);
    assert!(matches!(late.input, TurnInput::Captured(Ok(_))));
    controller.handle_input(late);

    // Only the greeting remains
    assert_eq!(controller.store().active().messages.len(), 1);
    assert!(backend.queries.lock().is_empty());
    let status = controller.status();
    assert!(status.phase.accepts_new_turn());
    assert_eq!(status.status_text, "Stopped");
    assert_eq!(status.emotion, Emotion::Neutral);
    assert_eq!(controller.state(), TurnState::Interrupted);
}

#[tokio::test]
async fn test_utterance_typed_while_busy_is_not_replayed() {
    let (backend, _gate) = FakeBackend::gated(vec![]);
    let (mut controller, queue) = controller(Arc::new(backend));

    queue.push("first question");
    controller.start_turn().unwrap();
    controller.step().await;
    assert_eq!(controller.state(), TurnState::Querying);

    queue.push("typed while busy");
    assert_eq!(controller.start_turn(), Err(ParlanceError::AlreadyActive));
    assert_eq!(controller.state(), TurnState::Querying);

    controller.stop();
    queue.push("second question");
    controller.start_turn().unwrap();
    controller.step().await;

    let last = controller.store().active().last_message().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.text, "second question");
}

#[tokio::test]
async fn test_tokens_accumulate_into_one_message() {
    let backend = FakeBackend::new(vec![reply(vec![
        QueryEvent::Start,
        token("Hel"),
        token("lo"),
        final_event("Hello", None),
    ])]);
    let (mut controller, queue) = controller(Arc::new(backend));
    let statuses = record_statuses(&mut controller);

    queue.push("say hello");
    controller.start_turn().unwrap();
    controller.run_turn().await;

    let messages = &controller.store().active().messages;
    let replies: Vec<_> = messages
        .iter()
        .skip(1)
        .filter(|m| m.role == Role::Assistant)
        .collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].text, "Hello");
    assert_eq!(replies[0].emotion, Some(Emotion::Happy));

    let statuses = statuses.lock();
    let speaking = statuses
        .iter()
        .find(|s| s.phase == TurnPhase::Speaking)
        .expect("turn reached Speaking");
    assert_eq!(speaking.emotion, Emotion::Happy);
    assert_eq!(statuses.last().unwrap().phase, TurnPhase::Idle);
}

#[tokio::test]
async fn test_final_supersedes_streamed_text() {
    let backend = FakeBackend::new(vec![reply(vec![
        QueryEvent::Start,
        token("Draft"),
        final_event("Polished answer", Some("excited")),
    ])]);
    let (mut controller, queue) = controller(Arc::new(backend));

    queue.push("explain");
    controller.start_turn().unwrap();
    controller.run_turn().await;

    let last = controller.store().active().last_message().unwrap().clone();
    assert_eq!(last.text, "Polished answer");
    assert_eq!(last.emotion, Some(Emotion::Excited));
}

#[tokio::test]
async fn test_switch_mid_turn_leaves_target_idle() {
    let (backend, gate) = FakeBackend::gated(vec![reply(vec![
        QueryEvent::Start,
        final_event("For A", None),
    ])]);
    let (mut controller, queue) = controller(Arc::new(backend));

    let conversation_b = controller.new_chat();
    let conversation_a = controller.new_chat();

    queue.push("question for A");
    controller.start_turn().unwrap();
    controller.step().await;
    assert_eq!(controller.status().phase, TurnPhase::Thinking);

    controller.switch_conversation(conversation_b).unwrap();
    gate.notify_waiters();

    let status = controller.status();
    assert_eq!(status.phase, TurnPhase::Idle);
    assert_eq!(status.emotion, Emotion::Neutral);
    assert_eq!(controller.store().active_id(), conversation_b);
    assert_eq!(controller.store().get(conversation_b).unwrap().messages.len(), 1);

    let a = controller.store().get(conversation_a).unwrap();
    assert!(a.messages.iter().all(|m| m.text != "For A"));
    assert_eq!(a.title, "question for A");
}

#[tokio::test]
async fn test_backend_error_becomes_one_friendly_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "rate limited"})))
        .mount(&server)
        .await;

    let client = BackendClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let (mut controller, queue) = controller(Arc::new(RestBackend::new(client)));

    queue.push("how do magnets work");
    controller.start_turn().unwrap();
    controller.run_turn().await;

    let messages = &controller.store().active().messages;
    assert_eq!(messages.len(), 3);
    let explanation = &messages[2];
    assert_eq!(explanation.role, Role::Assistant);
    assert!(!explanation.text.is_empty());
    assert!(!explanation.text.contains("rate limited"));
    assert_eq!(
        explanation.text,
        ParlanceError::Backend(String::new()).user_message()
    );

    let status = controller.status();
    assert_eq!(status.phase, TurnPhase::Error);
    assert_eq!(status.emotion, Emotion::Sad);
}

#[tokio::test]
async fn test_error_after_start_reuses_placeholder() {
    let backend = FakeBackend::new(vec![reply(vec![
        QueryEvent::Start,
        QueryEvent::Error {
            message: "model overloaded".into(),
        },
    ])]);
    let (mut controller, queue) = controller(Arc::new(backend));

    queue.push("hi");
    controller.start_turn().unwrap();
    controller.run_turn().await;

    let messages = &controller.store().active().messages;
    assert_eq!(messages.len(), 3);
    assert!(!messages[2].text.is_empty());
    assert_eq!(controller.state(), TurnState::Errored);
}

#[tokio::test]
async fn test_stream_closing_early_keeps_partial_text() {
    let backend = FakeBackend::new(vec![reply(vec![QueryEvent::Start, token("Partial")])]);
    let (mut controller, queue) = controller(Arc::new(backend));

    queue.push("hi");
    controller.start_turn().unwrap();
    controller.run_turn().await;

    let messages = &controller.store().active().messages;
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].text, "Partial");
    assert_eq!(
        messages[3].text,
        ParlanceError::Transport(String::new()).user_message()
    );
    assert_eq!(controller.status().phase, TurnPhase::Error);
}

#[tokio::test]
async fn test_synthesis_failure_appends_message() {
    let backend = FakeBackend::new(vec![reply(vec![final_event("Answer", None)])])
        .failing_synthesis(ParlanceError::Transport("connection refused".into()));
    let (mut controller, queue) = controller(Arc::new(backend));

    queue.push("hi");
    controller.start_turn().unwrap();
    controller.run_turn().await;

    let messages = &controller.store().active().messages;
    assert_eq!(messages[2].text, "Answer");
    assert_eq!(
        messages[3].text,
        ParlanceError::Transport(String::new()).user_message()
    );
    assert_eq!(controller.status().emotion, Emotion::Sad);
}

#[tokio::test]
async fn test_first_message_titles_new_chat_once() {
    let backend = FakeBackend::new(vec![
        reply(vec![final_event("One", None)]),
        reply(vec![final_event("Two", None)]),
    ]);
    let backend = Arc::new(backend);
    let (mut controller, queue) = controller(backend.clone());
    let id = controller.new_chat();

    queue.push("Why is the sky blue during the day but red at sunset?");
    controller.start_turn().unwrap();
    controller.run_turn().await;
    let title = controller.store().get(id).unwrap().title.clone();
    assert_eq!(title, "Why is the sky blue during the...");

    queue.push("And at night?");
    controller.start_turn().unwrap();
    controller.run_turn().await;
    assert_eq!(controller.store().get(id).unwrap().title, title);
    assert_eq!(backend.queries.lock().len(), 2);
}

#[tokio::test]
async fn test_deleting_turn_conversation_interrupts() {
    let (backend, _gate) = FakeBackend::gated(vec![]);
    let (mut controller, queue) = controller(Arc::new(backend));
    let id = controller.new_chat();

    queue.push("hi");
    controller.start_turn().unwrap();
    controller.step().await;

    assert_eq!(controller.delete_conversation(id), Ok(true));
    assert_eq!(controller.state(), TurnState::Interrupted);
    assert!(!controller.is_turn_active());
    assert!(controller.store().get(id).is_none());
}
