//! End-to-end turn scenarios through the service façade.

mod common;

use std::sync::Arc;

use chatloom::runtime::Checkpointer;
use chatloom::service::{FALLBACK_REPLY, ServiceError};
use chatloom::state::{Intent, RunStatus};
use chatloom::storage::Storage;

use common::*;

#[tokio::test]
async fn known_user_turn_completes_with_reply_and_intent() {
    let h = harness("We are open 9am to 6pm.");
    seed_profile(&h.storage, "u1", "Maria").await;

    let receipt = h
        .service
        .handle_message("whatsapp", "u1", "What are your hours?")
        .await
        .unwrap();

    assert_eq!(receipt.run_status, RunStatus::Completed);
    assert_eq!(receipt.reply_text, "We are open 9am to 6pm.");
    assert_eq!(receipt.intent, Some(Intent::Support));

    let messages = h
        .storage
        .recent_messages(&receipt.conversation_id, 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "We are open 9am to 6pm.");
}

#[tokio::test]
async fn first_contact_asks_for_name_then_learns_it() {
    let h = harness("Happy to help!");

    let first = h
        .service
        .handle_message("whatsapp", "u-new", "what are your hours?")
        .await
        .unwrap();
    assert_eq!(first.run_status, RunStatus::Completed);
    assert!(first.reply_text.contains("name"));

    let second = h
        .service
        .handle_message("whatsapp", "u-new", "My name is Maria")
        .await
        .unwrap();
    assert_eq!(second.run_status, RunStatus::Completed);

    let profile = h.storage.load_profile("u-new").await.unwrap().unwrap();
    assert_eq!(profile.name.as_deref(), Some("Maria"));
}

#[tokio::test]
async fn empty_retrieval_still_produces_a_reply() {
    // The harness retrieval client is always empty; the run must complete
    // on few-shot examples and profile alone.
    let h = harness("Here is what I can tell you.");
    seed_profile(&h.storage, "u1", "Sam").await;

    let receipt = h
        .service
        .handle_message("web", "u1", "tell me about your service")
        .await
        .unwrap();
    assert_eq!(receipt.run_status, RunStatus::Completed);
    assert_eq!(receipt.reply_text, "Here is what I can tell you.");
}

#[tokio::test]
async fn malformed_messages_are_rejected_before_any_state_exists() {
    let h = harness("unused");

    for (channel, user, content) in [("", "u1", "hi"), ("web", "", "hi"), ("web", "u1", "  ")] {
        let err = h
            .service
            .handle_message(channel, user, content)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    // No conversation or checkpoint was created along the way.
    assert!(h.checkpointer.list_conversations().await.unwrap().is_empty());
}

#[tokio::test]
async fn transient_model_outage_is_retried_to_success() {
    let h = harness_with(Arc::new(FlakyModel::new(2, "Recovered fine.")), test_config());
    seed_profile(&h.storage, "u1", "Maria").await;

    let receipt = h
        .service
        .handle_message("web", "u1", "are you there?")
        .await
        .unwrap();
    assert_eq!(receipt.run_status, RunStatus::Completed);
}

#[tokio::test]
async fn persistent_outage_fails_the_run_with_a_generic_reply() {
    let h = harness_with(Arc::new(DownModel), test_config());
    seed_profile(&h.storage, "u1", "Maria").await;

    let receipt = h
        .service
        .handle_message("web", "u1", "are you there?")
        .await
        .unwrap();
    assert_eq!(receipt.run_status, RunStatus::Failed);
    assert_eq!(receipt.reply_text, FALLBACK_REPLY);
}

#[tokio::test]
async fn concurrent_messages_for_one_conversation_serialize() {
    let h = harness("Understood.");
    seed_profile(&h.storage, "u1", "Maria").await;

    let s1 = h.service.clone();
    let s2 = h.service.clone();
    let (a, b) = tokio::join!(
        s1.handle_message("web", "u1", "first message"),
        s2.handle_message("web", "u1", "second message"),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.conversation_id, b.conversation_id);

    // Both turns landed, and turns never interleave: each user message is
    // followed by its own assistant reply.
    let messages = h
        .storage
        .recent_messages(&a.conversation_id, 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[2].role, "user");
    assert_eq!(messages[3].role, "assistant");
    let users: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .collect();
    assert!(users.contains(&"first message"));
    assert!(users.contains(&"second message"));
}

#[tokio::test]
async fn long_conversations_update_long_term_memory() {
    let mut config = test_config();
    config.summarize_after_messages = 1;
    let h = harness_with(Arc::new(StubModel::new("Noted.")), config);
    seed_profile(&h.storage, "u1", "Maria").await;

    let receipt = h
        .service
        .handle_message("web", "u1", "I keep having trouble logging in")
        .await
        .unwrap();
    assert_eq!(receipt.run_status, RunStatus::Completed);

    let memory = h.storage.load_user_context("u1").await.unwrap().unwrap();
    assert_eq!(memory.summary, "The user asked about support topics.");
}

#[tokio::test]
async fn short_conversations_skip_summarization() {
    let h = harness("Short answer.");
    seed_profile(&h.storage, "u1", "Maria").await;

    h.service
        .handle_message("web", "u1", "hi")
        .await
        .unwrap();
    assert!(h.storage.load_user_context("u1").await.unwrap().is_none());
}
