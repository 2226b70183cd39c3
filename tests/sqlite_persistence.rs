//! Durable persistence roundtrips and cross-"process" resume on SQLite.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use chatloom::message::Message;
use chatloom::node::NodeId;
use chatloom::runtime::{
    Checkpoint, Checkpointer, Decision, RuntimeConfig, SqliteCheckpointer,
};
use chatloom::service::AgentService;
use chatloom::state::{ActionKind, Channel, ConversationState, PendingAction, RunStatus, UserProfile};
use chatloom::storage::{ActionStatus, SqliteStorage, Storage};

use common::*;

fn db_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

#[tokio::test]
async fn storage_roundtrips_all_record_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::connect(&db_path(&dir, "storage.db")).await.unwrap();

    let conversation = storage
        .find_or_create_conversation(&Channel::WhatsApp, "u1")
        .await
        .unwrap();
    let again = storage
        .find_or_create_conversation(&Channel::WhatsApp, "u1")
        .await
        .unwrap();
    assert_eq!(conversation.id, again.id);

    let msg = Message::with_id("t1:user", Message::USER, "hello");
    assert!(storage.append_message(&conversation.id, &msg).await.unwrap());
    assert!(!storage.append_message(&conversation.id, &msg).await.unwrap());
    let history = storage.recent_messages(&conversation.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hello");

    let profile = UserProfile {
        name: Some("Maria".to_string()),
        ..Default::default()
    };
    storage.upsert_profile("u1", &profile).await.unwrap();
    assert_eq!(storage.load_profile("u1").await.unwrap(), Some(profile));

    storage
        .save_user_context("u1", &Channel::WhatsApp, "Asked about refunds.")
        .await
        .unwrap();
    let memory = storage.load_user_context("u1").await.unwrap().unwrap();
    assert_eq!(memory.summary, "Asked about refunds.");
    assert_eq!(memory.conversation_count, 1);

    let action = PendingAction::new(ActionKind::Refund, "refund", "keyword");
    storage
        .record_pending_action(&conversation.id, &action, 1)
        .await
        .unwrap();
    let record = storage
        .latest_pending_action(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ActionStatus::Pending);
    assert!(storage
        .resolve_pending_action(&conversation.id, &action.id, ActionStatus::Approved)
        .await
        .unwrap());
    assert!(!storage
        .resolve_pending_action(&conversation.id, &action.id, ActionStatus::Approved)
        .await
        .unwrap());
}

#[tokio::test]
async fn message_window_keeps_send_order() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::connect(&db_path(&dir, "window.db")).await.unwrap();
    let conversation = storage
        .find_or_create_conversation(&Channel::Web, "u1")
        .await
        .unwrap();

    for i in 0..5 {
        let msg = Message::with_id(format!("t{i}:user"), Message::USER, &format!("m{i}"));
        storage.append_message(&conversation.id, &msg).await.unwrap();
    }
    let window = storage.recent_messages(&conversation.id, 3).await.unwrap();
    let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m2", "m3", "m4"]);
}

#[tokio::test]
async fn suspended_checkpoint_survives_a_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "checkpoints.db");

    {
        let checkpointer = SqliteCheckpointer::connect(&path).await.unwrap();
        let mut state = ConversationState::new_turn("c1", Channel::WhatsApp, "u1", "refund");
        state.pending_action = Some(PendingAction::new(ActionKind::Refund, "refund", "kw"));
        state.checkpoint_node = Some(NodeId::ExecuteApprovedAction);
        state.run_status = RunStatus::Suspended;
        state.generation = 1;
        checkpointer
            .save(Checkpoint::capture(&state, 10, NodeId::CreatePendingAction))
            .await
            .unwrap();
    }

    // A different connection (standing in for a different process) sees
    // the suspension exactly as recorded.
    let checkpointer = SqliteCheckpointer::connect(&path).await.unwrap();
    let loaded = checkpointer.load_latest("c1").await.unwrap().unwrap();
    assert_eq!(loaded.step, 10);
    assert_eq!(loaded.generation, 1);
    assert_eq!(loaded.state.run_status, RunStatus::Suspended);
    assert_eq!(
        loaded.state.checkpoint_node,
        Some(NodeId::ExecuteApprovedAction)
    );
    assert!(loaded.state.check_invariants().is_ok());
}

#[tokio::test]
async fn refund_flow_runs_end_to_end_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(
        SqliteStorage::connect(&db_path(&dir, "agent.db")).await.unwrap(),
    );
    let checkpointer = Arc::new(
        SqliteCheckpointer::connect(&db_path(&dir, "agent-checkpoints.db"))
            .await
            .unwrap(),
    );
    storage
        .upsert_profile(
            "u1",
            &UserProfile {
                name: Some("Maria".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let service = AgentService::new(
        storage.clone(),
        checkpointer.clone(),
        Arc::new(StubModel::new("I can help with that refund.")),
        Arc::new(EmptyRetrieval),
        Arc::new(example_bank()),
        RuntimeConfig::default().with_retry(fast_retry(3)),
    );

    let receipt = service
        .handle_message("whatsapp", "u1", "I want a refund")
        .await
        .unwrap();
    assert_eq!(receipt.run_status, RunStatus::Suspended);

    let resumed = service
        .resume(&receipt.conversation_id, Decision::Approve { note: None })
        .await
        .unwrap();
    assert_eq!(resumed.run_status, RunStatus::Completed);
    assert!(resumed.reply_text.contains("refund has been processed"));

    let record = storage
        .latest_pending_action(&receipt.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ActionStatus::Approved);
}
