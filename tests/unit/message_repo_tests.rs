use std::sync::Arc;

use chrono::Utc;

use flowgentic::models::message::{MessagePayload, SessionMessage};
use flowgentic::persistence::{db, message_repo::MessageRepo};

fn message(session_id: &str, sequence: u64, text: &str) -> SessionMessage {
    SessionMessage {
        session_id: session_id.to_owned(),
        sequence,
        payload: MessagePayload::AgentMessage {
            text: text.to_owned(),
        },
        created_at: Utc::now(),
    }
}

async fn repo() -> MessageRepo {
    let database = Arc::new(db::connect_memory().await.expect("db connect"));
    MessageRepo::new(database)
}

#[tokio::test]
async fn append_and_list_round_trips_payloads() {
    let repo = repo().await;
    repo.append(&message("s-1", 1, "hello")).await.expect("append");
    repo.append(&message("s-1", 3, "world")).await.expect("append");

    let listed = repo.list_after("s-1", 0).await.expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].sequence, 1);
    assert_eq!(listed[1].sequence, 3);
    assert!(matches!(
        &listed[0].payload,
        MessagePayload::AgentMessage { text } if text == "hello"
    ));
}

#[tokio::test]
async fn list_after_excludes_the_cursor() {
    let repo = repo().await;
    for seq in 1..=5 {
        repo.append(&message("s-1", seq, "m")).await.expect("append");
    }

    let after = repo.list_after("s-1", 3).await.expect("list");
    let sequences: Vec<u64> = after.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![4, 5]);
}

#[tokio::test]
async fn sequences_are_isolated_per_session() {
    let repo = repo().await;
    repo.append(&message("s-1", 1, "a")).await.expect("append");
    repo.append(&message("s-2", 1, "b")).await.expect("append");

    assert_eq!(repo.list_after("s-1", 0).await.expect("list").len(), 1);
    assert_eq!(repo.list_after("s-2", 0).await.expect("list").len(), 1);
}

#[tokio::test]
async fn duplicate_sequences_are_rejected() {
    let repo = repo().await;
    repo.append(&message("s-1", 7, "first")).await.expect("append");
    assert!(repo.append(&message("s-1", 7, "second")).await.is_err());
}

#[tokio::test]
async fn max_sequence_reports_the_high_watermark() {
    let repo = repo().await;
    assert_eq!(repo.max_sequence("s-1").await.expect("query"), None);

    repo.append(&message("s-1", 4, "m")).await.expect("append");
    repo.append(&message("s-1", 9, "m")).await.expect("append");
    assert_eq!(repo.max_sequence("s-1").await.expect("query"), Some(9));
}
