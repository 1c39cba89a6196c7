//! PostgreSQL store tests
//!
//! Run with a scratch database:
//! `TEST_DATABASE_URL=postgres://... cargo test -p conversation-service -- --ignored`

use conversation_service::db;
use conversation_service::models::{participant_set, MessageType, Pagination, SortOrder};
use conversation_service::store::{ConversationStore, MessageStore, NewMessage, PgStore, StoreError};
use serial_test::serial;
use std::sync::Arc;
use uuid::Uuid;

async fn pool() -> db_pool::PgPool {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    db::init_pool(&url).await.expect("pool and migrations")
}

async fn store() -> PgStore {
    PgStore::new(pool().await)
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_create_dedup_and_initial_message() {
    let store = store().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let set = participant_set(a, &[b]);

    let first = store
        .create_conversation(&set, Some(NewMessage::text(a, "hello")))
        .await
        .unwrap();
    assert!(first.created);
    assert_eq!(first.initial_message.as_ref().unwrap().sequence_number, 1);

    let second = store.create_conversation(&set, None).await.unwrap();
    assert!(!second.created);
    assert_eq!(second.conversation.id, first.conversation.id);

    let found = store
        .get_conversation(first.conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.participants.len(), 2);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_concurrent_appends_are_totally_ordered() {
    let store = Arc::new(store().await);
    let senders: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let set = participant_set(senders[0], &senders[1..]);
    let id = store.create_conversation(&set, None).await.unwrap().conversation.id;

    let mut handles = Vec::new();
    for sender in senders.iter().copied() {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.append(id, NewMessage::text(sender, "race")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let messages = store
        .list_messages(id, Pagination::new(100, 0), SortOrder::OldestFirst)
        .await
        .unwrap();
    let positions: Vec<i64> = messages.iter().map(|m| m.sequence_number).collect();
    assert_eq!(positions, (1..=8).collect::<Vec<i64>>());
    for pair in messages.windows(2) {
        assert!(pair[0].created_at < pair[1].created_at);
    }

    let conversation = store.get_conversation(id).await.unwrap().unwrap();
    assert!(conversation.updated_at >= messages.last().unwrap().created_at);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_read_marks_and_unread_counts() {
    let store = store().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let id = store
        .create_conversation(&participant_set(a, &[b]), None)
        .await
        .unwrap()
        .conversation
        .id;

    store.append(id, NewMessage::text(a, "one")).await.unwrap();
    let two = store.append(id, NewMessage::text(a, "two")).await.unwrap();
    assert_eq!(store.unread_count(id, b, None).await.unwrap(), 2);
    assert_eq!(store.unread_count(id, a, None).await.unwrap(), 0);

    store.soft_delete(two.id).await.unwrap();
    assert_eq!(store.unread_count(id, b, None).await.unwrap(), 1);

    assert!(store.mark_read(id, b).await.unwrap());
    let conversation = store.get_conversation(id).await.unwrap().unwrap();
    let b_mark = conversation.participant(b).unwrap().last_read_at;
    assert!(b_mark.is_some());
    assert!(conversation.participant(a).unwrap().last_read_at.is_none());
    assert_eq!(store.unread_count(id, b, b_mark).await.unwrap(), 0);

    // A later message is unread again; the earlier mark never moves back
    let three = store.append(id, NewMessage::text(a, "three")).await.unwrap();
    assert_eq!(store.unread_count(id, b, b_mark).await.unwrap(), 1);
    assert!(store.mark_read(id, b).await.unwrap());
    let conversation = store.get_conversation(id).await.unwrap().unwrap();
    let second_mark = conversation.participant(b).unwrap().last_read_at.unwrap();
    assert!(second_mark >= three.created_at);
    assert!(Some(second_mark) >= b_mark);

    assert!(!store.mark_read(id, Uuid::new_v4()).await.unwrap());
    assert!(!store.is_participant(id, Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_edit_and_soft_delete() {
    let store = store().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let id = store
        .create_conversation(&participant_set(a, &[b]), None)
        .await
        .unwrap()
        .conversation
        .id;
    let message = store.append(id, NewMessage::text(a, "draft")).await.unwrap();
    assert_eq!(message.message_type, MessageType::Text);

    let edited = store.update_content(message.id, "final").await.unwrap();
    assert!(edited.edited);
    assert_eq!(edited.content.as_deref(), Some("final"));

    let deleted = store.soft_delete(message.id).await.unwrap();
    assert!(deleted.deleted);
    assert!(deleted.content.is_none());
    assert_eq!(deleted.sequence_number, message.sequence_number);

    assert_eq!(
        store.update_content(message.id, "again").await.unwrap_err(),
        StoreError::Deleted
    );
    let stored = store.get_message(message.id).await.unwrap().unwrap();
    assert!(stored.deleted);
    assert!(stored.content.is_none());

    assert_eq!(
        store.update_content(Uuid::new_v4(), "x").await.unwrap_err(),
        StoreError::NotFound
    );
    assert_eq!(
        store
            .append(Uuid::new_v4(), NewMessage::text(a, "orphan"))
            .await
            .unwrap_err(),
        StoreError::NotFound
    );
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_mark_read_waits_for_uncommitted_append() {
    let pool = pool().await;
    let store = Arc::new(PgStore::new(pool.clone()));
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let id = store
        .create_conversation(&participant_set(a, &[b]), None)
        .await
        .unwrap()
        .conversation
        .id;

    // Hold the counter row the way an append does until it commits
    let mut client = pool.get().await.unwrap();
    let tx = client.transaction().await.unwrap();
    tx.execute(
        "UPDATE conversation_counters SET last_seq = last_seq WHERE conversation_id = $1",
        &[&id],
    )
    .await
    .unwrap();

    let marking = tokio::spawn({
        let store = store.clone();
        async move { store.mark_read(id, b).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!marking.is_finished());

    tx.commit().await.unwrap();
    assert!(marking.await.unwrap().unwrap());
}
