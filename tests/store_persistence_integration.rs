//! Integration tests for the conversation store over SQLite
//!
//! Exercises the full store-to-database path: conversations and messages
//! survive reopening the database, owners only see their own rows, and
//! deleting a conversation takes its messages with it.

mod common;

use std::sync::Arc;

use common::{create_temp_backend, store_for};
use parley::storage::{PersistenceBackend, Role, SqliteBackend};

#[tokio::test]
async fn test_conversation_survives_reopen() {
    let (backend, tmp) = create_temp_backend();
    let db_path = backend.db_path().to_path_buf();
    let backend = Arc::new(backend);
    let store = store_for(&backend, "alice");

    let id = store.create_conversation(Some("Recipes")).await.unwrap();
    store
        .append_message(&id, Role::User, "What can I cook with leeks?", None)
        .await
        .unwrap();
    store
        .append_message(&id, Role::Assistant, "Leek and potato soup.", Some(6))
        .await
        .unwrap();
    drop(store);
    drop(backend);

    let reopened = Arc::new(SqliteBackend::new_with_path(&db_path).unwrap());
    let store = store_for(&reopened, "alice");

    let conversation = store.get_conversation(&id).await.unwrap();
    assert_eq!(conversation.title, "Recipes");
    assert_eq!(conversation.message_count, 2);

    let messages = store.load_messages(&id).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].tokens, None);
    assert_eq!(messages[1].content, "Leek and potato soup.");
    assert_eq!(messages[1].tokens, Some(6));

    drop(tmp);
}

#[tokio::test]
async fn test_list_is_most_recently_updated_first() {
    let (backend, _tmp) = create_temp_backend();
    let backend = Arc::new(backend);
    let store = store_for(&backend, "alice");

    let older = store.create_conversation(Some("Older")).await.unwrap();
    let newer = store.create_conversation(Some("Newer")).await.unwrap();

    let titles: Vec<String> = store
        .list_conversations()
        .await
        .into_iter()
        .map(|c| c.title)
        .collect();
    assert_eq!(titles, vec!["Newer", "Older"]);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store
        .append_message(&older, Role::User, "bump", None)
        .await
        .unwrap();

    let ids: Vec<String> = store
        .list_conversations()
        .await
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![older, newer]);
}

#[tokio::test]
async fn test_active_conversation_is_latest_created() {
    let (backend, _tmp) = create_temp_backend();
    let backend = Arc::new(backend);
    let store = store_for(&backend, "alice");

    let first = store.get_or_create_active_conversation(None).await.unwrap();
    assert_eq!(store.get_or_create_active_conversation(None).await.unwrap(), first);

    let second = store.create_conversation(Some("Second")).await.unwrap();
    assert_eq!(store.get_or_create_active_conversation(None).await.unwrap(), second);
}

#[tokio::test]
async fn test_owners_are_isolated() {
    let (backend, _tmp) = create_temp_backend();
    let backend = Arc::new(backend);
    let alice = store_for(&backend, "alice");
    let bob = store_for(&backend, "bob");

    let id = alice.create_conversation(Some("Private")).await.unwrap();
    alice.append_message(&id, Role::User, "secret", None).await.unwrap();

    assert!(bob.list_conversations().await.is_empty());
    assert!(bob.get_conversation(&id).await.is_none());
    assert!(bob.load_messages(&id).await.is_empty());
    assert!(bob.append_message(&id, Role::User, "intrusion", None).await.is_none());
    assert!(!bob.rename_conversation(&id, "Mine now").await);
    assert!(!bob.delete_conversation(&id).await);

    let conversation = alice.get_conversation(&id).await.unwrap();
    assert_eq!(conversation.title, "Private");
    assert_eq!(conversation.message_count, 1);
}

#[tokio::test]
async fn test_delete_removes_messages() {
    let (backend, _tmp) = create_temp_backend();
    let backend = Arc::new(backend);
    let store = store_for(&backend, "alice");

    let id = store.create_conversation(None).await.unwrap();
    store.append_message(&id, Role::User, "one", None).await.unwrap();
    store.append_message(&id, Role::Assistant, "two", Some(1)).await.unwrap();

    assert!(store.delete_conversation(&id).await);
    assert!(store.get_conversation(&id).await.is_none());
    assert_eq!(backend.count_messages(&id).unwrap(), 0);
    assert!(!store.delete_conversation(&id).await);
}

#[tokio::test]
async fn test_messages_keep_insertion_order() {
    let (backend, _tmp) = create_temp_backend();
    let backend = Arc::new(backend);
    let store = store_for(&backend, "alice");

    let id = store.create_conversation(None).await.unwrap();
    for i in 0..10 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        store
            .append_message(&id, role, &format!("message {}", i), None)
            .await
            .unwrap();
    }

    let contents: Vec<String> = store
        .load_messages(&id)
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("message {}", i)).collect();
    assert_eq!(contents, expected);
}
