use std::sync::Arc;
use uuid::Uuid;

use crate::database::InMemoryStore;
use crate::database::models::{ConversationKind, MessageKind, MessageStatus};
use crate::database::store::{ConversationDirectory, MessageStore};
use crate::error::ChatError;

#[tokio::test]
async fn messages_are_listed_in_send_order() {
    let store = InMemoryStore::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = store.find_or_create_direct(a, b).await.unwrap();

    let mut sent = Vec::new();
    for (i, sender) in [a, b, a, a, b].into_iter().enumerate() {
        let message = store
            .append(conversation.id, sender, &format!("m{i}"), MessageKind::Text)
            .await
            .unwrap();
        sent.push(message.id);
    }

    let listed = store.list_by_conversation(conversation.id).await.unwrap();
    assert_eq!(listed.iter().map(|m| m.id).collect::<Vec<_>>(), sent);
    assert!(listed.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
    assert!(listed.iter().all(|m| m.status == MessageStatus::Sent));
}

#[tokio::test]
async fn append_rejects_empty_text_and_unknown_conversation() {
    let store = InMemoryStore::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = store.find_or_create_direct(a, b).await.unwrap();

    assert!(matches!(
        store.append(conversation.id, a, "   ", MessageKind::Text).await,
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        store.append(Uuid::new_v4(), a, "hi", MessageKind::Text).await,
        Err(ChatError::NotFound("conversation"))
    ));
    assert!(store.list_by_conversation(conversation.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn update_status_touches_only_the_matching_message() {
    let store = InMemoryStore::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = store.find_or_create_direct(a, b).await.unwrap();
    let message = store
        .append(conversation.id, a, "hello", MessageKind::Text)
        .await
        .unwrap();

    let updated = store
        .update_status(conversation.id, message.id, MessageStatus::Read)
        .await
        .unwrap()
        .expect("message exists");
    assert_eq!(updated.status, MessageStatus::Read);
    assert_eq!(updated.text, "hello");
    assert!(updated.updated_at.is_some());

    // 消息 id 正确但会话不对
    assert!(
        store
            .update_status(Uuid::new_v4(), message.id, MessageStatus::Failed)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = InMemoryStore::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = store.find_or_create_direct(a, b).await.unwrap();
    let message = store
        .append(conversation.id, a, "oops", MessageKind::Text)
        .await
        .unwrap();

    assert!(store.delete(message.id).await.unwrap());
    assert!(!store.delete(message.id).await.unwrap());
    assert!(store.find(message.id).await.unwrap().is_none());
}

#[tokio::test]
async fn unread_count_skips_own_messages_and_resets_on_read() {
    let store = InMemoryStore::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = store.find_or_create_direct(a, b).await.unwrap();
    store
        .append(conversation.id, a, "one", MessageKind::Text)
        .await
        .unwrap();
    store
        .append(conversation.id, a, "two", MessageKind::Text)
        .await
        .unwrap();
    let last = store
        .append(conversation.id, b, "reply", MessageKind::Text)
        .await
        .unwrap();

    let for_b = store.get_user_conversations(b).await.unwrap();
    assert_eq!(for_b.len(), 1);
    assert_eq!(for_b[0].unread_count, 2);
    assert_eq!(for_b[0].last_message.as_ref().map(|m| m.id), Some(last.id));
    assert_eq!(for_b[0].members.len(), 2);
    assert_eq!(store.get_user_conversations(a).await.unwrap()[0].unread_count, 1);

    assert!(store.mark_read(conversation.id, b).await.unwrap().is_some());
    assert_eq!(store.get_user_conversations(b).await.unwrap()[0].unread_count, 0);
}

#[tokio::test]
async fn mark_read_is_monotonic_and_needs_membership() {
    let store = InMemoryStore::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = store.find_or_create_direct(a, b).await.unwrap();

    let first = store.mark_read(conversation.id, a).await.unwrap().unwrap();
    let second = store.mark_read(conversation.id, a).await.unwrap().unwrap();
    assert!(second >= first);

    assert!(
        store
            .mark_read(conversation.id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn conversations_are_listed_newest_first() {
    let store = InMemoryStore::new();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let older = store.find_or_create_direct(a, b).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let newer = store.find_or_create_direct(a, c).await.unwrap();

    let listed = store.get_user_conversations(a).await.unwrap();
    assert_eq!(
        listed.iter().map(|s| s.conversation.id).collect::<Vec<_>>(),
        vec![newer.id, older.id]
    );
    assert!(listed[0].last_message.is_none());
    assert!(store.get_user_conversations(Uuid::new_v4()).await.unwrap().is_empty());
}

#[tokio::test]
async fn each_group_has_exactly_one_conversation() {
    let store = InMemoryStore::new();
    let (group_id, creator) = (Uuid::new_v4(), Uuid::new_v4());

    let created = store
        .create_group_conversation(group_id, creator)
        .await
        .unwrap();
    let again = store
        .create_group_conversation(group_id, Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(created.id, again.id);
    assert_eq!(created.kind, ConversationKind::Group);
    assert!(created.is_consistent());
    assert!(store.is_participant(created.id, creator).await.unwrap());
    assert_eq!(
        store.get_by_group_id(group_id).await.unwrap().map(|c| c.id),
        Some(created.id)
    );
    assert!(store.get_by_group_id(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn direct_conversation_is_reused_in_either_direction() {
    let store = InMemoryStore::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let first = store.find_or_create_direct(a, b).await.unwrap();
    let second = store.find_or_create_direct(b, a).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.kind, ConversationKind::Direct);
    assert!(first.is_consistent());
    assert!(matches!(
        store.find_or_create_direct(a, a).await,
        Err(ChatError::Validation(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_contact_opens_one_direct_conversation() {
    let store = Arc::new(InMemoryStore::new());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            let (user, peer) = if i % 2 == 0 { (a, b) } else { (b, a) };
            tokio::spawn(async move { store.find_or_create_direct(user, peer).await })
        })
        .collect();
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.get_user_conversations(a).await.unwrap().len(), 1);
    assert_eq!(store.get_user_conversations(b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn add_participant_is_idempotent() {
    let store = InMemoryStore::new();
    let (group_id, creator, student) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let conversation = store
        .create_group_conversation(group_id, creator)
        .await
        .unwrap();

    let joined = store.add_participant(conversation.id, student).await.unwrap();
    let again = store.add_participant(conversation.id, student).await.unwrap();

    assert_eq!(joined, again);
    let full = store
        .get_full_conversation(conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(full.participants.len(), 2);
    assert!(matches!(
        store.add_participant(Uuid::new_v4(), student).await,
        Err(ChatError::NotFound(_))
    ));
}

#[tokio::test]
async fn full_conversation_of_unknown_id_is_none() {
    let store = InMemoryStore::new();
    assert!(
        store
            .get_full_conversation(Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );
}
