//! In-process store
//!
//! A single `RwLock` guards all state, so every trait method is atomic and
//! appends to one conversation are serialised exactly like the row lock on
//! `conversation_counters` in PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    participant_key, ConversationStore, CreatedConversation, MessageStore, NewMessage,
    StoreError, StoreResult,
};
use crate::models::{Conversation, Message, Pagination, ParticipantState, SortOrder};

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    by_participants: HashMap<String, Uuid>,
    /// Message ids per conversation in order
    timelines: HashMap<Uuid, Vec<Uuid>>,
    messages: HashMap<Uuid, Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Truncate to microseconds so both backends expose the same precision
fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

impl Inner {
    fn append(&mut self, conversation_id: Uuid, new: NewMessage) -> StoreResult<Message> {
        let timeline = self.timelines.entry(conversation_id).or_default();
        let previous = timeline.last().and_then(|id| self.messages.get(id));

        let now = now_micros();
        let created_at = match previous {
            Some(prev) if prev.created_at >= now => prev.created_at + Duration::microseconds(1),
            _ => now,
        };
        let sequence_number = previous.map(|p| p.sequence_number + 1).unwrap_or(1);

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: new.sender_id,
            sequence_number,
            message_type: new.message_type,
            content: new.content,
            attachment: new.attachment,
            created_at,
            updated_at: created_at,
            edited: false,
            deleted: false,
        };

        timeline.push(message.id);
        self.messages.insert(message.id, message.clone());

        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound)?;
        if conversation.updated_at < created_at {
            conversation.updated_at = created_at;
        }

        Ok(message)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(
        &self,
        participants: &BTreeSet<Uuid>,
        initial_message: Option<NewMessage>,
    ) -> StoreResult<CreatedConversation> {
        let mut inner = self.inner.write().await;
        let key = participant_key(participants);

        let existing = inner.by_participants.get(&key).copied();
        let (conversation_id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let now = now_micros();
                let conversation = Conversation {
                    id: Uuid::new_v4(),
                    participants: participants
                        .iter()
                        .map(|user_id| ParticipantState {
                            user_id: *user_id,
                            joined_at: now,
                            last_read_at: None,
                        })
                        .collect(),
                    created_at: now,
                    updated_at: now,
                };
                let id = conversation.id;
                inner.by_participants.insert(key, id);
                inner.timelines.insert(id, Vec::new());
                inner.conversations.insert(id, conversation);
                (id, true)
            }
        };

        let initial_message = match initial_message {
            Some(new) => Some(inner.append(conversation_id, new)?),
            None => None,
        };

        let conversation = inner
            .conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        Ok(CreatedConversation {
            conversation,
            created,
            initial_message,
        })
    }

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .map(|c| c.is_participant(user_id))
            .unwrap_or(false))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        page: Pagination,
    ) -> StoreResult<Vec<Conversation>> {
        let inner = self.inner.read().await;
        let mut mine: Vec<&Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .collect();
        mine.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));

        Ok(mine
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let newest = inner
            .timelines
            .get(&conversation_id)
            .and_then(|t| t.last())
            .and_then(|id| inner.messages.get(id))
            .map(|m| m.created_at);

        let Some(conversation) = inner.conversations.get_mut(&conversation_id) else {
            return Ok(false);
        };
        let Some(participant) = conversation
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
        else {
            return Ok(false);
        };

        let now = now_micros();
        let read_at = match newest {
            Some(newest) if newest > now => newest,
            _ => now,
        };
        participant.last_read_at = participant.last_read_at.max(Some(read_at));
        Ok(true)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, conversation_id: Uuid, message: NewMessage) -> StoreResult<Message> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(StoreError::NotFound);
        }
        inner.append(conversation_id, message)
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        Ok(self.inner.read().await.messages.get(&id).cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: Pagination,
        order: SortOrder,
    ) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let Some(timeline) = inner.timelines.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        let ordered: Box<dyn Iterator<Item = &Uuid> + '_> = match order {
            SortOrder::OldestFirst => Box::new(timeline.iter()),
            SortOrder::NewestFirst => Box::new(timeline.iter().rev()),
        };

        Ok(ordered
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect())
    }

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .timelines
            .get(&conversation_id)
            .and_then(|t| t.last())
            .and_then(|id| inner.messages.get(id))
            .cloned())
    }

    async fn unread_count(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        let count = inner
            .timelines
            .get(&conversation_id)
            .map(|t| {
                t.iter()
                    .filter_map(|id| inner.messages.get(id))
                    .filter(|m| !m.deleted && m.sender_id != user_id)
                    .filter(|m| since.map_or(true, |since| m.created_at > since))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as i64)
    }

    async fn update_content(&self, id: Uuid, content: &str) -> StoreResult<Message> {
        let mut inner = self.inner.write().await;
        let message = inner.messages.get_mut(&id).ok_or(StoreError::NotFound)?;
        if message.deleted {
            return Err(StoreError::Deleted);
        }
        message.content = Some(content.to_string());
        message.edited = true;
        message.updated_at = now_micros().max(message.updated_at);
        Ok(message.clone())
    }

    async fn soft_delete(&self, id: Uuid) -> StoreResult<Message> {
        let mut inner = self.inner.write().await;
        let message = inner.messages.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !message.deleted {
            message.deleted = true;
            message.content = None;
            message.attachment = None;
            message.updated_at = now_micros().max(message.updated_at);
        }
        Ok(message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pair() -> BTreeSet<Uuid> {
        [Uuid::new_v4(), Uuid::new_v4()].into_iter().collect()
    }

    #[tokio::test]
    async fn test_create_is_deduplicated_by_participant_set() {
        let store = MemoryStore::new();
        let set = pair();

        let first = store.create_conversation(&set, None).await.unwrap();
        let second = store.create_conversation(&set, None).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.conversation.id, second.conversation.id);

        let other = store.create_conversation(&pair(), None).await.unwrap();
        assert!(other.created);
        assert_ne!(other.conversation.id, first.conversation.id);
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_positions() {
        let store = MemoryStore::new();
        let set = pair();
        let sender = *set.iter().next().unwrap();
        let conv = store.create_conversation(&set, None).await.unwrap().conversation;

        let mut previous: Option<Message> = None;
        for i in 0..50 {
            let m = store
                .append(conv.id, NewMessage::text(sender, format!("m{i}")))
                .await
                .unwrap();
            if let Some(p) = &previous {
                assert_eq!(m.sequence_number, p.sequence_number + 1);
                assert!(m.created_at > p.created_at);
            }
            previous = Some(m);
        }

        let updated = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(updated.updated_at, previous.unwrap().created_at);
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_positions() {
        let store = Arc::new(MemoryStore::new());
        let set = pair();
        let conv_id = store.create_conversation(&set, None).await.unwrap().conversation.id;

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                let sender = Uuid::new_v4();
                tokio::spawn(async move {
                    store.append(conv_id, NewMessage::text(sender, "hi")).await
                })
            })
            .collect();

        let mut seqs = BTreeSet::new();
        for h in handles {
            seqs.insert(h.await.unwrap().unwrap().sequence_number);
        }
        assert_eq!(seqs.len(), 32);
        assert_eq!(seqs.iter().copied().max(), Some(32));
    }

    #[tokio::test]
    async fn test_append_to_unknown_conversation() {
        let store = MemoryStore::new();
        let err = store
            .append(Uuid::new_v4(), NewMessage::text(Uuid::new_v4(), "hi"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_slot() {
        let store = MemoryStore::new();
        let set = pair();
        let sender = *set.iter().next().unwrap();
        let conv = store.create_conversation(&set, None).await.unwrap().conversation;
        let m = store.append(conv.id, NewMessage::text(sender, "oops")).await.unwrap();

        let deleted = store.soft_delete(m.id).await.unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.content, None);
        assert_eq!(deleted.sequence_number, m.sequence_number);

        let page = store
            .list_messages(conv.id, Pagination::new(10, 0), SortOrder::OldestFirst)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);

        assert_eq!(
            store.update_content(m.id, "back again").await.unwrap_err(),
            StoreError::Deleted
        );
        let stored = store.get_message(m.id).await.unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.content, None);
    }

    #[tokio::test]
    async fn test_mark_read_only_touches_caller() {
        let store = MemoryStore::new();
        let set = pair();
        let mut ids = set.iter().copied();
        let (a, b) = (ids.next().unwrap(), ids.next().unwrap());
        let conv = store.create_conversation(&set, None).await.unwrap().conversation;

        assert!(store.mark_read(conv.id, a).await.unwrap());
        assert!(!store.mark_read(conv.id, Uuid::new_v4()).await.unwrap());

        let conv = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert!(conv.participant(a).unwrap().last_read_at.is_some());
        assert!(conv.participant(b).unwrap().last_read_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_read_never_moves_backwards() {
        let store = MemoryStore::new();
        let set = pair();
        let a = *set.iter().next().unwrap();
        let conv = store.create_conversation(&set, None).await.unwrap().conversation;

        let ahead = now_micros() + Duration::hours(1);
        {
            let mut inner = store.inner.write().await;
            let participant = inner
                .conversations
                .get_mut(&conv.id)
                .unwrap()
                .participants
                .iter_mut()
                .find(|p| p.user_id == a)
                .unwrap();
            participant.last_read_at = Some(ahead);
        }

        assert!(store.mark_read(conv.id, a).await.unwrap());
        let conv = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(conv.participant(a).unwrap().last_read_at, Some(ahead));
    }
}
