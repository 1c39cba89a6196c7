//! PostgreSQL store over a deadpool-postgres pool
//!
//! Ordering: `conversation_counters` holds the last sequence number and the
//! last `created_at` per conversation. Appends upsert that row, which takes its
//! row lock, so concurrent senders to one conversation are serialised while
//! different conversations never contend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use std::collections::{BTreeSet, HashMap};
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use super::{
    participant_key, ConversationStore, CreatedConversation, MessageStore, NewMessage,
    StoreError, StoreResult,
};
use crate::models::{
    Attachment, Conversation, Message, MessageType, Pagination, ParticipantState, SortOrder,
};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, sequence_number, message_type, \
     content, attachment_path, attachment_name, attachment_size, attachment_mime, \
     created_at, updated_at, edited, deleted";

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &Row) -> StoreResult<Message> {
    let raw_type: String = row.try_get("message_type")?;
    let message_type = MessageType::from_db(&raw_type)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown message_type '{raw_type}'")))?;

    let attachment = match row.try_get::<_, Option<String>>("attachment_path")? {
        Some(path) => Some(Attachment {
            path,
            name: row
                .try_get::<_, Option<String>>("attachment_name")?
                .unwrap_or_default(),
            size: row.try_get::<_, Option<i64>>("attachment_size")?.unwrap_or(0),
            mime_type: row
                .try_get::<_, Option<String>>("attachment_mime")?
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        }),
        None => None,
    };

    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        sequence_number: row.try_get("sequence_number")?,
        message_type,
        content: row.try_get("content")?,
        attachment,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        edited: row.try_get("edited")?,
        deleted: row.try_get("deleted")?,
    })
}

fn participant_from_row(row: &Row) -> StoreResult<ParticipantState> {
    Ok(ParticipantState {
        user_id: row.try_get("user_id")?,
        joined_at: row.try_get("joined_at")?,
        last_read_at: row.try_get("last_read_at")?,
    })
}

async fn load_conversation<C>(client: &C, id: Uuid) -> StoreResult<Option<Conversation>>
where
    C: GenericClient + Sync,
{
    let Some(row) = client
        .query_opt(
            "SELECT id, created_at, updated_at FROM conversations WHERE id = $1",
            &[&id],
        )
        .await?
    else {
        return Ok(None);
    };

    let participants = client
        .query(
            "SELECT user_id, joined_at, last_read_at
             FROM conversation_participants
             WHERE conversation_id = $1
             ORDER BY joined_at, user_id",
            &[&id],
        )
        .await?
        .iter()
        .map(participant_from_row)
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(Some(Conversation {
        id: row.try_get("id")?,
        participants,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

/// Insert one message and bump the conversation's `updated_at`. Must run
/// inside a transaction so the counter lock and both writes commit together.
async fn append_in_tx(
    tx: &tokio_postgres::Transaction<'_>,
    conversation_id: Uuid,
    new: NewMessage,
) -> StoreResult<Message> {
    let exists = tx
        .query_opt("SELECT 1 FROM conversations WHERE id = $1", &[&conversation_id])
        .await?
        .is_some();
    if !exists {
        return Err(StoreError::NotFound);
    }

    let attachment = new.attachment.as_ref();
    let sql = format!(
        r#"
        WITH counter AS (
            INSERT INTO conversation_counters (conversation_id, last_seq, last_message_at)
            VALUES ($1, 1, clock_timestamp())
            ON CONFLICT (conversation_id) DO UPDATE
               SET last_seq = conversation_counters.last_seq + 1,
                   last_message_at = GREATEST(
                       clock_timestamp(),
                       conversation_counters.last_message_at + INTERVAL '1 microsecond'
                   )
            RETURNING last_seq, last_message_at
        )
        INSERT INTO messages (
            id, conversation_id, sender_id, sequence_number, message_type, content,
            attachment_path, attachment_name, attachment_size, attachment_mime,
            created_at, updated_at
        )
        SELECT $2, $1, $3, counter.last_seq, $4, $5, $6, $7, $8, $9,
               counter.last_message_at, counter.last_message_at
        FROM counter
        RETURNING {MESSAGE_COLUMNS}
        "#
    );

    let row = tx
        .query_one(
            &sql,
            &[
                &conversation_id,
                &Uuid::new_v4(),
                &new.sender_id,
                &new.message_type.to_db(),
                &new.content,
                &attachment.map(|a| a.path.as_str()),
                &attachment.map(|a| a.name.as_str()),
                &attachment.map(|a| a.size),
                &attachment.map(|a| a.mime_type.as_str()),
            ],
        )
        .await?;
    let message = message_from_row(&row)?;

    tx.execute(
        "UPDATE conversations SET updated_at = GREATEST(updated_at, $2) WHERE id = $1",
        &[&conversation_id, &message.created_at],
    )
    .await?;

    Ok(message)
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn create_conversation(
        &self,
        participants: &BTreeSet<Uuid>,
        initial_message: Option<NewMessage>,
    ) -> StoreResult<CreatedConversation> {
        let key = participant_key(participants);
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // A concurrent insert of the same key blocks here until it commits,
        // then falls through to the lookup below.
        let inserted = tx
            .query_opt(
                "INSERT INTO conversations (id, participant_key, created_at, updated_at)
                 VALUES ($1, $2, NOW(), NOW())
                 ON CONFLICT (participant_key) DO NOTHING
                 RETURNING id",
                &[&Uuid::new_v4(), &key],
            )
            .await?;

        let (conversation_id, created) = match inserted {
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let members: Vec<Uuid> = participants.iter().copied().collect();
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
                     SELECT $1, member, NOW() FROM unnest($2::uuid[]) AS member",
                    &[&id, &members],
                )
                .await?;
                tx.execute(
                    "INSERT INTO conversation_counters (conversation_id) VALUES ($1)",
                    &[&id],
                )
                .await?;
                (id, true)
            }
            None => {
                let row = tx
                    .query_one(
                        "SELECT id FROM conversations WHERE participant_key = $1",
                        &[&key],
                    )
                    .await?;
                (row.try_get::<_, Uuid>("id")?, false)
            }
        };

        let initial_message = match initial_message {
            Some(new) => Some(append_in_tx(&tx, conversation_id, new).await?),
            None => None,
        };

        let conversation = load_conversation(&*tx, conversation_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        tx.commit().await?;

        Ok(CreatedConversation {
            conversation,
            created,
            initial_message,
        })
    }

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        load_conversation(&**client, id).await
    }

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM conversation_participants
                 WHERE conversation_id = $1 AND user_id = $2",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        page: Pagination,
    ) -> StoreResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT c.id, c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = $1
                 ORDER BY c.updated_at DESC, c.id DESC
                 LIMIT $2 OFFSET $3",
                &[&user_id, &page.limit, &page.offset],
            )
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids = rows
            .iter()
            .map(|r| r.try_get::<_, Uuid>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        let mut participants: HashMap<Uuid, Vec<ParticipantState>> = HashMap::new();
        for row in client
            .query(
                "SELECT conversation_id, user_id, joined_at, last_read_at
                 FROM conversation_participants
                 WHERE conversation_id = ANY($1)
                 ORDER BY joined_at, user_id",
                &[&ids],
            )
            .await?
        {
            let conversation_id: Uuid = row.try_get("conversation_id")?;
            participants
                .entry(conversation_id)
                .or_default()
                .push(participant_from_row(&row)?);
        }

        rows.iter()
            .map(|row| -> StoreResult<Conversation> {
                let id: Uuid = row.try_get("id")?;
                Ok(Conversation {
                    id,
                    participants: participants.remove(&id).unwrap_or_default(),
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Appends hold the counter row lock until commit; sharing it makes
        // in-flight messages visible before the mark is taken.
        let last_message_at: Option<DateTime<Utc>> = tx
            .query_opt(
                "SELECT last_message_at FROM conversation_counters
                 WHERE conversation_id = $1
                 FOR SHARE",
                &[&conversation_id],
            )
            .await?
            .map(|row| row.try_get::<_, Option<DateTime<Utc>>>("last_message_at"))
            .transpose()?
            .flatten();

        // GREATEST ignores NULLs: never behind the newest message, never backwards
        let updated = tx
            .execute(
                "UPDATE conversation_participants
                 SET last_read_at = GREATEST(last_read_at, clock_timestamp(), $3)
                 WHERE conversation_id = $1 AND user_id = $2",
                &[&conversation_id, &user_id, &last_message_at],
            )
            .await?;
        tx.commit().await?;
        Ok(updated > 0)
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn append(&self, conversation_id: Uuid, message: NewMessage) -> StoreResult<Message> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let message = append_in_tx(&tx, conversation_id, message).await?;
        tx.commit().await?;
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        client
            .query_opt(&sql, &[&id])
            .await?
            .as_ref()
            .map(message_from_row)
            .transpose()
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: Pagination,
        order: SortOrder,
    ) -> StoreResult<Vec<Message>> {
        let direction = match order {
            SortOrder::NewestFirst => "DESC",
            SortOrder::OldestFirst => "ASC",
        };
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at {direction}, id {direction}
             LIMIT $2 OFFSET $3"
        );

        let client = self.pool.get().await?;
        client
            .query(&sql, &[&conversation_id, &page.limit, &page.offset])
            .await?
            .iter()
            .map(message_from_row)
            .collect()
    }

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        );
        client
            .query_opt(&sql, &[&conversation_id])
            .await?
            .as_ref()
            .map(message_from_row)
            .transpose()
    }

    async fn unread_count(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS unread FROM messages
                 WHERE conversation_id = $1
                   AND sender_id <> $2
                   AND NOT deleted
                   AND ($3::timestamptz IS NULL OR created_at > $3)",
                &[&conversation_id, &user_id, &since],
            )
            .await?;
        Ok(row.try_get("unread")?)
    }

    async fn update_content(&self, id: Uuid, content: &str) -> StoreResult<Message> {
        let client = self.pool.get().await?;
        // A delete committed first makes the row fail the NOT deleted recheck
        let sql = format!(
            "UPDATE messages
             SET content = $2,
                 edited = TRUE,
                 updated_at = GREATEST(updated_at, clock_timestamp())
             WHERE id = $1 AND NOT deleted
             RETURNING {MESSAGE_COLUMNS}"
        );
        if let Some(row) = client.query_opt(&sql, &[&id, &content]).await? {
            return message_from_row(&row);
        }

        // Deletion is terminal, so an existing row here is a deleted one
        let exists = client
            .query_opt("SELECT 1 FROM messages WHERE id = $1", &[&id])
            .await?
            .is_some();
        Err(if exists {
            StoreError::Deleted
        } else {
            StoreError::NotFound
        })
    }

    async fn soft_delete(&self, id: Uuid) -> StoreResult<Message> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE messages
             SET updated_at = CASE WHEN deleted THEN updated_at
                                   ELSE GREATEST(updated_at, clock_timestamp()) END,
                 deleted = TRUE,
                 content = NULL,
                 attachment_path = NULL,
                 attachment_name = NULL,
                 attachment_size = NULL,
                 attachment_mime = NULL
             WHERE id = $1
             RETURNING {MESSAGE_COLUMNS}"
        );
        let row = client
            .query_opt(&sql, &[&id])
            .await?
            .ok_or(StoreError::NotFound)?;
        message_from_row(&row)
    }
}
