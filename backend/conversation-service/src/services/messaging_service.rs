use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    participant_set, Conversation, ConversationView, Message, MessageType, Pagination, SortOrder,
};
use crate::services::blob_store::{BlobError, BlobStore, FileUpload, UploadPolicy};
use crate::services::bounded;
use crate::services::channel_auth::{conversation_channel, user_channel};
use crate::services::realtime::{events, RealtimeTransport};
use crate::store::{ConversationStore, MessageStore, NewMessage, StoreError};

pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Result of a create call; `created` is false when an existing conversation
/// with the same participant set was returned
#[derive(Debug, Clone)]
pub struct CreateConversationOutcome {
    pub view: ConversationView,
    pub created: bool,
}

/// Orchestrates conversations and messages over the stores.
///
/// Every operation checks membership or authorship before mutating anything;
/// real-time events are published afterwards and their failures are only
/// logged.
pub struct MessagingService {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    transport: Arc<dyn RealtimeTransport>,
    blobs: Arc<dyn BlobStore>,
    upload_policy: UploadPolicy,
    store_timeout: Duration,
}

impl MessagingService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        transport: Arc<dyn RealtimeTransport>,
        blobs: Arc<dyn BlobStore>,
        upload_policy: UploadPolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            conversations,
            messages,
            transport,
            blobs,
            upload_policy,
            store_timeout,
        }
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        self.upload_policy
    }

    pub async fn create_conversation(
        &self,
        requester: Uuid,
        participant_ids: &[Uuid],
        initial_message: Option<&str>,
    ) -> AppResult<CreateConversationOutcome> {
        if participant_ids.is_empty() {
            return Err(AppError::bad_request("participant_ids must not be empty"));
        }
        let participants: BTreeSet<Uuid> = participant_set(requester, participant_ids);
        if participants.len() < 2 {
            return Err(AppError::bad_request(
                "a conversation needs at least one participant besides the requester",
            ));
        }
        let initial = match initial_message {
            Some(text) => Some(NewMessage::text(requester, validate_text(Some(text))?)),
            None => None,
        };

        let created = bounded(
            self.store_timeout,
            self.conversations.create_conversation(&participants, initial),
        )
        .await?;

        tracing::info!(
            conversation_id = %created.conversation.id,
            user_id = %requester,
            participants = participants.len(),
            created = created.created,
            "conversation resolved"
        );

        if created.created {
            let payload = to_payload(&created.conversation);
            for user_id in &participants {
                self.publish(user_channel(*user_id), events::CONVERSATION_CREATED, payload.clone())
                    .await;
            }
        }
        if let Some(message) = &created.initial_message {
            self.message_sent(message).await;
        }

        let view = self.view_for(created.conversation, requester).await?;
        Ok(CreateConversationOutcome {
            view,
            created: created.created,
        })
    }

    pub async fn find_conversation(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<ConversationView> {
        let conversation = self.load_for_participant(conversation_id, requester).await?;
        self.view_for(conversation, requester).await
    }

    pub async fn list_conversations(
        &self,
        requester: Uuid,
        page: Pagination,
    ) -> AppResult<Vec<ConversationView>> {
        let conversations =
            bounded(self.store_timeout, self.conversations.list_for_user(requester, page)).await?;

        let mut views = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            views.push(self.view_for(conversation, requester).await?);
        }
        Ok(views)
    }

    pub async fn send_message(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
        message_type: MessageType,
        content: Option<&str>,
    ) -> AppResult<Message> {
        self.ensure_participant(conversation_id, requester).await?;

        if message_type.is_attachment() {
            return Err(AppError::bad_request(format!(
                "{message_type} messages must be sent as file uploads"
            )));
        }
        let content = validate_text(content)?;

        let message = bounded(
            self.store_timeout,
            self.messages
                .append(conversation_id, NewMessage::text(requester, content)),
        )
        .await
        .map_err(not_found_as_forbidden)?;

        self.message_sent(&message).await;
        Ok(message)
    }

    pub async fn send_file_message(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
        message_type: MessageType,
        file: FileUpload,
    ) -> AppResult<Message> {
        self.ensure_participant(conversation_id, requester).await?;

        let constraints = self.upload_policy.constraints_for(message_type).ok_or_else(|| {
            AppError::bad_request("text messages cannot carry an attachment")
        })?;

        let attachment = self
            .blobs
            .put(requester, file, &constraints)
            .await
            .map_err(|e| match e {
                BlobError::Rejected(reason) => AppError::BadRequest(reason),
                BlobError::Storage(detail) => {
                    tracing::error!(%conversation_id, error = %detail, "attachment upload failed");
                    AppError::Internal(detail)
                }
            })?;

        let message = bounded(
            self.store_timeout,
            self.messages.append(
                conversation_id,
                NewMessage::file(requester, message_type, attachment),
            ),
        )
        .await
        .map_err(not_found_as_forbidden)?;

        self.message_sent(&message).await;
        Ok(message)
    }

    pub async fn update_message(
        &self,
        requester: Uuid,
        message_id: Uuid,
        content: Option<&str>,
    ) -> AppResult<Message> {
        let message = self.load_own_message(message_id, requester).await?;

        if message.deleted {
            return Err(AppError::bad_request("deleted messages cannot be edited"));
        }
        if message.message_type != MessageType::Text {
            return Err(AppError::bad_request("only text messages can be edited"));
        }
        let content = validate_text(content)?;

        let updated = bounded(
            self.store_timeout,
            self.messages.update_content(message_id, &content),
        )
        .await?;

        tracing::debug!(%message_id, user_id = %requester, "message edited");
        self.publish(
            conversation_channel(updated.conversation_id),
            events::MESSAGE_UPDATED,
            to_payload(&updated),
        )
        .await;
        Ok(updated)
    }

    pub async fn delete_message(&self, requester: Uuid, message_id: Uuid) -> AppResult<()> {
        let message = self.load_own_message(message_id, requester).await?;
        if message.deleted {
            return Ok(());
        }

        let deleted = bounded(self.store_timeout, self.messages.soft_delete(message_id)).await?;

        tracing::debug!(%message_id, user_id = %requester, "message deleted");
        self.publish(
            conversation_channel(deleted.conversation_id),
            events::MESSAGE_DELETED,
            json!({
                "id": deleted.id,
                "conversation_id": deleted.conversation_id,
                "sequence_number": deleted.sequence_number,
            }),
        )
        .await;
        Ok(())
    }

    pub async fn list_messages(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
        page: Pagination,
        order: SortOrder,
    ) -> AppResult<Vec<Message>> {
        self.ensure_participant(conversation_id, requester).await?;
        let messages = bounded(
            self.store_timeout,
            self.messages.list_messages(conversation_id, page, order),
        )
        .await?;
        Ok(messages)
    }

    pub async fn mark_read(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<ConversationView> {
        let marked = bounded(
            self.store_timeout,
            self.conversations.mark_read(conversation_id, requester),
        )
        .await
        .map_err(not_found_as_forbidden)?;
        if !marked {
            return Err(AppError::Forbidden);
        }

        let conversation = self.load_for_participant(conversation_id, requester).await?;
        let last_read_at = conversation
            .participant(requester)
            .and_then(|p| p.last_read_at);

        self.publish(
            conversation_channel(conversation_id),
            events::CONVERSATION_READ,
            json!({
                "conversation_id": conversation_id,
                "user_id": requester,
                "last_read_at": last_read_at,
            }),
        )
        .await;

        self.view_for(conversation, requester).await
    }

    async fn ensure_participant(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let member = bounded(
            self.store_timeout,
            self.conversations.is_participant(conversation_id, user_id),
        )
        .await
        .map_err(not_found_as_forbidden)?;
        if member {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Non-participants and unknown ids are indistinguishable
    async fn load_for_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = bounded(
            self.store_timeout,
            self.conversations.get_conversation(conversation_id),
        )
        .await?;
        match conversation {
            Some(c) if c.is_participant(user_id) => Ok(c),
            _ => Err(AppError::Forbidden),
        }
    }

    async fn load_own_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<Message> {
        let message = bounded(self.store_timeout, self.messages.get_message(message_id))
            .await?
            .ok_or(AppError::NotFound)?;
        if message.sender_id != user_id {
            return Err(AppError::Forbidden);
        }
        Ok(message)
    }

    async fn view_for(
        &self,
        conversation: Conversation,
        viewer: Uuid,
    ) -> AppResult<ConversationView> {
        let since = conversation
            .participant(viewer)
            .and_then(|p| p.last_read_at);
        let unread_count = bounded(
            self.store_timeout,
            self.messages.unread_count(conversation.id, viewer, since),
        )
        .await?;
        let last_message = bounded(
            self.store_timeout,
            self.messages.latest_message(conversation.id),
        )
        .await?
        .map(|m| m.summary());

        Ok(ConversationView {
            conversation,
            unread_count,
            last_message,
        })
    }

    async fn message_sent(&self, message: &Message) {
        metrics::record_message_sent(message.message_type.to_db());
        tracing::debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            sequence_number = message.sequence_number,
            "message appended"
        );
        self.publish(
            conversation_channel(message.conversation_id),
            events::MESSAGE_CREATED,
            to_payload(message),
        )
        .await;
    }

    /// Best effort: bounded by the store timeout, never fails the caller
    async fn publish(&self, channel: String, event: &str, data: Value) {
        let publish = self.transport.publish(&channel, event, data);
        match tokio::time::timeout(self.store_timeout, publish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(%channel, %event, error = %e, "realtime publish failed");
            }
            Err(_) => {
                tracing::warn!(
                    %channel,
                    %event,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "realtime publish timed out"
                );
            }
        }
    }
}

/// Text payload rules: required, not blank, at most [`MAX_CONTENT_CHARS`]
/// characters. Returned untrimmed.
fn validate_text(content: Option<&str>) -> AppResult<String> {
    let content = content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(AppError::bad_request("content must not be empty"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::bad_request(format!(
            "content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(content.to_string())
}

fn not_found_as_forbidden(e: StoreError) -> AppError {
    match e {
        StoreError::NotFound => AppError::Forbidden,
        other => other.into(),
    }
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to encode event payload");
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::blob_store::MemoryBlobStore;
    use crate::services::realtime::RecordingTransport;
    use crate::store::MemoryStore;
    use bytes::Bytes;

    struct Fixture {
        service: MessagingService,
        transport: Arc<RecordingTransport>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let service = MessagingService::new(
            store.clone(),
            store,
            transport.clone(),
            Arc::new(MemoryBlobStore::new()),
            UploadPolicy::new(1024),
            Duration::from_secs(1),
        );
        Fixture { service, transport }
    }

    #[test]
    fn test_validate_text() {
        assert!(validate_text(None).is_err());
        assert!(validate_text(Some("   \n")).is_err());
        assert_eq!(validate_text(Some(" hi ")).unwrap(), " hi ");
        assert!(validate_text(Some("é".repeat(MAX_CONTENT_CHARS).as_str())).is_ok());
        assert!(validate_text(Some("a".repeat(MAX_CONTENT_CHARS + 1).as_str())).is_err());
    }

    #[tokio::test]
    async fn test_create_requires_another_participant() {
        let f = fixture();
        let a = Uuid::new_v4();
        assert!(matches!(
            f.service.create_conversation(a, &[], None).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            f.service.create_conversation(a, &[a], None).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_create_with_initial_message_publishes_events() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let outcome = f
            .service
            .create_conversation(a, &[b], Some("hello"))
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.view.unread_count, 0);
        assert_eq!(
            outcome.view.last_message.as_ref().unwrap().preview.as_deref(),
            Some("hello")
        );

        assert_eq!(f.transport.events_on(&user_channel(a)).len(), 1);
        assert_eq!(f.transport.events_on(&user_channel(b)).len(), 1);
        let on_conversation =
            f.transport.events_on(&conversation_channel(outcome.view.conversation.id));
        assert_eq!(on_conversation.len(), 1);
        assert_eq!(on_conversation[0].event, events::MESSAGE_CREATED);
    }

    #[tokio::test]
    async fn test_attachment_type_rejected_on_text_endpoint() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = f
            .service
            .create_conversation(a, &[b], None)
            .await
            .unwrap()
            .view
            .conversation
            .id;
        assert!(matches!(
            f.service
                .send_message(a, id, MessageType::Image, Some("x"))
                .await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_file_message_stores_reference() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = f
            .service
            .create_conversation(a, &[b], None)
            .await
            .unwrap()
            .view
            .conversation
            .id;

        let file = FileUpload {
            file_name: "cat.png".into(),
            content_type: "image/png".into(),
            bytes: Bytes::from_static(b"\x89PNG"),
        };
        let message = f
            .service
            .send_file_message(b, id, MessageType::Image, file.clone())
            .await
            .unwrap();
        assert_eq!(message.message_type, MessageType::Image);
        assert!(message.content.is_none());
        assert_eq!(message.attachment.as_ref().unwrap().name, "cat.png");

        let too_big = FileUpload {
            bytes: Bytes::from(vec![0u8; 2048]),
            ..file.clone()
        };
        assert!(matches!(
            f.service
                .send_file_message(b, id, MessageType::Image, too_big)
                .await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            f.service
                .send_file_message(b, id, MessageType::Audio, file.clone())
                .await,
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(
            f.service
                .send_file_message(Uuid::new_v4(), id, MessageType::Image, file)
                .await
                .unwrap_err(),
            AppError::Forbidden
        );
    }

    #[tokio::test]
    async fn test_edit_rules() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = f
            .service
            .create_conversation(a, &[b], None)
            .await
            .unwrap()
            .view
            .conversation
            .id;
        let message = f
            .service
            .send_message(a, id, MessageType::Text, Some("first"))
            .await
            .unwrap();

        let edited = f
            .service
            .update_message(a, message.id, Some("second"))
            .await
            .unwrap();
        assert!(edited.edited);
        assert_eq!(edited.content.as_deref(), Some("second"));

        assert!(matches!(
            f.service.update_message(a, message.id, Some("  ")).await,
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(
            f.service.update_message(a, Uuid::new_v4(), Some("x")).await,
            Err(AppError::NotFound)
        );

        f.service.delete_message(a, message.id).await.unwrap();
        f.service.delete_message(a, message.id).await.unwrap();
        assert!(matches!(
            f.service.update_message(a, message.id, Some("again")).await,
            Err(AppError::BadRequest(_))
        ));

        let deleted_events: Vec<_> = f
            .transport
            .events_on(&conversation_channel(id))
            .into_iter()
            .filter(|e| e.event == events::MESSAGE_DELETED)
            .collect();
        assert_eq!(deleted_events.len(), 1);
    }
}
