use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::message::MessageSummary;

/// Per-participant read state. Only the participant themself moves `last_read_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    /// `None` means the participant has never read the conversation
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<ParticipantState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&ParticipantState> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_ids(&self) -> BTreeSet<Uuid> {
        self.participants.iter().map(|p| p.user_id).collect()
    }
}

/// A conversation as seen by one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Messages from other participants newer than the viewer's read mark
    pub unread_count: i64,
    pub last_message: Option<MessageSummary>,
}

/// Normalised participant set for a new conversation: requester plus the
/// requested ids, de-duplicated and ordered.
pub fn participant_set(requester: Uuid, requested: &[Uuid]) -> BTreeSet<Uuid> {
    requested
        .iter()
        .copied()
        .chain(std::iter::once(requester))
        .collect()
}
