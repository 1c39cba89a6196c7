//! Message and attachment data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of payload a message carries
///
/// `Text` messages carry `content`; every other kind carries an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Document,
    Audio,
}

impl MessageType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "document" => Some(Self::Document),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
            Self::Audio => "audio",
        }
    }

    pub fn is_attachment(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(&s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("invalid message type: {s}"))
    }
}

/// Opaque reference to a file held by the blob store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Storage key / path returned by the blob store
    pub path: String,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Store-assigned position within the conversation, starting at 1
    pub sequence_number: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edited: bool,
    pub deleted: bool,
}

impl Message {
    /// Short form used in conversation listings
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            id: self.id,
            sender_id: self.sender_id,
            message_type: self.message_type,
            preview: if self.deleted {
                None
            } else {
                match &self.content {
                    Some(text) => Some(preview(text)),
                    None => self.attachment.as_ref().map(|a| a.name.clone()),
                }
            },
            created_at: self.created_at,
            deleted: self.deleted,
        }
    }
}

const PREVIEW_CHARS: usize = 100;

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: Uuid,
    pub sender_id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub preview: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}
