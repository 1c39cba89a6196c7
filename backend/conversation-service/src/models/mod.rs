pub mod conversation;
pub mod message;
pub mod pagination;

pub use conversation::{participant_set, Conversation, ConversationView, ParticipantState};
pub use message::{Attachment, Message, MessageSummary, MessageType};
pub use pagination::{
    PageQuery, Pagination, SortOrder, DEFAULT_CONVERSATION_LIMIT, DEFAULT_MESSAGE_LIMIT,
    MAX_LIMIT,
};
