pub use chatfeed_storage::{ConversationId, MessageId, PageCursor, Timestamp, UserId};
use chatfeed_storage::MessageRecord;

/// Feed-side message, decoupled from the storage record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub text: String,
    /// `None` until the server clock confirms the write.
    pub created_at: Option<Timestamp>,
}

/// Total order of the feed: confirmed messages by time then id, pending ones last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey {
    pending: bool,
    created_at: Option<Timestamp>,
    id: MessageId,
}

impl Message {
    pub fn new(
        id: MessageId,
        sender_id: impl Into<UserId>,
        text: impl Into<String>,
        created_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id,
            sender_id: sender_id.into(),
            text: text.into(),
            created_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.created_at.is_none()
    }

    pub fn feed_key(&self) -> FeedKey {
        FeedKey {
            pending: self.is_pending(),
            created_at: self.created_at,
            id: self.id,
        }
    }

    pub fn cursor(&self) -> Option<PageCursor> {
        self.created_at.map(|created_at| PageCursor {
            created_at,
            id: self.id,
        })
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            sender_id: record.sender_id,
            text: record.text,
            created_at: record.created_at,
        }
    }
}

/// Render-ready projection of one feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: Option<Timestamp>,
    pub is_own: bool,
    pub pending: bool,
}

impl MessageView {
    pub fn project(message: &Message, current_user: Option<&UserId>) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id.clone(),
            text: message.text.clone(),
            created_at: message.created_at,
            is_own: current_user == Some(&message.sender_id),
            pending: message.is_pending(),
        }
    }
}
