use std::time::{SystemTime, UNIX_EPOCH};

use super::ids::{ConversationId, MessageId, UserId};

/// Page size shared by the live tail and history backfill.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Server-assigned creation time in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0_i64, |duration| {
                i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
            });
        Self(micros)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    /// `None` while the write is still waiting for the server clock.
    pub created_at: Option<Timestamp>,
}

impl MessageRecord {
    /// Position used by page queries; pending records have none.
    pub fn cursor(&self) -> Option<PageCursor> {
        self.created_at.map(|created_at| PageCursor {
            created_at,
            id: self.id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub text: String,
}

/// Position of the oldest loaded message; pages are fetched strictly before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageCursor {
    pub created_at: Timestamp,
    pub id: MessageId,
}

impl PageCursor {
    /// Returns true when `record` sorts strictly before this cursor.
    pub fn is_after(&self, record: &MessageRecord) -> bool {
        match record.created_at {
            Some(created_at) => (created_at, record.id) < (self.created_at, self.id),
            None => false,
        }
    }
}
