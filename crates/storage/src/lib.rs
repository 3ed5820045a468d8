pub mod error;
pub mod ids;
pub mod live;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ConversationId, MessageId, UserId};
pub use live::{
    BoxFuture, LiveEvent, LiveTail, LiveTailCancel, LiveTailHandle, LiveTailWorker,
    live_tail_channel,
};
pub use memory::InMemoryMessageStore;
pub use sqlite::SqliteMessageStore;
pub use types::{DEFAULT_PAGE_SIZE, MessageRecord, NewMessage, PageCursor, Timestamp};

/// Backend conversation stream reduced to the primitives the feed needs.
pub trait MessageStoreClient: Send + Sync {
    /// Opens a standing listener over the newest `page_size` messages.
    fn subscribe_live_tail(
        &self,
        conversation_id: ConversationId,
        page_size: usize,
    ) -> StorageResult<LiveTailHandle>;

    /// Returns up to `page_size` messages strictly older than `before`, newest first.
    fn fetch_older_page<'a>(
        &'a self,
        conversation_id: ConversationId,
        before: PageCursor,
        page_size: usize,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>>;

    /// Creates a message; the backend assigns its id and timestamp.
    fn send_message<'a>(
        &'a self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageId>>;
}
