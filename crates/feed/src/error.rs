use chatfeed_storage::{ConversationId, StorageError};
use snafu::Snafu;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FeedError {
    #[snafu(display("failed to open live tail for conversation {conversation_id} on `{stage}`: {source}"))]
    OpenLiveTail {
        stage: &'static str,
        conversation_id: ConversationId,
        source: StorageError,
    },
    #[snafu(display("chat room for conversation {conversation_id} is closed"))]
    RoomClosed {
        stage: &'static str,
        conversation_id: ConversationId,
    },
    #[snafu(display("failed to open message store at '{database_path}' on `{stage}`: {source}"))]
    OpenStore {
        stage: &'static str,
        database_path: String,
        source: StorageError,
    },
}
