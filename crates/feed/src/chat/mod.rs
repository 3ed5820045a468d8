pub mod events;
pub mod merge;
pub mod message;
pub mod message_input;
pub mod room;
pub mod scroll_manager;
pub mod synchronizer;

pub use events::{AnchorHint, BackfillOutcome, ChangeKind, FeedChange, FeedEvent, FeedStatus};
pub use message::{ConversationId, FeedKey, Message, MessageId, MessageView, PageCursor, Timestamp, UserId};
pub use message_input::{Composer, Draft, Key, KeyOutcome, KeyPress, Modifiers, SendHandle};
pub use room::{ChatRoom, ChatServices};
pub use scroll_manager::{ScrollCommand, ScrollMetrics, ViewportController};
pub use synchronizer::{FeedSynchronizer, ObserverId};
