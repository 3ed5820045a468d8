use crate::chat::message::MessageId;

/// How the merged feed changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Append,
    Prepend,
    Replace,
}

/// Where the viewport should be after the change is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorHint {
    ScrollToBottom,
    /// Keep this message (the previous first row) at the same on-screen position.
    KeepInPlace { message_id: MessageId },
    Unchanged,
}

/// Change descriptor emitted after each accepted feed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedChange {
    pub kind: ChangeKind,
    /// Number of identifiers that were not in the feed before.
    pub added: usize,
    pub anchor: AnchorHint,
}

impl FeedChange {
    pub fn append(added: usize) -> Self {
        Self {
            kind: ChangeKind::Append,
            added,
            anchor: AnchorHint::ScrollToBottom,
        }
    }

    pub fn prepend(added: usize, previous_first: Option<MessageId>) -> Self {
        Self {
            kind: ChangeKind::Prepend,
            added,
            anchor: previous_first
                .map(|message_id| AnchorHint::KeepInPlace { message_id })
                .unwrap_or(AnchorHint::Unchanged),
        }
    }

    pub fn replace(added: usize) -> Self {
        Self {
            kind: ChangeKind::Replace,
            added,
            anchor: AnchorHint::Unchanged,
        }
    }
}

/// Notification delivered to feed observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Changed(FeedChange),
    SubscriptionFailed { message: String },
    BackfillFailed { message: String },
}

/// Result of one `load_older_page` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackfillOutcome {
    pub added: usize,
}

impl BackfillOutcome {
    pub const NONE: Self = Self { added: 0 };
}

/// Connection state of the live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeedStatus {
    /// Waiting for the first snapshot.
    #[default]
    Connecting,
    Live,
    Failed { message: String },
}
