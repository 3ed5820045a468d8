use std::sync::Arc;

use chatfeed_storage::{ConversationId, MessageId, MessageStoreClient, NewMessage};
use tokio::task::JoinHandle;

use crate::notice::{Notice, NoticeBoard};
use crate::session::SessionContext;

/// Per-conversation text buffer and emoji-picker flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub emoji_picker_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        shift: false,
        alt: false,
        ctrl: false,
        meta: false,
    };

    pub const SHIFT: Self = Self {
        shift: true,
        ..Self::NONE
    };

    pub fn any(&self) -> bool {
        self.shift || self.alt || self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyPress {
    pub fn enter() -> Self {
        Self {
            key: Key::Enter,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn shift_enter() -> Self {
        Self {
            key: Key::Enter,
            modifiers: Modifiers::SHIFT,
        }
    }
}

#[derive(Debug)]
pub enum KeyOutcome {
    /// Enter submitted the draft; `None` when there was nothing to send.
    Submitted(Option<SendHandle>),
    NewlineInserted,
    /// Not handled here; the text field applies its default behavior.
    PassThrough,
}

/// Background create-message call started by [`Composer::submit`].
///
/// Dropping the handle detaches the send; it still completes.
#[derive(Debug)]
pub struct SendHandle {
    task: JoinHandle<Option<MessageId>>,
}

impl SendHandle {
    /// Waits for the backend; `None` when the send failed or was cancelled.
    pub async fn outcome(self) -> Option<MessageId> {
        self.task.await.ok().flatten()
    }
}

/// Draft editing and submit for one conversation.
///
/// The composer never touches the feed; sent messages come back through the
/// live subscription.
pub struct Composer {
    conversation_id: ConversationId,
    store: Arc<dyn MessageStoreClient>,
    session: Arc<dyn SessionContext>,
    notices: NoticeBoard,
    draft: Draft,
}

impl Composer {
    pub fn new(
        conversation_id: ConversationId,
        store: Arc<dyn MessageStoreClient>,
        session: Arc<dyn SessionContext>,
        notices: NoticeBoard,
    ) -> Self {
        Self {
            conversation_id,
            store,
            session,
            notices,
            draft: Draft::default(),
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn text(&self) -> &str {
        &self.draft.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.draft.text = text.into();
    }

    /// Appends at the end of the draft; the picker stays open for more picks.
    pub fn insert_emoji(&mut self, symbol: &str) {
        self.draft.text.push_str(symbol);
    }

    pub fn toggle_emoji_picker(&mut self) {
        self.draft.emoji_picker_open = !self.draft.emoji_picker_open;
    }

    /// Click outside the picker.
    pub fn dismiss_emoji_picker(&mut self) {
        self.draft.emoji_picker_open = false;
    }

    pub fn handle_key(&mut self, press: KeyPress) -> KeyOutcome {
        match press.key {
            Key::Enter if press.modifiers.any() => {
                self.draft.text.push('\n');
                KeyOutcome::NewlineInserted
            }
            Key::Enter => KeyOutcome::Submitted(self.submit()),
            Key::Other => KeyOutcome::PassThrough,
        }
    }

    /// Clears the draft and starts the create call in the background.
    ///
    /// Must run inside a tokio runtime. Returns `None` for a blank draft, or when no
    /// user is signed in (the draft is then kept and a notice raised).
    pub fn submit(&mut self) -> Option<SendHandle> {
        let text = self.draft.text.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let Some(sender_id) = self.session.current_user_id() else {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                "cannot send without a signed-in user"
            );
            self.notices.raise(Notice::SendFailed {
                message: "sign in to send messages".to_string(),
            });
            return None;
        };

        self.draft = Draft::default();

        let store = Arc::clone(&self.store);
        let notices = self.notices.clone();
        let conversation_id = self.conversation_id;
        let task = tokio::spawn(async move {
            match store
                .send_message(conversation_id, NewMessage { sender_id, text })
                .await
            {
                Ok(message_id) => {
                    tracing::debug!(
                        conversation_id = %conversation_id,
                        message_id = %message_id,
                        "message sent"
                    );
                    Some(message_id)
                }
                Err(error) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %error,
                        "failed to send message"
                    );
                    notices.raise(Notice::SendFailed {
                        message: error.to_string(),
                    });
                    None
                }
            }
        });

        Some(SendHandle { task })
    }
}
