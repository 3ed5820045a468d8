use std::sync::Arc;

use tokio::sync::watch;

/// User-visible status line shared by the room, composer and upload flows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Notice {
    #[default]
    None,
    SendFailed { message: String },
    UploadFailed { message: String },
    BackfillFailed { message: String },
}

impl Notice {
    pub fn is_none(&self) -> bool {
        matches!(self, Notice::None)
    }
}

/// Latest-value notice channel; a new notice replaces the previous one.
#[derive(Clone)]
pub struct NoticeBoard {
    sender: Arc<watch::Sender<Notice>>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Notice::None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn raise(&self, notice: Notice) {
        tracing::debug!(notice = ?notice, "raising notice");
        self.sender.send_replace(notice);
    }

    pub fn dismiss(&self) {
        self.sender.send_replace(Notice::None);
    }

    pub fn current(&self) -> Notice {
        self.sender.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Notice> {
        self.sender.subscribe()
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new()
    }
}
