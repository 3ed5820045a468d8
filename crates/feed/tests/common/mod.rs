#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use chatfeed::Message;
use chatfeed_storage::{
    BoxFuture, ConversationId, LiveEvent, LiveTailHandle, LiveTailWorker, MessageId,
    MessageRecord, MessageStoreClient, NewMessage, PageCursor, StorageError, StorageResult,
    Timestamp, UserId, live_tail_channel,
};
use tokio::sync::{Notify, mpsc, oneshot};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

pub fn message_id(index: u128) -> MessageId {
    MessageId::from_u128(index)
}

pub fn record(conversation_id: ConversationId, index: u128) -> MessageRecord {
    MessageRecord {
        id: message_id(index),
        conversation_id,
        sender_id: UserId::new("bob"),
        text: format!("m{index}"),
        created_at: Some(Timestamp::from_micros(index as i64)),
    }
}

pub fn message(index: u128) -> Message {
    Message::new(
        message_id(index),
        "bob",
        format!("m{index}"),
        Some(Timestamp::from_micros(index as i64)),
    )
}

/// Oldest first, inclusive.
pub fn messages(from: u128, to: u128) -> Vec<Message> {
    (from..=to).map(message).collect()
}

/// Newest first, the way backends deliver pages.
pub fn descending_records(conversation_id: ConversationId, from: u128, to: u128) -> Vec<MessageRecord> {
    (from..=to).rev().map(|index| record(conversation_id, index)).collect()
}

pub fn texts(feed: &[Message]) -> Vec<String> {
    feed.iter().map(|message| message.text.clone()).collect()
}

/// Error a remote backend reports when it cannot be reached.
pub fn backend_error(stage: &'static str, details: &str) -> StorageError {
    StorageError::SqliteQuery {
        stage,
        source: sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, details.to_string())),
    }
}

struct ScriptedSubscription {
    events: mpsc::UnboundedSender<LiveEvent>,
    cancelled: oneshot::Receiver<()>,
}

impl ScriptedSubscription {
    fn is_released(&mut self) -> bool {
        // A sent cancel or a dropped cancel side both end the subscription.
        !matches!(self.cancelled.try_recv(), Err(oneshot::error::TryRecvError::Empty))
            || self.events.is_closed()
    }
}

/// Store double with queued page results and a hand-driven live tail.
#[derive(Default)]
pub struct ScriptedStore {
    pages: Mutex<VecDeque<StorageResult<Vec<MessageRecord>>>>,
    fetch_calls: AtomicUsize,
    fetch_cursors: Mutex<Vec<PageCursor>>,
    send_calls: AtomicUsize,
    sent: Mutex<Vec<NewMessage>>,
    fail_sends: Mutex<bool>,
    send_gate: Mutex<Option<Arc<Notify>>>,
    subscriptions: Mutex<Vec<ScriptedSubscription>>,
    refuse_subscribe: Mutex<bool>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_page(&self, page: Vec<MessageRecord>) {
        self.pages.lock().expect("pages lock").push_back(Ok(page));
    }

    pub fn push_page_error(&self, details: &str) {
        self.pages
            .lock()
            .expect("pages lock")
            .push_back(Err(backend_error("scripted-fetch", details)));
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_cursors(&self) -> Vec<PageCursor> {
        self.fetch_cursors.lock().expect("cursor lock").clone()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<NewMessage> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn fail_sends(&self) {
        *self.fail_sends.lock().expect("send flag lock") = true;
    }

    /// Holds every send until the returned gate is notified.
    pub fn gate_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().expect("gate lock") = Some(Arc::clone(&gate));
        gate
    }

    pub fn refuse_subscriptions(&self) {
        *self.refuse_subscribe.lock().expect("subscribe flag lock") = true;
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.lock().expect("live lock").len()
    }

    /// Subscriptions that have not been released yet.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .expect("live lock")
            .iter_mut()
            .map(ScriptedSubscription::is_released)
            .filter(|released| !released)
            .count()
    }

    /// Delivers to the newest subscription; false when it was released.
    pub fn emit(&self, event: LiveEvent) -> bool {
        let mut subscriptions = self.subscriptions.lock().expect("live lock");
        let Some(subscription) = subscriptions.last_mut() else {
            return false;
        };
        !subscription.is_released() && subscription.events.send(event).is_ok()
    }

    pub fn newest_subscription_closed(&self) -> bool {
        self.subscriptions
            .lock()
            .expect("live lock")
            .last_mut()
            .is_none_or(ScriptedSubscription::is_released)
    }
}

impl MessageStoreClient for ScriptedStore {
    fn subscribe_live_tail(
        &self,
        conversation_id: ConversationId,
        _page_size: usize,
    ) -> StorageResult<LiveTailHandle> {
        if *self.refuse_subscribe.lock().expect("subscribe flag lock") {
            return Err(backend_error("scripted-subscribe", "subscriptions are refused"));
        }

        let (events, stream, cancelled) = live_tail_channel(conversation_id);
        self.subscriptions
            .lock()
            .expect("live lock")
            .push(ScriptedSubscription { events, cancelled });
        let worker: LiveTailWorker = Box::pin(std::future::pending());
        Ok(LiveTailHandle { stream, worker })
    }

    fn fetch_older_page<'a>(
        &'a self,
        _conversation_id: ConversationId,
        before: PageCursor,
        _page_size: usize,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.fetch_cursors.lock().expect("cursor lock").push(before);
            // Suspend once so concurrent callers interleave.
            tokio::task::yield_now().await;
            self.pages
                .lock()
                .expect("pages lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        })
    }

    fn send_message<'a>(
        &'a self,
        _conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageId>> {
        Box::pin(async move {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.send_gate.lock().expect("gate lock").clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            if *self.fail_sends.lock().expect("send flag lock") {
                return Err(backend_error("scripted-send", "backend unavailable"));
            }

            self.sent.lock().expect("sent lock").push(input);
            Ok(MessageId::new_v7())
        })
    }
}

/// Serves backfill pages out of a fixed conversation history; live windows are pushed by
/// the test itself.
pub struct HistoryStore {
    history: Vec<MessageRecord>,
}

impl HistoryStore {
    /// Holds `1..=len`, message `n` stamped at `n`.
    pub fn new(conversation_id: ConversationId, len: u128) -> Arc<Self> {
        Arc::new(Self {
            history: (1..=len).map(|index| record(conversation_id, index)).collect(),
        })
    }
}

impl MessageStoreClient for HistoryStore {
    fn subscribe_live_tail(
        &self,
        conversation_id: ConversationId,
        _page_size: usize,
    ) -> StorageResult<LiveTailHandle> {
        let (_events, stream, _cancelled) = live_tail_channel(conversation_id);
        let worker: LiveTailWorker = Box::pin(async {});
        Ok(LiveTailHandle { stream, worker })
    }

    fn fetch_older_page<'a>(
        &'a self,
        _conversation_id: ConversationId,
        before: PageCursor,
        page_size: usize,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(self
                .history
                .iter()
                .rev()
                .filter(|record| before.is_after(record))
                .take(page_size)
                .cloned()
                .collect())
        })
    }

    fn send_message<'a>(
        &'a self,
        _conversation_id: ConversationId,
        _input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageId>> {
        Box::pin(async { Err(backend_error("history-send", "history is read-only")) })
    }
}
