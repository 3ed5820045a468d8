use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snafu::ensure;
use tokio::sync::broadcast;

use super::error::{EmptyMessageTextSnafu, InvalidPageSizeSnafu, StorageResult};
use super::ids::{ConversationId, MessageId};
use super::live::{BoxFuture, LiveTailHandle, LiveTailWorker, live_tail_channel, run_live_tail_worker};
use super::types::{MessageRecord, NewMessage, PageCursor, Timestamp};
use super::MessageStoreClient;

const CHANGE_FEED_CAPACITY: usize = 256;

/// Process-local message backend.
///
/// It plays the server role faithfully: ids and strictly increasing timestamps are
/// assigned here, never by the caller.
#[derive(Clone)]
pub struct InMemoryMessageStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: Mutex<MemoryState>,
    changes: broadcast::Sender<ConversationId>,
}

#[derive(Default)]
struct MemoryState {
    // Kept ascending by (created_at, id).
    conversations: HashMap<ConversationId, Vec<MessageRecord>>,
    last_timestamp: i64,
}

impl MemoryState {
    fn next_timestamp(&mut self) -> Timestamp {
        let next = Timestamp::now().as_micros().max(self.last_timestamp + 1);
        self.last_timestamp = next;
        Timestamp::from_micros(next)
    }

    fn insert_sorted(&mut self, record: MessageRecord) {
        let messages = self
            .conversations
            .entry(record.conversation_id)
            .or_default();
        if messages.iter().any(|existing| existing.id == record.id) {
            return;
        }

        let key = (record.created_at, record.id);
        let position = messages.partition_point(|existing| (existing.created_at, existing.id) < key);
        messages.insert(position, record);
    }
}

impl MemoryInner {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn latest_window(&self, conversation_id: ConversationId, page_size: usize) -> Vec<MessageRecord> {
        let state = self.lock();
        state
            .conversations
            .get(&conversation_id)
            .map(|messages| messages.iter().rev().take(page_size).cloned().collect())
            .unwrap_or_default()
    }

    fn older_page(
        &self,
        conversation_id: ConversationId,
        before: PageCursor,
        page_size: usize,
    ) -> Vec<MessageRecord> {
        let state = self.lock();
        state
            .conversations
            .get(&conversation_id)
            .map(|messages| {
                messages
                    .iter()
                    .rev()
                    .filter(|record| before.is_after(record))
                    .take(page_size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify(&self, conversation_id: ConversationId) {
        // No live subscribers is not an error.
        let _ = self.changes.send(conversation_id);
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState::default()),
                changes,
            }),
        }
    }

    /// Loads existing history, keeping the timestamps it carries.
    ///
    /// Records without a timestamp are stamped by the store clock.
    pub fn seed(&self, records: impl IntoIterator<Item = MessageRecord>) {
        let mut touched = Vec::new();
        {
            let mut state = self.inner.lock();
            for mut record in records {
                match record.created_at {
                    Some(created_at) => {
                        state.last_timestamp = state.last_timestamp.max(created_at.as_micros());
                    }
                    None => record.created_at = Some(state.next_timestamp()),
                }
                if !touched.contains(&record.conversation_id) {
                    touched.push(record.conversation_id);
                }
                state.insert_sorted(record);
            }
        }

        for conversation_id in touched {
            self.inner.notify(conversation_id);
        }
    }

    /// Every stored message of a conversation, oldest first.
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<MessageRecord> {
        self.inner
            .lock()
            .conversations
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStoreClient for InMemoryMessageStore {
    fn subscribe_live_tail(
        &self,
        conversation_id: ConversationId,
        page_size: usize,
    ) -> StorageResult<LiveTailHandle> {
        ensure!(
            page_size > 0,
            InvalidPageSizeSnafu {
                stage: "memory-subscribe-live-tail",
            }
        );

        let changes = self.inner.changes.subscribe();
        let (event_tx, stream, cancel_rx) = live_tail_channel(conversation_id);
        let inner = Arc::clone(&self.inner);
        let load_window = move || -> BoxFuture<'static, StorageResult<Vec<MessageRecord>>> {
            let inner = Arc::clone(&inner);
            Box::pin(async move { Ok(inner.latest_window(conversation_id, page_size)) })
        };

        let worker: LiveTailWorker = Box::pin(run_live_tail_worker(
            conversation_id,
            changes,
            event_tx,
            cancel_rx,
            load_window,
        ));

        Ok(LiveTailHandle { stream, worker })
    }

    fn fetch_older_page<'a>(
        &'a self,
        conversation_id: ConversationId,
        before: PageCursor,
        page_size: usize,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            ensure!(
                page_size > 0,
                InvalidPageSizeSnafu {
                    stage: "memory-fetch-older-page",
                }
            );
            Ok(self.inner.older_page(conversation_id, before, page_size))
        })
    }

    fn send_message<'a>(
        &'a self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageId>> {
        Box::pin(async move {
            ensure!(
                !input.text.trim().is_empty(),
                EmptyMessageTextSnafu {
                    stage: "memory-send-message",
                }
            );

            let message_id = MessageId::new_v7();
            {
                let mut state = self.inner.lock();
                let created_at = state.next_timestamp();
                state.insert_sorted(MessageRecord {
                    id: message_id,
                    conversation_id,
                    sender_id: input.sender_id,
                    text: input.text,
                    created_at: Some(created_at),
                });
            }

            self.inner.notify(conversation_id);
            Ok(message_id)
        })
    }
}
