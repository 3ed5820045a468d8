use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatfeed_storage::{ConversationId, LiveEvent, MessageRecord, MessageStoreClient};

use crate::chat::events::{BackfillOutcome, FeedChange, FeedEvent, FeedStatus};
use crate::chat::merge::{
    classify_live_change, count_added, merge, normalize_descending, sort_feed, window_overlaps,
};
use crate::chat::message::{Message, PageCursor};

type FeedObserver = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Owns one conversation's merged feed.
///
/// Live snapshots replace the live window; backfilled pages extend history below it.
/// Both paths rebuild the feed through [`merge`], so ordering and dedup hold no matter
/// how the two interleave. Clones share state.
#[derive(Clone)]
pub struct FeedSynchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    conversation_id: ConversationId,
    page_size: usize,
    store: Arc<dyn MessageStoreClient>,
    state: Mutex<FeedState>,
    observers: Mutex<HashMap<u64, FeedObserver>>,
    next_observer_id: AtomicU64,
}

#[derive(Default)]
struct FeedState {
    messages: Vec<Message>,
    live_window: Vec<Message>,
    exhausted: bool,
    backfill_in_flight: bool,
    status: FeedStatus,
    closed: bool,
}

impl FeedState {
    fn oldest_cursor(&self) -> Option<PageCursor> {
        self.messages.iter().find_map(Message::cursor)
    }
}

impl FeedSynchronizer {
    pub fn new(
        store: Arc<dyn MessageStoreClient>,
        conversation_id: ConversationId,
        page_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                conversation_id,
                page_size: page_size.max(1),
                store,
                state: Mutex::new(FeedState::default()),
                observers: Mutex::new(HashMap::new()),
                next_observer_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.inner.conversation_id
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Applies one live-window delivery, oldest first.
    ///
    /// Returns the change that observers were told about, if any.
    pub fn on_live_snapshot(&self, window: Vec<Message>) -> Option<FeedChange> {
        let mut window = window;
        sort_feed(&mut window);

        let change = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return None;
            }

            if !window_overlaps(&state.messages, &window) {
                if !state.messages.is_empty() {
                    tracing::info!(
                        conversation_id = %self.inner.conversation_id,
                        dropped = state.messages.len(),
                        "live window skipped past the feed; restarting history from it"
                    );
                }
                // History below the new window is unknown again.
                state.exhausted = false;
            }

            let next = merge(&state.messages, &window, None);
            let change = classify_live_change(&state.messages, &next);
            state.messages = next;
            state.live_window = window;
            state.status = FeedStatus::Live;
            change
        };

        if let Some(change) = change {
            tracing::debug!(
                conversation_id = %self.inner.conversation_id,
                kind = ?change.kind,
                added = change.added,
                "live snapshot merged"
            );
            self.inner.notify(&FeedEvent::Changed(change));
        }
        change
    }

    /// Same as [`Self::on_live_snapshot`] for backend records, which arrive newest first.
    pub fn on_live_records(&self, records: Vec<MessageRecord>) -> Option<FeedChange> {
        self.on_live_snapshot(normalize_descending(records))
    }

    /// Puts the feed into the error state; already merged messages stay visible.
    pub fn on_subscription_error(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.status = FeedStatus::Failed {
                message: message.clone(),
            };
        }

        tracing::warn!(
            conversation_id = %self.inner.conversation_id,
            error = %message,
            "live subscription failed"
        );
        self.inner.notify(&FeedEvent::SubscriptionFailed { message });
    }

    pub fn apply_live_event(&self, event: LiveEvent) -> Option<FeedChange> {
        match event {
            LiveEvent::Snapshot(records) => self.on_live_records(records),
            LiveEvent::Failed { message } => {
                self.on_subscription_error(message);
                None
            }
        }
    }

    /// Fetches the page strictly older than the oldest loaded message.
    ///
    /// Only one fetch runs at a time; calls made while one is outstanding, after history
    /// ran out, or on an empty feed resolve to [`BackfillOutcome::NONE`] without a fetch.
    pub async fn load_older_page(&self) -> BackfillOutcome {
        let cursor = {
            let mut state = self.inner.lock_state();
            if state.closed || state.exhausted || state.backfill_in_flight {
                return BackfillOutcome::NONE;
            }
            let Some(cursor) = state.oldest_cursor() else {
                return BackfillOutcome::NONE;
            };
            state.backfill_in_flight = true;
            cursor
        };

        let conversation_id = self.inner.conversation_id;
        let page_size = self.inner.page_size;
        tracing::debug!(
            conversation_id = %conversation_id,
            before = ?cursor,
            "loading older page"
        );

        let fetched = self
            .inner
            .store
            .fetch_older_page(conversation_id, cursor, page_size)
            .await;

        let records = match fetched {
            Ok(records) => records,
            Err(error) => {
                let message = error.to_string();
                let still_open = {
                    let mut state = self.inner.lock_state();
                    state.backfill_in_flight = false;
                    !state.closed
                };
                if still_open {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %message,
                        "failed to load older messages"
                    );
                    self.inner.notify(&FeedEvent::BackfillFailed { message });
                }
                return BackfillOutcome::NONE;
            }
        };

        let short_page = records.len() < page_size;
        let page = normalize_descending(records);

        let change = {
            let mut state = self.inner.lock_state();
            state.backfill_in_flight = false;
            if state.closed {
                return BackfillOutcome::NONE;
            }
            if state.oldest_cursor() != Some(cursor) {
                // The feed was replaced while the page was in flight.
                tracing::debug!(
                    conversation_id = %conversation_id,
                    before = ?cursor,
                    "discarding older page fetched for a replaced feed"
                );
                return BackfillOutcome::NONE;
            }
            if short_page {
                state.exhausted = true;
            }

            let previous_first = state.messages.first().map(|message| message.id);
            let next = merge(&state.messages, &state.live_window, Some(&page));
            let added = count_added(&state.messages, &next);
            state.messages = next;
            (added > 0).then(|| FeedChange::prepend(added, previous_first))
        };

        if short_page {
            tracing::debug!(conversation_id = %conversation_id, "reached start of history");
        }

        match change {
            Some(change) => {
                self.inner.notify(&FeedEvent::Changed(change));
                BackfillOutcome { added: change.added }
            }
            None => BackfillOutcome::NONE,
        }
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock_observers().insert(id, Arc::new(observer));
        ObserverId(id)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.inner.lock_observers().remove(&id.0).is_some()
    }

    /// Detaches observers; deliveries and backfill results arriving later are dropped.
    pub fn close(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.inner.lock_observers().clear();
        tracing::debug!(conversation_id = %self.inner.conversation_id, "feed closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// The merged feed, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock_state().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock_state().messages.is_empty()
    }

    pub fn has_more_history(&self) -> bool {
        !self.inner.lock_state().exhausted
    }

    pub fn cursor(&self) -> Option<PageCursor> {
        self.inner.lock_state().oldest_cursor()
    }

    pub fn status(&self) -> FeedStatus {
        self.inner.lock_state().status.clone()
    }

    pub fn is_backfilling(&self) -> bool {
        self.inner.lock_state().backfill_in_flight
    }
}

impl SyncInner {
    fn lock_state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, HashMap<u64, FeedObserver>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: &FeedEvent) {
        // Observers may call back into the synchronizer.
        let observers = self.lock_observers().values().cloned().collect::<Vec<_>>();
        for observer in observers {
            observer(event);
        }
    }
}
