use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatfeed_storage::{
    LiveEvent, LiveTail, LiveTailCancel, LiveTailHandle, MessageStoreClient, SqliteMessageStore,
};
use snafu::ResultExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chat::events::{BackfillOutcome, FeedEvent, FeedStatus};
use crate::chat::message::{ConversationId, MessageView, UserId};
use crate::chat::message_input::Composer;
use crate::chat::scroll_manager::{ScrollCommand, ScrollMetrics, ViewportController};
use crate::chat::synchronizer::FeedSynchronizer;
use crate::error::{FeedResult, OpenLiveTailSnafu, OpenStoreSnafu, RoomClosedSnafu};
use crate::notice::{Notice, NoticeBoard};
use crate::profile::{ProfileDirectory, UserProfile};
use crate::session::SessionContext;
use crate::settings::FeedSettings;

/// External collaborators a room is built from.
#[derive(Clone)]
pub struct ChatServices {
    pub store: Arc<dyn MessageStoreClient>,
    pub session: Arc<dyn SessionContext>,
    pub profiles: Arc<dyn ProfileDirectory>,
}

impl ChatServices {
    /// Services backed by the SQLite store at `settings.database_path`.
    pub async fn sqlite(
        settings: &FeedSettings,
        session: Arc<dyn SessionContext>,
        profiles: Arc<dyn ProfileDirectory>,
    ) -> FeedResult<Self> {
        let store = SqliteMessageStore::open(&settings.database_path)
            .await
            .context(OpenStoreSnafu {
                stage: "open-sqlite-services",
                database_path: settings.database_path.clone(),
            })?;

        Ok(Self {
            store: Arc::new(store),
            session,
            profiles,
        })
    }
}

/// One open conversation: live feed, composer, viewport and notices.
///
/// Must be opened inside a tokio runtime. Dropping the room releases its live
/// subscription.
pub struct ChatRoom {
    services: ChatServices,
    settings: Arc<FeedSettings>,
    conversation_id: ConversationId,
    peer_id: UserId,
    feed: FeedSynchronizer,
    composer: Composer,
    viewport: Arc<Mutex<ViewportController>>,
    notices: NoticeBoard,
    peer_profile: watch::Receiver<Option<UserProfile>>,
    live: Option<LiveLink>,
}

/// Tasks and unsubscribe side of one live-tail subscription.
struct LiveLink {
    cancel: LiveTailCancel,
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl LiveLink {
    /// Subscribes and starts pumping deliveries into `feed`.
    fn attach(
        store: &dyn MessageStoreClient,
        feed: &FeedSynchronizer,
        stage: &'static str,
    ) -> FeedResult<Self> {
        let conversation_id = feed.conversation_id();
        let LiveTailHandle { mut stream, worker } = store
            .subscribe_live_tail(conversation_id, feed.page_size())
            .context(OpenLiveTailSnafu {
                stage,
                conversation_id,
            })?;
        let cancel = stream.detach_cancel();
        let worker = tokio::spawn(worker);
        let pump = tokio::spawn(pump_live_events(stream, feed.clone()));
        Ok(Self {
            cancel,
            pump,
            worker,
        })
    }

    /// The backend stops listening before this returns.
    fn release(mut self) {
        self.cancel.cancel();
        self.pump.abort();
        self.worker.abort();
    }
}

impl ChatRoom {
    pub fn open(
        services: ChatServices,
        settings: Arc<FeedSettings>,
        conversation_id: ConversationId,
        peer_id: UserId,
    ) -> FeedResult<Self> {
        let page_size = settings.page_size.max(1);
        let feed = FeedSynchronizer::new(Arc::clone(&services.store), conversation_id, page_size);
        let notices = NoticeBoard::new();

        let mut viewport = ViewportController::with_threshold(settings.backfill_top_threshold_px);
        viewport.reset();
        let viewport = Arc::new(Mutex::new(viewport));

        {
            let viewport = Arc::clone(&viewport);
            let notices = notices.clone();
            feed.subscribe(move |event| match event {
                FeedEvent::Changed(change) => lock_viewport(&viewport).on_feed_change(change),
                FeedEvent::BackfillFailed { message } => notices.raise(Notice::BackfillFailed {
                    message: message.clone(),
                }),
                FeedEvent::SubscriptionFailed { .. } => {}
            });
        }

        let live = match LiveLink::attach(services.store.as_ref(), &feed, "open-chat-room") {
            Ok(live) => live,
            Err(error) => {
                feed.close();
                return Err(error);
            }
        };

        let composer = Composer::new(
            conversation_id,
            Arc::clone(&services.store),
            Arc::clone(&services.session),
            notices.clone(),
        );
        let peer_profile = services.profiles.watch_profile(&peer_id);

        tracing::info!(
            conversation_id = %conversation_id,
            peer_id = %peer_id,
            page_size,
            "opened chat room"
        );

        Ok(Self {
            services,
            settings,
            conversation_id,
            peer_id,
            feed,
            composer,
            viewport,
            notices,
            peer_profile,
            live: Some(live),
        })
    }

    /// Releases the live subscription; no feed callbacks run afterwards.
    pub fn close(&mut self) {
        if self.feed.is_closed() {
            return;
        }
        if let Some(live) = self.live.take() {
            live.release();
        }
        self.feed.close();
        tracing::info!(conversation_id = %self.conversation_id, "closed chat room");
    }

    /// Replaces the live subscription, keeping the merged feed and its history.
    ///
    /// Used after the subscription failed; the next snapshot is merged into what is
    /// already loaded. On error the room stays open without a subscription.
    pub fn resubscribe(&mut self) -> FeedResult<()> {
        if self.feed.is_closed() {
            return RoomClosedSnafu {
                stage: "resubscribe-chat-room",
                conversation_id: self.conversation_id,
            }
            .fail();
        }

        if let Some(previous) = self.live.take() {
            previous.release();
        }
        self.live = Some(LiveLink::attach(
            self.services.store.as_ref(),
            &self.feed,
            "resubscribe-chat-room",
        )?);
        tracing::info!(conversation_id = %self.conversation_id, "resubscribed chat room");
        Ok(())
    }

    /// Leaves the current conversation and opens another with the same services.
    pub fn switch_to(&mut self, conversation_id: ConversationId, peer_id: UserId) -> FeedResult<()> {
        self.close();
        *self = Self::open(
            self.services.clone(),
            Arc::clone(&self.settings),
            conversation_id,
            peer_id,
        )?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.feed.is_closed()
    }

    /// True while a live subscription is attached, even if it already reported failure.
    pub fn is_subscribed(&self) -> bool {
        self.live.is_some()
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn peer_id(&self) -> &UserId {
        &self.peer_id
    }

    pub fn feed(&self) -> &FeedSynchronizer {
        &self.feed
    }

    pub fn status(&self) -> FeedStatus {
        self.feed.status()
    }

    pub fn messages(&self) -> Vec<MessageView> {
        let current_user = self.services.session.current_user_id();
        self.feed
            .messages()
            .iter()
            .map(|message| MessageView::project(message, current_user.as_ref()))
            .collect()
    }

    pub fn peer_profile(&self) -> Option<UserProfile> {
        self.peer_profile.borrow().clone()
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    /// Starts a backfill when the viewport reached the top edge.
    pub fn on_scroll(&self, metrics: ScrollMetrics) -> Option<JoinHandle<BackfillOutcome>> {
        let has_more_history = self.feed.has_more_history();
        let wants_history = lock_viewport(&self.viewport).on_scroll(metrics, has_more_history);
        if !wants_history || self.feed.is_backfilling() || !self.is_open() {
            return None;
        }

        let feed = self.feed.clone();
        Some(tokio::spawn(async move { feed.load_older_page().await }))
    }

    pub fn after_render(&self, metrics: ScrollMetrics) -> Option<ScrollCommand> {
        lock_viewport(&self.viewport).after_render(metrics)
    }
}

impl Drop for ChatRoom {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_viewport(viewport: &Mutex<ViewportController>) -> MutexGuard<'_, ViewportController> {
    viewport.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pump_live_events(mut stream: LiveTail, feed: FeedSynchronizer) {
    let conversation_id = stream.conversation_id();
    while let Some(event) = stream.recv().await {
        let failed = matches!(event, LiveEvent::Failed { .. });
        feed.apply_live_event(event);
        if failed {
            break;
        }
    }
    tracing::debug!(conversation_id = %conversation_id, "live pump stopped");
}
