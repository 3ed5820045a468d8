mod common;

use std::sync::Arc;
use std::time::Duration;

use chatfeed::{
    ChatRoom, ChatServices, FeedError, FeedSettings, FeedStatus, FixedSession,
    InMemoryProfileDirectory, Notice, ScrollCommand, ScrollMetrics, UserProfile,
};
use chatfeed_storage::{
    ConversationId, InMemoryMessageStore, LiveEvent, MessageRecord, MessageStoreClient, UserId,
};

use common::{ScriptedStore, descending_records, init_tracing, record};

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

fn services(store: Arc<dyn MessageStoreClient>, profiles: Arc<InMemoryProfileDirectory>) -> ChatServices {
    ChatServices {
        store,
        session: Arc::new(FixedSession::signed_in("alice")),
        profiles,
    }
}

fn seeded_store(conversation_id: ConversationId, count: u128) -> InMemoryMessageStore {
    let store = InMemoryMessageStore::new();
    store.seed((1..=count).map(|index| MessageRecord {
        sender_id: UserId::new(if index % 2 == 0 { "alice" } else { "bob" }),
        ..record(conversation_id, index)
    }));
    store
}

fn open_room(store: Arc<dyn MessageStoreClient>, conversation_id: ConversationId) -> ChatRoom {
    init_tracing();
    let profiles = Arc::new(InMemoryProfileDirectory::new());
    ChatRoom::open(
        services(store, profiles),
        Arc::new(FeedSettings::default()),
        conversation_id,
        UserId::new("bob"),
    )
    .expect("room opens")
}

#[tokio::test]
async fn opening_loads_the_newest_page_and_jumps_to_bottom() {
    let conversation_id = ConversationId::new_v7();
    let store = seeded_store(conversation_id, 25);
    let room = open_room(Arc::new(store), conversation_id);

    wait_until(|| room.feed().len() == 20).await;
    let views = room.messages();
    assert_eq!(views.first().map(|view| view.text.as_str()), Some("m6"));
    assert_eq!(views.last().map(|view| view.text.as_str()), Some("m25"));
    assert!(views.iter().all(|view| view.is_own == (view.sender_id.as_str() == "alice")));
    assert_eq!(room.status(), FeedStatus::Live);

    assert!(matches!(
        room.after_render(ScrollMetrics::new(0.0, 2000.0, 400.0)),
        Some(ScrollCommand::ToBottom { .. })
    ));
}

#[tokio::test]
async fn sent_message_arrives_through_the_live_tail() {
    let conversation_id = ConversationId::new_v7();
    let store = InMemoryMessageStore::new();
    let mut room = open_room(Arc::new(store.clone()), conversation_id);
    wait_until(|| room.status() == FeedStatus::Live).await;
    room.after_render(ScrollMetrics::new(0.0, 400.0, 400.0));

    room.composer_mut().set_text("hello there");
    let handle = room.composer_mut().submit().expect("send started");
    assert_eq!(room.composer().text(), "");
    assert!(handle.outcome().await.is_some());

    wait_until(|| room.feed().len() == 1).await;
    let views = room.messages();
    assert_eq!(views[0].text, "hello there");
    assert!(views[0].is_own);
    assert!(!views[0].pending);
    assert_eq!(
        room.after_render(ScrollMetrics::new(0.0, 460.0, 400.0)),
        Some(ScrollCommand::ToBottom { smooth: true })
    );
}

#[tokio::test]
async fn scrolling_to_top_backfills_and_keeps_position() {
    let conversation_id = ConversationId::new_v7();
    let store = seeded_store(conversation_id, 25);
    let room = open_room(Arc::new(store), conversation_id);
    wait_until(|| room.feed().len() == 20).await;
    room.after_render(ScrollMetrics::new(0.0, 2000.0, 400.0));

    let backfill = room
        .on_scroll(ScrollMetrics::new(0.0, 2000.0, 400.0))
        .expect("top edge starts a backfill");
    let outcome = backfill.await.expect("backfill task joins");
    assert_eq!(outcome.added, 5);
    assert_eq!(room.feed().len(), 25);
    assert!(!room.feed().has_more_history());

    assert_eq!(
        room.after_render(ScrollMetrics::new(0.0, 2500.0, 400.0)),
        Some(ScrollCommand::ScrollTo { top: 500.0 })
    );
    assert!(room.on_scroll(ScrollMetrics::new(0.0, 2500.0, 400.0)).is_none());
}

#[tokio::test]
async fn backfill_failure_surfaces_a_notice() {
    let store = ScriptedStore::new();
    let conversation_id = ConversationId::new_v7();
    let room = open_room(store.clone(), conversation_id);

    assert!(store.emit(LiveEvent::Snapshot(descending_records(conversation_id, 21, 40))));
    wait_until(|| room.feed().len() == 20).await;
    room.after_render(ScrollMetrics::new(0.0, 2000.0, 400.0));

    store.push_page_error("network unreachable");
    let backfill = room
        .on_scroll(ScrollMetrics::new(0.0, 2000.0, 400.0))
        .expect("top edge starts a backfill");
    assert_eq!(backfill.await.expect("backfill task joins").added, 0);

    assert!(matches!(room.notices().current(), Notice::BackfillFailed { .. }));
    assert_eq!(room.feed().len(), 20);
}

#[tokio::test]
async fn live_failure_marks_the_feed_failed() {
    let store = ScriptedStore::new();
    let conversation_id = ConversationId::new_v7();
    let room = open_room(store.clone(), conversation_id);

    assert!(store.emit(LiveEvent::Failed {
        message: "permission denied".to_string(),
    }));
    wait_until(|| matches!(room.status(), FeedStatus::Failed { .. })).await;
}

#[tokio::test]
async fn resubscribing_after_failure_keeps_loaded_history() {
    let store = ScriptedStore::new();
    let conversation_id = ConversationId::new_v7();
    let mut room = open_room(store.clone(), conversation_id);

    assert!(store.emit(LiveEvent::Snapshot(descending_records(conversation_id, 21, 40))));
    wait_until(|| room.feed().len() == 20).await;
    store.push_page(descending_records(conversation_id, 1, 20));
    assert_eq!(room.feed().load_older_page().await.added, 20);

    assert!(store.emit(LiveEvent::Failed {
        message: "permission denied".to_string(),
    }));
    wait_until(|| matches!(room.status(), FeedStatus::Failed { .. })).await;

    room.resubscribe().expect("resubscribe succeeds");
    assert!(room.is_open());
    assert!(room.is_subscribed());
    assert_eq!(store.live_subscriptions(), 2);
    assert_eq!(store.active_subscriptions(), 1);

    assert!(store.emit(LiveEvent::Snapshot(descending_records(conversation_id, 22, 41))));
    wait_until(|| room.status() == FeedStatus::Live).await;
    let views = room.messages();
    assert_eq!(views.len(), 41);
    assert_eq!(views.first().map(|view| view.text.as_str()), Some("m1"));
    assert_eq!(views.last().map(|view| view.text.as_str()), Some("m41"));
}

#[tokio::test]
async fn burst_larger_than_a_page_is_backfilled_without_a_gap() {
    let conversation_id = ConversationId::new_v7();
    let store = seeded_store(conversation_id, 20);
    let room = open_room(Arc::new(store.clone()), conversation_id);
    wait_until(|| room.feed().len() == 20).await;

    store.seed((21..=45).map(|index| record(conversation_id, index)));
    wait_until(|| {
        room.feed()
            .messages()
            .last()
            .is_some_and(|message| message.text == "m45")
    })
    .await;

    // m21..m25 were never in a window; the feed restarts from the new one.
    assert_eq!(room.feed().len(), 20);
    assert!(room.feed().has_more_history());

    assert_eq!(room.feed().load_older_page().await.added, 20);
    assert_eq!(room.feed().load_older_page().await.added, 5);
    assert!(!room.feed().has_more_history());

    let expected = (1..=45).map(|index| format!("m{index}")).collect::<Vec<_>>();
    let loaded = room
        .messages()
        .into_iter()
        .map(|view| view.text)
        .collect::<Vec<_>>();
    assert_eq!(loaded, expected);
    assert_eq!(store.messages(conversation_id).len(), 45);
}

#[tokio::test]
async fn close_releases_the_subscription() {
    let store = ScriptedStore::new();
    let conversation_id = ConversationId::new_v7();
    let mut room = open_room(store.clone(), conversation_id);
    assert!(!store.newest_subscription_closed());

    room.close();
    assert!(!room.is_open());
    assert!(room.feed().is_closed());
    assert!(store.newest_subscription_closed());
    assert_eq!(store.active_subscriptions(), 0);
    assert!(matches!(room.resubscribe(), Err(FeedError::RoomClosed { .. })));

    // A late delivery has nowhere to go.
    assert!(!store.emit(LiveEvent::Snapshot(descending_records(conversation_id, 1, 3))));
    assert!(room.feed().is_empty());
}

#[tokio::test]
async fn switching_conversations_replaces_the_subscription() {
    let store = ScriptedStore::new();
    let first = ConversationId::new_v7();
    let second = ConversationId::new_v7();
    let mut room = open_room(store.clone(), first);
    let previous_feed = room.feed().clone();

    room.switch_to(second, UserId::new("carol")).expect("switch succeeds");
    assert_eq!(room.conversation_id(), second);
    assert_eq!(room.peer_id().as_str(), "carol");
    assert_eq!(store.live_subscriptions(), 2);
    assert_eq!(store.active_subscriptions(), 1);
    assert!(previous_feed.is_closed());

    assert!(store.emit(LiveEvent::Snapshot(descending_records(second, 1, 2))));
    wait_until(|| room.feed().len() == 2).await;
    assert!(previous_feed.is_empty());
}

#[tokio::test]
async fn refused_subscription_fails_to_open() {
    init_tracing();
    let store = ScriptedStore::new();
    store.refuse_subscriptions();

    let result = ChatRoom::open(
        services(store, Arc::new(InMemoryProfileDirectory::new())),
        Arc::new(FeedSettings::default()),
        ConversationId::new_v7(),
        UserId::new("bob"),
    );
    assert!(matches!(result, Err(FeedError::OpenLiveTail { .. })));
}

#[tokio::test]
async fn peer_profile_follows_the_directory() {
    init_tracing();
    let profiles = Arc::new(InMemoryProfileDirectory::new());
    let room = ChatRoom::open(
        services(Arc::new(InMemoryMessageStore::new()), Arc::clone(&profiles)),
        Arc::new(FeedSettings::default()),
        ConversationId::new_v7(),
        UserId::new("bob"),
    )
    .expect("room opens");
    assert_eq!(room.peer_profile(), None);

    profiles.upsert(UserProfile {
        uid: UserId::new("bob"),
        display_name: "Bob".to_string(),
        photo_url: "https://cdn.example/bob.png".to_string(),
    });
    assert_eq!(
        room.peer_profile().map(|profile| profile.display_name),
        Some("Bob".to_string())
    );
}

#[tokio::test]
async fn sqlite_services_round_trip_a_message() {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let settings = FeedSettings {
        database_path: dir.path().join("feed.db").display().to_string(),
        ..FeedSettings::default()
    };
    let services = ChatServices::sqlite(
        &settings,
        Arc::new(FixedSession::signed_in("alice")),
        Arc::new(InMemoryProfileDirectory::new()),
    )
    .await
    .expect("sqlite services open");

    let mut room = ChatRoom::open(
        services,
        Arc::new(settings),
        ConversationId::new_v7(),
        UserId::new("bob"),
    )
    .expect("room opens");
    wait_until(|| room.status() == FeedStatus::Live).await;

    room.composer_mut().set_text("persisted");
    let handle = room.composer_mut().submit().expect("send started");
    assert!(handle.outcome().await.is_some());
    wait_until(|| room.feed().len() == 1).await;
    assert_eq!(room.messages()[0].text, "persisted");
}
