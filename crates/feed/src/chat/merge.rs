//! Pure merge of the live window with accumulated history.
//!
//! Every feed mutation goes through [`merge`], recomputing the whole view so the
//! result does not depend on whether a live snapshot or a backfill page landed first.

use std::collections::{HashMap, HashSet};

use chatfeed_storage::MessageRecord;

use crate::chat::events::FeedChange;
use crate::chat::message::{Message, MessageId};

/// Converts a backend page (newest first) into feed order.
pub fn normalize_descending(records: Vec<MessageRecord>) -> Vec<Message> {
    let mut messages = records.into_iter().map(Message::from).collect::<Vec<_>>();
    sort_feed(&mut messages);
    messages
}

/// Sorts by `created_at`, ties by id, pending messages last.
pub fn sort_feed(messages: &mut [Message]) {
    messages.sort_by_key(Message::feed_key);
}

/// Returns true when `live_window` continues `old_feed` without a gap.
///
/// The window is always the newest stretch of the conversation, so it joins the old feed
/// when it shares an id with it or when its oldest entry is not newer than the newest
/// confirmed old entry. An empty window joins nothing.
pub fn window_overlaps(old_feed: &[Message], live_window: &[Message]) -> bool {
    let Some(floor) = live_window.iter().map(Message::feed_key).min() else {
        return false;
    };

    let newest_confirmed = old_feed
        .iter()
        .filter(|message| !message.is_pending())
        .map(Message::feed_key)
        .max();
    if newest_confirmed.is_some_and(|newest| floor <= newest) {
        return true;
    }

    let old_ids = old_feed.iter().map(|message| message.id).collect::<HashSet<_>>();
    live_window.iter().any(|message| old_ids.contains(&message.id))
}

/// Builds the next feed from the previous one, the current live window and an optional
/// backfilled page.
///
/// - When the window overlaps the old feed, old entries strictly below the window's
///   lowest key are history and are kept, including messages that slid out of the
///   window as newer ones arrived.
/// - A window that does not overlap replaces the old feed; keeping the stale block would
///   leave a hole nothing can page into.
/// - Inside the window's range the window is authoritative; an empty window covers the
///   whole conversation.
/// - An id present in the live window always takes the live copy.
pub fn merge(
    old_feed: &[Message],
    live_window: &[Message],
    backfill_page: Option<&[Message]>,
) -> Vec<Message> {
    let live_floor = live_window.iter().map(Message::feed_key).min();
    let capacity = old_feed.len() + live_window.len() + backfill_page.map_or(0, <[Message]>::len);
    let mut by_id: HashMap<MessageId, Message> = HashMap::with_capacity(capacity);

    for message in live_window {
        by_id.entry(message.id).or_insert_with(|| message.clone());
    }

    if let Some(floor) = live_floor {
        if window_overlaps(old_feed, live_window) {
            for message in old_feed {
                if message.feed_key() < floor {
                    by_id.entry(message.id).or_insert_with(|| message.clone());
                }
            }
        }
    }

    for message in backfill_page.unwrap_or_default() {
        by_id.entry(message.id).or_insert_with(|| message.clone());
    }

    let mut merged = by_id.into_values().collect::<Vec<_>>();
    sort_feed(&mut merged);
    merged
}

/// Describes a live-driven transition from `old_feed` to `new_feed`.
///
/// Returns `None` when nothing observable changed.
pub fn classify_live_change(old_feed: &[Message], new_feed: &[Message]) -> Option<FeedChange> {
    if old_feed == new_feed {
        return None;
    }

    let old_ids = old_feed.iter().map(|message| message.id).collect::<HashSet<_>>();
    let new_ids = new_feed.iter().map(|message| message.id).collect::<HashSet<_>>();
    let added = new_ids.difference(&old_ids).count();
    let removed = old_ids.difference(&new_ids).count();

    if added > 0 && removed == 0 {
        Some(FeedChange::append(added))
    } else {
        Some(FeedChange::replace(added))
    }
}

/// Counts ids of `new_feed` missing from `old_feed`.
pub fn count_added(old_feed: &[Message], new_feed: &[Message]) -> usize {
    let old_ids = old_feed.iter().map(|message| message.id).collect::<HashSet<_>>();
    new_feed
        .iter()
        .filter(|message| !old_ids.contains(&message.id))
        .count()
}
