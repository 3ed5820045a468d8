use std::future::Future;
use std::pin::Pin;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::error::StorageResult;
use super::ids::ConversationId;
use super::types::MessageRecord;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type LiveTailWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// One delivery from a live-tail subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// The newest messages of the conversation, newest first.
    Snapshot(Vec<MessageRecord>),
    /// The subscription stopped; no further events follow.
    Failed { message: String },
}

/// Receiving side of a live-tail subscription.
///
/// Dropping the stream (or calling [`LiveTail::cancel`]) unsubscribes, unless the cancel
/// side was detached with [`LiveTail::detach_cancel`].
pub struct LiveTail {
    conversation_id: ConversationId,
    events: mpsc::UnboundedReceiver<LiveEvent>,
    cancel: LiveTailCancel,
}

/// Unsubscribe side of a [`LiveTail`]. Fires on drop.
#[derive(Debug, Default)]
pub struct LiveTailCancel {
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct LiveTailHandle {
    pub stream: LiveTail,
    /// Must be spawned by the caller; it ends when the stream is cancelled.
    pub worker: LiveTailWorker,
}

impl LiveTail {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LiveEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel.cancel()
    }

    /// Moves the unsubscribe side out so the owner can release the subscription without
    /// waiting for whoever holds the receiver.
    pub fn detach_cancel(&mut self) -> LiveTailCancel {
        std::mem::take(&mut self.cancel)
    }
}

impl LiveTailCancel {
    /// Returns true when the backend was still listening.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx.is_none()
    }
}

impl Drop for LiveTailCancel {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Builds the channel pair backends use to feed a [`LiveTail`].
pub fn live_tail_channel(
    conversation_id: ConversationId,
) -> (
    mpsc::UnboundedSender<LiveEvent>,
    LiveTail,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        LiveTail {
            conversation_id,
            events: event_rx,
            cancel: LiveTailCancel {
                cancel_tx: Some(cancel_tx),
            },
        },
        cancel_rx,
    )
}

/// Re-queries the live window whenever the backend reports a write to the conversation.
///
/// `changes` must be subscribed before the worker is created so writes racing the
/// initial query still trigger a refresh.
pub(crate) async fn run_live_tail_worker<L>(
    conversation_id: ConversationId,
    mut changes: broadcast::Receiver<ConversationId>,
    event_tx: mpsc::UnboundedSender<LiveEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
    load_window: L,
) where
    L: Fn() -> BoxFuture<'static, StorageResult<Vec<MessageRecord>>> + Send + 'static,
{
    if !publish_window(conversation_id, &event_tx, &load_window).await {
        return;
    }

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(conversation_id = %conversation_id, "live tail cancelled");
                break;
            }
            change = changes.recv() => {
                match change {
                    Ok(changed) if changed != conversation_id => continue,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(
                            conversation_id = %conversation_id,
                            skipped,
                            "live tail lagged behind change feed; refreshing window"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = event_tx.send(LiveEvent::Failed {
                            message: "message store closed its change feed".to_string(),
                        });
                        break;
                    }
                }

                if !publish_window(conversation_id, &event_tx, &load_window).await {
                    break;
                }
            }
        }
    }
}

async fn publish_window<L>(
    conversation_id: ConversationId,
    event_tx: &mpsc::UnboundedSender<LiveEvent>,
    load_window: &L,
) -> bool
where
    L: Fn() -> BoxFuture<'static, StorageResult<Vec<MessageRecord>>>,
{
    match load_window().await {
        Ok(records) => event_tx.send(LiveEvent::Snapshot(records)).is_ok(),
        Err(error) => {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %error,
                "live tail query failed; closing subscription"
            );
            let _ = event_tx.send(LiveEvent::Failed {
                message: error.to_string(),
            });
            false
        }
    }
}
