use crate::chat::events::{AnchorHint, ChangeKind, FeedChange};

/// Default distance from the top edge that triggers a backfill.
pub const DEFAULT_TOP_THRESHOLD_PX: f64 = 0.0;

/// Viewport geometry as reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn max_scroll_top(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// Instruction for the renderer after a feed change has been laid out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollCommand {
    ToBottom { smooth: bool },
    ScrollTo { top: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingScroll {
    ToBottom { smooth: bool },
    // Geometry captured before older rows were inserted above the fold.
    KeepOffset { scroll_top: f64, scroll_height: f64 },
}

/// Decides scroll position from feed change descriptors, independent of rendering.
pub struct ViewportController {
    top_threshold_px: f64,
    pending: Option<PendingScroll>,
    last_metrics: Option<ScrollMetrics>,
}

impl ViewportController {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_TOP_THRESHOLD_PX)
    }

    pub fn with_threshold(top_threshold_px: f64) -> Self {
        Self {
            top_threshold_px: top_threshold_px.max(0.0),
            pending: None,
            last_metrics: None,
        }
    }

    pub fn top_threshold_px(&self) -> f64 {
        self.top_threshold_px
    }

    pub fn has_pending_scroll(&self) -> bool {
        self.pending.is_some()
    }

    /// Forgets geometry and requests a jump to the newest message.
    pub fn reset(&mut self) {
        self.last_metrics = None;
        self.pending = Some(PendingScroll::ToBottom { smooth: false });
    }

    pub fn request_scroll_to_bottom(&mut self, smooth: bool) {
        self.pending = Some(PendingScroll::ToBottom { smooth });
    }

    pub fn on_feed_change(&mut self, change: &FeedChange) {
        match (change.kind, change.anchor) {
            (ChangeKind::Append, _) | (_, AnchorHint::ScrollToBottom) => {
                self.request_scroll_to_bottom(true);
            }
            (ChangeKind::Prepend, AnchorHint::KeepInPlace { .. }) => {
                // A bottom jump that has not been rendered yet still wins.
                if matches!(self.pending, Some(PendingScroll::ToBottom { .. })) {
                    return;
                }
                // Without a measured layout there is no offset to preserve.
                let Some(metrics) = self.last_metrics else {
                    return;
                };
                self.pending = Some(PendingScroll::KeepOffset {
                    scroll_top: metrics.scroll_top,
                    scroll_height: metrics.scroll_height,
                });
            }
            _ => {}
        }
    }

    /// Records a user scroll; returns true when older history should be requested.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics, has_more_history: bool) -> bool {
        self.last_metrics = Some(metrics);
        has_more_history && self.pending.is_none() && metrics.scroll_top <= self.top_threshold_px
    }

    /// Called once the renderer laid out the latest feed.
    pub fn after_render(&mut self, metrics: ScrollMetrics) -> Option<ScrollCommand> {
        let command = self.pending.take().map(|pending| match pending {
            PendingScroll::ToBottom { smooth } => ScrollCommand::ToBottom { smooth },
            PendingScroll::KeepOffset {
                scroll_top,
                scroll_height,
            } => {
                let inserted_height = (metrics.scroll_height - scroll_height).max(0.0);
                ScrollCommand::ScrollTo {
                    top: scroll_top + inserted_height,
                }
            }
        });

        self.last_metrics = Some(match command {
            Some(ScrollCommand::ToBottom { .. }) => ScrollMetrics {
                scroll_top: metrics.max_scroll_top(),
                ..metrics
            },
            Some(ScrollCommand::ScrollTo { top }) => ScrollMetrics {
                scroll_top: top,
                ..metrics
            },
            None => metrics,
        });
        command
    }
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new()
    }
}
