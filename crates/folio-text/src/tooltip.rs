//! Citation tooltip placement and hover intent
//!
//! Pure geometry for deciding which side of an anchor a tooltip opens on,
//! plus the two cancellable interaction timers: a show delay debouncing
//! accidental hovers, and a hide delay giving the pointer time to travel
//! from anchor to tooltip. Only one tooltip is open at a time; consumers
//! apply each `Hide` before the next `Show`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Anchor geometry in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Which side of the anchor the tooltip opens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Below,
    Above,
}

/// Resolved tooltip position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Horizontal center of the tooltip, clamped into the viewport
    pub x: f64,
    /// Edge the tooltip grows from: anchor bottom for `Below`, anchor top
    /// for `Above`
    pub y: f64,
    pub side: Side,
}

/// Compute a non-overlapping placement for a tooltip of at least
/// `min_height`. Prefers below the anchor; falls back to above when below
/// lacks room; when neither side fits, picks whichever has strictly more
/// space.
pub fn resolve_placement(anchor: Rect, viewport: Size, min_height: f64) -> Placement {
    let space_below = viewport.height - (anchor.y + anchor.height);
    let space_above = anchor.y;

    let side = if space_below >= min_height {
        Side::Below
    } else if space_above >= min_height {
        Side::Above
    } else if space_above > space_below {
        Side::Above
    } else {
        Side::Below
    };

    let x = (anchor.x + anchor.width / 2.0).clamp(0.0, viewport.width);
    let y = match side {
        Side::Below => anchor.y + anchor.height,
        Side::Above => anchor.y,
    };
    Placement { x, y, side }
}

/// Commands emitted by the hover-intent timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TooltipCommand {
    Show,
    Hide,
}

/// Hover-intent timer configuration
#[derive(Debug, Clone)]
pub struct HoverIntentConfig {
    /// Delay before showing after the pointer enters the anchor
    pub show_delay: Duration,
    /// Grace period after leaving the anchor before hiding
    pub hide_delay: Duration,
}

impl Default for HoverIntentConfig {
    fn default() -> Self {
        Self {
            show_delay: Duration::from_millis(150),
            hide_delay: Duration::from_millis(300),
        }
    }
}

/// Hover/focus intent tracker for one conversation view's tooltips.
pub struct HoverIntent {
    config: HoverIntentConfig,
    commands_tx: mpsc::UnboundedSender<TooltipCommand>,
    pending_show: Mutex<Option<CancellationToken>>,
    pending_hide: Mutex<Option<CancellationToken>>,
}

impl HoverIntent {
    /// Create a tracker and the command stream it drives.
    pub fn new(config: HoverIntentConfig) -> (Self, mpsc::UnboundedReceiver<TooltipCommand>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                commands_tx,
                pending_show: Mutex::new(None),
                pending_hide: Mutex::new(None),
            },
            commands_rx,
        )
    }

    /// Pointer entered a citation anchor: cancel any pending hide and arm
    /// the show delay.
    pub fn anchor_enter(&self) {
        cancel_pending(&self.pending_hide);
        self.arm(&self.pending_show, self.config.show_delay, TooltipCommand::Show);
    }

    /// Pointer left the anchor: cancel a not-yet-fired show and arm the
    /// hide grace period.
    pub fn anchor_leave(&self) {
        cancel_pending(&self.pending_show);
        self.arm(&self.pending_hide, self.config.hide_delay, TooltipCommand::Hide);
    }

    /// Pointer reached the tooltip region: the pending hide is cancelled
    /// so travel from anchor to tooltip does not close it.
    pub fn tooltip_enter(&self) {
        cancel_pending(&self.pending_hide);
    }

    /// Pointer left the tooltip region: close immediately.
    pub fn tooltip_leave(&self) {
        cancel_pending(&self.pending_show);
        cancel_pending(&self.pending_hide);
        let _ = self.commands_tx.send(TooltipCommand::Hide);
    }

    fn arm(&self, slot: &Mutex<Option<CancellationToken>>, delay: Duration, command: TooltipCommand) {
        let token = CancellationToken::new();
        if let Some(previous) = slot.lock().replace(token.clone()) {
            previous.cancel();
        }
        let tx = self.commands_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(command);
                }
            }
        });
    }
}

fn cancel_pending(slot: &Mutex<Option<CancellationToken>>) {
    if let Some(token) = slot.lock().take() {
        token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Size {
        Size {
            width: 1280.0,
            height: 800.0,
        }
    }

    #[test]
    fn test_prefers_below() {
        let anchor = Rect {
            x: 100.0,
            y: 100.0,
            width: 20.0,
            height: 16.0,
        };
        let placement = resolve_placement(anchor, viewport(), 200.0);
        assert_eq!(placement.side, Side::Below);
        assert_eq!(placement.y, 116.0);
    }

    #[test]
    fn test_falls_back_to_above_near_bottom() {
        let anchor = Rect {
            x: 100.0,
            y: 750.0,
            width: 20.0,
            height: 16.0,
        };
        let placement = resolve_placement(anchor, viewport(), 200.0);
        assert_eq!(placement.side, Side::Above);
        assert_eq!(placement.y, 750.0);
    }

    #[test]
    fn test_neither_fits_picks_larger_side() {
        // 300 above, 284 below; min height 400 fits nowhere.
        let anchor = Rect {
            x: 100.0,
            y: 300.0,
            width: 20.0,
            height: 216.0,
        };
        let placement = resolve_placement(anchor, viewport(), 400.0);
        assert_eq!(placement.side, Side::Above);
    }

    #[test]
    fn test_x_is_clamped_into_viewport() {
        let anchor = Rect {
            x: 1275.0,
            y: 100.0,
            width: 20.0,
            height: 16.0,
        };
        let placement = resolve_placement(anchor, viewport(), 100.0);
        assert_eq!(placement.x, 1280.0);
    }

    #[tokio::test]
    async fn test_show_fires_after_delay() {
        let (intent, mut commands) = HoverIntent::new(HoverIntentConfig {
            show_delay: Duration::from_millis(10),
            hide_delay: Duration::from_millis(10),
        });
        intent.anchor_enter();
        let command = tokio::time::timeout(Duration::from_secs(1), commands.recv())
            .await
            .unwrap();
        assert_eq!(command, Some(TooltipCommand::Show));
    }

    #[tokio::test]
    async fn test_quick_leave_cancels_show() {
        let (intent, mut commands) = HoverIntent::new(HoverIntentConfig {
            show_delay: Duration::from_millis(100),
            hide_delay: Duration::from_millis(10),
        });
        intent.anchor_enter();
        intent.anchor_leave();
        // Only the hide should fire; the show was cancelled.
        let command = tokio::time::timeout(Duration::from_secs(1), commands.recv())
            .await
            .unwrap();
        assert_eq!(command, Some(TooltipCommand::Hide));
    }

    #[tokio::test]
    async fn test_entering_tooltip_cancels_pending_hide() {
        let (intent, mut commands) = HoverIntent::new(HoverIntentConfig {
            show_delay: Duration::from_millis(5),
            hide_delay: Duration::from_millis(50),
        });
        intent.anchor_enter();
        assert_eq!(commands.recv().await, Some(TooltipCommand::Show));

        intent.anchor_leave();
        intent.tooltip_enter();
        let hide = tokio::time::timeout(Duration::from_millis(150), commands.recv()).await;
        assert!(hide.is_err(), "hide must not fire once the tooltip is entered");
    }

    #[tokio::test]
    async fn test_leaving_tooltip_hides_immediately() {
        let (intent, mut commands) = HoverIntent::new(HoverIntentConfig::default());
        intent.tooltip_leave();
        let command = tokio::time::timeout(Duration::from_secs(1), commands.recv())
            .await
            .unwrap();
        assert_eq!(command, Some(TooltipCommand::Hide));
    }
}
