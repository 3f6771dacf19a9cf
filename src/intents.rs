//! Process-wide entry points for system shortcuts and widgets.
//!
//! Shortcut handlers run outside the code that owns the controller, so the
//! application installs one [`PlaybackController`] here at startup and
//! intents reach it through [`perform`]. Each intent drives the same public
//! operation the UI would, then logs a debug snapshot.

use std::fmt;
use std::sync::OnceLock;

use crate::state::SLOT_COUNT;
use crate::{MixerError, PlaybackController};

static CONTROLLER: OnceLock<PlaybackController> = OnceLock::new();

/// Installs the process-wide controller.
///
/// Returns `false` if one was already installed; the first one stays.
pub fn install(controller: PlaybackController) -> bool {
    let installed = CONTROLLER.set(controller).is_ok();
    if !installed {
        tracing::warn!("playback controller already installed; ignoring");
    }
    installed
}

/// The installed controller, if any.
pub fn controller() -> Option<&'static PlaybackController> {
    CONTROLLER.get()
}

/// A request from outside the app's own UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Start playback.
    Play,
    /// Pause playback.
    Pause,
    /// Toggle between playing and paused.
    TogglePlayPause,
    /// Stop playback.
    Stop,
    /// Flip one slot on or off.
    ///
    /// `layer` is 1-based as shown to users; out-of-range values are clamped.
    ToggleSlot {
        /// 1-based slot number.
        layer: usize,
    },
    /// Turn one slot on or off.
    SetSlotEnabled {
        /// 1-based slot number, clamped like [`Intent::ToggleSlot`].
        layer: usize,
        /// New enabled flag.
        enabled: bool,
    },
}

fn slot_index(layer: usize) -> usize {
    layer.saturating_sub(1).min(SLOT_COUNT - 1)
}

impl Intent {
    fn reason(self) -> &'static str {
        match self {
            Self::Play => "intent-play",
            Self::Pause => "intent-pause",
            Self::TogglePlayPause => "intent-toggle",
            Self::Stop => "intent-stop",
            Self::ToggleSlot { .. } => "intent-toggle-slot",
            Self::SetSlotEnabled { .. } => "intent-set-slot-enabled",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToggleSlot { layer } => write!(f, "toggle-slot({layer})"),
            Self::SetSlotEnabled { layer, enabled } => {
                write!(f, "set-slot-enabled({layer}, {enabled})")
            }
            other => f.write_str(other.reason().trim_start_matches("intent-")),
        }
    }
}

/// Performs an intent on the installed controller.
///
/// # Errors
///
/// Returns [`MixerError::NotInstalled`] if [`install`] has not been called.
pub async fn perform(intent: Intent) -> Result<(), MixerError> {
    let controller = controller().ok_or(MixerError::NotInstalled)?;
    perform_on(controller, intent).await;
    Ok(())
}

/// Performs an intent on the given controller.
pub async fn perform_on(controller: &PlaybackController, intent: Intent) {
    tracing::info!(%intent, "performing intent");
    match intent {
        Intent::Play => controller.play().await,
        Intent::Pause => controller.pause().await,
        Intent::TogglePlayPause => controller.toggle_play_pause().await,
        Intent::Stop => controller.stop().await,
        Intent::ToggleSlot { layer } => {
            let index = slot_index(layer);
            // Persisted state is the source of truth for widgets.
            let enabled = controller.store().load_last_mix().slots[index].enabled;
            controller.set_slot_enabled(index, !enabled).await;
        }
        Intent::SetSlotEnabled { layer, enabled } => {
            controller.set_slot_enabled(slot_index(layer), enabled).await;
        }
    }
    controller.debug_dump(intent.reason());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockHardware;
    use crate::EngineState;

    fn controller(hw: &MockHardware) -> PlaybackController {
        PlaybackController::builder().mock(hw.clone()).build().unwrap()
    }

    #[test]
    fn test_intent_display() {
        assert_eq!(Intent::Play.to_string(), "play");
        assert_eq!(Intent::TogglePlayPause.to_string(), "toggle");
        assert_eq!(Intent::ToggleSlot { layer: 3 }.to_string(), "toggle-slot(3)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_pause_intents() {
        let hw = MockHardware::new();
        let controller = controller(&hw);

        perform_on(&controller, Intent::Play).await;
        assert_eq!(controller.engine_state(), EngineState::Running);

        perform_on(&controller, Intent::Pause).await;
        assert!(!controller.is_playing());
        assert_eq!(controller.engine_state(), EngineState::Muted);

        perform_on(&controller, Intent::TogglePlayPause).await;
        assert!(controller.is_playing());

        perform_on(&controller, Intent::Stop).await;
        assert!(!controller.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_slot_flips_persisted_flag() {
        let hw = MockHardware::new();
        let controller = controller(&hw);
        let before = controller.state().slots[1].enabled;

        perform_on(&controller, Intent::ToggleSlot { layer: 2 }).await;
        assert_eq!(controller.state().slots[1].enabled, !before);
        assert_eq!(controller.store().load_last_mix().slots[1].enabled, !before);

        perform_on(&controller, Intent::ToggleSlot { layer: 2 }).await;
        assert_eq!(controller.state().slots[1].enabled, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_slot_clamps_layer() {
        let hw = MockHardware::new();
        let controller = controller(&hw);
        let last = controller.state().slots[SLOT_COUNT - 1].enabled;
        let first = controller.state().slots[0].enabled;

        perform_on(&controller, Intent::ToggleSlot { layer: 99 }).await;
        assert_eq!(controller.state().slots[SLOT_COUNT - 1].enabled, !last);

        perform_on(&controller, Intent::ToggleSlot { layer: 0 }).await;
        assert_eq!(controller.state().slots[0].enabled, !first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_slot_enabled_intent() {
        let hw = MockHardware::new();
        let controller = controller(&hw);

        perform_on(
            &controller,
            Intent::SetSlotEnabled {
                layer: 3,
                enabled: true,
            },
        )
        .await;
        assert!(controller.state().slots[2].enabled);
        assert!(controller.store().load_last_mix().slots[2].enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_and_perform() {
        assert!(matches!(
            perform(Intent::Play).await,
            Err(MixerError::NotInstalled)
        ));

        let hw = MockHardware::new();
        assert!(install(controller(&hw)));
        assert!(!install(controller(&hw)));

        perform(Intent::Play).await.unwrap();
        assert!(super::controller().unwrap().is_playing());
        assert_eq!(hw.running_streams(), 1);
    }
}
