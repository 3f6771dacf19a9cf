//! Events produced by the mixer and OS notifications consumed by it.
//!
//! [`MixerEvent`]s are informational. They are how widgets, UI, and logs learn
//! that something changed; nothing about the lifecycle depends on anyone
//! listening. [`SessionNotification`]s flow the other way: the host forwards
//! OS audio notifications into
//! [`PlaybackController::handle_notification()`](crate::PlaybackController::handle_notification).

use std::fmt;
use std::sync::Arc;

use crate::controller::EngineState;
use crate::graph::GraphId;

/// Events emitted by the controller and the store.
///
/// # Example
///
/// ```
/// use noise_mixer::MixerEvent;
///
/// fn handle_event(event: MixerEvent) {
///     match event {
///         MixerEvent::PlaybackIntentChanged { is_playing } => {
///             println!("intent: {}", if is_playing { "playing" } else { "paused" });
///         }
///         MixerEvent::MixSaved => println!("reload widgets"),
///         MixerEvent::StartFailed { error } => eprintln!("start failed: {error}"),
///         other => println!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum MixerEvent {
    /// The intended playing state changed.
    PlaybackIntentChanged {
        /// New intended state.
        is_playing: bool,
    },

    /// The engine state machine moved.
    EngineStateChanged {
        /// Previous state.
        from: EngineState,
        /// Current state.
        to: EngineState,
    },

    /// A mix state record was persisted.
    ///
    /// External readers (widgets) should reload on this event.
    MixSaved,

    /// A fresh graph was built.
    GraphBuilt {
        /// Identifier of the new graph.
        graph_id: GraphId,
        /// Sample rate the graph runs at.
        sample_rate: u32,
        /// Output channel count.
        channels: u16,
    },

    /// An engine start attempt failed and a recovery step is being taken.
    StartRecovering {
        /// Which attempt failed (1-based).
        attempt: u32,
        /// Description of the failure.
        error: String,
    },

    /// Every start attempt failed. Playback intent has been reset to paused.
    StartFailed {
        /// Description of the last failure.
        error: String,
    },

    /// The audio session was released after the idle grace window.
    SessionReleased,

    /// An OS interruption silenced playback.
    Interrupted,

    /// The output route changed and the graph was rebuilt.
    RouteChanged {
        /// Why the route changed.
        reason: RouteChangeReason,
    },
}

/// Callback type for receiving [`MixerEvent`]s.
///
/// Register one via
/// [`PlaybackControllerBuilder::on_event()`](crate::PlaybackControllerBuilder::on_event).
/// Callbacks run inline on whichever task produced the event, so keep them short.
///
/// # Example
///
/// ```ignore
/// use noise_mixer::PlaybackController;
///
/// let controller = PlaybackController::builder()
///     .on_event(|event| tracing::info!(?event, "mixer event"))
///     .build()?;
/// ```
pub type EventCallback = Arc<dyn Fn(MixerEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use noise_mixer::{event_callback, MixerEvent};
///
/// let callback = event_callback(|event: MixerEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(MixerEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invokes the callback, if one is registered.
pub(crate) fn emit(callback: Option<&EventCallback>, event: MixerEvent) {
    if let Some(cb) = callback {
        cb(event);
    }
}

/// Why the output route changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteChangeReason {
    /// A new output became available (headphones plugged in).
    NewDeviceAvailable,
    /// The previous output went away (headphones unplugged).
    OldDeviceUnavailable,
    /// The session category changed.
    CategoryChange,
    /// The route was overridden.
    Override,
    /// The device woke from sleep.
    WakeFromSleep,
    /// No route is suitable for the current category.
    NoSuitableRouteForCategory,
    /// The route's configuration (format, buffer) changed.
    RouteConfigurationChange,
    /// The platform gave no reason.
    Unknown,
}

impl fmt::Display for RouteChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NewDeviceAvailable => "new device available",
            Self::OldDeviceUnavailable => "old device unavailable",
            Self::CategoryChange => "category change",
            Self::Override => "override",
            Self::WakeFromSleep => "wake from sleep",
            Self::NoSuitableRouteForCategory => "no suitable route",
            Self::RouteConfigurationChange => "route configuration change",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// OS audio notifications the controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotification {
    /// Another audio client took the hardware. Playback must stop now.
    InterruptionBegan,
    /// The interruption is over.
    InterruptionEnded {
        /// Whether the OS suggests resuming.
        should_resume: bool,
    },
    /// The output route changed.
    RouteChanged {
        /// Why.
        reason: RouteChangeReason,
    },
    /// The media services daemon restarted. Every hardware object is invalid.
    MediaServicesReset,
}
