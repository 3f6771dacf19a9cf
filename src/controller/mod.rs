//! Playback lifecycle controller.
//!
//! [`PlaybackController`] owns the mix state, the audio graph, and the session
//! lifecycle. Every public operation is async and safe to call from any task.
//! Mutable state lives behind one mutex that is never held across an
//! `.await`; a [`RequestEpoch`] invalidates in-flight start sequences when a
//! newer request arrives.

mod engine;
mod notifications;

use std::fmt::{self, Write as _};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::builder::PlaybackControllerBuilder;
use crate::config::MixerConfig;
use crate::epoch::RequestEpoch;
use crate::event::{emit, EventCallback, MixerEvent};
use crate::graph::{AudioGraph, AudioGraphBuilder, GraphId};
use crate::hardware::{ErrorClassifier, OutputBackend};
use crate::scheduler::DelayedTask;
use crate::session::{IdleCheck, SessionLifecycleManager};
use crate::state::{
    clamp_or, EqState, MixState, SlotState, HIGH_CUT_RANGE, LOW_CUT_RANGE, VOLUME_RANGE,
};
use crate::store::{MixStateStore, SavePolicy};

/// Minimum spacing kept between the low and high cut when one pushes the other.
const CUT_SPACING_HZ: f32 = 1_000.0;

/// Where the engine is in its lifecycle.
///
/// ```text
/// NoGraph → Idle → Activating → Starting → Running
/// Running → FadingOut → Muted → Idle → Stopped
/// any → Rebuilding → NoGraph
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// No graph has been built.
    NoGraph,
    /// A graph exists and is stopped.
    Idle,
    /// The audio session is being activated.
    Activating,
    /// The output stream is being started.
    Starting,
    /// Audio is playing.
    Running,
    /// The master gain is fading down.
    FadingOut,
    /// Paused within the grace window: the stream runs at zero gain.
    Muted,
    /// Idle, and the audio session has been released.
    Stopped,
    /// The graph is being torn down and rebuilt.
    Rebuilding,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoGraph => "no-graph",
            Self::Idle => "idle",
            Self::Activating => "activating",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::FadingOut => "fading-out",
            Self::Muted => "muted",
            Self::Stopped => "stopped",
            Self::Rebuilding => "rebuilding",
        };
        f.write_str(name)
    }
}

pub(crate) struct ControllerState {
    mix: MixState,
    graph: Option<AudioGraph>,
    engine_state: EngineState,
    // Emitted once the lock is released.
    events: Vec<MixerEvent>,
}

impl ControllerState {
    pub(crate) fn new(mix: MixState) -> Self {
        Self {
            mix,
            graph: None,
            engine_state: EngineState::NoGraph,
            events: Vec::new(),
        }
    }

    fn set_engine_state(&mut self, to: EngineState) {
        let from = self.engine_state;
        if from == to {
            return;
        }
        self.engine_state = to;
        tracing::debug!(%from, %to, "engine state changed");
        self.events.push(MixerEvent::EngineStateChanged { from, to });
    }

    fn set_playing(&mut self, is_playing: bool) {
        let changed = self.mix.is_playing != is_playing;
        self.mix.is_playing = is_playing;
        self.mix.touch();
        if changed {
            self.events
                .push(MixerEvent::PlaybackIntentChanged { is_playing });
        }
    }

    fn graph_running(&self) -> bool {
        self.graph.as_ref().is_some_and(AudioGraph::is_running)
    }

    /// Pushes the master volume to the graph. Only audible states take it.
    fn push_master(&mut self) {
        if self.engine_state != EngineState::Running {
            return;
        }
        let volume = self.mix.master_volume;
        if let Some(graph) = self.graph.as_mut() {
            graph.set_master_gain(volume);
        }
    }
}

pub(crate) struct Inner {
    pub(crate) config: Arc<MixerConfig>,
    pub(crate) state: Mutex<ControllerState>,
    pub(crate) epoch: RequestEpoch,
    pub(crate) session: Arc<SessionLifecycleManager>,
    pub(crate) backend: Arc<dyn OutputBackend>,
    pub(crate) graph_builder: AudioGraphBuilder,
    pub(crate) classifier: ErrorClassifier,
    pub(crate) store: MixStateStore,
    pub(crate) engine_stop: DelayedTask,
    /// Held for the whole start ladder so starts never overlap.
    pub(crate) start_gate: tokio::sync::Mutex<()>,
    pub(crate) on_event: Option<EventCallback>,
}

impl Inner {
    /// Runs `f` under the state lock, then emits whatever events it queued.
    fn update<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> R {
        let (result, events) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            (result, std::mem::take(&mut state.events))
        };
        for event in events {
            emit(self.on_event.as_ref(), event);
        }
        result
    }

    fn is_playing(&self) -> bool {
        self.state.lock().mix.is_playing
    }

    /// `true` while `request` is the newest request and playback is intended.
    fn still_current(&self, request: u64) -> bool {
        !self.epoch.is_stale(request) && self.is_playing()
    }

    fn mutate_slot(
        &self,
        index: usize,
        policy: SavePolicy,
        f: impl FnOnce(&mut SlotState),
    ) -> bool {
        let snapshot = self.update(|s| {
            let slot = s.mix.slots.get_mut(index)?;
            f(slot);
            *slot = slot.normalised();
            let slot = *slot;
            s.mix.touch();
            if let Some(graph) = s.graph.as_mut() {
                graph.apply_slot(index, &slot);
            }
            tracing::trace!(index, ?slot, "slot parameters pushed");
            Some(s.mix.clone())
        });

        match snapshot {
            Some(snapshot) => {
                self.store.save(&snapshot, policy);
                true
            }
            None => {
                tracing::warn!(index, "slot index out of range; ignored");
                false
            }
        }
    }
}

struct ControllerIdleCheck(Weak<Inner>);

impl IdleCheck for ControllerIdleCheck {
    fn is_idle(&self) -> bool {
        let Some(inner) = self.0.upgrade() else {
            return true;
        };
        let state = inner.state.lock();
        !state.mix.is_playing && !state.graph_running()
    }

    fn session_released(&self) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        inner.update(|s| {
            if s.engine_state == EngineState::Idle {
                s.set_engine_state(EngineState::Stopped);
            }
            s.events.push(MixerEvent::SessionReleased);
        });
    }
}

/// Handle to the noise mixer.
///
/// Cheap to clone; clones drive the same engine.
///
/// # Example
///
/// ```no_run
/// use noise_mixer::PlaybackController;
///
/// # async fn run() -> Result<(), noise_mixer::MixerError> {
/// let controller = PlaybackController::builder().build()?;
/// controller.bootstrap_on_launch().await;
///
/// controller.set_slot_enabled(1, true).await;
/// controller.play().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PlaybackController {
    pub(crate) inner: Arc<Inner>,
}

impl PlaybackController {
    /// Creates a builder.
    pub fn builder() -> PlaybackControllerBuilder {
        PlaybackControllerBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    // Lifecycle

    /// Loads persisted state and resumes playback if it was playing and the
    /// resume-on-launch preference is set.
    ///
    /// A persisted "playing" without the preference is corrected to paused
    /// and saved at once.
    pub async fn bootstrap_on_launch(&self) {
        let inner = &self.inner;
        let loaded = inner.store.load_last_mix();
        let resume = inner.store.resume_on_launch();
        let should_play = loaded.is_playing && resume;
        let corrected = loaded.is_playing && !resume;

        let snapshot = inner.update(|s| {
            s.mix = loaded;
            s.mix.is_playing = false;
            if corrected {
                s.mix.touch();
            }
            if let Some(graph) = s.graph.as_mut() {
                graph.apply_mix(&s.mix);
            }
            s.mix.clone()
        });
        tracing::info!(should_play, resume, "bootstrapping mixer");

        if corrected {
            tracing::info!("persisted state claimed playing without resume-on-launch; corrected");
            inner.store.save_immediate(&snapshot);
        }

        if let Err(e) = inner.prepare_if_needed() {
            tracing::error!(error = %e, "failed to prepare audio graph");
        }

        if should_play {
            self.play().await;
        }
    }

    /// Starts playback.
    pub async fn play(&self) {
        let inner = &self.inner;
        if let Err(e) = inner.prepare_if_needed() {
            tracing::error!(error = %e, "failed to prepare audio graph");
        }

        let (request, snapshot) = inner.update(|s| {
            let request = inner.epoch.bump();
            s.set_playing(true);
            (request, s.mix.clone())
        });
        tracing::info!(request, "play");
        inner.store.save_immediate(&snapshot);

        inner.start_engine_if_needed(request).await;

        if inner.config.auto_enable_resume_on_play
            && self.engine_state() == EngineState::Running
            && !inner.store.has_resume_on_launch_value()
        {
            inner.store.set_resume_on_launch(true);
        }
    }

    /// Pauses playback, persisting immediately.
    ///
    /// The engine stays primed at zero gain for the grace window, so a
    /// `play()` soon after is a cheap un-mute.
    pub async fn pause(&self) {
        self.pause_with(SavePolicy::Immediate).await;
    }

    /// Pauses playback with the given persistence policy.
    ///
    /// [`SavePolicy::None`] pauses without saving.
    pub async fn pause_with(&self, policy: SavePolicy) {
        let inner = &self.inner;
        let idle = inner.update(|s| !s.mix.is_playing && !s.graph_running());
        if idle {
            let snapshot = inner.state.lock().mix.clone();
            inner.store.save(&snapshot, policy);
            inner.schedule_session_deactivation();
            return;
        }

        let (request, snapshot) = inner.update(|s| {
            let request = inner.epoch.bump();
            s.set_playing(false);
            (request, s.mix.clone())
        });
        tracing::info!(request, "pause");
        inner.store.save(&snapshot, policy);

        inner.mute_for_pause(request).await;
        if inner.epoch.is_stale(request) || inner.is_playing() {
            return;
        }
        inner.schedule_engine_stop(request);
    }

    /// Stops playback, fading out and releasing the output stream now.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let (request, snapshot) = inner.update(|s| {
            let request = inner.epoch.bump();
            s.set_playing(false);
            (request, s.mix.clone())
        });
        tracing::info!(request, "stop");
        inner.store.save_immediate(&snapshot);
        inner.stop_engine_soon(request).await;
    }

    /// Pauses if playing, plays otherwise.
    pub async fn toggle_play_pause(&self) {
        if self.is_playing() {
            self.pause().await;
        } else {
            self.play().await;
        }
    }

    /// Rebuilds the graph from scratch and restarts playback if intended.
    pub async fn rebuild(&self, reason: &str) {
        let inner = &self.inner;
        let request = inner.epoch.bump();
        if let Err(e) = inner.rebuild_graph(reason) {
            tracing::error!(error = %e, reason, "rebuild failed");
        }
        if inner.is_playing() {
            inner.start_engine_if_needed(request).await;
        }
    }

    // Mix

    /// Replaces the whole mix and pushes every parameter.
    ///
    /// The hardware running state and the current playing intent are kept.
    pub async fn apply(&self, state: MixState) {
        let inner = &self.inner;
        if let Err(e) = inner.prepare_if_needed() {
            tracing::error!(error = %e, "failed to prepare audio graph");
        }

        let snapshot = inner.update(|s| {
            let mut next = state.normalised();
            next.is_playing = s.mix.is_playing;
            next.touch();
            s.mix = next;
            if let Some(graph) = s.graph.as_mut() {
                graph.apply_mix(&s.mix);
            }
            s.push_master();
            s.mix.clone()
        });
        inner.store.save_immediate(&snapshot);
    }

    /// Sets the master volume.
    pub async fn set_master_volume(&self, volume: f32, policy: SavePolicy) {
        let inner = &self.inner;
        let snapshot = inner.update(|s| {
            s.mix.master_volume = clamp_or(volume, &VOLUME_RANGE, s.mix.master_volume);
            s.mix.touch();
            s.push_master();
            s.mix.clone()
        });
        tracing::trace!(volume = snapshot.master_volume, "master volume pushed");
        inner.store.save(&snapshot, policy);
    }

    /// Enables or disables a slot. Always saved immediately.
    ///
    /// When playback is intended the hardware is re-asserted so a newly
    /// enabled slot is audible at once.
    pub async fn set_slot_enabled(&self, index: usize, enabled: bool) {
        let inner = &self.inner;
        if let Err(e) = inner.prepare_if_needed() {
            tracing::error!(error = %e, "failed to prepare audio graph");
        }
        let applied = inner.mutate_slot(index, SavePolicy::Immediate, |slot| {
            slot.enabled = enabled;
        });
        if applied && inner.is_playing() {
            inner.start_engine_if_needed(inner.epoch.current()).await;
        }
    }

    /// Sets a slot's volume.
    pub async fn set_slot_volume(&self, index: usize, volume: f32, policy: SavePolicy) {
        self.prepare_for_edit();
        self.inner.mutate_slot(index, policy, |slot| slot.volume = volume);
    }

    /// Sets a slot's tone (0 = white, 1 = pink, 2 = brown).
    pub async fn set_slot_tone(&self, index: usize, tone: f32, policy: SavePolicy) {
        self.prepare_for_edit();
        self.inner.mutate_slot(index, policy, |slot| slot.tone = tone);
    }

    /// Sets a slot's low cut. Pushes the high cut up if they would cross.
    pub async fn set_slot_low_cut(&self, index: usize, hz: f32, policy: SavePolicy) {
        self.prepare_for_edit();
        self.inner.mutate_slot(index, policy, |slot| {
            slot.low_cut_hz = clamp_or(hz, &LOW_CUT_RANGE, slot.low_cut_hz);
            if slot.low_cut_hz >= slot.high_cut_hz {
                slot.high_cut_hz = (slot.low_cut_hz + CUT_SPACING_HZ).min(*HIGH_CUT_RANGE.end());
            }
        });
    }

    /// Sets a slot's high cut. Pushes the low cut down if they would cross.
    pub async fn set_slot_high_cut(&self, index: usize, hz: f32, policy: SavePolicy) {
        self.prepare_for_edit();
        self.inner.mutate_slot(index, policy, |slot| {
            slot.high_cut_hz = clamp_or(hz, &HIGH_CUT_RANGE, slot.high_cut_hz);
            if slot.low_cut_hz >= slot.high_cut_hz {
                slot.low_cut_hz = (slot.high_cut_hz - CUT_SPACING_HZ).max(*LOW_CUT_RANGE.start());
            }
        });
    }

    /// Sets a slot's three-band EQ.
    pub async fn set_slot_eq(&self, index: usize, eq: EqState, policy: SavePolicy) {
        self.prepare_for_edit();
        self.inner.mutate_slot(index, policy, |slot| slot.eq = eq);
    }

    fn prepare_for_edit(&self) {
        if let Err(e) = self.inner.prepare_if_needed() {
            tracing::error!(error = %e, "failed to prepare audio graph");
        }
    }

    /// Writes any pending throttled save now. Call before the process suspends.
    pub async fn flush_persistence(&self) {
        self.inner.store.flush_pending();
    }

    // Observation

    /// Intended playing state.
    pub fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    /// Current engine state.
    pub fn engine_state(&self) -> EngineState {
        self.inner.state.lock().engine_state
    }

    /// Snapshot of the current mix.
    pub fn state(&self) -> MixState {
        self.inner.state.lock().mix.clone()
    }

    /// Identifier of the current graph, if one is built.
    pub fn graph_id(&self) -> Option<GraphId> {
        self.inner.state.lock().graph.as_ref().map(AudioGraph::id)
    }

    /// The persistence layer.
    pub fn store(&self) -> &MixStateStore {
        &self.inner.store
    }

    /// The active configuration.
    pub fn config(&self) -> &MixerConfig {
        &self.inner.config
    }

    /// Whether the audio session is believed to be active.
    pub fn is_session_active(&self) -> bool {
        self.inner.session.is_active()
    }

    /// Multi-line description of the engine, session, and mix.
    pub fn debug_snapshot(&self) -> String {
        let desc = self.inner.session.describe();
        let state = self.inner.state.lock();
        let mix = &state.mix;

        let mut out = String::new();
        let _ = writeln!(out, "time={}", chrono::Utc::now().to_rfc3339());
        let _ = writeln!(
            out,
            "engine_state={} backend={}",
            state.engine_state,
            self.inner.backend.name()
        );
        match state.graph.as_ref() {
            Some(graph) => {
                let _ = writeln!(
                    out,
                    "graph={} sample_rate={} channels={} master_gain={:.2} has_stream={} running={}",
                    graph.id(),
                    graph.format().sample_rate,
                    graph.format().channels,
                    graph.master_gain(),
                    graph.has_stream(),
                    graph.is_running()
                );
            }
            None => {
                let _ = writeln!(out, "graph=none");
            }
        }
        let _ = writeln!(
            out,
            "session category={} active={} configured={} sample_rate={} io_buffer={:.4}s latency={:.4}s",
            desc.category.map_or_else(|| "unset".to_string(), |c| c.to_string()),
            desc.active,
            self.inner.session.is_configured(),
            desc.sample_rate,
            desc.io_buffer.as_secs_f64(),
            desc.output_latency.as_secs_f64()
        );
        let _ = writeln!(out, "route={}", desc.route);

        let enabled: Vec<usize> = mix.enabled_slots().iter().map(|i| i + 1).collect();
        let volumes: Vec<String> = mix
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| format!("L{}={:.2}", i + 1, slot.volume))
            .collect();
        let _ = write!(
            out,
            "state is_playing={} master={:.2} enabled_slots={:?} {}",
            mix.is_playing,
            mix.master_volume,
            enabled,
            volumes.join(" ")
        );
        out
    }

    /// Logs [`debug_snapshot()`](Self::debug_snapshot) at debug level.
    pub fn debug_dump(&self, reason: &str) {
        let snapshot = self.debug_snapshot();
        tracing::debug!(reason, "debug snapshot:\n{snapshot}");
    }
}

impl fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PlaybackController")
            .field("is_playing", &state.mix.is_playing)
            .field("engine_state", &state.engine_state)
            .field("graph", &state.graph.as_ref().map(AudioGraph::id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockHardware;
    use crate::store::MemoryStore;
    use crate::MixerEvent;
    use std::time::Duration;

    fn controller() -> (PlaybackController, MockHardware, Arc<MemoryStore>) {
        let hw = MockHardware::new();
        let store = Arc::new(MemoryStore::new());
        let controller = PlaybackController::builder()
            .mock(hw.clone())
            .store_backend(store.clone())
            .build()
            .unwrap();
        (controller, hw, store)
    }

    #[test]
    fn test_engine_state_display() {
        assert_eq!(EngineState::FadingOut.to_string(), "fading-out");
        assert_eq!(EngineState::NoGraph.to_string(), "no-graph");
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_reaches_running() {
        let (controller, hw, _) = controller();
        controller.play().await;

        assert!(controller.is_playing());
        assert_eq!(controller.engine_state(), EngineState::Running);
        assert_eq!(hw.running_streams(), 1);
        assert!(controller.store().load_last_mix().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_play_enables_resume_on_launch() {
        let (controller, _, _) = controller();
        assert!(!controller.store().has_resume_on_launch_value());
        controller.play().await;
        assert!(controller.store().resume_on_launch());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_play_keeps_explicit_resume_preference() {
        let (controller, _, _) = controller();
        controller.store().set_resume_on_launch(false);
        controller.play().await;
        assert!(!controller.store().resume_on_launch());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_mutes_then_tears_down() {
        let (controller, hw, _) = controller();
        controller.play().await;
        controller.pause().await;

        assert!(!controller.is_playing());
        assert_eq!(controller.engine_state(), EngineState::Muted);
        assert_eq!(hw.running_streams(), 1);

        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(controller.engine_state(), EngineState::Idle);
        assert_eq!(hw.live_streams(), 0);
        assert!(hw.is_active());

        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(controller.engine_state(), EngineState::Stopped);
        assert!(!hw.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_without_saving() {
        let (controller, _, _) = controller();
        controller.play().await;
        controller.pause_with(SavePolicy::None).await;

        assert!(!controller.is_playing());
        assert!(controller.store().load_last_mix().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_skips_muted() {
        let (controller, hw, _) = controller();
        controller.play().await;
        controller.stop().await;

        assert_eq!(controller.engine_state(), EngineState::Idle);
        assert_eq!(hw.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle() {
        let (controller, _, _) = controller();
        controller.toggle_play_pause().await;
        assert!(controller.is_playing());
        controller.toggle_play_pause().await;
        assert!(!controller.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_preserves_intent() {
        let (controller, _, _) = controller();
        controller.play().await;

        let mut next = MixState::default();
        next.is_playing = false;
        next.master_volume = 0.3;
        controller.apply(next).await;

        assert!(controller.is_playing());
        assert_eq!(controller.engine_state(), EngineState::Running);
        assert!((controller.state().master_volume - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_slot_index_is_ignored() {
        let (controller, _, store) = controller();
        let before = controller.state();
        controller.set_slot_volume(9, 0.5, SavePolicy::Immediate).await;
        controller.set_slot_enabled(9, true).await;
        assert_eq!(controller.state().slots, before.slots);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_cut_pushes_high_cut() {
        let (controller, _, _) = controller();
        controller
            .set_slot_high_cut(0, 2_000.0, SavePolicy::Immediate)
            .await;
        controller
            .set_slot_low_cut(0, 2_500.0, SavePolicy::Immediate)
            .await;
        let slot = controller.state().slots[0];
        assert!((slot.low_cut_hz - 2_500.0).abs() < f32::EPSILON);
        assert!((slot.high_cut_hz - 3_500.0).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_cut_pushes_low_cut() {
        let (controller, _, _) = controller();
        controller
            .set_slot_low_cut(0, 800.0, SavePolicy::Immediate)
            .await;
        controller
            .set_slot_high_cut(0, 500.0, SavePolicy::Immediate)
            .await;
        let slot = controller.state().slots[0];
        assert!(slot.low_cut_hz < slot.high_cut_hz);
        assert!((slot.low_cut_hz - 10.0).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_eq_is_clamped() {
        let (controller, _, _) = controller();
        controller
            .set_slot_eq(1, EqState::new(40.0, -40.0, 3.0), SavePolicy::Immediate)
            .await;
        let eq = controller.state().slots[1].eq;
        assert!((eq.low_db - 12.0).abs() < f32::EPSILON);
        assert!((eq.mid_db + 12.0).abs() < f32::EPSILON);
        assert!((eq.high_db - 3.0).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enabling_slot_while_playing_plays_it() {
        let (controller, hw, _) = controller();
        controller.play().await;
        controller.set_slot_enabled(2, true).await;

        assert!(controller.state().slots[2].enabled);
        assert_eq!(controller.engine_state(), EngineState::Running);
        assert_eq!(hw.streams_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_corrects_phantom_playing() {
        let (controller, _, _) = controller();
        let mut persisted = MixState::default();
        persisted.is_playing = true;
        controller.store().save_immediate(&persisted);
        controller.store().set_resume_on_launch(false);

        controller.bootstrap_on_launch().await;

        assert!(!controller.is_playing());
        assert!(!controller.store().load_last_mix().is_playing);
        assert_eq!(controller.engine_state(), EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_resumes_when_enabled() {
        let (controller, _, _) = controller();
        let mut persisted = MixState::default();
        persisted.is_playing = true;
        persisted.master_volume = 0.5;
        controller.store().save_immediate(&persisted);
        controller.store().set_resume_on_launch(true);

        controller.bootstrap_on_launch().await;

        assert!(controller.is_playing());
        assert_eq!(controller.engine_state(), EngineState::Running);
        assert!((controller.state().master_volume - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_emitted() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let controller = PlaybackController::builder()
            .mock(MockHardware::new())
            .on_event(move |e| sink.lock().push(e))
            .build()
            .unwrap();

        controller.play().await;

        let events = events.lock();
        assert!(events.contains(&MixerEvent::PlaybackIntentChanged { is_playing: true }));
        assert!(events.contains(&MixerEvent::MixSaved));
        assert!(events.iter().any(|e| matches!(e, MixerEvent::GraphBuilt { .. })));
        assert!(events.contains(&MixerEvent::EngineStateChanged {
            from: EngineState::Starting,
            to: EngineState::Running,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_snapshot() {
        let (controller, _, _) = controller();
        controller.play().await;
        let snapshot = controller.debug_snapshot();
        assert!(snapshot.contains("engine_state=running"));
        assert!(snapshot.contains("sample_rate=48000"));
        assert!(snapshot.contains("route=mock"));
        assert!(snapshot.contains("L1=0.65"));
        controller.debug_dump("test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_rebuild_restarts_playback() {
        let (controller, hw, _) = controller();
        controller.play().await;
        let before = controller.graph_id().unwrap();

        controller.rebuild("manual").await;

        assert!(controller.graph_id().unwrap() > before);
        assert_eq!(controller.engine_state(), EngineState::Running);
        assert_eq!(hw.streams_opened(), 2);
        assert_eq!(hw.live_streams(), 1);
    }
}
