//! The signal graph.
//!
//! ```text
//! slot 0: noise → HP → LP → low shelf → mid → high shelf → gain ─┐
//! slot 1: ...                                                     ├→ master → limiter → output
//! slot 2: ...                                                     │
//! slot 3: ...                                                    ─┘
//! ```
//!
//! The graph is split across a thread boundary:
//!
//! - [`AudioGraph`] lives with the controller. It records what each slot
//!   should be doing and sends [`GraphCommand`]s.
//! - [`GraphRenderer`] lives with the output stream. It drains commands at the
//!   top of every callback and renders interleaved `f32` frames.
//!
//! Commands cross through a lock-free SPSC ring buffer.

pub mod dsp;
mod slot;

pub use slot::{SlotNode, SlotParams};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::hardware::{HardwareFormat, OutputStream};
use crate::state::{MixState, SlotState, SLOT_COUNT};
use crate::MixerError;
use dsp::{PeakLimiter, SmoothedGain};
use slot::SlotVoice;

/// Capacity of the controller → audio thread command queue.
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Highest channel count a graph accepts.
pub const MAX_CHANNELS: u16 = 32;

/// Lowest sample rate a graph accepts.
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest sample rate a graph accepts.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Unique, increasing identifier of a built graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GraphId(u64);

impl GraphId {
    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

/// A change for the audio thread to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphCommand {
    /// Replace a slot's parameters.
    SetSlot {
        /// Slot index.
        index: usize,
        /// New parameters.
        params: SlotParams,
    },
    /// Prime a slot's noise source.
    ScheduleSlot {
        /// Slot index.
        index: usize,
    },
    /// Start a slot's transport.
    StartSlot {
        /// Slot index.
        index: usize,
    },
    /// Stop a slot's transport.
    StopSlot {
        /// Slot index.
        index: usize,
    },
    /// Set the master mixer gain.
    SetMasterGain(f32),
}

/// Renderer shared between the graph and an output stream.
pub type SharedRenderer = Arc<Mutex<GraphRenderer>>;

/// Audio-thread half of the graph.
pub struct GraphRenderer {
    graph_id: GraphId,
    format: HardwareFormat,
    commands: HeapCons<GraphCommand>,
    voices: Vec<SlotVoice>,
    master: SmoothedGain,
    limiter: PeakLimiter,
    frames_rendered: u64,
}

impl GraphRenderer {
    fn new(graph_id: GraphId, format: HardwareFormat, commands: HeapCons<GraphCommand>) -> Self {
        Self {
            graph_id,
            format,
            commands,
            voices: (0..SLOT_COUNT).map(|i| SlotVoice::new(i, format)).collect(),
            master: SmoothedGain::new(0.0, format.sample_rate),
            limiter: PeakLimiter::new(format.sample_rate),
            frames_rendered: 0,
        }
    }

    /// Graph this renderer belongs to.
    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    /// Format rendered.
    pub fn format(&self) -> HardwareFormat {
        self.format
    }

    /// Total frames rendered so far.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Current (smoothed) master gain.
    pub fn master_gain(&self) -> f32 {
        self.master.current()
    }

    /// Master gain the smoother is gliding toward.
    pub fn master_target(&self) -> f32 {
        self.master.target()
    }

    /// Number of slots whose transport is running.
    pub fn playing_slots(&self) -> usize {
        self.voices.iter().filter(|v| v.is_playing()).count()
    }

    /// Applies every queued command.
    pub fn drain_commands(&mut self) {
        while let Some(cmd) = self.commands.try_pop() {
            match cmd {
                GraphCommand::SetSlot { index, params } => {
                    if let Some(v) = self.voices.get_mut(index) {
                        v.set_params(params);
                    }
                }
                GraphCommand::ScheduleSlot { index } => {
                    if let Some(v) = self.voices.get_mut(index) {
                        v.schedule();
                    }
                }
                GraphCommand::StartSlot { index } => {
                    if let Some(v) = self.voices.get_mut(index) {
                        v.start();
                    }
                }
                GraphCommand::StopSlot { index } => {
                    if let Some(v) = self.voices.get_mut(index) {
                        v.stop();
                    }
                }
                GraphCommand::SetMasterGain(gain) => self.master.set_target(gain),
            }
        }
    }

    /// Renders interleaved frames into `out`, overwriting its contents.
    ///
    /// A trailing partial frame is zeroed.
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();
        out.fill(0.0);

        let channels = usize::from(self.format.channels.max(1));
        for voice in &mut self.voices {
            voice.render_add(out);
        }

        let mut frames = 0u64;
        for frame in out.chunks_exact_mut(channels) {
            let master = self.master.next();
            for sample in frame.iter_mut() {
                *sample *= master;
            }
            self.limiter.process_frame(frame);
            frames += 1;
        }
        self.frames_rendered += frames;
    }
}

/// Renders from a shared renderer without blocking the audio thread.
///
/// If the controller holds the renderer (an inline drain of a full command
/// queue), `out` is filled with silence and `false` is returned.
pub fn try_render(renderer: &Mutex<GraphRenderer>, out: &mut [f32]) -> bool {
    match renderer.try_lock() {
        Some(mut renderer) => {
            renderer.render(out);
            true
        }
        None => {
            out.fill(0.0);
            false
        }
    }
}

impl fmt::Debug for GraphRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphRenderer")
            .field("graph_id", &self.graph_id)
            .field("format", &self.format)
            .field("frames_rendered", &self.frames_rendered)
            .finish_non_exhaustive()
    }
}

/// Controller-side half of the graph. Owned exclusively by the controller.
pub struct AudioGraph {
    id: GraphId,
    format: HardwareFormat,
    slots: Vec<SlotNode>,
    master_gain: f32,
    commands: HeapProd<GraphCommand>,
    renderer: SharedRenderer,
    stream: Option<Box<dyn OutputStream>>,
}

impl AudioGraph {
    /// Graph identifier.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Format the graph renders at.
    pub fn format(&self) -> HardwareFormat {
        self.format
    }

    /// All slot nodes.
    pub fn slots(&self) -> &[SlotNode] {
        &self.slots
    }

    /// Slot node at `index`.
    pub fn slot(&self, index: usize) -> Option<&SlotNode> {
        self.slots.get(index)
    }

    /// Last master gain sent to the renderer.
    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    /// Renderer handle, for output backends.
    pub fn renderer(&self) -> SharedRenderer {
        Arc::clone(&self.renderer)
    }

    /// Pushes parameters for one slot. Returns `false` for an invalid index.
    pub fn apply_slot(&mut self, index: usize, slot: &SlotState) -> bool {
        let Some(node) = self.slots.get_mut(index) else {
            return false;
        };
        let cmd = node.apply(slot);
        self.send(cmd);
        true
    }

    /// Pushes parameters for every slot. Does not touch master gain or transport.
    pub fn apply_mix(&mut self, mix: &MixState) {
        for (index, slot) in mix.slots.iter().enumerate().take(SLOT_COUNT) {
            self.apply_slot(index, slot);
        }
    }

    /// Sets the master mixer gain.
    pub fn set_master_gain(&mut self, gain: f32) {
        let gain = gain.clamp(0.0, 1.0);
        self.master_gain = gain;
        self.send(GraphCommand::SetMasterGain(gain));
    }

    /// Schedules and starts every slot's transport. Idempotent.
    pub fn play_slots_if_needed(&mut self) {
        let mut cmds = Vec::new();
        for node in &mut self.slots {
            cmds.extend(node.schedule_if_needed());
            cmds.extend(node.play_if_needed());
        }
        for cmd in cmds {
            self.send(cmd);
        }
    }

    /// Stops every slot's transport. Idempotent.
    pub fn stop_slots(&mut self) {
        let cmds: Vec<_> = self.slots.iter_mut().filter_map(SlotNode::stop).collect();
        for cmd in cmds {
            self.send(cmd);
        }
    }

    /// Returns `true` if any slot's transport is running.
    pub fn any_slot_playing(&self) -> bool {
        self.slots.iter().any(SlotNode::is_playing)
    }

    /// Returns `true` if an output stream is attached (running or paused).
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Returns `true` if the attached output stream is producing audio.
    pub fn is_running(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_running())
    }

    pub(crate) fn attach_stream(&mut self, stream: Box<dyn OutputStream>) {
        self.stream = Some(stream);
    }

    /// Detaches the output stream. Dropping the result stops it.
    pub(crate) fn detach_stream(&mut self) -> Option<Box<dyn OutputStream>> {
        self.stream.take()
    }

    fn send(&mut self, cmd: GraphCommand) {
        if self.commands.try_push(cmd).is_ok() {
            return;
        }
        // Nothing is draining (no stream, or a stalled one). Apply the backlog
        // directly so parameter state never gets lost.
        self.renderer.lock().drain_commands();
        if self.commands.try_push(cmd).is_err() {
            tracing::warn!(graph = %self.id, ?cmd, "graph command queue full; command dropped");
        }
    }
}

impl fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioGraph")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("master_gain", &self.master_gain)
            .field("has_stream", &self.has_stream())
            .finish_non_exhaustive()
    }
}

/// Builds fresh [`AudioGraph`]s for a hardware format.
#[derive(Debug)]
pub struct AudioGraphBuilder {
    fallback: HardwareFormat,
    next_id: AtomicU64,
}

impl AudioGraphBuilder {
    /// Creates a builder that substitutes `fallback` for zero-valued formats.
    pub fn new(fallback: HardwareFormat) -> Self {
        Self {
            fallback,
            next_id: AtomicU64::new(1),
        }
    }

    /// Replaces zero sample rate or channel count with the fallback values.
    pub fn resolve_format(&self, reported: HardwareFormat) -> HardwareFormat {
        HardwareFormat {
            sample_rate: if reported.sample_rate > 0 {
                reported.sample_rate
            } else {
                self.fallback.sample_rate
            },
            channels: if reported.channels > 0 {
                reported.channels
            } else {
                self.fallback.channels
            },
        }
    }

    /// Builds and prepares a graph for the reported hardware format.
    ///
    /// The result has master gain 0 and every slot stopped.
    pub fn build(&self, reported: HardwareFormat) -> Result<AudioGraph, MixerError> {
        let format = self.resolve_format(reported);
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&format.sample_rate) {
            return Err(MixerError::graph_build(format!(
                "unsupported sample rate {} Hz",
                format.sample_rate
            )));
        }
        if format.channels > MAX_CHANNELS {
            return Err(MixerError::graph_build(format!(
                "unsupported channel count {}",
                format.channels
            )));
        }

        let id = GraphId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let slots = (0..SLOT_COUNT).map(SlotNode::new).collect();
        Ok(Self::prepare(id, format, slots))
    }

    fn prepare(id: GraphId, format: HardwareFormat, slots: Vec<SlotNode>) -> AudioGraph {
        let (producer, consumer) = HeapRb::<GraphCommand>::new(COMMAND_QUEUE_CAPACITY).split();
        let renderer = GraphRenderer::new(id, format, consumer);

        tracing::debug!(
            graph = %id,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "graph built"
        );

        AudioGraph {
            id,
            format,
            slots,
            master_gain: 0.0,
            commands: producer,
            renderer: Arc::new(Mutex::new(renderer)),
            stream: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> AudioGraphBuilder {
        AudioGraphBuilder::new(HardwareFormat::new(48_000, 2))
    }

    #[test]
    fn test_graph_ids_increase() {
        let b = builder();
        let a = b.build(HardwareFormat::new(44_100, 2)).unwrap();
        let c = b.build(HardwareFormat::new(44_100, 2)).unwrap();
        assert!(c.id() > a.id());
        assert_eq!(a.id().to_string(), "graph#1");
    }

    #[test]
    fn test_zero_format_falls_back() {
        let graph = builder().build(HardwareFormat::new(0, 0)).unwrap();
        assert_eq!(graph.format(), HardwareFormat::new(48_000, 2));

        let graph = builder().build(HardwareFormat::new(44_100, 0)).unwrap();
        assert_eq!(graph.format(), HardwareFormat::new(44_100, 2));
    }

    #[test]
    fn test_unsupported_format_fails() {
        let err = builder().build(HardwareFormat::new(1_000, 2)).unwrap_err();
        assert!(matches!(err, MixerError::GraphBuild { .. }));
        let err = builder().build(HardwareFormat::new(48_000, 64)).unwrap_err();
        assert!(matches!(err, MixerError::GraphBuild { .. }));
    }

    #[test]
    fn test_fresh_graph_is_stopped_and_silent() {
        let graph = builder().build(HardwareFormat::new(48_000, 2)).unwrap();
        assert_eq!(graph.slots().len(), SLOT_COUNT);
        assert_eq!(graph.master_gain(), 0.0);
        assert!(!graph.any_slot_playing());
        assert!(!graph.has_stream());
        assert!(!graph.is_running());
    }

    #[test]
    fn test_render_applies_commands() {
        let mut graph = builder().build(HardwareFormat::new(48_000, 2)).unwrap();
        graph.apply_mix(&MixState::default());
        graph.set_master_gain(0.8);
        graph.play_slots_if_needed();

        let renderer = graph.renderer();
        let mut out = vec![0.0; 4_800];
        renderer.lock().render(&mut out);

        let r = renderer.lock();
        assert_eq!(r.playing_slots(), SLOT_COUNT);
        assert_eq!(r.frames_rendered(), 2_400);
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_output_never_exceeds_limiter() {
        let mut graph = builder().build(HardwareFormat::new(48_000, 2)).unwrap();
        let mut mix = MixState::default();
        for slot in &mut mix.slots {
            slot.enabled = true;
            slot.volume = 1.0;
            slot.tone = 2.0;
            slot.eq.low_db = 12.0;
        }
        graph.apply_mix(&mix);
        graph.set_master_gain(1.0);
        graph.play_slots_if_needed();

        let renderer = graph.renderer();
        let mut out = vec![0.0; 9_600];
        for _ in 0..10 {
            renderer.lock().render(&mut out);
            assert!(out.iter().all(|s| s.abs() <= dsp::LIMITER_THRESHOLD + 1e-5));
        }
    }

    #[test]
    fn test_stopped_slots_render_silence() {
        let mut graph = builder().build(HardwareFormat::new(48_000, 1)).unwrap();
        graph.apply_mix(&MixState::default());
        graph.set_master_gain(1.0);
        graph.play_slots_if_needed();
        graph.stop_slots();

        let renderer = graph.renderer();
        let mut out = vec![1.0; 256];
        renderer.lock().render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_full_queue_is_drained_inline() {
        let mut graph = builder().build(HardwareFormat::new(48_000, 2)).unwrap();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            graph.set_master_gain(0.25);
        }
        let renderer = graph.renderer();
        assert_eq!(renderer.lock().master_target(), 0.0);

        // The queue is full, so this send applies the backlog itself.
        graph.set_master_gain(0.75);
        assert_eq!(renderer.lock().master_target(), 0.25);

        renderer.lock().drain_commands();
        assert_eq!(renderer.lock().master_target(), 0.75);
        assert_eq!(graph.master_gain(), 0.75);
    }

    #[test]
    fn test_try_render_yields_silence_when_contended() {
        let mut graph = builder().build(HardwareFormat::new(48_000, 2)).unwrap();
        graph.apply_mix(&MixState::default());
        graph.set_master_gain(1.0);
        graph.play_slots_if_needed();
        let renderer = graph.renderer();

        let held = renderer.lock();
        let mut out = vec![1.0; 512];
        assert!(!try_render(&renderer, &mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        drop(held);

        assert!(try_render(&renderer, &mut out));
        assert_eq!(renderer.lock().frames_rendered(), 256);
    }

    #[test]
    fn test_apply_slot_invalid_index() {
        let mut graph = builder().build(HardwareFormat::new(48_000, 2)).unwrap();
        assert!(!graph.apply_slot(SLOT_COUNT, &SlotState::default()));
        assert!(graph.apply_slot(0, &SlotState::default()));
    }
}
