//! Mock hardware for testing without audio devices.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    AudioSession, HardwareFormat, OutputBackend, OutputStream, SessionCategory,
    SessionDescription,
};
use crate::graph::SharedRenderer;
use crate::HardwareError;

#[derive(Default)]
struct Script {
    queued: VecDeque<HardwareError>,
    always: Option<HardwareError>,
}

impl Script {
    fn next_failure(&mut self) -> Option<HardwareError> {
        self.queued.pop_front().or_else(|| self.always.clone())
    }
}

struct MockState {
    format: Mutex<HardwareFormat>,
    category: Mutex<Option<SessionCategory>>,
    rejected_categories: Mutex<Vec<SessionCategory>>,
    preferred_sample_rate: AtomicU32,
    io_buffer: Mutex<Duration>,
    active: AtomicBool,
    other_audio: AtomicBool,
    activation_script: Mutex<Script>,
    deactivation_script: Mutex<Script>,
    start_script: Mutex<Script>,
    activation_latency: Mutex<Duration>,
    start_latency: Mutex<Duration>,
    activation_attempts: AtomicU32,
    deactivations: AtomicU32,
    start_calls: AtomicU32,
    streams_opened: AtomicU32,
    live_streams: AtomicU32,
    running_streams: AtomicU32,
    last_renderer: Mutex<Option<SharedRenderer>>,
    stream_control_hook: Mutex<Option<StreamControlHook>>,
}

type StreamControlHook = Arc<dyn Fn() + Send + Sync>;

/// Scriptable session and output backend for tests.
///
/// Clones share state, so a test can keep one handle for scripting and
/// assertions while the controller owns another.
///
/// # Example
///
/// ```
/// use noise_mixer::hardware::MockHardware;
/// use noise_mixer::{HardwareError, HardwareErrorKind};
///
/// let hw = MockHardware::new();
/// // First two activations fail transiently, then succeed.
/// hw.push_activation_failure(HardwareError::new(HardwareErrorKind::Busy, "busy"));
/// hw.push_activation_failure(HardwareError::new(HardwareErrorKind::Busy, "busy"));
/// assert_eq!(hw.activation_attempts(), 0);
/// ```
#[derive(Clone)]
pub struct MockHardware {
    state: Arc<MockState>,
}

impl MockHardware {
    /// Creates mock hardware reporting 48 kHz stereo.
    pub fn new() -> Self {
        Self::with_format(HardwareFormat::new(48_000, 2))
    }

    /// Creates mock hardware reporting the given format.
    pub fn with_format(format: HardwareFormat) -> Self {
        Self {
            state: Arc::new(MockState {
                format: Mutex::new(format),
                category: Mutex::new(None),
                rejected_categories: Mutex::new(Vec::new()),
                preferred_sample_rate: AtomicU32::new(0),
                io_buffer: Mutex::new(Duration::ZERO),
                active: AtomicBool::new(false),
                other_audio: AtomicBool::new(false),
                activation_script: Mutex::new(Script::default()),
                deactivation_script: Mutex::new(Script::default()),
                start_script: Mutex::new(Script::default()),
                activation_latency: Mutex::new(Duration::ZERO),
                start_latency: Mutex::new(Duration::ZERO),
                activation_attempts: AtomicU32::new(0),
                deactivations: AtomicU32::new(0),
                start_calls: AtomicU32::new(0),
                streams_opened: AtomicU32::new(0),
                live_streams: AtomicU32::new(0),
                running_streams: AtomicU32::new(0),
                last_renderer: Mutex::new(None),
                stream_control_hook: Mutex::new(None),
            }),
        }
    }

    // Scripting

    /// Changes the reported output format (e.g. after a route change).
    pub fn set_format(&self, format: HardwareFormat) {
        *self.state.format.lock() = format;
    }

    /// Makes `set_category` reject `category`.
    pub fn reject_category(&self, category: SessionCategory) {
        self.state.rejected_categories.lock().push(category);
    }

    /// Sets whether another client appears to be playing audio.
    pub fn set_other_audio_playing(&self, playing: bool) {
        self.state.other_audio.store(playing, Ordering::SeqCst);
    }

    /// Queues a failure for the next activation attempt.
    pub fn push_activation_failure(&self, error: HardwareError) {
        self.state.activation_script.lock().queued.push_back(error);
    }

    /// Fails every activation with `error` (or stops failing with `None`).
    pub fn fail_activation_always(&self, error: Option<HardwareError>) {
        self.state.activation_script.lock().always = error;
    }

    /// Queues a failure for the next deactivation.
    pub fn push_deactivation_failure(&self, error: HardwareError) {
        self.state.deactivation_script.lock().queued.push_back(error);
    }

    /// Runs `hook` on every `play()`/`pause()` of a stream handed out by this mock.
    pub fn on_stream_control<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.state.stream_control_hook.lock() = Some(Arc::new(hook));
    }

    /// Queues a failure for the next stream start (open or resume).
    pub fn push_start_failure(&self, error: HardwareError) {
        self.state.start_script.lock().queued.push_back(error);
    }

    /// Fails every stream start with `error` (or stops failing with `None`).
    pub fn fail_start_always(&self, error: Option<HardwareError>) {
        self.state.start_script.lock().always = error;
    }

    /// Delay before each activation completes.
    pub fn set_activation_latency(&self, latency: Duration) {
        *self.state.activation_latency.lock() = latency;
    }

    /// Delay before each stream open completes.
    pub fn set_start_latency(&self, latency: Duration) {
        *self.state.start_latency.lock() = latency;
    }

    // Observation

    /// Activation attempts so far (successful or not).
    pub fn activation_attempts(&self) -> u32 {
        self.state.activation_attempts.load(Ordering::SeqCst)
    }

    /// Deactivation calls so far.
    pub fn deactivations(&self) -> u32 {
        self.state.deactivations.load(Ordering::SeqCst)
    }

    /// Stream start attempts so far (opens and resumes).
    pub fn start_calls(&self) -> u32 {
        self.state.start_calls.load(Ordering::SeqCst)
    }

    /// Streams successfully opened so far.
    pub fn streams_opened(&self) -> u32 {
        self.state.streams_opened.load(Ordering::SeqCst)
    }

    /// Streams that exist (not yet dropped).
    pub fn live_streams(&self) -> u32 {
        self.state.live_streams.load(Ordering::SeqCst)
    }

    /// Streams currently producing audio.
    pub fn running_streams(&self) -> u32 {
        self.state.running_streams.load(Ordering::SeqCst)
    }

    /// Whether the session is active.
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Category last set.
    pub fn category(&self) -> Option<SessionCategory> {
        *self.state.category.lock()
    }

    /// Sample rate last requested.
    pub fn preferred_sample_rate(&self) -> u32 {
        self.state.preferred_sample_rate.load(Ordering::SeqCst)
    }

    /// Pulls `frames` frames from the most recently opened stream's renderer.
    ///
    /// Returns `None` when no stream is running.
    pub fn pull(&self, frames: usize) -> Option<Vec<f32>> {
        if self.running_streams() == 0 {
            return None;
        }
        let renderer = self.state.last_renderer.lock().clone()?;
        let mut r = renderer.lock();
        let mut out = vec![0.0; frames * usize::from(r.format().channels.max(1))];
        r.render(&mut out);
        Some(out)
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHardware")
            .field("active", &self.is_active())
            .field("activation_attempts", &self.activation_attempts())
            .field("start_calls", &self.start_calls())
            .field("running_streams", &self.running_streams())
            .finish_non_exhaustive()
    }
}

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[async_trait]
impl AudioSession for MockHardware {
    fn set_category(&self, category: SessionCategory) -> Result<(), HardwareError> {
        if self.state.rejected_categories.lock().contains(&category) {
            return Err(HardwareError::new(
                crate::HardwareErrorKind::CategoryRejected,
                format!("category {category} rejected"),
            ));
        }
        *self.state.category.lock() = Some(category);
        Ok(())
    }

    async fn set_active(&self, active: bool) -> Result<(), HardwareError> {
        if active {
            self.state.activation_attempts.fetch_add(1, Ordering::SeqCst);
            let latency = *self.state.activation_latency.lock();
            simulate_latency(latency).await;
            if let Some(e) = self.state.activation_script.lock().next_failure() {
                return Err(e);
            }
        } else {
            self.state.deactivations.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.state.deactivation_script.lock().next_failure() {
                return Err(e);
            }
        }
        self.state.active.store(active, Ordering::SeqCst);
        Ok(())
    }

    fn set_preferred_sample_rate(&self, sample_rate: u32) -> Result<(), HardwareError> {
        self.state
            .preferred_sample_rate
            .store(sample_rate, Ordering::SeqCst);
        Ok(())
    }

    fn set_preferred_io_buffer(&self, duration: Duration) -> Result<(), HardwareError> {
        *self.state.io_buffer.lock() = duration;
        Ok(())
    }

    fn is_other_audio_playing(&self) -> bool {
        self.state.other_audio.load(Ordering::SeqCst)
    }

    fn describe(&self) -> SessionDescription {
        SessionDescription {
            category: self.category(),
            active: self.is_active(),
            sample_rate: self.state.format.lock().sample_rate,
            io_buffer: *self.state.io_buffer.lock(),
            output_latency: Duration::ZERO,
            route: "mock".to_string(),
        }
    }
}

#[async_trait]
impl OutputBackend for MockHardware {
    fn name(&self) -> &str {
        "mock"
    }

    fn output_format(&self) -> Result<HardwareFormat, HardwareError> {
        Ok(*self.state.format.lock())
    }

    async fn start_output(
        &self,
        _format: HardwareFormat,
        renderer: SharedRenderer,
    ) -> Result<Box<dyn OutputStream>, HardwareError> {
        self.state.start_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.state.start_latency.lock();
        simulate_latency(latency).await;
        if let Some(e) = self.state.start_script.lock().next_failure() {
            return Err(e);
        }

        self.state.streams_opened.fetch_add(1, Ordering::SeqCst);
        self.state.live_streams.fetch_add(1, Ordering::SeqCst);
        self.state.running_streams.fetch_add(1, Ordering::SeqCst);
        *self.state.last_renderer.lock() = Some(renderer);

        Ok(Box::new(MockOutputStream {
            state: Arc::clone(&self.state),
            running: true,
        }))
    }
}

/// Stream returned by [`MockHardware`].
pub struct MockOutputStream {
    state: Arc<MockState>,
    running: bool,
}

impl MockOutputStream {
    fn run_hook(&self) {
        let hook = self.state.stream_control_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl OutputStream for MockOutputStream {
    fn play(&mut self) -> Result<(), HardwareError> {
        self.run_hook();
        if self.running {
            return Ok(());
        }
        self.state.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.state.start_script.lock().next_failure() {
            return Err(e);
        }
        self.running = true;
        self.state.running_streams.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), HardwareError> {
        self.run_hook();
        if self.running {
            self.running = false;
            self.state.running_streams.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for MockOutputStream {
    fn drop(&mut self) {
        if self.running {
            self.state.running_streams.fetch_sub(1, Ordering::SeqCst);
        }
        self.state.live_streams.fetch_sub(1, Ordering::SeqCst);
    }
}
