//! Configuration types for the mixer lifecycle.

use std::time::Duration;

use crate::hardware::HardwareFormat;

/// Timing and policy configuration for the playback lifecycle.
///
/// Use [`MixerConfig::default()`] for the production values, or customize as needed.
///
/// # Example
///
/// ```
/// use noise_mixer::MixerConfig;
/// use std::time::Duration;
///
/// let config = MixerConfig {
///     grace_window: Duration::from_secs(30),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// How long a paused engine stays primed (muted) before teardown, and how long
    /// an idle session stays active before it is released.
    ///
    /// Widget-driven play/pause round-trips through a throttled external refresh,
    /// so this must outlast that latency.
    /// Default: 180 seconds
    pub grace_window: Duration,

    /// Minimum delay before retrying session deactivation when another app is
    /// playing audio on the shared hardware.
    ///
    /// Default: 15 seconds
    pub other_audio_retry: Duration,

    /// Sleep after each failed session activation attempt, indexed by attempt.
    ///
    /// Default: 50ms, 100ms, 200ms, 350ms
    pub activation_backoff: Vec<Duration>,

    /// Maximum number of session activation attempts.
    ///
    /// Default: 4
    pub max_activation_attempts: u32,

    /// Settle time after a hard session reset.
    ///
    /// Default: 150ms
    pub hard_reset_delay: Duration,

    /// Master fade duration used before the engine is stopped.
    ///
    /// Default: 80ms
    pub fade_duration: Duration,

    /// Master fade duration used when pausing into the muted grace state.
    ///
    /// Default: 60ms
    pub pause_fade_duration: Duration,

    /// Gain update rate during fades.
    ///
    /// Default: 60
    pub fade_steps_per_second: u32,

    /// Debounce interval for throttled mix-state writes.
    ///
    /// Default: 250ms
    pub save_throttle: Duration,

    /// Format used when the hardware reports a zero sample rate or channel count.
    ///
    /// Default: 48kHz stereo
    pub fallback_format: HardwareFormat,

    /// Sample rate requested from the session during configuration (best effort).
    ///
    /// Default: 48000
    pub preferred_sample_rate: u32,

    /// IO buffer durations tried in order during configuration (best effort).
    ///
    /// Default: ~5.3ms, 10ms, 20ms
    pub io_buffer_candidates: Vec<Duration>,

    /// Whether the first `play()` turns the resume-on-launch preference on when
    /// it has never been set.
    ///
    /// Default: true
    pub auto_enable_resume_on_play: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(180),
            other_audio_retry: Duration::from_secs(15),
            activation_backoff: vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
            ],
            max_activation_attempts: 4,
            hard_reset_delay: Duration::from_millis(150),
            fade_duration: Duration::from_millis(80),
            pause_fade_duration: Duration::from_millis(60),
            fade_steps_per_second: 60,
            save_throttle: Duration::from_millis(250),
            fallback_format: HardwareFormat::new(48_000, 2),
            preferred_sample_rate: 48_000,
            io_buffer_candidates: vec![
                Duration::from_micros(5_300),
                Duration::from_millis(10),
                Duration::from_millis(20),
            ],
            auto_enable_resume_on_play: true,
        }
    }
}

impl MixerConfig {
    /// Backoff after the given 1-based failed attempt.
    ///
    /// Attempts past the end of the schedule reuse its last entry.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let idx = attempt.saturating_sub(1) as usize;
        self.activation_backoff
            .get(idx)
            .or_else(|| self.activation_backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Number of gain steps for a fade of the given duration (at least one).
    pub fn fade_steps(&self, duration: Duration) -> u32 {
        let steps = (duration.as_secs_f64() * f64::from(self.fade_steps_per_second)).round();
        (steps as u32).max(1)
    }
}
