//! Hardware boundary: the shared audio session and the output device.
//!
//! The controller never talks to a platform API directly. It goes through
//! two traits:
//!
//! - [`AudioSession`]: process-wide session policy (category, activation,
//!   preferred format). Platforms without a session concept use
//!   [`DesktopSession`].
//! - [`OutputBackend`]: opens an [`OutputStream`] that pulls frames from a
//!   [`GraphRenderer`](crate::graph::GraphRenderer).
//!
//! [`MockHardware`] implements both for tests and headless use.

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
mod desktop;
mod mock;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{list_output_devices, CpalBackend};
pub use desktop::DesktopSession;
pub use mock::{MockHardware, MockOutputStream};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::graph::SharedRenderer;
use crate::{HardwareError, HardwareErrorKind};

/// Sample rate and channel count of the output hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl HardwareFormat {
    /// Creates a format.
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl fmt::Display for HardwareFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz / {} ch", self.sample_rate, self.channels)
    }
}

/// How this client shares the output with other audio.
///
/// Background ambience must never silence other apps, so there is no
/// exclusive category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionCategory {
    /// Play alongside other audio at full level.
    MixWithOthers,
    /// Play alongside other audio, asking it to lower its level.
    DuckOthers,
}

impl SessionCategory {
    /// Categories in order of preference.
    pub const PREFERENCE: [Self; 2] = [Self::MixWithOthers, Self::DuckOthers];
}

impl fmt::Display for SessionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MixWithOthers => f.write_str("mix-with-others"),
            Self::DuckOthers => f.write_str("duck-others"),
        }
    }
}

/// Point-in-time session parameters, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescription {
    /// Category currently set, if any.
    pub category: Option<SessionCategory>,
    /// Whether the session is active.
    pub active: bool,
    /// Actual session sample rate.
    pub sample_rate: u32,
    /// Actual IO buffer duration.
    pub io_buffer: Duration,
    /// Reported output latency.
    pub output_latency: Duration,
    /// Human-readable output route.
    pub route: String,
}

/// The process-wide audio session.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability.
/// - `set_active` is the only call expected to block for a noticeable time,
///   so it is the only async one.
#[async_trait]
pub trait AudioSession: Send + Sync {
    /// Sets the session category.
    fn set_category(&self, category: SessionCategory) -> Result<(), HardwareError>;

    /// Activates or deactivates the session.
    async fn set_active(&self, active: bool) -> Result<(), HardwareError>;

    /// Requests a hardware sample rate. Best effort.
    fn set_preferred_sample_rate(&self, sample_rate: u32) -> Result<(), HardwareError>;

    /// Requests an IO buffer duration. Best effort.
    fn set_preferred_io_buffer(&self, duration: Duration) -> Result<(), HardwareError>;

    /// Returns `true` if another client is currently playing audio.
    fn is_other_audio_playing(&self) -> bool;

    /// Describes the current session parameters.
    fn describe(&self) -> SessionDescription;
}

/// Opens output streams.
#[async_trait]
pub trait OutputBackend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Format the output hardware currently runs at.
    ///
    /// Zero values are allowed; the graph builder substitutes its fallback.
    fn output_format(&self) -> Result<HardwareFormat, HardwareError>;

    /// Opens and starts a stream that pulls from `renderer`.
    async fn start_output(
        &self,
        format: HardwareFormat,
        renderer: SharedRenderer,
    ) -> Result<Box<dyn OutputStream>, HardwareError>;
}

/// A started output stream.
///
/// Dropping the stream stops it and releases the device.
pub trait OutputStream: Send {
    /// Resumes a paused stream.
    fn play(&mut self) -> Result<(), HardwareError>;

    /// Pauses without releasing the device.
    fn pause(&mut self) -> Result<(), HardwareError>;

    /// Returns `true` while the stream is producing audio.
    fn is_running(&self) -> bool;
}

type Predicate = Arc<dyn Fn(&HardwareError) -> bool + Send + Sync>;

/// Decides how hardware failures are handled.
///
/// The default classifies by [`HardwareErrorKind`]:
///
/// | Kind | Transient | Requires hard reset |
/// |---|---|---|
/// | `Busy`, `CannotStartPlaying`, `InTransition` | yes | no |
/// | `StartWhileActive` | no | yes |
/// | anything else | no | no |
///
/// # Example
///
/// ```
/// use noise_mixer::hardware::ErrorClassifier;
/// use noise_mixer::HardwareError;
///
/// // Treat a platform-specific status code as transient too.
/// let classifier = ErrorClassifier::default()
///     .with_transient(|e: &HardwareError| e.code == Some(-66_637) || e.kind.is_default_transient());
/// ```
#[derive(Clone)]
pub struct ErrorClassifier {
    is_transient: Predicate,
    requires_hard_reset: Predicate,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            is_transient: Arc::new(|e| e.kind.is_default_transient()),
            requires_hard_reset: Arc::new(|e| e.kind == HardwareErrorKind::StartWhileActive),
        }
    }
}

impl ErrorClassifier {
    /// Replaces the transient predicate.
    #[must_use]
    pub fn with_transient<F>(mut self, f: F) -> Self
    where
        F: Fn(&HardwareError) -> bool + Send + Sync + 'static,
    {
        self.is_transient = Arc::new(f);
        self
    }

    /// Replaces the hard-reset predicate.
    #[must_use]
    pub fn with_hard_reset<F>(mut self, f: F) -> Self
    where
        F: Fn(&HardwareError) -> bool + Send + Sync + 'static,
    {
        self.requires_hard_reset = Arc::new(f);
        self
    }

    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self, error: &HardwareError) -> bool {
        (self.is_transient)(error)
    }

    /// Returns `true` if the session must be force-reset before retrying.
    pub fn requires_hard_reset(&self, error: &HardwareError) -> bool {
        (self.requires_hard_reset)(error)
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}

impl HardwareErrorKind {
    /// Kinds the default [`ErrorClassifier`] retries.
    pub fn is_default_transient(self) -> bool {
        matches!(
            self,
            Self::Busy | Self::CannotStartPlaying | Self::InTransition
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classifier() {
        let classifier = ErrorClassifier::default();
        let busy = HardwareError::new(HardwareErrorKind::Busy, "busy");
        let active = HardwareError::new(HardwareErrorKind::StartWhileActive, "what");
        let other = HardwareError::other("boom");

        assert!(classifier.is_transient(&busy));
        assert!(!classifier.requires_hard_reset(&busy));
        assert!(!classifier.is_transient(&active));
        assert!(classifier.requires_hard_reset(&active));
        assert!(!classifier.is_transient(&other));
        assert!(!classifier.requires_hard_reset(&other));
    }

    #[test]
    fn test_custom_classifier() {
        let classifier = ErrorClassifier::default()
            .with_transient(|e| e.code == Some(42))
            .with_hard_reset(|_| false);
        let coded = HardwareError::other("x").with_code(42);
        assert!(classifier.is_transient(&coded));
        assert!(!classifier.is_transient(&HardwareError::new(HardwareErrorKind::Busy, "b")));
        assert!(!classifier
            .requires_hard_reset(&HardwareError::new(HardwareErrorKind::StartWhileActive, "w")));
    }

    #[test]
    fn test_format_display() {
        assert_eq!(HardwareFormat::new(48_000, 2).to_string(), "48000 Hz / 2 ch");
    }

    #[test]
    fn test_category_preference() {
        assert_eq!(SessionCategory::PREFERENCE[0], SessionCategory::MixWithOthers);
        assert_eq!(SessionCategory::PREFERENCE[1], SessionCategory::DuckOthers);
    }
}
