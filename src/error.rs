//! Error types for noise-mixer.
//!
//! Errors are split into three layers:
//! - **Hardware errors** ([`HardwareError`]): raw failures reported by an audio backend
//! - **Mixer errors** ([`MixerError`]): lifecycle failures inside the controller and session manager
//! - **Store errors** ([`StoreError`]): persistence failures, which are never fatal
//!
//! Only construction can fail: [`PlaybackControllerBuilder::build`] returns
//! configuration and store-directory errors. After that the
//! [`PlaybackController`](crate::PlaybackController) absorbs failures and
//! reports the outcome as state and events.
//!
//! [`PlaybackControllerBuilder::build`]: crate::PlaybackControllerBuilder::build

use std::fmt;
use std::path::PathBuf;

/// Broad classification of a hardware failure.
///
/// Backends map their platform status codes onto these kinds. The
/// [`ErrorClassifier`](crate::hardware::ErrorClassifier) decides which kinds are
/// worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareErrorKind {
    /// The device or session is temporarily held by something else.
    Busy,
    /// The system refused to start playback right now.
    CannotStartPlaying,
    /// The audio system is mid-transition (route switch, wake from sleep).
    InTransition,
    /// Starting the hardware failed while the session was already active.
    ///
    /// Retrying without deactivating first loops on the same failure.
    StartWhileActive,
    /// The requested session category was rejected.
    CategoryRejected,
    /// No output device is available.
    DeviceUnavailable,
    /// The device does not support the requested format.
    UnsupportedFormat,
    /// Anything the backend could not classify.
    Other,
}

impl fmt::Display for HardwareErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Busy => "busy",
            Self::CannotStartPlaying => "cannot start playing",
            Self::InTransition => "in transition",
            Self::StartWhileActive => "start failed while active",
            Self::CategoryRejected => "category rejected",
            Self::DeviceUnavailable => "device unavailable",
            Self::UnsupportedFormat => "unsupported format",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A failure reported by an audio backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}{}: {message}", .code.map(|c| format!(" (status {c})")).unwrap_or_default())]
pub struct HardwareError {
    /// Classified kind.
    pub kind: HardwareErrorKind,
    /// Platform status code, when the backend has one.
    pub code: Option<i32>,
    /// Human-readable description.
    pub message: String,
}

impl HardwareError {
    /// Creates an error of the given kind with no status code.
    pub fn new(kind: HardwareErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Attaches a platform status code.
    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Creates a backend error the backend could not classify.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::Other, message)
    }

    /// Renders the status code as a four-character code when every byte is printable.
    ///
    /// Core Audio style status codes such as `'what'` are easier to search for
    /// in this form than as signed integers.
    pub fn four_cc(&self) -> Option<String> {
        let bytes = self.code?.to_be_bytes();
        if bytes.iter().all(|b| (32..=126).contains(b)) {
            Some(bytes.iter().map(|&b| char::from(b)).collect())
        } else {
            None
        }
    }
}

/// Lifecycle errors raised inside the controller and session manager.
///
/// [`MixerError::Cancelled`] is not a failure: it marks a clean unwind after a
/// newer request superseded the one in flight.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    /// A newer request made this one stale.
    #[error("request superseded by a newer one")]
    Cancelled,

    /// No acceptable session category could be set.
    #[error("audio session configuration failed: {0}")]
    SessionConfiguration(#[source] HardwareError),

    /// Session activation failed after the given number of attempts.
    #[error("audio session activation failed after {attempts} attempt(s): {source}")]
    Activation {
        /// Attempts made before giving up.
        attempts: u32,
        /// The last error seen.
        #[source]
        source: HardwareError,
    },

    /// The output stream could not be started.
    #[error("engine start failed: {0}")]
    EngineStart(#[source] HardwareError),

    /// The signal graph could not be constructed.
    #[error("graph construction failed: {reason}")]
    GraphBuild {
        /// Why construction failed.
        reason: String,
    },

    /// The builder was given an unusable configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// An intent was performed before a controller was installed.
    #[error("no playback controller installed")]
    NotInstalled,

    /// The store backend could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MixerError {
    /// Returns `true` for the cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the underlying hardware error, if any.
    pub fn hardware(&self) -> Option<&HardwareError> {
        match self {
            Self::SessionConfiguration(e) | Self::EngineStart(e) => Some(e),
            Self::Activation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Creates a graph build error with the given reason.
    pub fn graph_build(reason: impl Into<String>) -> Self {
        Self::GraphBuild {
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Errors from a [`KeyValueStore`](crate::store::KeyValueStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File I/O error.
    #[error("store file error: {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The stored bytes could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The key is not usable by this backend.
    #[error("invalid store key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Creates an I/O error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
