//! Mix state persistence.
//!
//! [`MixStateStore`] owns the write policy (none, throttled, immediate) on top
//! of a [`KeyValueStore`] backend. The crate provides two backends:
//!
//! - [`MemoryStore`]: in-process map, for tests and ephemeral use
//! - [`FileStore`]: one JSON file per key in a directory shared with readers
//!
//! Implement [`KeyValueStore`] for anything else (platform preferences, a
//! database row).

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::event::{emit, EventCallback, MixerEvent};
use crate::scheduler::DelayedTask;
use crate::state::MixState;
use crate::StoreError;

/// Key holding the last mix state.
pub const LAST_MIX_KEY: &str = "noise_mixer.last_mix.v1";

/// Key holding the resume-on-launch preference.
pub const RESUME_ON_LAUNCH_KEY: &str = "noise_mixer.resume_on_launch.v1";

/// Default debounce interval for [`MixStateStore::save_throttled()`].
pub const DEFAULT_SAVE_THROTTLE: Duration = Duration::from_millis(250);

/// A byte-oriented key-value backend.
///
/// Methods take `&self`; use interior mutability as needed. Calls are short
/// and synchronous, and may come from any thread.
///
/// # Example
///
/// ```
/// use noise_mixer::{KeyValueStore, StoreError};
/// use std::collections::HashMap;
/// use std::sync::Mutex;
///
/// #[derive(Default)]
/// struct LoggingStore(Mutex<HashMap<String, Vec<u8>>>);
///
/// impl KeyValueStore for LoggingStore {
///     fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
///         Ok(self.0.lock().unwrap().get(key).cloned())
///     }
///
///     fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
///         println!("{key} <- {} bytes", value.len());
///         self.0.lock().unwrap().insert(key.to_string(), value.to_vec());
///         Ok(())
///     }
///
///     fn remove(&self, key: &str) -> Result<(), StoreError> {
///         self.0.lock().unwrap().remove(key);
///         Ok(())
///     }
/// }
/// ```
pub trait KeyValueStore: Send + Sync {
    /// Reads the value for `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deletes `key`. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// How a state mutation is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePolicy {
    /// Do not persist (ephemeral edits such as in-app scrubbing).
    None,
    /// Debounce: the latest value is written once the throttle interval passes quietly.
    #[default]
    Throttled,
    /// Cancel any pending debounced write and persist now.
    Immediate,
}

struct StoreInner {
    backend: Arc<dyn KeyValueStore>,
    throttle: Duration,
    pending: Mutex<Option<MixState>>,
    // Doubles as the write lock.
    last_written: Mutex<Option<Vec<u8>>>,
    task: DelayedTask,
    on_event: Option<EventCallback>,
}

impl StoreInner {
    fn flush_pending(&self) {
        let pending = self.pending.lock().take();
        if let Some(state) = pending {
            self.write(&state);
        }
    }

    fn write(&self, state: &MixState) -> bool {
        let bytes = match serde_json::to_vec(&state.normalised()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode mix state");
                return false;
            }
        };

        {
            let mut last = self.last_written.lock();
            if last.as_deref() == Some(bytes.as_slice()) {
                tracing::trace!("mix state unchanged; write skipped");
                return false;
            }
            if let Err(e) = self.backend.set(LAST_MIX_KEY, &bytes) {
                tracing::warn!(error = %e, key = LAST_MIX_KEY, "failed to persist mix state");
                return false;
            }
            *last = Some(bytes);
        }

        tracing::debug!(is_playing = state.is_playing, "mix state saved");
        emit(self.on_event.as_ref(), MixerEvent::MixSaved);
        true
    }
}

/// Persists and loads [`MixState`].
///
/// Cloning is cheap; clones share the pending write and the backend.
///
/// # Example
///
/// ```
/// use noise_mixer::{MemoryStore, MixState, MixStateStore, SavePolicy};
/// use std::sync::Arc;
///
/// let store = MixStateStore::new(Arc::new(MemoryStore::new()));
/// let mut state = store.load_last_mix();
/// state.master_volume = 0.4;
/// store.save(&state, SavePolicy::Immediate);
/// assert_eq!(store.load_last_mix().master_volume, 0.4);
/// ```
#[derive(Clone)]
pub struct MixStateStore {
    inner: Arc<StoreInner>,
}

impl MixStateStore {
    /// Creates a store over the given backend with the default throttle.
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::build(backend, DEFAULT_SAVE_THROTTLE, None)
    }

    pub(crate) fn build(
        backend: Arc<dyn KeyValueStore>,
        throttle: Duration,
        on_event: Option<EventCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                throttle,
                pending: Mutex::new(None),
                last_written: Mutex::new(None),
                task: DelayedTask::new("store.save_throttled"),
                on_event,
            }),
        }
    }

    /// Returns the throttle interval.
    pub fn throttle(&self) -> Duration {
        self.inner.throttle
    }

    /// Persists `state` according to `policy`.
    pub fn save(&self, state: &MixState, policy: SavePolicy) {
        match policy {
            SavePolicy::None => {}
            SavePolicy::Throttled => self.save_throttled(state),
            SavePolicy::Immediate => {
                self.save_immediate(state);
            }
        }
    }

    /// Cancels any pending throttled write and persists `state` now.
    ///
    /// Returns `true` if bytes were written; `false` if the write was skipped
    /// (identical to the last write) or failed.
    pub fn save_immediate(&self, state: &MixState) -> bool {
        self.inner.task.cancel();
        self.inner.pending.lock().take();
        self.inner.write(state)
    }

    /// Records `state` as the pending value and (re)starts the debounce timer.
    ///
    /// Outside a Tokio runtime the write happens immediately.
    pub fn save_throttled(&self, state: &MixState) {
        *self.inner.pending.lock() = Some(state.clone());

        let inner = Arc::clone(&self.inner);
        let scheduled = self.inner.task.schedule(self.inner.throttle, move || async move {
            inner.flush_pending();
        });
        if !scheduled {
            self.inner.flush_pending();
        }
    }

    /// Writes any pending throttled value now.
    pub fn flush_pending(&self) {
        self.inner.task.cancel();
        self.inner.flush_pending();
    }

    /// Returns `true` while a throttled write is waiting.
    pub fn has_pending_write(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    /// Loads the last persisted mix, normalised.
    ///
    /// Returns the default mix if nothing is stored or the record is unreadable.
    pub fn load_last_mix(&self) -> MixState {
        match self.inner.backend.get(LAST_MIX_KEY) {
            Ok(Some(bytes)) => match serde_json::from_slice::<MixState>(&bytes) {
                Ok(state) => state.normalised(),
                Err(e) => {
                    tracing::warn!(error = %e, "stored mix state is unreadable; using default");
                    MixState::default()
                }
            },
            Ok(None) => MixState::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read mix state; using default");
                MixState::default()
            }
        }
    }

    /// Returns the resume-on-launch preference (`false` when unset).
    pub fn resume_on_launch(&self) -> bool {
        self.read_resume().unwrap_or(false)
    }

    /// Returns `true` if the resume-on-launch preference has ever been set.
    pub fn has_resume_on_launch_value(&self) -> bool {
        self.read_resume().is_some()
    }

    /// Sets the resume-on-launch preference and notifies observers.
    pub fn set_resume_on_launch(&self, enabled: bool) {
        let result = serde_json::to_vec(&enabled)
            .map_err(StoreError::from)
            .and_then(|bytes| self.inner.backend.set(RESUME_ON_LAUNCH_KEY, &bytes));
        match result {
            Ok(()) => {
                tracing::debug!(enabled, "resume-on-launch preference saved");
                emit(self.inner.on_event.as_ref(), MixerEvent::MixSaved);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist resume-on-launch preference");
            }
        }
    }

    fn read_resume(&self) -> Option<bool> {
        match self.inner.backend.get(RESUME_ON_LAUNCH_KEY) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read resume-on-launch preference");
                None
            }
        }
    }
}

impl std::fmt::Debug for MixStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixStateStore")
            .field("throttle", &self.inner.throttle)
            .field("pending", &self.has_pending_write())
            .finish_non_exhaustive()
    }
}
