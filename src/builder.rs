//! Builder pattern for `PlaybackController`.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::controller::{ControllerState, Inner};
use crate::graph::{AudioGraphBuilder, MAX_CHANNELS, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::hardware::{AudioSession, DesktopSession, ErrorClassifier, MockHardware, OutputBackend};
use crate::scheduler::DelayedTask;
use crate::session::SessionLifecycleManager;
use crate::store::{FileStore, KeyValueStore, MemoryStore, MixStateStore};
use crate::{
    event_callback, EventCallback, MixerConfig, MixerError, MixerEvent, PlaybackController,
    RequestEpoch,
};

/// Builder for configuring a [`PlaybackController`].
///
/// Use [`PlaybackController::builder()`] to create a new builder.
///
/// Defaults: a [`DesktopSession`], the cpal output backend (feature
/// `cpal-backend`), and an in-memory store.
///
/// # Example
///
/// ```ignore
/// use noise_mixer::{MixerConfig, PlaybackController};
/// use std::time::Duration;
///
/// let controller = PlaybackController::builder()
///     .store_dir("/var/lib/noise-mixer")
///     .with_config(MixerConfig {
///         grace_window: Duration::from_secs(60),
///         ..Default::default()
///     })
///     .on_event(|e| tracing::info!(?e, "mixer event"))
///     .build()?;
/// ```
///
/// [`PlaybackController::builder()`]: crate::PlaybackController::builder
#[must_use]
pub struct PlaybackControllerBuilder {
    /// Audio session.
    session: Option<Arc<dyn AudioSession>>,
    /// Output backend.
    backend: Option<Arc<dyn OutputBackend>>,
    /// Persistence backend.
    store_backend: Option<Arc<dyn KeyValueStore>>,
    /// Directory for a [`FileStore`], opened at build time.
    store_dir: Option<PathBuf>,
    /// Hardware error classification.
    classifier: ErrorClassifier,
    /// Event callback.
    event_callback: Option<EventCallback>,
    /// Lifecycle configuration.
    config: MixerConfig,
}

impl Default for PlaybackControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackControllerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            session: None,
            backend: None,
            store_backend: None,
            store_dir: None,
            classifier: ErrorClassifier::default(),
            event_callback: None,
            config: MixerConfig::default(),
        }
    }

    /// Set the audio session.
    pub fn session(mut self, session: Arc<dyn AudioSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the output backend.
    pub fn backend(mut self, backend: Arc<dyn OutputBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use [`MockHardware`] as both session and output backend.
    pub fn mock(self, hardware: MockHardware) -> Self {
        let shared = Arc::new(hardware);
        self.session(shared.clone()).backend(shared)
    }

    /// Set the persistence backend.
    ///
    /// Default: [`MemoryStore`], which forgets everything on exit.
    pub fn store_backend(mut self, backend: Arc<dyn KeyValueStore>) -> Self {
        self.store_backend = Some(backend);
        self
    }

    /// Persist to a [`FileStore`] in `dir`, creating it on build.
    ///
    /// Ignored when [`store_backend`](Self::store_backend) is also set.
    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    /// Set how hardware errors are classified.
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set a callback to receive [`MixerEvent`]s.
    ///
    /// Events include playing-intent changes, engine state transitions, and
    /// saves. The store reports saves through the same callback.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(MixerEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set custom lifecycle configuration.
    pub fn with_config(mut self, config: MixerConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the builder configuration.
    fn validate(&self) -> Result<(), MixerError> {
        let config = &self.config;
        if config.max_activation_attempts == 0 {
            return Err(MixerError::invalid_config(
                "max_activation_attempts must be at least 1",
            ));
        }
        if config.fade_steps_per_second == 0 {
            return Err(MixerError::invalid_config(
                "fade_steps_per_second must be at least 1",
            ));
        }
        let fallback = config.fallback_format;
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&fallback.sample_rate)
            || fallback.channels == 0
            || fallback.channels > MAX_CHANNELS
        {
            return Err(MixerError::invalid_config(format!(
                "unsupported fallback format {fallback}"
            )));
        }
        Ok(())
    }

    fn default_backend() -> Result<Arc<dyn OutputBackend>, MixerError> {
        #[cfg(feature = "cpal-backend")]
        {
            Ok(Arc::new(crate::hardware::CpalBackend::new()))
        }
        #[cfg(not(feature = "cpal-backend"))]
        {
            Err(MixerError::invalid_config(
                "no output backend configured and the cpal-backend feature is disabled",
            ))
        }
    }

    /// Builds the controller.
    ///
    /// The last persisted mix is loaded, but no graph is built and no
    /// hardware is touched until the first operation that needs it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - No output backend is set and the `cpal-backend` feature is disabled
    /// - The [`store_dir`](Self::store_dir) cannot be created
    ///   ([`MixerError::Store`])
    pub fn build(self) -> Result<PlaybackController, MixerError> {
        self.validate()?;

        let config = Arc::new(self.config);
        let backend = match self.backend {
            Some(backend) => backend,
            None => Self::default_backend()?,
        };
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(DesktopSession::default()));
        let store_backend: Arc<dyn KeyValueStore> = match (self.store_backend, self.store_dir) {
            (Some(backend), _) => backend,
            (None, Some(dir)) => Arc::new(FileStore::new(dir)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };

        let store = MixStateStore::build(
            store_backend,
            config.save_throttle,
            self.event_callback.clone(),
        );
        let mix = store.load_last_mix();

        tracing::debug!(
            backend = backend.name(),
            is_playing = mix.is_playing,
            "playback controller built"
        );

        let inner = Inner {
            session: Arc::new(SessionLifecycleManager::new(
                session,
                self.classifier.clone(),
                Arc::clone(&config),
            )),
            graph_builder: AudioGraphBuilder::new(config.fallback_format),
            config,
            state: Mutex::new(ControllerState::new(mix)),
            epoch: RequestEpoch::new(),
            backend,
            classifier: self.classifier,
            store,
            engine_stop: DelayedTask::new("controller.engine_stop"),
            start_gate: tokio::sync::Mutex::new(()),
            on_event: self.event_callback,
        };

        Ok(PlaybackController::from_inner(Arc::new(inner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::HardwareFormat;
    use crate::{EngineState, MixState, SavePolicy};
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let builder = PlaybackControllerBuilder::new();
        assert!(builder.session.is_none());
        assert!(builder.backend.is_none());
        assert!(builder.event_callback.is_none());
        assert_eq!(builder.config.grace_window, Duration::from_secs(180));
    }

    #[test]
    fn test_builder_with_mock() {
        let controller = PlaybackController::builder()
            .mock(MockHardware::new())
            .build()
            .unwrap();
        assert_eq!(controller.engine_state(), EngineState::NoGraph);
        assert!(controller.graph_id().is_none());
        assert!(!controller.is_playing());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let result = PlaybackController::builder()
            .mock(MockHardware::new())
            .with_config(MixerConfig {
                max_activation_attempts: 0,
                ..Default::default()
            })
            .build();
        assert!(matches!(result, Err(MixerError::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_fallback() {
        let result = PlaybackController::builder()
            .mock(MockHardware::new())
            .with_config(MixerConfig {
                fallback_format: HardwareFormat::new(0, 2),
                ..Default::default()
            })
            .build();
        assert!(matches!(result, Err(MixerError::InvalidConfig { .. })));
    }

    #[test]
    fn test_store_dir_failure_surfaces_store_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = PlaybackController::builder()
            .mock(MockHardware::new())
            .store_dir(file.path().join("state"))
            .build();
        assert!(matches!(result, Err(MixerError::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_dir_persists_across_builds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        {
            let controller = PlaybackController::builder()
                .mock(MockHardware::new())
                .store_dir(&path)
                .build()
                .unwrap();
            controller.set_master_volume(0.4, SavePolicy::Immediate).await;
        }

        let controller = PlaybackController::builder()
            .mock(MockHardware::new())
            .store_dir(&path)
            .build()
            .unwrap();
        assert!((controller.state().master_volume - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_build_loads_persisted_mix() {
        let backend = Arc::new(MemoryStore::new());
        let seed = MixStateStore::new(backend.clone());
        let mut mix = MixState::default();
        mix.master_volume = 0.25;
        seed.save(&mix, SavePolicy::Immediate);

        let controller = PlaybackController::builder()
            .mock(MockHardware::new())
            .store_backend(backend)
            .build()
            .unwrap();
        assert!((controller.state().master_volume - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_on_event_reaches_store() {
        let saves = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&saves);
        let controller = PlaybackController::builder()
            .mock(MockHardware::new())
            .on_event(move |e| {
                if e == MixerEvent::MixSaved {
                    *counter.lock() += 1;
                }
            })
            .build()
            .unwrap();

        controller.store().set_resume_on_launch(true);
        assert_eq!(*saves.lock(), 1);
    }
}
