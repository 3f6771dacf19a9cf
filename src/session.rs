//! Audio session lifecycle: configuration, activation, deferred deactivation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::MixerConfig;
use crate::hardware::{AudioSession, ErrorClassifier, SessionCategory, SessionDescription};
use crate::scheduler::DelayedTask;
use crate::{HardwareError, HardwareErrorKind, MixerError};

/// Answers "may the session be released now?" at deactivation time.
///
/// The controller implements this over its own state so the session manager
/// never needs a reference back into the controller.
pub trait IdleCheck: Send + Sync {
    /// Returns `true` if playback is not intended and the engine is not running.
    fn is_idle(&self) -> bool;

    /// Called after the session was successfully deactivated.
    fn session_released(&self);
}

#[derive(Debug, Default)]
struct SessionFlags {
    configured: bool,
    active: bool,
    category: Option<SessionCategory>,
}

/// Owns the process-wide [`AudioSession`] on behalf of the controller.
pub struct SessionLifecycleManager {
    session: Arc<dyn AudioSession>,
    classifier: ErrorClassifier,
    config: Arc<MixerConfig>,
    flags: Mutex<SessionFlags>,
    deactivation: DelayedTask,
}

impl SessionLifecycleManager {
    /// Creates a manager for `session`.
    pub fn new(
        session: Arc<dyn AudioSession>,
        classifier: ErrorClassifier,
        config: Arc<MixerConfig>,
    ) -> Self {
        Self {
            session,
            classifier,
            config,
            flags: Mutex::new(SessionFlags::default()),
            deactivation: DelayedTask::new("session.deactivate_if_idle"),
        }
    }

    /// Whether a category has been set since the last invalidation.
    pub fn is_configured(&self) -> bool {
        self.flags.lock().configured
    }

    /// Whether the session is believed to be active.
    pub fn is_active(&self) -> bool {
        self.flags.lock().active
    }

    /// Category selected by the last successful configuration.
    pub fn category(&self) -> Option<SessionCategory> {
        self.flags.lock().category
    }

    /// Current session parameters, for diagnostics.
    pub fn describe(&self) -> SessionDescription {
        self.session.describe()
    }

    /// Returns `true` while a deferred deactivation is waiting.
    pub fn has_pending_deactivation(&self) -> bool {
        self.deactivation.is_pending()
    }

    /// Configures the session unless already configured.
    pub fn configure_if_needed(&self) -> Result<(), MixerError> {
        if self.is_configured() {
            return Ok(());
        }
        self.configure().map(|_| ())
    }

    fn configure(&self) -> Result<SessionCategory, MixerError> {
        let mut last_error = None;
        let mut chosen = None;
        for category in SessionCategory::PREFERENCE {
            match self.session.set_category(category) {
                Ok(()) => {
                    chosen = Some(category);
                    break;
                }
                Err(e) => {
                    tracing::warn!(%category, error = %e, "failed to set session category");
                    last_error = Some(e);
                }
            }
        }

        let Some(category) = chosen else {
            let error = last_error.unwrap_or_else(|| {
                HardwareError::new(HardwareErrorKind::CategoryRejected, "no category accepted")
            });
            tracing::error!(error = %error, "audio session configuration failed");
            let mut flags = self.flags.lock();
            flags.configured = false;
            flags.category = None;
            return Err(MixerError::SessionConfiguration(error));
        };

        let rate = self.config.preferred_sample_rate;
        if let Err(e) = self.session.set_preferred_sample_rate(rate) {
            tracing::warn!(sample_rate = rate, error = %e, "preferred sample rate not accepted");
        }

        let mut io_set = false;
        for candidate in &self.config.io_buffer_candidates {
            match self.session.set_preferred_io_buffer(*candidate) {
                Ok(()) => {
                    io_set = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(io_buffer = ?candidate, error = %e, "IO buffer duration not accepted");
                }
            }
        }
        if !io_set && !self.config.io_buffer_candidates.is_empty() {
            tracing::warn!("using system default IO buffer duration");
        }

        {
            let mut flags = self.flags.lock();
            flags.configured = true;
            flags.category = Some(category);
        }
        tracing::info!(%category, "audio session configured");
        Ok(category)
    }

    /// Activates the session, retrying transient failures with backoff.
    ///
    /// `still_current` is consulted before every attempt; once it returns
    /// `false` the call unwinds with [`MixerError::Cancelled`].
    pub async fn activate<F>(&self, still_current: F) -> Result<(), MixerError>
    where
        F: Fn() -> bool + Send + Sync,
    {
        self.cancel_pending_deactivation();
        if !still_current() {
            return Err(MixerError::Cancelled);
        }
        self.configure_if_needed()?;
        if self.is_active() {
            return Ok(());
        }

        let max_attempts = self.config.max_activation_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !still_current() {
                return Err(MixerError::Cancelled);
            }
            if attempt > 1 {
                // Best effort: a failed reconfigure still lets the attempt run.
                let _ = self.configure();
            }

            match self.session.set_active(true).await {
                Ok(()) => {
                    self.flags.lock().active = true;
                    let desc = self.session.describe();
                    tracing::info!(
                        attempt,
                        sample_rate = desc.sample_rate,
                        io_buffer = ?desc.io_buffer,
                        "audio session activated"
                    );
                    return Ok(());
                }
                Err(e) => {
                    self.flags.lock().active = false;
                    let transient = self.classifier.is_transient(&e);
                    if attempt >= max_attempts || !transient {
                        tracing::error!(
                            attempt,
                            transient,
                            error = %e,
                            four_cc = e.four_cc().as_deref().unwrap_or("-"),
                            "audio session activation failed"
                        );
                        return Err(MixerError::Activation {
                            attempts: attempt,
                            source: e,
                        });
                    }

                    let backoff = self.config.backoff_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        error = %e,
                        four_cc = e.four_cc().as_deref().unwrap_or("-"),
                        backoff = ?backoff,
                        "audio session activation failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Forces the session down and back up after a "started while active" failure.
    ///
    /// Deactivates (failure is only logged), reconfigures, then waits for the
    /// hardware to settle.
    pub async fn hard_reset(&self) {
        self.cancel_pending_deactivation();
        self.flags.lock().active = false;

        match self.session.set_active(false).await {
            Ok(()) => tracing::warn!("audio session hard reset: deactivated"),
            Err(e) => tracing::warn!(error = %e, "audio session hard reset: deactivation failed"),
        }

        self.invalidate();
        let _ = self.configure();

        tokio::time::sleep(self.config.hard_reset_delay).await;
    }

    /// Schedules a deactivation check after `after`.
    ///
    /// At fire time the session is released only if `idle` reports idle, the
    /// session is still active, and no other audio is playing. If other audio
    /// is playing, or the OS refuses the deactivation, the check is
    /// rescheduled.
    pub fn deactivate_if_idle(self: &Arc<Self>, after: Duration, idle: Arc<dyn IdleCheck>) {
        let this: Weak<Self> = Arc::downgrade(self);
        self.deactivation.schedule(after, move || async move {
            if let Some(this) = this.upgrade() {
                this.perform_deactivation_if_idle(idle).await;
            }
        });
    }

    async fn perform_deactivation_if_idle(self: Arc<Self>, idle: Arc<dyn IdleCheck>) {
        if !idle.is_idle() {
            tracing::debug!("session deactivation skipped: playback intended or engine running");
            return;
        }
        if !self.is_active() {
            return;
        }

        if self.session.is_other_audio_playing() {
            let retry = self.config.grace_window.max(self.config.other_audio_retry);
            tracing::warn!(retry = ?retry, "session deactivation skipped: other audio playing");
            self.deactivate_if_idle(retry, idle);
            return;
        }

        // Mark inactive first so an activation racing with this call re-activates.
        self.flags.lock().active = false;
        match self.session.set_active(false).await {
            Ok(()) => {
                tracing::info!("audio session deactivated");
                idle.session_released();
            }
            Err(e) => {
                // The hardware kept the session; record that and try again later.
                self.flags.lock().active = true;
                let retry = self.config.grace_window;
                tracing::warn!(error = %e, retry = ?retry, "audio session deactivation failed; will retry");
                self.deactivate_if_idle(retry, idle);
            }
        }
    }

    /// Cancels a pending deactivation. Returns `true` if one was pending.
    pub fn cancel_pending_deactivation(&self) -> bool {
        self.deactivation.cancel()
    }

    /// Records that the OS deactivated the session on our behalf.
    pub fn mark_inactive(&self) {
        self.flags.lock().active = false;
    }

    /// Forgets the configuration so the next activation reconfigures.
    pub fn invalidate(&self) {
        let mut flags = self.flags.lock();
        flags.configured = false;
        flags.category = None;
    }
}

impl std::fmt::Debug for SessionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags = self.flags.lock();
        f.debug_struct("SessionLifecycleManager")
            .field("configured", &flags.configured)
            .field("active", &flags.active)
            .field("category", &flags.category)
            .finish_non_exhaustive()
    }
}
