//! Session stand-in for platforms without a shared audio session.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AudioSession, SessionCategory, SessionDescription};
use crate::HardwareError;

#[derive(Debug, Default)]
struct DesktopState {
    category: Option<SessionCategory>,
    active: bool,
    sample_rate: u32,
    io_buffer: Duration,
}

/// An [`AudioSession`] for desktop hosts.
///
/// Desktop audio stacks have no process-wide session to negotiate, so every
/// call succeeds and the requested values are simply recorded for
/// diagnostics.
#[derive(Debug)]
pub struct DesktopSession {
    route: String,
    state: Mutex<DesktopState>,
}

impl DesktopSession {
    /// Creates a session describing the given output route.
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            state: Mutex::new(DesktopState::default()),
        }
    }
}

impl Default for DesktopSession {
    fn default() -> Self {
        Self::new("default output")
    }
}

#[async_trait]
impl AudioSession for DesktopSession {
    fn set_category(&self, category: SessionCategory) -> Result<(), HardwareError> {
        self.state.lock().category = Some(category);
        Ok(())
    }

    async fn set_active(&self, active: bool) -> Result<(), HardwareError> {
        self.state.lock().active = active;
        Ok(())
    }

    fn set_preferred_sample_rate(&self, sample_rate: u32) -> Result<(), HardwareError> {
        self.state.lock().sample_rate = sample_rate;
        Ok(())
    }

    fn set_preferred_io_buffer(&self, duration: Duration) -> Result<(), HardwareError> {
        self.state.lock().io_buffer = duration;
        Ok(())
    }

    fn is_other_audio_playing(&self) -> bool {
        false
    }

    fn describe(&self) -> SessionDescription {
        let state = self.state.lock();
        SessionDescription {
            category: state.category,
            active: state.active,
            sample_rate: state.sample_rate,
            io_buffer: state.io_buffer,
            output_latency: Duration::ZERO,
            route: self.route.clone(),
        }
    }
}
