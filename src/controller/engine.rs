//! Engine start, recovery, fades, and teardown.

use std::sync::Arc;
use std::time::Duration;

use super::{ControllerIdleCheck, ControllerState, EngineState, Inner};
use crate::event::MixerEvent;
use crate::graph::{GraphId, SharedRenderer};
use crate::hardware::{HardwareFormat, OutputStream};
use crate::{HardwareError, MixerError};

/// Rungs of the start recovery ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartAttempt {
    Initial,
    AfterReset,
    AfterRebuild,
}

impl StartAttempt {
    fn number(self) -> u32 {
        match self {
            Self::Initial => 1,
            Self::AfterReset => 2,
            Self::AfterRebuild => 3,
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::Initial => Some(Self::AfterReset),
            Self::AfterReset => Some(Self::AfterRebuild),
            Self::AfterRebuild => None,
        }
    }
}

/// How [`Inner::start_output`] gets a running stream.
enum OutputPlan {
    Resume {
        id: GraphId,
        format: HardwareFormat,
        stream: Box<dyn OutputStream>,
    },
    Open {
        id: GraphId,
        format: HardwareFormat,
        renderer: SharedRenderer,
    },
}

/// Moves a stopped engine back to its resting state.
fn settle_stopped(s: &mut ControllerState) {
    if s.graph.is_none() {
        s.set_engine_state(EngineState::NoGraph);
    } else if s.engine_state != EngineState::Stopped {
        s.set_engine_state(EngineState::Idle);
    }
}

impl Inner {
    /// Builds the graph if there is none. Session configuration is best effort here.
    pub(crate) fn prepare_if_needed(&self) -> Result<(), MixerError> {
        if self.state.lock().graph.is_some() {
            return Ok(());
        }
        if let Err(e) = self.session.configure_if_needed() {
            tracing::error!(error = %e, "audio session configuration failed");
        }
        self.build_graph().map(|_| ())
    }

    fn build_graph(&self) -> Result<GraphId, MixerError> {
        let reported = self.backend.output_format().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "output format unavailable; using fallback");
            HardwareFormat::new(0, 0)
        });
        let mut graph = self.graph_builder.build(reported)?;
        let id = graph.id();
        let format = graph.format();

        let installed = self.update(|s| {
            if let Some(existing) = s.graph.as_ref() {
                return existing.id();
            }
            graph.apply_mix(&s.mix);
            s.graph = Some(graph);
            s.set_engine_state(EngineState::Idle);
            s.events.push(MixerEvent::GraphBuilt {
                graph_id: id,
                sample_rate: format.sample_rate,
                channels: format.channels,
            });
            id
        });

        if installed == id {
            tracing::info!(
                graph = %id,
                sample_rate = format.sample_rate,
                channels = format.channels,
                "audio graph built"
            );
        }
        Ok(installed)
    }

    /// Drives the hardware to playing, walking the recovery ladder on failure.
    ///
    /// Never returns an error: a stale request unwinds quietly and a final
    /// failure resets the playing intent and emits [`MixerEvent::StartFailed`].
    pub(crate) async fn start_engine_if_needed(self: &Arc<Self>, request: u64) {
        self.engine_stop.cancel();
        // One start at a time; a waiter that went stale unwinds below.
        let _gate = self.start_gate.lock().await;

        let mut attempt = StartAttempt::Initial;
        loop {
            if !self.still_current(request) {
                self.settle_after_cancel();
                return;
            }

            let error = match self.try_start(request).await {
                Ok(()) => return,
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(request, "start superseded by a newer request");
                    self.settle_after_cancel();
                    return;
                }
                Err(e) => e,
            };

            self.session.mark_inactive();
            self.log_start_failure(attempt, &error);

            let Some(next) = attempt.next() else {
                self.give_up(request, &error);
                return;
            };
            if !self.still_current(request) {
                self.settle_after_cancel();
                return;
            }

            self.update(|s| {
                s.events.push(MixerEvent::StartRecovering {
                    attempt: attempt.number(),
                    error: error.to_string(),
                });
            });

            match next {
                StartAttempt::AfterReset => {
                    let hard_reset = error
                        .hardware()
                        .is_some_and(|hw| self.classifier.requires_hard_reset(hw));
                    if hard_reset {
                        tracing::warn!("output start failed while session active; hard-resetting session");
                        self.session.hard_reset().await;
                    }
                    self.reset_engine();
                    tracing::warn!("retrying start after engine reset");
                }
                StartAttempt::AfterRebuild => {
                    if let Err(e) = self.rebuild_graph("engine start failed") {
                        tracing::warn!(error = %e, "graph rebuild failed during recovery");
                    }
                    tracing::warn!("retrying start after graph rebuild");
                }
                StartAttempt::Initial => {}
            }
            attempt = next;
        }
    }

    async fn try_start(&self, request: u64) -> Result<(), MixerError> {
        self.prepare_if_needed()?;

        let already_running = self.update(|s| {
            if !s.graph_running() {
                s.set_engine_state(EngineState::Activating);
                return false;
            }
            let volume = s.mix.master_volume;
            if let Some(graph) = s.graph.as_mut() {
                graph.play_slots_if_needed();
                graph.set_master_gain(volume);
            }
            s.set_engine_state(EngineState::Running);
            true
        });
        if already_running {
            tracing::debug!(request, "engine already running; restored master gain");
            return Ok(());
        }

        self.session
            .activate(|| self.still_current(request))
            .await?;
        if !self.still_current(request) {
            return Err(MixerError::Cancelled);
        }

        self.update(|s| s.set_engine_state(EngineState::Starting));
        self.start_output(request).await
    }

    async fn start_output(&self, request: u64) -> Result<(), MixerError> {
        // Stream calls block on the device, so they run outside the state lock.
        let plan = self.update(|s| -> Result<OutputPlan, MixerError> {
            let graph = s
                .graph
                .as_mut()
                .ok_or_else(|| MixerError::graph_build("graph missing at start"))?;
            let (id, format) = (graph.id(), graph.format());
            Ok(match graph.detach_stream() {
                Some(stream) => OutputPlan::Resume { id, format, stream },
                None => OutputPlan::Open {
                    id,
                    format,
                    renderer: graph.renderer(),
                },
            })
        })?;

        let (graph_id, format, stream, resumed) = match plan {
            OutputPlan::Resume {
                id,
                format,
                mut stream,
            } => {
                stream.play().map_err(MixerError::EngineStart)?;
                (id, format, stream, true)
            }
            OutputPlan::Open {
                id,
                format,
                renderer,
            } => {
                let stream = self
                    .backend
                    .start_output(format, renderer)
                    .await
                    .map_err(MixerError::EngineStart)?;
                (id, format, stream, false)
            }
        };

        let mut stream = Some(stream);
        let attached = self.update(|s| {
            if self.epoch.is_stale(request) || !s.mix.is_playing {
                return false;
            }
            let volume = s.mix.master_volume;
            let Some(graph) = s
                .graph
                .as_mut()
                .filter(|g| g.id() == graph_id && !g.has_stream())
            else {
                return false;
            };
            if let Some(stream) = stream.take() {
                graph.attach_stream(stream);
            }
            graph.play_slots_if_needed();
            graph.set_master_gain(volume);
            s.set_engine_state(EngineState::Running);
            true
        });
        // An unattached stream is stale; dropping it here stops it outside the lock.
        drop(stream);

        if !attached {
            return Err(MixerError::Cancelled);
        }
        if resumed {
            tracing::info!(graph = %graph_id, "output stream resumed");
        } else {
            tracing::info!(
                graph = %graph_id,
                sample_rate = format.sample_rate,
                channels = format.channels,
                backend = self.backend.name(),
                "engine started"
            );
        }
        Ok(())
    }

    /// Pauses the attached output stream without releasing it.
    ///
    /// The stream is detached while the device call runs and reattached only
    /// if its graph is still installed and nothing replaced it meanwhile.
    pub(crate) fn pause_output(&self) {
        let Some((graph_id, mut stream)) = self.update(|s| {
            let graph = s.graph.as_mut()?;
            let id = graph.id();
            graph.detach_stream().map(|stream| (id, stream))
        }) else {
            return;
        };

        if let Err(e) = stream.pause() {
            tracing::warn!(graph = %graph_id, error = %e, "output stream pause failed");
        }

        let mut stream = Some(stream);
        self.update(|s| {
            if let Some(graph) = s
                .graph
                .as_mut()
                .filter(|g| g.id() == graph_id && !g.has_stream())
            {
                if let Some(stream) = stream.take() {
                    graph.attach_stream(stream);
                }
            }
        });
        drop(stream);
    }

    fn settle_after_cancel(self: &Arc<Self>) {
        let playing = self.update(|s| {
            if s.mix.is_playing {
                // A newer start owns the state.
                return true;
            }
            if matches!(
                s.engine_state,
                EngineState::Activating | EngineState::Starting
            ) {
                settle_stopped(s);
            }
            false
        });
        if !playing {
            // The cancelled start may have activated the session after the stop ran.
            self.schedule_session_deactivation();
        }
    }

    fn log_start_failure(&self, attempt: StartAttempt, error: &MixerError) {
        let desc = self.session.describe();
        let hw = error.hardware();
        let four_cc = hw.and_then(HardwareError::four_cc);
        tracing::warn!(
            attempt = attempt.number(),
            error = %error,
            kind = ?hw.map(|h| h.kind),
            code = ?hw.and_then(|h| h.code),
            four_cc = four_cc.as_deref().unwrap_or("-"),
            sample_rate = desc.sample_rate,
            io_buffer = ?desc.io_buffer,
            route = %desc.route,
            "engine start attempt failed"
        );
    }

    fn give_up(self: &Arc<Self>, request: u64, error: &MixerError) {
        if !self.still_current(request) {
            return;
        }
        tracing::error!(error = %error, "engine start failed after recovery; playback stopped");

        let (snapshot, graph) = self.update(|s| {
            s.set_playing(false);
            s.events.push(MixerEvent::StartFailed {
                error: error.to_string(),
            });
            let graph = s.graph.take();
            s.set_engine_state(EngineState::NoGraph);
            (s.mix.clone(), graph)
        });
        drop(graph);

        self.store.save_immediate(&snapshot);
        self.schedule_session_deactivation();
    }

    /// Stops transport and releases the output stream, keeping the graph.
    fn reset_engine(&self) {
        let stream = self.update(|s| {
            let stream = s.graph.as_mut().and_then(|graph| {
                graph.stop_slots();
                graph.detach_stream()
            });
            settle_stopped(s);
            stream
        });
        drop(stream);
    }

    /// Tears the graph down and builds a fresh one for the current hardware format.
    pub(crate) fn rebuild_graph(&self, reason: &str) -> Result<GraphId, MixerError> {
        tracing::warn!(reason, "rebuilding audio graph");
        self.engine_stop.cancel();
        self.session.cancel_pending_deactivation();
        self.session.mark_inactive();

        let old = self.update(|s| {
            s.set_engine_state(EngineState::Rebuilding);
            let old = s.graph.take();
            s.set_engine_state(EngineState::NoGraph);
            old
        });
        drop(old);

        self.session.invalidate();
        if let Err(e) = self.session.configure_if_needed() {
            tracing::error!(error = %e, "audio session configuration failed");
        }
        self.build_graph()
    }

    /// Drops the graph entirely.
    pub(crate) fn teardown(&self) {
        self.engine_stop.cancel();
        let old = self.update(|s| {
            let old = s.graph.take();
            s.set_engine_state(EngineState::NoGraph);
            old
        });
        drop(old);
    }

    /// Fades to silence and leaves the stream running muted.
    pub(crate) async fn mute_for_pause(self: &Arc<Self>, request: u64) {
        let running = self.update(|s| {
            if s.graph_running() {
                s.set_engine_state(EngineState::FadingOut);
                return true;
            }
            if let Some(graph) = s.graph.as_mut() {
                graph.set_master_gain(0.0);
            }
            settle_stopped(s);
            false
        });
        if !running {
            self.schedule_session_deactivation();
            return;
        }

        self.fade_master(0.0, self.config.pause_fade_duration, request, false)
            .await;

        self.update(|s| {
            if self.epoch.is_stale(request) {
                return;
            }
            if s.mix.is_playing {
                s.set_engine_state(EngineState::Running);
                s.push_master();
                return;
            }
            if let Some(graph) = s.graph.as_mut() {
                graph.set_master_gain(0.0);
            }
            if s.engine_state == EngineState::FadingOut {
                s.set_engine_state(EngineState::Muted);
            }
        });
    }

    /// Fades out, stops transport, releases the stream, and schedules session release.
    pub(crate) async fn stop_engine_soon(self: &Arc<Self>, request: u64) {
        self.engine_stop.cancel();

        let running = self.update(|s| {
            if s.graph_running() {
                s.set_engine_state(EngineState::FadingOut);
                true
            } else {
                false
            }
        });

        if running {
            self.fade_master(0.0, self.config.fade_duration, request, false)
                .await;
            let superseded = self.update(|s| {
                if !self.epoch.is_stale(request) && !s.mix.is_playing {
                    return false;
                }
                if s.mix.is_playing && s.graph_running() {
                    s.set_engine_state(EngineState::Running);
                    s.push_master();
                }
                true
            });
            if superseded {
                return;
            }
        }

        let stream = self.update(|s| {
            let stream = s.graph.as_mut().and_then(|graph| {
                graph.stop_slots();
                graph.set_master_gain(0.0);
                graph.detach_stream()
            });
            settle_stopped(s);
            stream
        });
        if stream.is_some() {
            drop(stream);
            tracing::info!("engine stopped");
        }
        self.schedule_session_deactivation();
    }

    /// Ramps master gain toward `target`.
    ///
    /// Stops early once `request` is stale or the playing intent no longer
    /// equals `requires_playing`.
    async fn fade_master(
        &self,
        target: f32,
        duration: Duration,
        request: u64,
        requires_playing: bool,
    ) {
        let steps = self.config.fade_steps(duration);
        let interval =
            Duration::from_secs_f64(1.0 / f64::from(self.config.fade_steps_per_second.max(1)));
        let start = {
            let state = self.state.lock();
            state.graph.as_ref().map(|g| g.master_gain())
        };
        let Some(start) = start else {
            return;
        };

        for step in 1..=steps {
            let proceed = {
                let mut state = self.state.lock();
                if self.epoch.is_stale(request) || state.mix.is_playing != requires_playing {
                    false
                } else if let Some(graph) = state.graph.as_mut() {
                    let t = step as f32 / steps as f32;
                    graph.set_master_gain(start + (target - start) * t);
                    true
                } else {
                    false
                }
            };
            if !proceed {
                tracing::trace!(step, steps, "fade aborted");
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Tears the engine down once the grace window passes without a new request.
    pub(crate) fn schedule_engine_stop(self: &Arc<Self>, request: u64) {
        let weak = Arc::downgrade(self);
        let grace = self.config.grace_window;
        self.engine_stop.schedule(grace, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.epoch.is_stale(request) || inner.is_playing() {
                return;
            }
            tracing::info!(?grace, "grace window elapsed; stopping engine");
            inner.stop_engine_soon(request).await;
        });
    }

    pub(crate) fn schedule_session_deactivation(self: &Arc<Self>) {
        let idle = Arc::new(ControllerIdleCheck(Arc::downgrade(self)));
        self.session
            .deactivate_if_idle(self.config.grace_window, idle);
    }
}
