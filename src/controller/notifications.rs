//! Reactions to OS audio notifications.

use std::sync::Arc;

use super::{EngineState, Inner, PlaybackController};
use crate::event::{MixerEvent, RouteChangeReason, SessionNotification};

impl PlaybackController {
    /// Feeds an OS audio notification into the lifecycle.
    ///
    /// Notifications always win over in-flight requests: an interruption
    /// silences at once, and a route change rebuilds the graph before anything
    /// else runs.
    pub async fn handle_notification(&self, notification: SessionNotification) {
        let inner = &self.inner;
        match notification {
            SessionNotification::InterruptionBegan => inner.interruption_began(),
            SessionNotification::InterruptionEnded { should_resume } => {
                inner.interruption_ended(should_resume).await;
            }
            SessionNotification::RouteChanged { reason } => inner.route_changed(reason).await,
            SessionNotification::MediaServicesReset => inner.media_services_reset().await,
        }
    }
}

impl Inner {
    fn interruption_began(&self) {
        tracing::warn!("audio interruption began");
        self.epoch.bump();
        self.engine_stop.cancel();

        self.pause_output();
        self.update(|s| {
            if let Some(graph) = s.graph.as_mut() {
                graph.stop_slots();
            }
            if s.graph.is_some() && s.engine_state != EngineState::Stopped {
                s.set_engine_state(EngineState::Idle);
            }
            s.events.push(MixerEvent::Interrupted);
        });
        self.session.mark_inactive();
    }

    async fn interruption_ended(self: &Arc<Self>, should_resume: bool) {
        let playing = self.is_playing();
        tracing::warn!(should_resume, playing, "audio interruption ended");
        self.session.mark_inactive();

        if playing && should_resume {
            self.start_engine_if_needed(self.epoch.current()).await;
        }
    }

    async fn route_changed(self: &Arc<Self>, reason: RouteChangeReason) {
        tracing::warn!(%reason, "audio route changed");
        let request = self.epoch.bump();

        // Rebuild even when paused so the next play starts on a route-matched graph.
        if let Err(e) = self.rebuild_graph(&format!("route change ({reason})")) {
            tracing::error!(error = %e, "graph rebuild after route change failed");
        }
        self.update(|s| s.events.push(MixerEvent::RouteChanged { reason }));

        if self.is_playing() {
            self.start_engine_if_needed(request).await;
        }
    }

    async fn media_services_reset(self: &Arc<Self>) {
        tracing::warn!("media services were reset");
        let request = self.epoch.bump();

        self.teardown();
        self.session.cancel_pending_deactivation();
        self.session.mark_inactive();
        self.session.invalidate();

        if let Err(e) = self.prepare_if_needed() {
            tracing::error!(error = %e, "failed to prepare audio graph after media reset");
        }
        if self.is_playing() {
            self.start_engine_if_needed(request).await;
        }
    }
}
