//! # noise-mixer
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Lifecycle manager for a four-slot procedural noise mixer.
//!
//! `noise-mixer` keeps a small mix (four noise slots, a master volume, and a
//! playing intent) audible on an output device it shares with the rest of
//! the system. It persists the mix, survives interruptions and route
//! changes, retries flaky hardware, and releases the device when idle.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use noise_mixer::{FileStore, PlaybackController, SavePolicy};
//! use std::sync::Arc;
//!
//! let controller = PlaybackController::builder()
//!     .store_backend(Arc::new(FileStore::new("/var/lib/noise-mixer")?))
//!     .on_event(|e| tracing::info!(?e, "mixer event"))
//!     .build()?;
//!
//! // Resume last session if the user asked for it.
//! controller.bootstrap_on_launch().await;
//!
//! controller.set_slot_enabled(0, true).await;
//! controller.set_slot_volume(0, 0.4, SavePolicy::Throttled).await;
//! controller.play().await;
//!
//! // Later: fades out, stays primed for the grace window, then stops.
//! controller.pause().await;
//! ```
//!
//! ## Architecture
//!
//! The crate keeps the same thread boundary as any real-time audio code:
//!
//! - **Audio Thread**: the output callback renders the graph and never blocks
//! - **Command Queue**: a lock-free SPSC ring carries parameter changes to it
//! - **Tokio Runtime**: the controller sequences session activation, retries,
//!   fades, and delayed stops
//!
//! Every request bumps a [`RequestEpoch`]; a start sequence that finds its
//! epoch stale unwinds without touching the hardware.

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
mod controller;
mod epoch;
mod error;
mod event;
pub mod graph;
pub mod hardware;
pub mod intents;
mod scheduler;
mod session;
mod state;
pub mod store;

pub use builder::PlaybackControllerBuilder;
pub use config::MixerConfig;
pub use controller::{EngineState, PlaybackController};
pub use epoch::RequestEpoch;
pub use error::{HardwareError, HardwareErrorKind, MixerError, StoreError};
pub use event::{
    event_callback, EventCallback, MixerEvent, RouteChangeReason, SessionNotification,
};
pub use graph::GraphId;
pub use hardware::{HardwareFormat, MockHardware, SessionCategory};
pub use scheduler::DelayedTask;
pub use session::{IdleCheck, SessionLifecycleManager};
pub use state::{
    EqState, MixState, SlotState, EQ_RANGE, HIGH_CUT_RANGE, LOW_CUT_RANGE, SLOT_COUNT,
    TONE_RANGE, VOLUME_RANGE,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, MixStateStore, SavePolicy};
