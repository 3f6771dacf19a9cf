//! Noise machine example.
//!
//! Plays a two-slot noise mix on the default output device, persisting the
//! mix to `./noise-mixer-state` so the next run picks up where this one left
//! off. Runs until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=noise_mixer=debug cargo run --example noise_machine
//! ```

use std::time::Duration;

use noise_mixer::hardware::list_output_devices;
use noise_mixer::intents::{self, Intent};
use noise_mixer::{PlaybackController, SavePolicy};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("noise_mixer=info".parse()?))
        .init();

    println!("\nAvailable output devices:");
    println!("-------------------------");
    for (i, name) in list_output_devices()?.iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }

    let controller = PlaybackController::builder()
        .store_dir("noise-mixer-state")
        .on_event(|e| tracing::info!(?e, "mixer event"))
        .build()?;
    intents::install(controller.clone());

    controller.bootstrap_on_launch().await;
    if !controller.is_playing() {
        controller.set_slot_enabled(0, true).await;
        controller.set_slot_tone(0, 1.0, SavePolicy::Immediate).await;
        controller.set_slot_enabled(1, true).await;
        controller.set_slot_tone(1, 2.0, SavePolicy::Immediate).await;
        controller.set_slot_volume(1, 0.3, SavePolicy::Immediate).await;
        intents::perform(Intent::Play).await?;
    }

    println!("\nPlaying. Press Ctrl-C to stop.");

    // Slow swell on the brown-noise slot, saved the way a slider would.
    let swell = {
        let controller = controller.clone();
        tokio::spawn(async move {
            for step in 0..=40 {
                let volume = 0.3 + 0.5 * (step as f32 / 40.0);
                controller
                    .set_slot_volume(1, volume, SavePolicy::Throttled)
                    .await;
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    swell.abort();

    println!("\nStopping...");
    intents::perform(Intent::Stop).await?;
    controller.flush_persistence().await;
    println!("{}", controller.debug_snapshot());

    Ok(())
}
