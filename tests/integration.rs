//! Integration tests for noise-mixer.
//!
//! Every test runs against `MockHardware` on a paused tokio clock, so the
//! grace window, backoff, and throttle delays elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use noise_mixer::hardware::{AudioSession, ErrorClassifier};
use noise_mixer::{
    EngineState, EqState, HardwareError, HardwareErrorKind, MemoryStore, MixState,
    MixStateStore, MixerConfig, MixerError, MixerEvent, MockHardware, PlaybackController,
    RequestEpoch, RouteChangeReason, SavePolicy, SessionLifecycleManager, SessionNotification,
    SlotState, SLOT_COUNT,
};
use parking_lot::Mutex;

type Events = Arc<Mutex<Vec<MixerEvent>>>;

fn controller_with_store(
    hw: &MockHardware,
    store: Arc<MemoryStore>,
) -> (PlaybackController, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let controller = PlaybackController::builder()
        .mock(hw.clone())
        .store_backend(store)
        .on_event(move |e| sink.lock().push(e))
        .build()
        .unwrap();
    (controller, events)
}

fn controller(hw: &MockHardware) -> (PlaybackController, Events) {
    controller_with_store(hw, Arc::new(MemoryStore::new()))
}

fn reached_running(events: &Events) -> bool {
    events.lock().iter().any(|e| {
        matches!(
            e,
            MixerEvent::EngineStateChanged {
                to: EngineState::Running,
                ..
            }
        )
    })
}

fn graphs_built(events: &Events) -> usize {
    events
        .lock()
        .iter()
        .filter(|e| matches!(e, MixerEvent::GraphBuilt { .. }))
        .count()
}

#[test]
fn test_normalisation_is_total_and_idempotent() {
    let wild = SlotState {
        enabled: true,
        volume: 7.0,
        tone: f32::NAN,
        low_cut_hz: 15_000.0,
        high_cut_hz: 60.0,
        eq: EqState::new(-40.0, f32::INFINITY, 40.0),
    };
    let inputs = vec![
        MixState {
            master_volume: -3.0,
            slots: vec![wild; 9],
            ..MixState::default()
        },
        MixState {
            master_volume: f32::NAN,
            slots: Vec::new(),
            ..MixState::default()
        },
        MixState {
            slots: vec![wild],
            ..MixState::default()
        },
    ];

    for input in inputs {
        let once = input.normalised();
        assert_eq!(once.slots.len(), SLOT_COUNT);
        assert!((0.0..=1.0).contains(&once.master_volume));
        for slot in &once.slots {
            assert!((0.0..=1.0).contains(&slot.volume));
            assert!((0.0..=2.0).contains(&slot.tone));
            assert!(slot.low_cut_hz <= slot.high_cut_hz);
            assert!((-12.0..=12.0).contains(&slot.eq.low_db));
            assert!((-12.0..=12.0).contains(&slot.eq.mid_db));
            assert!((-12.0..=12.0).contains(&slot.eq.high_db));
        }
        assert_eq!(once.normalised(), once);
    }
}

#[test]
fn test_epoch_is_monotonic() {
    let epoch = RequestEpoch::new();
    let mut last = epoch.current();
    for _ in 0..100 {
        let next = epoch.bump();
        assert!(next > last);
        assert!(epoch.is_stale(last));
        assert!(!epoch.is_stale(next));
        last = next;
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_start_never_reaches_running() {
    let hw = MockHardware::new();
    hw.set_start_latency(Duration::from_millis(100));
    let (controller, events) = controller(&hw);

    let starting = controller.clone();
    let play = tokio::spawn(async move { starting.play().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    controller.pause().await;
    play.await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!controller.is_playing());
    assert!(!reached_running(&events));
    assert_eq!(hw.running_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_activating_releases_session_after_grace() {
    let hw = MockHardware::new();
    hw.set_activation_latency(Duration::from_millis(100));
    let (controller, events) = controller(&hw);

    let starting = controller.clone();
    let play = tokio::spawn(async move { starting.play().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    controller.stop().await;
    play.await.unwrap();

    tokio::time::sleep(Duration::from_secs(179)).await;
    assert!(hw.is_active());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!hw.is_active());
    assert_eq!(hw.deactivations(), 1);
    assert!(!reached_running(&events));

    controller.play().await;
    assert_eq!(controller.engine_state(), EngineState::Running);
    assert_eq!(hw.activation_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_writes_coalesce() {
    let backend = Arc::new(MemoryStore::new());
    let store = MixStateStore::new(backend.clone());
    let mut mix = MixState::default();

    for step in 0..10 {
        mix.master_volume = step as f32 / 10.0;
        store.save(&mix, SavePolicy::Throttled);
    }
    assert_eq!(backend.write_count(), 0);

    tokio::time::sleep(store.throttle() * 2).await;
    assert_eq!(backend.write_count(), 1);
    assert!((store.load_last_mix().master_volume - 0.9).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_grace_window_unmute_keeps_graph() {
    let hw = MockHardware::new();
    let (controller, events) = controller(&hw);
    controller.play().await;
    let graph = controller.graph_id().unwrap();

    controller.pause().await;
    assert_eq!(controller.engine_state(), EngineState::Muted);
    tokio::time::sleep(Duration::from_secs(30)).await;
    controller.play().await;

    assert_eq!(controller.graph_id(), Some(graph));
    assert_eq!(controller.engine_state(), EngineState::Running);
    assert_eq!(graphs_built(&events), 1);
    assert_eq!(hw.streams_opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_activation_retry_cap() {
    let hw = MockHardware::new();
    hw.fail_activation_always(Some(HardwareError::new(HardwareErrorKind::Busy, "held")));
    let session: Arc<dyn AudioSession> = Arc::new(hw.clone());
    let manager = SessionLifecycleManager::new(
        session,
        ErrorClassifier::default(),
        Arc::new(MixerConfig::default()),
    );

    let result = manager.activate(|| true).await;

    assert!(matches!(
        result,
        Err(MixerError::Activation { attempts: 4, .. })
    ));
    assert_eq!(hw.activation_attempts(), 4);
    assert!(!manager.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_slider_drag_persists_once() {
    let hw = MockHardware::new();
    let backend = Arc::new(MemoryStore::new());
    let (controller, _) = controller_with_store(&hw, backend.clone());
    controller.set_slot_enabled(0, true).await;
    let before = backend.write_count();

    for step in 0..20 {
        let volume = step as f32 / 19.0;
        controller
            .set_slot_volume(0, volume, SavePolicy::Throttled)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(backend.write_count() - before, 1);
    let persisted = controller.store().load_last_mix();
    assert!((persisted.slots[0].volume - 1.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_interruption_scenario() {
    let hw = MockHardware::new();
    let (controller, _) = controller(&hw);
    controller.play().await;
    assert_eq!(controller.engine_state(), EngineState::Running);

    controller
        .handle_notification(SessionNotification::InterruptionBegan)
        .await;
    assert_eq!(hw.running_streams(), 0);
    assert!(controller.is_playing());

    controller
        .handle_notification(SessionNotification::InterruptionEnded {
            should_resume: false,
        })
        .await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(hw.running_streams(), 0);
    assert_ne!(controller.engine_state(), EngineState::Running);
    assert!(controller.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_route_change_while_playing() {
    let hw = MockHardware::new();
    let (controller, events) = controller(&hw);
    controller.play().await;
    let before = controller.graph_id().unwrap();
    assert_eq!(graphs_built(&events), 1);

    controller
        .handle_notification(SessionNotification::RouteChanged {
            reason: RouteChangeReason::OldDeviceUnavailable,
        })
        .await;

    assert_eq!(graphs_built(&events), 2);
    assert!(controller.graph_id().unwrap() > before);
    assert_eq!(controller.engine_state(), EngineState::Running);
    assert_eq!(hw.running_streams(), 1);
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, MixerEvent::RouteChanged { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_file_store_survives_restart() {
    use noise_mixer::FileStore;

    let dir = tempfile::tempdir().unwrap();
    {
        let controller = PlaybackController::builder()
            .mock(MockHardware::new())
            .store_backend(Arc::new(FileStore::new(dir.path()).unwrap()))
            .build()
            .unwrap();
        controller.set_master_volume(0.3, SavePolicy::Immediate).await;
        controller.play().await;
    }

    let hw = MockHardware::new();
    let controller = PlaybackController::builder()
        .mock(hw.clone())
        .store_backend(Arc::new(FileStore::new(dir.path()).unwrap()))
        .build()
        .unwrap();
    controller.bootstrap_on_launch().await;

    assert!((controller.state().master_volume - 0.3).abs() < 1e-6);
    // The first successful play seeded resume-on-launch.
    assert!(controller.is_playing());
    assert_eq!(hw.running_streams(), 1);
}
