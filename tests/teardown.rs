use std::sync::Arc;
use std::time::Duration;

use babymon_lib::audio::{AudioEngine, SoundKind};
use babymon_lib::config::Config;
use babymon_lib::pairing::PairingCode;
use babymon_lib::peer::NegotiationState;
use babymon_lib::session::{CameraSession, MonitorSession, SessionDeps};
use babymon_lib::signaling::MemoryStore;

#[tokio::test]
async fn close_releases_timers_tracks_and_transport() {
    let mut config = Config::default();
    // пинг не успевает уйти: таймер остаётся взведённым до teardown
    config.control.ping_interval_ms = 60_000;
    config.negotiation.connect_timeout_secs = 5;

    let store = Arc::new(MemoryStore::new());
    let deps = SessionDeps::loopback(config.clone(), store.clone());
    let code = PairingCode::parse("TEARDOWN").unwrap();
    let (audio, ctx) = AudioEngine::software(&config.audio);

    let mut camera = CameraSession::start(deps.clone(), code.clone(), audio)
        .await
        .unwrap();
    let (answered, monitor) = tokio::join!(
        camera.await_answer(),
        MonitorSession::connect(deps, code.clone())
    );
    answered.unwrap();
    let mut monitor = monitor.unwrap();

    camera.audio().play(SoundKind::Lullaby1).unwrap();
    assert_eq!(camera.audio().pending_timers(), 1);
    assert!(monitor.has_pending_ping());
    assert!(!monitor.is_ready());
    assert_eq!(camera.stream().live_tracks(), 2);
    assert_eq!(monitor.live_tracks(), 1);

    let monitor_report = monitor.close().await;
    let camera_report = camera.close().await;

    assert!(monitor_report.is_clean());
    assert_eq!(
        monitor_report.steps,
        vec!["ping timer", "control task", "peer transport", "monitor tracks"]
    );
    assert!(camera_report.is_clean());
    assert_eq!(
        camera_report.steps,
        vec![
            "control task",
            "peer transport",
            "local tracks",
            "audio",
            "signaling record"
        ]
    );

    assert!(!monitor.has_pending_ping());
    assert_eq!(camera.audio().pending_timers(), 0);
    assert_eq!(camera.audio().active_units(), 0);
    assert_eq!(ctx.active_sources(), 0);
    assert_eq!(camera.stream().live_tracks(), 0);
    assert_eq!(monitor.live_tracks(), 0);
    assert!(camera.is_transport_closed());
    assert!(monitor.is_transport_closed());
    assert_eq!(camera.state(), NegotiationState::Closed);
    assert!(!store.contains(&code));

    // повторный close ничего не делает
    assert!(camera.close().await.steps.is_empty());

    // остановленная мелодия не возвращается
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(camera.audio().current_note(), None);
}
