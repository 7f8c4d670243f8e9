use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use babymon_lib::audio::AudioEngine;
use babymon_lib::config::Config;
use babymon_lib::error::{DeviceError, NegotiationError, SessionError};
use babymon_lib::logger::Status;
use babymon_lib::media::{CaptureRequest, CaptureStream, HeadlessDevices, MediaDevices};
use babymon_lib::pairing::PairingCode;
use babymon_lib::peer::NegotiationState;
use babymon_lib::session::{CameraSession, MonitorSession, SessionDeps};
use babymon_lib::signaling::MemoryStore;

/// Отказ в доступе: ко всему или только к микрофону без видео.
struct Denied {
    camera_allowed: bool,
}

#[async_trait]
impl MediaDevices for Denied {
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureStream, DeviceError> {
        if self.camera_allowed && request.video.is_some() {
            return HeadlessDevices.capture(request).await;
        }
        let what = if request.video.is_some() {
            "camera"
        } else {
            "microphone"
        };
        Err(DeviceError::PermissionDenied(what.into()))
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.control.ping_interval_ms = 20;
    config.signaling.answer_poll_interval_ms = 20;
    config.negotiation.connect_timeout_secs = 5;
    config
}

fn code() -> PairingCode {
    PairingCode::parse("ABCD1234").unwrap()
}

#[tokio::test]
async fn camera_permission_denied_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let mut deps = SessionDeps::loopback(config(), store.clone());
    deps.devices = Arc::new(Denied {
        camera_allowed: false,
    });
    let (audio, _ctx) = AudioEngine::software(&config().audio);

    let err = CameraSession::start(deps, code(), audio).await.err().unwrap();
    assert!(matches!(
        err,
        SessionError::Device(DeviceError::PermissionDenied(_))
    ));
    assert!(err.status_line().starts_with("Error: "));
    // до захвата в хранилище ничего не пишется
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn monitor_without_microphone_still_connects() {
    let store = Arc::new(MemoryStore::new());
    let deps = SessionDeps::loopback(config(), store);
    let mut monitor_deps = deps.clone();
    monitor_deps.devices = Arc::new(Denied {
        camera_allowed: true,
    });
    let (audio, _ctx) = AudioEngine::software(&config().audio);

    let mut camera = CameraSession::start(deps, code(), audio).await.unwrap();
    let (answered, monitor) = tokio::join!(
        camera.await_answer(),
        MonitorSession::connect(monitor_deps, code())
    );
    answered.unwrap();
    let mut monitor = monitor.unwrap();

    assert_eq!(monitor.state(), NegotiationState::Connected);
    assert!(monitor.wait_ready(Duration::from_secs(5)).await);
    assert!(!monitor.start_talking());
    assert!(!monitor.is_talking());
    assert_eq!(monitor.live_tracks(), 0);

    monitor.close().await;
    camera.close().await;
}

async fn camera_without_monitor(store: Arc<MemoryStore>) {
    let mut config = config();
    config.negotiation.connect_timeout_secs = 30;
    let deps = SessionDeps::loopback(config.clone(), store);
    let (audio, _ctx) = AudioEngine::software(&config.audio);

    let mut camera = CameraSession::start(deps, code(), audio).await.unwrap();
    let status = camera.status();
    let err = camera.await_answer().await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Negotiation(NegotiationError::Timeout {
            stage: "answer",
            after,
        }) if after == Duration::from_secs(30)
    ));
    assert_eq!(camera.state(), NegotiationState::Failed);
    assert!(matches!(
        &*status.borrow(),
        Status::Error(line) if line.starts_with("Connection timed out")
    ));
    camera.close().await;
}

#[tokio::test(start_paused = true)]
async fn answer_wait_times_out_with_push_store() {
    camera_without_monitor(Arc::new(MemoryStore::new())).await;
}

#[tokio::test(start_paused = true)]
async fn answer_wait_times_out_with_polling_store() {
    camera_without_monitor(Arc::new(MemoryStore::polling_only())).await;
}
