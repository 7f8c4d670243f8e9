use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::audio::AudioEngine;
use crate::control::CameraControl;
use crate::error::{NegotiationError, SessionError};
use crate::logger::{Status, StatusFeed};
use crate::media::{CaptureRequest, CaptureStream, MediaKind};
use crate::pairing::PairingCode;
use crate::peer::negotiation::NegotiationEngine;
use crate::peer::state::NegotiationState;
use crate::peer::types::{Role, SessionPackage};
use crate::session::teardown::{Teardown, TeardownReport};
use crate::session::SessionDeps;
use crate::signaling::blob::encode_package;
use crate::signaling::{self, ANSWER_PATH};

/// Камера: offer под кодом, ожидание answer, потом звуки по команде монитора.
pub struct CameraSession {
    code: PairingCode,
    deps: SessionDeps,
    engine: NegotiationEngine,
    stream: CaptureStream,
    audio: AudioEngine,
    control: Option<CameraControl>,
    status: StatusFeed,
    closed: bool,
}

impl CameraSession {
    /// Захватывает камеру и микрофон, затем публикует offer под `code`.
    pub async fn start(
        deps: SessionDeps,
        code: PairingCode,
        audio: AudioEngine,
    ) -> Result<Self, SessionError> {
        let status = StatusFeed::new("camera");
        status.info("Starting camera…");

        let stream = match deps.devices.capture(&CaptureRequest::camera()).await {
            Ok(stream) => stream,
            Err(e) => {
                let e = SessionError::from(e);
                status.err(e.status_line());
                return Err(e);
            }
        };
        let (transport, events) = match deps.transports.open(Role::Offerer).await {
            Ok(opened) => opened,
            Err(e) => {
                stream.stop_all();
                let e = SessionError::from(e);
                status.err(e.status_line());
                return Err(e);
            }
        };
        let engine = NegotiationEngine::new(
            Role::Offerer,
            transport,
            events,
            deps.config.negotiation_timeouts(),
        );

        let mut session = Self {
            code,
            deps,
            engine,
            stream,
            audio,
            control: None,
            status,
            closed: false,
        };
        if let Err(e) = session.publish_offer().await {
            session.status.err(e.status_line());
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn publish_offer(&mut self) -> Result<(), SessionError> {
        for track in self.stream.tracks() {
            self.engine.transport().add_track(track.clone()).await?;
        }
        let offer = self.engine.create_offer().await?;
        let store = self.deps.signaling.as_ref();
        signaling::open_record(store, &self.code).await?;
        signaling::publish_offer(store, &self.code, &offer).await?;
        self.status.ok("Offer stored under code.");
        info!(code = %self.code, candidates = offer.candidates.len(), "offer published");
        // тот же пакет одной строкой, для `babymon inspect`
        match encode_package(&offer) {
            Ok(blob) => debug!("offer blob: {blob}"),
            Err(e) => debug!("offer blob unavailable: {e}"),
        }
        Ok(())
    }

    /// Ждёт answer монитора, соединяется и начинает обслуживать команды.
    pub async fn await_answer(&mut self) -> Result<(), SessionError> {
        let result = self.connect().await;
        if let Err(e) = &result {
            self.status.err(e.status_line());
        }
        result
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        self.status.info("Waiting for monitor…");
        let answer = self.wait_for_answer().await?;
        self.engine.apply_answer(answer).await?;
        self.engine.wait_connected().await?;
        let link = self.engine.control_link().await?;
        self.control = Some(CameraControl::serve(link, self.audio.clone()));
        if self.engine.remote_tracks().contains(&MediaKind::Audio) {
            debug!("monitor talk-back track attached");
        }
        self.status.ok("Connected. Monitor can control sounds.");
        Ok(())
    }

    /// Push, если хранилище умеет, иначе опрос; оба ограничены connect timeout.
    async fn wait_for_answer(&mut self) -> Result<SessionPackage, SessionError> {
        let limit = self.engine.timeouts().connect;
        let deadline = Instant::now() + limit;
        let store = self.deps.signaling.clone();

        if let Some(mut rx) = store.subscribe(&self.code, ANSWER_PATH) {
            loop {
                let current = rx.borrow_and_update().clone();
                match signaling::decode(current) {
                    Ok(Some(answer)) => return Ok(answer),
                    Ok(None) => {}
                    Err(e) => warn!("ignoring unreadable answer: {e}"),
                }
                match timeout_at(deadline, rx.changed()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return Err(NegotiationError::Closed.into()),
                    Err(_) => return Err(self.engine.expire("answer", limit).into()),
                }
            }
        }

        let mut ticker = tokio::time::interval(self.deps.config.answer_poll_interval());
        loop {
            if timeout_at(deadline, ticker.tick()).await.is_err() {
                return Err(self.engine.expire("answer", limit).into());
            }
            match signaling::fetch_answer(store.as_ref(), &self.code).await {
                Ok(Some(answer)) => return Ok(answer),
                Ok(None) => {}
                // временные ошибки хранилища: пробуем на следующем тике
                Err(e) => warn!("answer poll failed: {e}"),
            }
        }
    }

    /// Следит за соединением, пока оно не закончится.
    pub async fn run(&mut self) -> NegotiationState {
        let state = self.engine.monitor().await;
        if state == NegotiationState::Failed {
            self.status.err("Connection lost.");
        }
        state
    }

    /// Освобождает всё, что держит сессия. Повторный вызов безопасен.
    pub async fn close(&mut self) -> TeardownReport {
        let mut td = Teardown::new();
        if self.closed {
            return td.finish();
        }
        self.closed = true;

        td.step("control task", || {
            if let Some(control) = self.control.take() {
                control.abort();
            }
            Ok::<(), NegotiationError>(())
        });
        td.step_async("peer transport", self.engine.close()).await;
        td.step("local tracks", || {
            self.stream.stop_all();
            Ok::<(), NegotiationError>(())
        });
        td.step("audio", || {
            self.audio.stop();
            Ok::<(), NegotiationError>(())
        });
        td.step_async(
            "signaling record",
            signaling_cleanup(&self.deps, &self.code),
        )
        .await;

        let report = td.finish();
        self.status.info("Camera stopped.");
        report
    }

    pub fn code(&self) -> &PairingCode {
        &self.code
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn state(&self) -> NegotiationState {
        self.engine.state()
    }

    pub fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    pub fn stream(&self) -> &CaptureStream {
        &self.stream
    }

    pub fn is_transport_closed(&self) -> bool {
        self.engine.transport().is_closed()
    }

    pub fn is_serving(&self) -> bool {
        self.control.as_ref().is_some_and(CameraControl::is_running)
    }
}

async fn signaling_cleanup(deps: &SessionDeps, code: &PairingCode) -> Result<(), SessionError> {
    deps.signaling.delete(code).await?;
    Ok(())
}
