use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::audio::SoundKind;
use crate::control::MonitorControl;
use crate::error::{ControlError, NegotiationError, SessionError};
use crate::logger::{Status, StatusFeed};
use crate::media::{CaptureRequest, CaptureStream, LocalTrack, MediaKind};
use crate::pairing::PairingCode;
use crate::peer::negotiation::NegotiationEngine;
use crate::peer::state::NegotiationState;
use crate::peer::types::{Role, SessionPackage};
use crate::session::teardown::{Teardown, TeardownReport};
use crate::session::SessionDeps;
use crate::signaling;

/// Монитор: находит offer по коду, отвечает и управляет звуками камеры.
pub struct MonitorSession {
    code: PairingCode,
    engine: NegotiationEngine,
    talkback: Option<CaptureStream>,
    control: Option<MonitorControl>,
    status: StatusFeed,
    closed: bool,
}

impl MonitorSession {
    pub async fn connect(deps: SessionDeps, code: PairingCode) -> Result<Self, SessionError> {
        let status = StatusFeed::new("monitor");
        status.info("Fetching offer by code…");

        let offer = match signaling::fetch_offer(deps.signaling.as_ref(), &code).await {
            Ok(Some(offer)) => offer,
            Ok(None) => {
                let e = SessionError::NoOffer(code.to_string());
                status.err(e.status_line());
                return Err(e);
            }
            Err(e) => {
                let e = SessionError::from(e);
                status.err(e.status_line());
                return Err(e);
            }
        };
        let (transport, events) = match deps.transports.open(Role::Answerer).await {
            Ok(opened) => opened,
            Err(e) => {
                let e = SessionError::from(e);
                status.err(e.status_line());
                return Err(e);
            }
        };
        let engine = NegotiationEngine::new(
            Role::Answerer,
            transport,
            events,
            deps.config.negotiation_timeouts(),
        );

        let mut session = Self {
            code,
            engine,
            talkback: None,
            control: None,
            status,
            closed: false,
        };
        if let Err(e) = session.answer(&deps, offer).await {
            session.status.err(e.status_line());
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn answer(
        &mut self,
        deps: &SessionDeps,
        offer: SessionPackage,
    ) -> Result<(), SessionError> {
        // без микрофона монитор всё равно работает, только без talk-back
        match deps.devices.capture(&CaptureRequest::talkback()).await {
            Ok(stream) => {
                for track in stream.tracks() {
                    track.set_enabled(false);
                    self.engine.transport().add_track(track.clone()).await?;
                }
                self.talkback = Some(stream);
            }
            Err(e) => warn!("Mic permission denied; talk-back disabled: {e}"),
        }

        self.engine.apply_offer(offer).await?;
        let answer = self.engine.create_answer().await?;
        signaling::publish_answer(deps.signaling.as_ref(), &self.code, &answer).await?;
        self.status.ok("Answer stored. Camera will auto-connect.");

        self.engine.wait_connected().await?;
        let link = self.engine.control_link().await?;
        self.control = Some(MonitorControl::start(link, deps.config.ping_interval()));
        if self.engine.remote_tracks().contains(&MediaKind::Video) {
            info!("camera video attached");
        }
        self.status.info("Connected. Waiting for Camera handshake…");
        Ok(())
    }

    /// `true`, как только камера ответила на рукопожатие.
    pub async fn wait_ready(&self, limit: Duration) -> bool {
        let Some(control) = &self.control else {
            return false;
        };
        let ready = control.wait_ready(limit).await;
        if ready {
            self.status.ok("Handshake complete. Sounds ready.");
        }
        ready
    }

    pub fn is_ready(&self) -> bool {
        self.control.as_ref().is_some_and(MonitorControl::is_ready)
    }

    pub async fn play(&self, sound: SoundKind) -> Result<(), SessionError> {
        let result = match &self.control {
            Some(control) => control.play(sound).await,
            None => Err(ControlError::NotOpen),
        };
        match result {
            Ok(()) => {
                self.status.ok(format!("Playing {sound}"));
                Ok(())
            }
            Err(e) => {
                let e = SessionError::from(e);
                self.status.err(e.status_line());
                Err(e)
            }
        }
    }

    pub async fn stop_sound(&self) -> Result<(), SessionError> {
        if let Some(control) = &self.control {
            // как и в браузере: если канал закрыт, просто сбрасываем статус
            if let Err(e) = control.stop().await {
                warn!("stop not delivered: {e}");
            }
        }
        self.status.info("Sound stopped.");
        Ok(())
    }

    fn mic(&self) -> Option<&Arc<LocalTrack>> {
        self.talkback.as_ref().and_then(CaptureStream::audio_track)
    }

    /// Push-to-talk; `false`, если микрофона нет.
    pub fn start_talking(&self) -> bool {
        match self.mic() {
            Some(mic) => {
                mic.set_enabled(true);
                true
            }
            None => false,
        }
    }

    pub fn stop_talking(&self) -> bool {
        match self.mic() {
            Some(mic) => {
                mic.set_enabled(false);
                true
            }
            None => false,
        }
    }

    pub fn is_talking(&self) -> bool {
        self.mic().is_some_and(|mic| mic.is_enabled())
    }

    pub async fn run(&mut self) -> NegotiationState {
        let state = self.engine.monitor().await;
        if state == NegotiationState::Failed {
            self.status.err("Connection lost.");
        }
        state
    }

    pub async fn close(&mut self) -> TeardownReport {
        let mut td = Teardown::new();
        if self.closed {
            return td.finish();
        }
        self.closed = true;

        td.step("ping timer", || {
            if let Some(control) = &self.control {
                control.stop_pinging();
            }
            Ok::<(), NegotiationError>(())
        });
        td.step("control task", || {
            if let Some(control) = self.control.take() {
                control.abort();
            }
            Ok::<(), NegotiationError>(())
        });
        td.step_async("peer transport", self.engine.close()).await;
        td.step("monitor tracks", || {
            if let Some(stream) = &self.talkback {
                stream.stop_all();
            }
            Ok::<(), NegotiationError>(())
        });

        let report = td.finish();
        self.status.info("Monitor stopped.");
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

    pub fn remote_tracks(&self) -> &[MediaKind] {
        self.engine.remote_tracks()
    }

    pub fn has_pending_ping(&self) -> bool {
        self.control.as_ref().is_some_and(MonitorControl::has_pending_ping)
    }

    pub fn live_tracks(&self) -> usize {
        self.talkback.as_ref().map_or(0, CaptureStream::live_tracks)
    }

    pub fn is_transport_closed(&self) -> bool {
        self.engine.transport().is_closed()
    }
}
