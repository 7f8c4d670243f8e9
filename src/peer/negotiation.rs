use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::NegotiationError;
use crate::logger::dump_candidate;
use crate::media::MediaKind;
use crate::peer::connection::{PeerState, PeerTransport, TransportEvent, TransportEvents};
use crate::peer::data_channel::ControlLink;
use crate::peer::ice::{analyze_candidates, CandidateBuffer};
use crate::peer::state::{NegotiationEvent, NegotiationState};
use crate::peer::types::{Role, SdpKind, SessionPackage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationTimeouts {
    /// Верхняя граница сбора локальных кандидатов.
    pub gather: Duration,
    /// Верхняя граница до `connected` после выпуска нашего пакета.
    pub connect: Duration,
    /// Сколько разорванное соединение может восстанавливаться.
    pub grace: Duration,
}

impl Default for NegotiationTimeouts {
    fn default() -> Self {
        Self {
            gather: Duration::from_secs(10),
            connect: Duration::from_secs(30),
            grace: Duration::from_secs(10),
        }
    }
}

/// Ведёт одно peer connection от `created` до `connected`.
///
/// Колбэки транспорта приходят как [`TransportEvent`] в очередь и
/// разбираются только внутри методов движка, поэтому состояние меняется
/// в одном месте. Наблюдатели следят через [`NegotiationEngine::subscribe`].
pub struct NegotiationEngine {
    role: Role,
    transport: Arc<dyn PeerTransport>,
    events: Option<TransportEvents>,
    state: watch::Sender<NegotiationState>,
    local: CandidateBuffer,
    package_emitted: bool,
    transport_connected: bool,
    control: Option<ControlLink>,
    remote_tracks: Vec<MediaKind>,
    timeouts: NegotiationTimeouts,
}

impl NegotiationEngine {
    pub fn new(
        role: Role,
        transport: Arc<dyn PeerTransport>,
        events: TransportEvents,
        timeouts: NegotiationTimeouts,
    ) -> Self {
        let (state, _) = watch::channel(NegotiationState::Created);
        Self {
            role,
            transport,
            events: Some(events),
            state,
            local: CandidateBuffer::default(),
            package_emitted: false,
            transport_connected: false,
            control: None,
            remote_tracks: Vec::new(),
            timeouts,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    /// Наблюдатель состояния соединения
    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub fn remote_tracks(&self) -> &[MediaKind] {
        &self.remote_tracks
    }

    /// Offerer: локальное описание, полный сбор кандидатов, затем пакет.
    pub async fn create_offer(&mut self) -> Result<SessionPackage, NegotiationError> {
        self.require_role(Role::Offerer, "create_offer")?;
        if self.state() != NegotiationState::Created {
            return Err(NegotiationError::OutOfOrder("offer already created"));
        }
        let offer = self.guard(self.transport.create_offer().await)?;
        self.guard(self.transport.set_local_description(offer).await)?;
        self.advance(NegotiationEvent::LocalDescriptionSet)?;
        self.gather_package().await
    }

    /// Offerer: применить answer, сначала описание, потом кандидаты.
    ///
    /// Когда согласование ушло дальше ожидания удалённого описания,
    /// повторный answer игнорируется, а не запускает пересогласование.
    pub async fn apply_answer(&mut self, answer: SessionPackage) -> Result<(), NegotiationError> {
        self.require_role(Role::Offerer, "apply_answer")?;
        match self.state() {
            NegotiationState::GatheringComplete => {}
            NegotiationState::RemoteDescriptionSet
            | NegotiationState::CandidatesApplied
            | NegotiationState::Connected => {
                debug!("answer already applied, ignoring");
                return Ok(());
            }
            NegotiationState::Failed => return Err(NegotiationError::Failed),
            NegotiationState::Closed => return Err(NegotiationError::Closed),
            _ => return Err(NegotiationError::OutOfOrder("answer before local offer")),
        }
        self.apply_remote(answer, SdpKind::Answer).await
    }

    /// Answerer: применить удалённый offer.
    pub async fn apply_offer(&mut self, offer: SessionPackage) -> Result<(), NegotiationError> {
        self.require_role(Role::Answerer, "apply_offer")?;
        match self.state() {
            NegotiationState::Created => {}
            NegotiationState::Failed => return Err(NegotiationError::Failed),
            NegotiationState::Closed => return Err(NegotiationError::Closed),
            _ => return Err(NegotiationError::OutOfOrder("offer already applied")),
        }
        self.apply_remote(offer, SdpKind::Offer).await
    }

    /// Answerer: answer на применённый offer, пакет после завершения сбора.
    pub async fn create_answer(&mut self) -> Result<SessionPackage, NegotiationError> {
        self.require_role(Role::Answerer, "create_answer")?;
        if self.state() != NegotiationState::CandidatesApplied {
            return Err(NegotiationError::OutOfOrder("answer requires an applied offer"));
        }
        let answer = self.guard(self.transport.create_answer().await)?;
        self.guard(self.transport.set_local_description(answer).await)?;
        self.advance(NegotiationEvent::LocalDescriptionSet)?;
        self.gather_package().await
    }

    /// Ждёт, пока прямой транспорт станет пригоден.
    pub async fn wait_connected(&mut self) -> Result<(), NegotiationError> {
        let deadline = Instant::now() + self.timeouts.connect;
        loop {
            match self.state() {
                NegotiationState::Connected => return Ok(()),
                NegotiationState::Failed => return Err(NegotiationError::Failed),
                NegotiationState::Closed => return Err(NegotiationError::Closed),
                _ => {}
            }
            if self.transport_connected && self.negotiation_finished() {
                self.advance(NegotiationEvent::TransportConnected)?;
                continue;
            }
            self.pump_until(deadline, "connection", self.timeouts.connect)
                .await?;
        }
    }

    /// Канал управления, как только транспорт его выдал.
    pub async fn control_link(&mut self) -> Result<ControlLink, NegotiationError> {
        let deadline = Instant::now() + self.timeouts.connect;
        loop {
            if let Some(link) = self.control.take() {
                return Ok(link);
            }
            if self.state().is_terminal() {
                return Err(NegotiationError::Closed);
            }
            self.pump_until(deadline, "control channel", self.timeouts.connect)
                .await?;
        }
    }

    /// Следит за установленным соединением до его конца.
    ///
    /// `disconnected` запускает grace period; если к его концу транспорт
    /// не сообщил `connected` снова, движок переходит в `failed`.
    pub async fn monitor(&mut self) -> NegotiationState {
        let mut grace_deadline: Option<Instant> = None;
        loop {
            let state = self.state();
            if state.is_terminal() {
                return state;
            }
            let next = match grace_deadline {
                Some(deadline) => {
                    tokio::select! {
                        ev = self.next_event() => Some(ev),
                        _ = sleep_until(deadline) => None,
                    }
                }
                None => Some(self.next_event().await),
            };
            match next {
                Some(Some(TransportEvent::ConnectionState(PeerState::Disconnected))) => {
                    if grace_deadline.is_none() {
                        warn!(
                            "Peer connection disconnected - starting grace period of {:?}",
                            self.timeouts.grace
                        );
                        grace_deadline = Some(Instant::now() + self.timeouts.grace);
                    }
                }
                Some(Some(TransportEvent::ConnectionState(PeerState::Connected))) => {
                    if grace_deadline.take().is_some() {
                        info!("Connection recovered during grace period");
                    }
                    self.transport_connected = true;
                }
                Some(Some(ev)) => self.handle_event(ev),
                Some(None) => self.fail_or_close(NegotiationEvent::Closed),
                None => {
                    warn!("Grace period over, connection did not recover");
                    self.fail_or_close(NegotiationEvent::TransportFailed);
                }
            }
        }
    }

    /// Отказ от удалённой стороны: движок падает, вызывающий получает timeout.
    pub fn expire(&mut self, stage: &'static str, after: Duration) -> NegotiationError {
        warn!("negotiation timed out during {stage}");
        self.fail_or_close(NegotiationEvent::TransportFailed);
        NegotiationError::Timeout { stage, after }
    }

    pub fn timeouts(&self) -> NegotiationTimeouts {
        self.timeouts
    }

    /// Закрывает транспорт; движок заканчивает в `closed`.
    pub async fn close(&mut self) -> Result<(), NegotiationError> {
        let result = self.transport.close().await;
        self.fail_or_close(NegotiationEvent::Closed);
        self.events = None;
        result
    }

    fn require_role(&self, role: Role, operation: &'static str) -> Result<(), NegotiationError> {
        if self.role == role {
            Ok(())
        } else {
            Err(NegotiationError::WrongRole {
                operation,
                role: self.role.as_str(),
            })
        }
    }

    fn negotiation_finished(&self) -> bool {
        self.package_emitted
            && matches!(
                (self.role, self.state()),
                (Role::Offerer, NegotiationState::CandidatesApplied)
                    | (Role::Answerer, NegotiationState::GatheringComplete)
            )
    }

    async fn apply_remote(
        &mut self,
        package: SessionPackage,
        expected: SdpKind,
    ) -> Result<(), NegotiationError> {
        self.advance(NegotiationEvent::RemoteDescriptionReceived)?;
        if package.sdp.kind != expected {
            let err = NegotiationError::MalformedRemote(format!(
                "expected {expected:?} description, got {:?}",
                package.sdp.kind
            ));
            return self.guard(Err(err));
        }
        let set = self.transport.set_remote_description(package.sdp).await;
        self.guard(set)?;
        self.advance(NegotiationEvent::RemoteDescriptionApplied)?;

        // порядок кандидатов не важен; битый кандидат обрывает попытку
        let total = package.candidates.len();
        for candidate in package.candidates {
            dump_candidate("REMOTE", &candidate);
            let added = self.transport.add_remote_candidate(candidate).await;
            if let Err(e) = &added {
                warn!("Failed to add remote candidate: {e}");
            }
            self.guard(added)?;
        }
        info!("Applied {total} remote candidates");
        self.advance(NegotiationEvent::CandidatesApplied)
    }

    async fn gather_package(&mut self) -> Result<SessionPackage, NegotiationError> {
        if self.package_emitted {
            return Err(NegotiationError::OutOfOrder("package already emitted"));
        }
        self.advance(NegotiationEvent::GatheringStarted)?;
        let deadline = Instant::now() + self.timeouts.gather;
        while !self.local.is_complete() {
            self.pump_until(deadline, "candidate gathering", self.timeouts.gather)
                .await?;
            if self.state().is_terminal() {
                return Err(NegotiationError::Failed);
            }
        }
        self.advance(NegotiationEvent::GatheringComplete)?;

        let sdp = match self.transport.local_description().await {
            Some(sdp) => sdp,
            None => {
                return self.guard(Err(NegotiationError::Transport(
                    "local description vanished after gathering".into(),
                )))
            }
        };
        let candidates = self.local.candidates().to_vec();
        info!("Collected {} ICE candidates", candidates.len());
        analyze_candidates(&candidates);
        self.package_emitted = true;
        Ok(SessionPackage { sdp, candidates })
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Разбирает одно событие транспорта или падает с timeout к `deadline`.
    async fn pump_until(
        &mut self,
        deadline: Instant,
        stage: &'static str,
        limit: Duration,
    ) -> Result<(), NegotiationError> {
        match timeout_at(deadline, self.next_event()).await {
            Ok(Some(ev)) => {
                self.handle_event(ev);
                Ok(())
            }
            Ok(None) => {
                self.fail_or_close(NegotiationEvent::Closed);
                Err(NegotiationError::Closed)
            }
            Err(_) => {
                warn!("negotiation timed out during {stage}");
                self.fail_or_close(NegotiationEvent::TransportFailed);
                Err(NegotiationError::Timeout { stage, after: limit })
            }
        }
    }

    fn handle_event(&mut self, ev: TransportEvent) {
        match ev {
            TransportEvent::CandidateGathered(candidate) => self.local.push(candidate),
            TransportEvent::GatheringComplete => {
                debug!("ICE gathering complete");
                self.local.complete();
            }
            TransportEvent::ConnectionState(PeerState::Connected) => {
                // до выпуска собственного пакета только запоминаем
                self.transport_connected = true;
                if self.negotiation_finished() {
                    let _ = self.advance(NegotiationEvent::TransportConnected);
                }
            }
            TransportEvent::ConnectionState(PeerState::Failed) => {
                self.fail_or_close(NegotiationEvent::TransportFailed)
            }
            TransportEvent::ConnectionState(PeerState::Closed) => {
                self.fail_or_close(NegotiationEvent::Closed)
            }
            TransportEvent::ConnectionState(other) => {
                debug!("Peer connection state: {other:?} - ignoring");
            }
            TransportEvent::ControlChannel(link) => {
                debug!("control channel available");
                self.control = Some(link);
            }
            TransportEvent::RemoteTrack(kind) => self.remote_tracks.push(kind),
        }
    }

    fn advance(&mut self, event: NegotiationEvent) -> Result<(), NegotiationError> {
        let current = self.state();
        let next = current.on_event(event)?;
        if next != current {
            debug!(role = self.role.as_str(), "negotiation {current:?} -> {next:?}");
            self.state.send_replace(next);
        }
        Ok(())
    }

    /// Терминальные переходы не падают; повторные игнорируются.
    fn fail_or_close(&mut self, event: NegotiationEvent) {
        if let Err(e) = self.advance(event) {
            debug!("ignoring terminal event: {e}");
        }
    }

    /// Переводит в `failed`, если шаг согласования упал, и отдаёт ошибку дальше.
    fn guard<T>(&mut self, result: Result<T, NegotiationError>) -> Result<T, NegotiationError> {
        if result.is_err() {
            self.fail_or_close(NegotiationEvent::TransportFailed);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::media::LocalTrack;
    use crate::peer::loopback::LoopbackTransport;
    use crate::peer::types::{Candidate, SessionDescription};

    /// Транспорт, у которого сбор кандидатов никогда не завершается.
    struct StalledGathering;

    #[async_trait]
    impl PeerTransport for StalledGathering {
        async fn add_track(&self, _track: Arc<LocalTrack>) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
            Ok(SessionDescription::offer("v=0\r\n"))
        }
        async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
            Ok(SessionDescription::answer("v=0\r\n"))
        }
        async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn add_remote_candidate(&self, _candidate: Candidate) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn local_description(&self) -> Option<SessionDescription> {
            None
        }
        async fn close(&self) -> Result<(), NegotiationError> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn engines() -> (NegotiationEngine, NegotiationEngine) {
        let ((o, oe), (a, ae)) = LoopbackTransport::pair();
        let timeouts = NegotiationTimeouts {
            gather: Duration::from_secs(2),
            connect: Duration::from_secs(2),
            grace: Duration::from_millis(200),
        };
        (
            NegotiationEngine::new(Role::Offerer, o, oe, timeouts),
            NegotiationEngine::new(Role::Answerer, a, ae, timeouts),
        )
    }

    #[tokio::test]
    async fn offer_answer_reaches_connected_with_reversed_candidates() {
        let (mut camera, mut monitor) = engines();
        let offer = camera.create_offer().await.unwrap();
        assert_eq!(camera.state(), NegotiationState::GatheringComplete);
        assert_eq!(offer.candidates.len(), 2);

        monitor.apply_offer(offer).await.unwrap();
        let mut answer = monitor.create_answer().await.unwrap();
        answer.candidates.reverse();

        camera.apply_answer(answer).await.unwrap();
        camera.wait_connected().await.unwrap();
        monitor.wait_connected().await.unwrap();
        assert_eq!(camera.state(), NegotiationState::Connected);
        assert_eq!(monitor.state(), NegotiationState::Connected);
    }

    #[tokio::test]
    async fn answer_before_offer_is_rejected() {
        let (mut camera, _) = engines();
        let err = camera
            .apply_answer(SessionPackage {
                sdp: SessionDescription::answer("v=0"),
                candidates: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::OutOfOrder(_)));
        assert_eq!(camera.state(), NegotiationState::Created);
    }

    #[tokio::test]
    async fn second_answer_is_a_no_op() {
        let (mut camera, mut monitor) = engines();
        let offer = camera.create_offer().await.unwrap();
        monitor.apply_offer(offer).await.unwrap();
        let answer = monitor.create_answer().await.unwrap();
        camera.apply_answer(answer.clone()).await.unwrap();
        camera.wait_connected().await.unwrap();
        camera.apply_answer(answer).await.unwrap();
        assert_eq!(camera.state(), NegotiationState::Connected);
    }

    #[tokio::test]
    async fn malformed_remote_description_fails_negotiation() {
        let (mut camera, _) = engines();
        camera.create_offer().await.unwrap();
        let err = camera
            .apply_answer(SessionPackage {
                sdp: SessionDescription::answer("not an sdp"),
                candidates: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::MalformedRemote(_)));
        assert_eq!(camera.state(), NegotiationState::Failed);
    }

    #[tokio::test]
    async fn malformed_remote_candidate_fails_negotiation() {
        let (mut camera, mut monitor) = engines();
        let offer = camera.create_offer().await.unwrap();
        monitor.apply_offer(offer).await.unwrap();
        let mut answer = monitor.create_answer().await.unwrap();
        answer.candidates = vec![Candidate::new("garbage-not-a-candidate")];

        let err = camera.apply_answer(answer).await.unwrap_err();
        assert!(matches!(err, NegotiationError::MalformedRemote(_)));
        assert_eq!(camera.state(), NegotiationState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_gathering_times_out() {
        let (tx, events) = mpsc::unbounded_channel();
        // кандидат без сигнала завершения
        tx.send(TransportEvent::CandidateGathered(Candidate::new(
            "candidate:1 1 udp 2130706431 127.0.0.1 5000 typ host",
        )))
        .unwrap();
        let mut camera = NegotiationEngine::new(
            Role::Offerer,
            Arc::new(StalledGathering),
            events,
            NegotiationTimeouts::default(),
        );

        let err = camera.create_offer().await.unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::Timeout {
                stage: "candidate gathering",
                after,
            } if after == Duration::from_secs(10)
        ));
        assert_eq!(camera.state(), NegotiationState::Failed);
        drop(tx);
    }

    #[tokio::test]
    async fn offer_package_is_emitted_once() {
        let (mut camera, _) = engines();
        camera.create_offer().await.unwrap();
        assert!(matches!(
            camera.create_offer().await,
            Err(NegotiationError::OutOfOrder(_))
        ));
    }

    #[tokio::test]
    async fn roles_are_enforced() {
        let (mut camera, mut monitor) = engines();
        assert!(matches!(
            monitor.create_offer().await,
            Err(NegotiationError::WrongRole { .. })
        ));
        assert!(matches!(
            camera.create_answer().await,
            Err(NegotiationError::WrongRole { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_answer_times_out() {
        let (mut camera, _monitor) = engines();
        camera.create_offer().await.unwrap();
        let err = camera.wait_connected().await.unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::Timeout {
                stage: "connection",
                ..
            }
        ));
        assert_eq!(camera.state(), NegotiationState::Failed);
    }

    #[tokio::test]
    async fn observer_sees_terminal_state() {
        let (mut camera, _) = engines();
        let mut rx = camera.subscribe();
        camera.create_offer().await.unwrap();
        camera.close().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), NegotiationState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_peer_fails_after_grace_period() {
        let (mut camera, mut monitor) = engines();
        let offer = camera.create_offer().await.unwrap();
        monitor.apply_offer(offer).await.unwrap();
        let answer = monitor.create_answer().await.unwrap();
        camera.apply_answer(answer).await.unwrap();
        camera.wait_connected().await.unwrap();
        monitor.wait_connected().await.unwrap();

        monitor.close().await.unwrap();
        assert_eq!(camera.monitor().await, NegotiationState::Failed);
    }
}
