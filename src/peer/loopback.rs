//! Пара транспортов внутри процесса.
//!
//! Оба конца живут в одном процессе и «соединяются», когда у каждой стороны
//! есть локальное описание, удалённое описание и хотя бы один удалённый кандидат.
//! Используется `babymon demo` и тестами.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ControlError, NegotiationError};
use crate::media::{LocalTrack, MediaKind};
use crate::peer::connection::{
    PeerState, PeerTransport, TransportEvent, TransportEvents, TransportFactory,
};
use crate::peer::data_channel::{ChannelEvent, ControlChannel, ControlLink};
use crate::peer::types::{Candidate, Role, SdpKind, SessionDescription};
use crate::utils::random_id;

const OFFERER: usize = 0;
const ANSWERER: usize = 1;

/// Сколько кандидатов каждая сторона «находит».
const GATHERED_PER_SIDE: usize = 2;

struct Side {
    events: mpsc::UnboundedSender<TransportEvent>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied_remote: usize,
    tracks: Vec<MediaKind>,
    closed: bool,
}

struct LinkState {
    sides: [Side; 2],
    connected: bool,
    // ссылка answerer-а отдаётся только после соединения
    answerer_link: Option<ControlLink>,
    channel_open: Arc<AtomicBool>,
    channel_sinks: [mpsc::UnboundedSender<ChannelEvent>; 2],
}

impl LinkState {
    fn try_connect(&mut self) {
        if self.connected {
            return;
        }
        let ready = self.sides.iter().all(|s| {
            !s.closed && s.local.is_some() && s.remote.is_some() && s.applied_remote > 0
        });
        if !ready {
            return;
        }
        self.connected = true;
        debug!("loopback link connected");
        for side in &self.sides {
            let _ = side.events.send(TransportEvent::ConnectionState(PeerState::Connecting));
            let _ = side.events.send(TransportEvent::ConnectionState(PeerState::Connected));
        }
        self.channel_open.store(true, Ordering::SeqCst);
        for sink in &self.channel_sinks {
            let _ = sink.send(ChannelEvent::Open);
        }
        if let Some(link) = self.answerer_link.take() {
            let _ = self.sides[ANSWERER]
                .events
                .send(TransportEvent::ControlChannel(link));
        }
        for (from, to) in [(OFFERER, ANSWERER), (ANSWERER, OFFERER)] {
            for kind in self.sides[from].tracks.clone() {
                let _ = self.sides[to].events.send(TransportEvent::RemoteTrack(kind));
            }
        }
    }
}

/// Один конец loopback-пары.
pub struct LoopbackTransport {
    link: Arc<Mutex<LinkState>>,
    side: usize,
    session_id: String,
}

impl LoopbackTransport {
    /// Возвращает конец offerer-а и конец answerer-а.
    pub fn pair() -> ((Arc<Self>, TransportEvents), (Arc<Self>, TransportEvents)) {
        let (offer_tx, offer_rx) = mpsc::unbounded_channel();
        let (answer_tx, answer_rx) = mpsc::unbounded_channel();
        let (offer_chan_tx, offer_chan_rx) = mpsc::unbounded_channel();
        let (answer_chan_tx, answer_chan_rx) = mpsc::unbounded_channel();
        let channel_open = Arc::new(AtomicBool::new(false));

        let offerer_link = ControlLink {
            channel: Arc::new(LoopbackChannel {
                open: channel_open.clone(),
                own: offer_chan_tx.clone(),
                peer: answer_chan_tx.clone(),
            }),
            events: offer_chan_rx,
        };
        let answerer_link = ControlLink {
            channel: Arc::new(LoopbackChannel {
                open: channel_open.clone(),
                own: answer_chan_tx.clone(),
                peer: offer_chan_tx.clone(),
            }),
            events: answer_chan_rx,
        };
        // offerer создаёт канал сразу, как createDataChannel
        let _ = offer_tx.send(TransportEvent::ControlChannel(offerer_link));

        let side = |events| Side {
            events,
            local: None,
            remote: None,
            applied_remote: 0,
            tracks: Vec::new(),
            closed: false,
        };
        let link = Arc::new(Mutex::new(LinkState {
            sides: [side(offer_tx), side(answer_tx)],
            connected: false,
            answerer_link: Some(answerer_link),
            channel_open,
            channel_sinks: [offer_chan_tx, answer_chan_tx],
        }));

        let offerer = Arc::new(Self {
            link: link.clone(),
            side: OFFERER,
            session_id: random_id(),
        });
        let answerer = Arc::new(Self {
            link,
            side: ANSWERER,
            session_id: random_id(),
        });
        ((offerer, offer_rx), (answerer, answer_rx))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LinkState>, NegotiationError> {
        self.link
            .lock()
            .map_err(|_| NegotiationError::Transport("loopback link poisoned".into()))
    }

    fn sdp_body(&self) -> String {
        format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=loopback:{}\r\n",
            rand::rng().random::<u32>(),
            self.session_id
        )
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), NegotiationError> {
        let mut link = self.lock()?;
        link.sides[self.side].tracks.push(track.kind());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        if self.side != OFFERER {
            return Err(NegotiationError::Transport("answerer end cannot offer".into()));
        }
        Ok(SessionDescription::offer(self.sdp_body()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        if self.side != ANSWERER {
            return Err(NegotiationError::Transport("offerer end cannot answer".into()));
        }
        if self.lock()?.sides[ANSWERER].remote.is_none() {
            return Err(NegotiationError::OutOfOrder("answer before remote offer"));
        }
        Ok(SessionDescription::answer(self.sdp_body()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let mut link = self.lock()?;
        let side = &mut link.sides[self.side];
        if side.closed {
            return Err(NegotiationError::Closed);
        }
        side.local = Some(desc);
        // сбор кандидатов: несколько host-кандидатов и сигнал завершения
        let mut rng = rand::rng();
        for i in 0..GATHERED_PER_SIDE {
            let port: u16 = rng.random_range(40_000..60_000);
            let candidate = Candidate::new(format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {port} typ host",
                i + 1
            ));
            let _ = side.events.send(TransportEvent::CandidateGathered(candidate));
        }
        let _ = side.events.send(TransportEvent::GatheringComplete);
        link.try_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let expected = if self.side == OFFERER {
            SdpKind::Answer
        } else {
            SdpKind::Offer
        };
        if desc.kind != expected {
            return Err(NegotiationError::MalformedRemote(format!(
                "expected {expected:?}, got {:?}",
                desc.kind
            )));
        }
        if !desc.sdp.starts_with("v=0") {
            return Err(NegotiationError::MalformedRemote(
                "session description does not start with v=0".into(),
            ));
        }
        let mut link = self.lock()?;
        link.sides[self.side].remote = Some(desc);
        link.try_connect();
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), NegotiationError> {
        let mut link = self.lock()?;
        let side = &mut link.sides[self.side];
        if side.remote.is_none() {
            return Err(NegotiationError::OutOfOrder(
                "remote candidate before remote description",
            ));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(NegotiationError::MalformedRemote(format!(
                "bad candidate line {:?}",
                candidate.candidate
            )));
        }
        side.applied_remote += 1;
        link.try_connect();
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.lock().ok()?.sides[self.side].local.clone()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        let mut link = self.lock()?;
        if link.sides[self.side].closed {
            return Ok(());
        }
        link.sides[self.side].closed = true;
        let peer = 1 - self.side;
        let _ = link.sides[self.side]
            .events
            .send(TransportEvent::ConnectionState(PeerState::Closed));
        if link.connected {
            link.channel_open.store(false, Ordering::SeqCst);
            for sink in &link.channel_sinks {
                let _ = sink.send(ChannelEvent::Closed);
            }
            let _ = link.sides[peer]
                .events
                .send(TransportEvent::ConnectionState(PeerState::Disconnected));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.link
            .lock()
            .map(|link| link.sides[self.side].closed)
            .unwrap_or(true)
    }
}

/// Оба конца loopback-канала делят один флаг открытости.
struct LoopbackChannel {
    open: Arc<AtomicBool>,
    own: mpsc::UnboundedSender<ChannelEvent>,
    peer: mpsc::UnboundedSender<ChannelEvent>,
}

#[async_trait]
impl ControlChannel for LoopbackChannel {
    async fn send_text(&self, text: String) -> Result<(), ControlError> {
        if !self.is_open() {
            return Err(ControlError::NotOpen);
        }
        self.peer
            .send(ChannelEvent::Message(text))
            .map_err(|e| ControlError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.own.send(ChannelEvent::Closed);
            let _ = self.peer.send(ChannelEvent::Closed);
        }
    }
}

/// Выдаёт два конца одной loopback-пары, по одному на роль.
pub struct LoopbackNetwork {
    offerer: Mutex<Option<(Arc<LoopbackTransport>, TransportEvents)>>,
    answerer: Mutex<Option<(Arc<LoopbackTransport>, TransportEvents)>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        let (offerer, answerer) = LoopbackTransport::pair();
        Self {
            offerer: Mutex::new(Some(offerer)),
            answerer: Mutex::new(Some(answerer)),
        }
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for LoopbackNetwork {
    async fn open(
        &self,
        role: Role,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), NegotiationError> {
        let slot = match role {
            Role::Offerer => &self.offerer,
            Role::Answerer => &self.answerer,
        };
        let taken = slot
            .lock()
            .map_err(|_| NegotiationError::Transport("loopback network poisoned".into()))?
            .take();
        match taken {
            Some((transport, events)) => Ok((transport as Arc<dyn PeerTransport>, events)),
            None => Err(NegotiationError::Transport(format!(
                "loopback {} end already in use",
                role.as_str()
            ))),
        }
    }
}
