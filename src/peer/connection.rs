use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::IceConfig;
use crate::error::NegotiationError;
use crate::media::{LocalTrack, MediaKind};
use crate::peer::data_channel::{attach_dc, ControlLink, CONTROL_LABEL};
use crate::peer::ice::rtc_ice_servers;
use crate::peer::types::{Candidate, Role, SessionDescription};

/// Грубое состояние соединения от транспорта.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(st: RTCPeerConnectionState) -> Self {
        match st {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

/// Асинхронные события транспорта, потребляемые движком согласования
#[derive(Debug)]
pub enum TransportEvent {
    CandidateGathered(Candidate),
    GatheringComplete,
    ConnectionState(PeerState),
    ControlChannel(ControlLink),
    RemoteTrack(MediaKind),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Примитив peer connection, которым управляет движок согласования.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), NegotiationError>;
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;
    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), NegotiationError>;
    /// Локальное описание со всем, что уже собрано.
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn close(&self) -> Result<(), NegotiationError>;
    fn is_closed(&self) -> bool;
}

/// Создаёт по транспорту на сессию и роль.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        role: Role,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), NegotiationError>;
}

fn transport_err(e: webrtc::Error) -> NegotiationError {
    NegotiationError::Transport(e.to_string())
}

/// Peer connection на webrtc-rs
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

impl RtcTransport {
    /// создаём Peer; offerer сам делает data-channel, answerer ждёт его от удалённой стороны
    pub async fn new(
        role: Role,
        ice: &IceConfig,
    ) -> Result<(Arc<Self>, TransportEvents), NegotiationError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(transport_err)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media).map_err(transport_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(ice))
                .await
                .map_err(transport_err)?,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        // Обработчик для сбора локальных кандидатов; None означает конец сбора
        pc.on_ice_candidate(Box::new({
            let tx = tx.clone();
            move |cand: Option<RTCIceCandidate>| {
                match cand {
                    Some(c) => match c.to_json() {
                        Ok(init) => {
                            let _ = tx.send(TransportEvent::CandidateGathered(init.into()));
                        }
                        Err(e) => warn!("failed to serialize local candidate: {e}"),
                    },
                    None => {
                        debug!("ICE candidate gathering completed (null candidate received)");
                        let _ = tx.send(TransportEvent::GatheringComplete);
                    }
                }
                Box::pin(async {})
            }
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            debug!("ICE gathering state changed to: {state:?}");
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new({
            let tx = tx.clone();
            move |st: RTCPeerConnectionState| {
                info!("Peer connection state changed to: {st:?}");
                let _ = tx.send(TransportEvent::ConnectionState(st.into()));
                Box::pin(async {})
            }
        }));

        pc.on_track(Box::new({
            let tx = tx.clone();
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => Some(MediaKind::Video),
                    RTPCodecType::Audio => Some(MediaKind::Audio),
                    _ => None,
                };
                if let Some(kind) = kind {
                    debug!(?kind, "remote track arrived");
                    let _ = tx.send(TransportEvent::RemoteTrack(kind));
                }
                Box::pin(async {})
            }
        }));

        match role {
            Role::Offerer => {
                let dc = pc
                    .create_data_channel(
                        CONTROL_LABEL,
                        Some(RTCDataChannelInit {
                            ordered: Some(true),
                            ..Default::default()
                        }),
                    )
                    .await
                    .map_err(transport_err)?;
                let _ = tx.send(TransportEvent::ControlChannel(attach_dc(&dc)));
            }
            Role::Answerer => {
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let _ = tx.send(TransportEvent::ControlChannel(attach_dc(&dc)));
                    Box::pin(async {})
                }));
            }
        }

        Ok((Arc::new(Self { pc }), rx))
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), NegotiationError> {
        let rtc: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
        let sender = self.pc.add_track(rtc).await.map_err(transport_err)?;
        // RTCP нужно вычитывать, иначе интерцепторы не работают
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(transport_err)?;
        SessionDescription::from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(transport_err)?;
        SessionDescription::from_rtc(&answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let rtc = desc.to_rtc().map_err(|e| match e {
            NegotiationError::MalformedRemote(msg) => NegotiationError::Transport(msg),
            other => other,
        })?;
        self.pc.set_local_description(rtc).await.map_err(transport_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let rtc = desc.to_rtc()?;
        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(|e| NegotiationError::MalformedRemote(e.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), NegotiationError> {
        if self.pc.remote_description().await.is_none() {
            return Err(NegotiationError::OutOfOrder(
                "remote candidate before remote description",
            ));
        }
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| NegotiationError::MalformedRemote(e.to_string()))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        SessionDescription::from_rtc(&desc).ok()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await.map_err(transport_err)
    }

    fn is_closed(&self) -> bool {
        self.pc.connection_state() == RTCPeerConnectionState::Closed
    }
}

/// Открывает [`RtcTransport`] с настроенными STUN серверами.
#[derive(Debug, Clone)]
pub struct RtcTransportFactory {
    ice: IceConfig,
}

impl RtcTransportFactory {
    pub fn new(ice: IceConfig) -> Self {
        Self { ice }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn open(
        &self,
        role: Role,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), NegotiationError> {
        let (transport, events) = RtcTransport::new(role, &self.ice).await?;
        Ok((transport as Arc<dyn PeerTransport>, events))
    }
}

/// Создает конфигурацию для peer connection (только STUN, без relay)
fn rtc_config(ice: &IceConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: rtc_ice_servers(&ice.servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}
