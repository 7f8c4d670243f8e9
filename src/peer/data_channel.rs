use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

use crate::error::ControlError;

/// Метка упорядоченного надёжного канала управления.
pub const CONTROL_LABEL: &str = "ctrl";

/// События канала управления в порядке поступления
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Closed,
}

/// Отправляющая половина упорядоченного текстового канала.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), ControlError>;
    fn is_open(&self) -> bool;
    async fn close(&self);
}

/// Канал вместе с очередью его входящих событий
pub struct ControlLink {
    pub channel: Arc<dyn ControlChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl std::fmt::Debug for ControlLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLink")
            .field("open", &self.channel.is_open())
            .finish()
    }
}

/// Data channel webrtc-rs за [`ControlChannel`].
pub struct RtcControlChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl ControlChannel for RtcControlChannel {
    async fn send_text(&self, text: String) -> Result<(), ControlError> {
        if !self.is_open() {
            return Err(ControlError::NotOpen);
        }
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| ControlError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!("data channel close: {e}");
        }
    }
}

/// общий обработчик data-channel: события уходят в очередь ссылки
pub fn attach_dc(dc: &Arc<RTCDataChannel>) -> ControlLink {
    debug!(label = dc.label(), "attach_dc called");
    let (tx, rx) = mpsc::unbounded_channel();

    dc.on_open(Box::new({
        let tx = tx.clone();
        move || {
            debug!("data channel opened");
            let _ = tx.send(ChannelEvent::Open);
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let tx = tx.clone();
        move |msg: DataChannelMessage| {
            // команды только текстовые, бинарные кадры игнорируем
            if !msg.is_string {
                debug!(len = msg.data.len(), "ignoring binary frame");
                return Box::pin(async {});
            }
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = tx.send(ChannelEvent::Message(text));
                }
                Err(_) => debug!("ignoring non-utf8 text frame"),
            }
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new(move || {
        debug!("data channel closed");
        let _ = tx.send(ChannelEvent::Closed);
        Box::pin(async {})
    }));

    ControlLink {
        channel: Arc::new(RtcControlChannel { dc: dc.clone() }),
        events: rx,
    }
}
