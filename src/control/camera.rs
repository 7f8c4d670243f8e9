use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::AudioEngine;
use crate::control::protocol::ControlMessage;
use crate::peer::data_channel::{ChannelEvent, ControlChannel, ControlLink};

/// Сторона камеры в канале управления: отвечает на ping, играет то, что скажут.
pub struct CameraControl {
    task: JoinHandle<()>,
}

impl CameraControl {
    pub fn serve(link: ControlLink, audio: AudioEngine) -> Self {
        let ControlLink {
            channel,
            mut events,
        } = link;
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ChannelEvent::Open => info!("control channel open"),
                    ChannelEvent::Message(text) => {
                        handle(channel.as_ref(), &audio, &text).await
                    }
                    ChannelEvent::Closed => {
                        info!("control channel closed");
                        break;
                    }
                }
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for CameraControl {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ошибки обработчика не выходят наружу
async fn handle(channel: &dyn ControlChannel, audio: &AudioEngine, text: &str) {
    let Some(msg) = ControlMessage::parse(text) else {
        return;
    };
    match msg {
        ControlMessage::Ping => {
            if let Err(e) = channel.send_text(ControlMessage::Ready.to_json()).await {
                debug!("ready reply failed: {e}");
            }
        }
        ControlMessage::Play { sound } => {
            if let Err(e) = audio.play(sound) {
                debug!("play {sound} failed: {e}");
            }
        }
        ControlMessage::Stop => audio.stop(),
        ControlMessage::Ready => debug!("unexpected ready on camera side"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::audio::SoundKind;
    use crate::config::AudioConfig;
    use crate::control::testing;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn ping_before_attach_is_answered_once_after() {
        let (channel, tx, link) = testing::link();
        channel.open.store(true, Ordering::SeqCst);
        tx.send(ChannelEvent::Open).unwrap();
        tx.send(ChannelEvent::Message(r#"{"action":"ping"}"#.into()))
            .unwrap();

        let (audio, _ctx) = AudioEngine::software(&AudioConfig::default());
        let control = CameraControl::serve(link, audio);
        settle().await;
        assert_eq!(channel.sent(), vec![r#"{"action":"ready"}"#.to_string()]);

        tx.send(ChannelEvent::Message(r#"{"action":"ping"}"#.into()))
            .unwrap();
        settle().await;
        assert_eq!(channel.sent().len(), 2);
        assert!(control.is_running());
    }

    #[tokio::test]
    async fn play_and_stop_drive_the_engine() {
        let (channel, tx, link) = testing::link();
        channel.open.store(true, Ordering::SeqCst);
        let (audio, ctx) = AudioEngine::software(&AudioConfig::default());
        let _control = CameraControl::serve(link, audio.clone());

        tx.send(ChannelEvent::Message(
            r#"{"action":"play","sound":"rain"}"#.into(),
        ))
        .unwrap();
        settle().await;
        assert_eq!(audio.current(), Some(SoundKind::Rain));
        assert_eq!(ctx.active_sources(), 1);

        tx.send(ChannelEvent::Message(
            r#"{"action":"play","sound":"jazz"}"#.into(),
        ))
        .unwrap();
        settle().await;
        assert_eq!(audio.current(), Some(SoundKind::Rain));

        tx.send(ChannelEvent::Message(r#"{"action":"stop"}"#.into()))
            .unwrap();
        settle().await;
        assert_eq!(audio.current(), None);
        assert_eq!(ctx.active_sources(), 0);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn closed_channel_ends_the_handler() {
        let (_channel, tx, link) = testing::link();
        let (audio, _ctx) = AudioEngine::software(&AudioConfig::default());
        let control = CameraControl::serve(link, audio);
        tx.send(ChannelEvent::Closed).unwrap();
        settle().await;
        assert!(!control.is_running());
    }
}
