use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::SoundKind;
use crate::control::handshake::Pinger;
use crate::control::protocol::ControlMessage;
use crate::error::ControlError;
use crate::peer::data_channel::{ChannelEvent, ControlChannel, ControlLink};

/// Сторона монитора в канале управления.
///
/// Пингует камеру до ответа `ready`, затем шлёт команды звуков.
pub struct MonitorControl {
    channel: Arc<dyn ControlChannel>,
    ready: watch::Receiver<bool>,
    pinger: Arc<Mutex<Pinger>>,
    task: JoinHandle<()>,
}

fn lock(pinger: &Mutex<Pinger>) -> MutexGuard<'_, Pinger> {
    pinger.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MonitorControl {
    pub fn start(link: ControlLink, ping_every: Duration) -> Self {
        let ControlLink {
            channel,
            mut events,
        } = link;
        let (ready_tx, ready) = watch::channel(false);
        let pinger = Arc::new(Mutex::new(Pinger::default()));

        // канал мог открыться раньше, чем мы подписались
        if channel.is_open() {
            lock(&pinger).start(channel.clone(), ping_every);
        }

        let task = tokio::spawn({
            let channel = channel.clone();
            let pinger = pinger.clone();
            async move {
                while let Some(event) = events.recv().await {
                    match event {
                        ChannelEvent::Open => {
                            info!("control channel open, waiting for camera handshake");
                            if !*ready_tx.borrow() {
                                lock(&pinger).start(channel.clone(), ping_every);
                            }
                        }
                        ChannelEvent::Message(text) => match ControlMessage::parse(&text) {
                            Some(ControlMessage::Ready) => {
                                lock(&pinger).stop();
                                if !ready_tx.send_replace(true) {
                                    info!("Handshake complete. Sounds ready.");
                                }
                            }
                            Some(other) => debug!("ignoring {other:?} on monitor side"),
                            None => {}
                        },
                        ChannelEvent::Closed => {
                            info!("control channel closed");
                            lock(&pinger).stop();
                            break;
                        }
                    }
                }
            }
        });

        Self {
            channel,
            ready,
            pinger,
            task,
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// `true`, как только пришёл `ready`; `false`, если не успел за `limit`.
    pub async fn wait_ready(&self, limit: Duration) -> bool {
        let mut ready = self.ready.clone();
        tokio::time::timeout(limit, ready.wait_for(|r| *r))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    pub async fn play(&self, sound: SoundKind) -> Result<(), ControlError> {
        self.send(ControlMessage::Play { sound }).await
    }

    pub async fn stop(&self) -> Result<(), ControlError> {
        self.send(ControlMessage::Stop).await
    }

    async fn send(&self, msg: ControlMessage) -> Result<(), ControlError> {
        if !self.channel.is_open() {
            return Err(ControlError::NotOpen);
        }
        self.channel.send_text(msg.to_json()).await
    }

    pub fn has_pending_ping(&self) -> bool {
        lock(&self.pinger).is_running()
    }

    pub fn stop_pinging(&self) {
        lock(&self.pinger).stop();
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for MonitorControl {
    fn drop(&mut self) {
        self.stop_pinging();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::control::testing;

    const EVERY: Duration = Duration::from_millis(800);

    #[tokio::test(start_paused = true)]
    async fn pings_until_ready() {
        let (channel, tx, link) = testing::link();
        let control = MonitorControl::start(link, EVERY);
        assert!(!control.has_pending_ping());

        channel.open.store(true, Ordering::SeqCst);
        tx.send(ChannelEvent::Open).unwrap();
        tokio::time::sleep(EVERY * 3 + Duration::from_millis(10)).await;
        let pings = channel.sent();
        assert_eq!(pings.len(), 3);
        assert!(pings.iter().all(|p| p == r#"{"action":"ping"}"#));

        tx.send(ChannelEvent::Message(r#"{"action":"ready"}"#.into()))
            .unwrap();
        assert!(control.wait_ready(Duration::from_secs(1)).await);
        assert!(!control.has_pending_ping());
        tokio::time::sleep(EVERY * 3).await;
        assert_eq!(channel.sent().len(), 3);
    }

    #[tokio::test]
    async fn commands_need_an_open_channel() {
        let (channel, _tx, link) = testing::link();
        let control = MonitorControl::start(link, EVERY);
        assert_eq!(
            control.play(SoundKind::Lullaby1).await,
            Err(ControlError::NotOpen)
        );

        channel.open.store(true, Ordering::SeqCst);
        control.play(SoundKind::Lullaby1).await.unwrap();
        control.stop().await.unwrap();
        assert_eq!(
            channel.sent(),
            vec![
                r#"{"action":"play","sound":"lullaby1"}"#.to_string(),
                r#"{"action":"stop"}"#.to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_the_ping_timer() {
        let (channel, tx, link) = testing::link();
        channel.open.store(true, Ordering::SeqCst);
        let control = MonitorControl::start(link, EVERY);
        assert!(control.has_pending_ping());
        tx.send(ChannelEvent::Closed).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!control.has_pending_ping());
        assert!(!control.wait_ready(Duration::from_millis(100)).await);
    }
}
