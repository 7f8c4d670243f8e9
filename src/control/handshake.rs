use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::control::protocol::ControlMessage;
use crate::peer::data_channel::ControlChannel;

/// Периодический `ping`, пока камера не ответит `ready`.
#[derive(Debug, Default)]
pub struct Pinger {
    task: Option<JoinHandle<()>>,
}

impl Pinger {
    pub fn start(&mut self, channel: Arc<dyn ControlChannel>, every: Duration) {
        self.stop();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !channel.is_open() {
                    continue;
                }
                if let Err(e) = channel.send_text(ControlMessage::Ping.to_json()).await {
                    debug!("ping send failed: {e}");
                }
            }
        });
        self.task = Some(task);
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("ping timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        self.stop();
    }
}
