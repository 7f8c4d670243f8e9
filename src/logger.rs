use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::peer::types::Candidate;

/// Установка глобального subscriber; `RUST_LOG` имеет приоритет над конфигом.
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    // повторная инициализация (тесты, demo) не считается ошибкой
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Печать кандидата при появлении
pub fn dump_candidate(label: &str, cand: &Candidate) {
    debug!(
        "{label} candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

/// Строка статуса роли, как цветная плашка под каждой панелью.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Info(String),
    Success(String),
    Error(String),
}

impl Status {
    pub fn text(&self) -> &str {
        match self {
            Status::Idle => "",
            Status::Info(s) | Status::Success(s) | Status::Error(s) => s,
        }
    }
}

/// Публикация статуса роли подписчикам (UI, CLI).
#[derive(Debug, Clone)]
pub struct StatusFeed {
    role: &'static str,
    tx: watch::Sender<Status>,
}

impl StatusFeed {
    pub fn new(role: &'static str) -> Self {
        let (tx, _rx) = watch::channel(Status::Idle);
        Self { role, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    pub fn info(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!(role = self.role, "{msg}");
        self.tx.send_replace(Status::Info(msg));
    }

    pub fn ok(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!(role = self.role, "{msg}");
        self.tx.send_replace(Status::Success(msg));
    }

    pub fn err(&self, msg: impl Into<String>) {
        let msg = msg.into();
        error!(role = self.role, "{msg}");
        self.tx.send_replace(Status::Error(msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_feed_keeps_latest() {
        let feed = StatusFeed::new("camera");
        let rx = feed.subscribe();
        feed.info("Starting camera…");
        feed.ok("Offer stored under code.");
        assert_eq!(*rx.borrow(), Status::Success("Offer stored under code.".into()));
        assert_eq!(rx.borrow().text(), "Offer stored under code.");
    }
}
