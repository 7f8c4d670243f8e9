use std::time::Duration;

use thiserror::Error;

use crate::peer::state::{NegotiationEvent, NegotiationState};

/// Не удалось открыть устройство захвата.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission to use {0} was denied")]
    PermissionDenied(String),
    #[error("{0} is not available")]
    Unavailable(String),
}

/// Ошибка при обмене offer/answer.
#[derive(Debug, Clone, Error)]
pub enum NegotiationError {
    #[error("operation `{operation}` is not valid for the {role} role")]
    WrongRole {
        operation: &'static str,
        role: &'static str,
    },
    #[error("out of order: {0}")]
    OutOfOrder(&'static str),
    #[error("malformed remote data: {0}")]
    MalformedRemote(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no transition from {from:?} on {event:?}")]
    InvalidTransition {
        from: NegotiationState,
        event: NegotiationEvent,
    },
    /// Согласование не дошло до нужной точки вовремя.
    #[error("negotiation timed out during {stage} after {after:?}")]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
    #[error("peer connection failed")]
    Failed,
    #[error("peer connection closed")]
    Closed,
}

/// Ошибка при работе с хранилищем записей.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} failed with status {status}")]
    Status { method: &'static str, status: u16 },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed pairing record: {0}")]
    Malformed(String),
    #[error("invalid pairing code: {0:?}")]
    InvalidCode(String),
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),
    #[error("signaling base url is not configured")]
    NotConfigured,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("control channel is not open")]
    NotOpen,
    #[error("control channel send failed: {0}")]
    Send(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("sound unit error: {0}")]
    Unit(String),
}

/// Всё, чем может завершиться сессия камеры или монитора.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("no offer found for code {0}")]
    NoOffer(String),
}

impl SessionError {
    /// Короткий статус для UI роли.
    pub fn status_line(&self) -> String {
        match self {
            SessionError::Device(e) => format!("Error: {e}"),
            SessionError::Negotiation(NegotiationError::Timeout { .. }) => {
                "Connection timed out. Check both devices and try again.".to_string()
            }
            SessionError::Negotiation(e) => format!("Connect error: {e}"),
            SessionError::Signaling(e) => format!("Store error: {e}"),
            SessionError::Control(ControlError::NotOpen) => "Connection not ready yet.".to_string(),
            SessionError::Control(e) => format!("Control error: {e}"),
            SessionError::Audio(e) => format!("Audio error: {e}"),
            SessionError::NoOffer(_) => "No offer found for this code.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines_are_short_and_role_facing() {
        assert_eq!(
            SessionError::NoOffer("ABCD1234".into()).status_line(),
            "No offer found for this code."
        );
        assert_eq!(
            SessionError::Control(ControlError::NotOpen).status_line(),
            "Connection not ready yet."
        );
        let timeout = SessionError::Negotiation(NegotiationError::Timeout {
            stage: "answer",
            after: Duration::from_secs(30),
        });
        assert!(timeout.status_line().contains("timed out"));
    }
}
