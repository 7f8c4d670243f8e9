use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::NegotiationError;

/// Роль в согласовании; камера всегда делает offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Offerer => "offerer",
            Role::Answerer => "answerer",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP в формате браузера: `{ "type": "offer", "sdp": "v=0..." }`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn to_rtc(&self) -> Result<RTCSessionDescription, NegotiationError> {
        let parsed = match self.kind {
            SdpKind::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        parsed.map_err(|e| NegotiationError::MalformedRemote(e.to_string()))
    }

    pub fn from_rtc(desc: &RTCSessionDescription) -> Result<Self, NegotiationError> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            other => {
                return Err(NegotiationError::Transport(format!(
                    "unexpected local description type {other:?}"
                )))
            }
        };
        Ok(Self {
            kind,
            sdp: desc.sdp.clone(),
        })
    }
}

/// ICE кандидат, поля как у `RTCIceCandidateInit` в браузере
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// `host`, `srflx`, `prflx` или `relay` из атрибута `typ`.
    pub fn kind(&self) -> Option<&str> {
        let mut parts = self.candidate.split_whitespace();
        while let Some(part) = parts.next() {
            if part == "typ" {
                return parts.next();
            }
        }
        None
    }
}

impl From<RTCIceCandidateInit> for Candidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<Candidate> for RTCIceCandidateInit {
    fn from(c: Candidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

/// Полный пакет соединения: SDP и все собранные кандидаты
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionPackage {
    pub sdp: SessionDescription,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

pub type OfferPackage = SessionPackage;
pub type AnswerPackage = SessionPackage;

/// Запись сопряжения под коротким кодом
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PairingRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<OfferPackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<AnswerPackage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_uses_browser_field_names() {
        let pkg = SessionPackage {
            sdp: SessionDescription::offer("v=0\r\n"),
            candidates: vec![Candidate::new(
                "candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host",
            )],
        };
        let json = serde_json::to_value(&pkg).unwrap();
        assert_eq!(json["sdp"]["type"], "offer");
        assert_eq!(json["candidates"][0]["sdpMLineIndex"], 0);
        assert_eq!(json["candidates"][0]["sdpMid"], "0");
        assert!(json["candidates"][0].get("usernameFragment").is_none());
    }

    #[test]
    fn missing_candidates_default_to_empty() {
        let pkg: SessionPackage =
            serde_json::from_str(r#"{"sdp":{"type":"answer","sdp":"v=0"}}"#).unwrap();
        assert!(pkg.candidates.is_empty());
        assert_eq!(pkg.sdp.kind, SdpKind::Answer);
    }

    #[test]
    fn candidate_kind_reads_typ() {
        let c = Candidate::new("candidate:2 1 udp 1694498815 203.0.113.9 3478 typ srflx raddr 0.0.0.0 rport 0");
        assert_eq!(c.kind(), Some("srflx"));
        assert_eq!(Candidate::new("garbage").kind(), None);
    }
}
