use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::SoundKind;

/// Кадр канала управления: `{"action": "...", "sound"?: "..."}`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlMessage {
    Ping,
    Ready,
    Play { sound: SoundKind },
    Stop,
}

impl ControlMessage {
    /// Неизвестные и битые кадры дают `None`, вызывающий их отбрасывает.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!("ignoring control frame {text:?}: {e}");
                None
            }
        }
    }

    pub fn to_json(&self) -> String {
        // сериализация enum без map-ключей не может упасть
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_browser_peers() {
        assert_eq!(ControlMessage::Ping.to_json(), r#"{"action":"ping"}"#);
        assert_eq!(
            ControlMessage::Play { sound: SoundKind::Lullaby2 }.to_json(),
            r#"{"action":"play","sound":"lullaby2"}"#
        );
        assert_eq!(
            ControlMessage::parse(r#"{"sound":"rain","action":"play"}"#),
            Some(ControlMessage::Play { sound: SoundKind::Rain })
        );
    }

    #[test]
    fn junk_is_ignored() {
        assert_eq!(ControlMessage::parse("not json"), None);
        assert_eq!(ControlMessage::parse(r#"{"action":"dance"}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"action":"play","sound":"jazz"}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"action":"play"}"#), None);
    }
}
