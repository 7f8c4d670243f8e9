//! Контракт устройств захвата.
//!
//! Сам захват принадлежит платформе. Сессия просит у реализации
//! [`MediaDevices`] поток [`CaptureStream`] и отдаёт каждый
//! [`LocalTrack`] транспорту.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::DeviceError;
use crate::utils::random_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    /// Задняя камера, направленная на кроватку.
    Environment,
    User,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoConstraints {
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl CaptureRequest {
    /// Звук и видео 1080p с задней камеры для роли камеры.
    pub fn camera() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints {
                facing: Facing::Environment,
                ideal_width: 1920,
                ideal_height: 1080,
            }),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }

    /// Только звук, для push-to-talk монитора.
    pub fn talkback() -> Self {
        Self {
            audio: true,
            video: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Один захваченный трек
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    live: AtomicBool,
    rtc: Arc<TrackLocalStaticSample>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

impl LocalTrack {
    pub fn new(kind: MediaKind, stream_id: &str) -> Self {
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let id = random_id();
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            stream_id.to_owned(),
        ));
        Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
            rtc,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtc.clone()
    }

    /// Выключенный трек остаётся в соединении, но шлёт тишину.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!(track = %self.id, kind = ?self.kind, "track stopped");
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CaptureStream {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl CaptureStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn audio_track(&self) -> Option<&Arc<LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == MediaKind::Audio)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureStream, DeviceError>;
}

/// Устройства для хоста без камеры и микрофона.
///
/// Треки согласуются как настоящие и не несут сэмплов, пока к
/// [`LocalTrack::rtc_track`] не подключён источник.
#[derive(Debug, Default, Clone)]
pub struct HeadlessDevices;

#[async_trait]
impl MediaDevices for HeadlessDevices {
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureStream, DeviceError> {
        let stream_id = random_id();
        let mut tracks = Vec::new();
        if request.audio {
            tracks.push(Arc::new(LocalTrack::new(MediaKind::Audio, &stream_id)));
        }
        if request.video.is_some() {
            tracks.push(Arc::new(LocalTrack::new(MediaKind::Video, &stream_id)));
        }
        if tracks.is_empty() {
            return Err(DeviceError::Unavailable("an empty capture request".into()));
        }
        Ok(CaptureStream::new(stream_id, tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn camera_request_yields_audio_and_video() {
        let stream = HeadlessDevices.capture(&CaptureRequest::camera()).await.unwrap();
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(stream.live_tracks(), 2);
        stream.stop_all();
        assert_eq!(stream.live_tracks(), 0);
    }

    #[tokio::test]
    async fn talkback_is_audio_only() {
        let stream = HeadlessDevices.capture(&CaptureRequest::talkback()).await.unwrap();
        assert_eq!(stream.tracks().len(), 1);
        let mic = stream.audio_track().unwrap();
        mic.set_enabled(false);
        assert!(!mic.is_enabled());
        assert!(mic.is_live());
    }
}
