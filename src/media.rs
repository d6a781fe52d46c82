use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::{Alphanumeric, DistString};
use tokio::sync::watch;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    fn codec_capability(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// One local outgoing track.
///
/// Peers hold the same `Arc<MediaTrack>`, so muting flips `enabled` in one
/// place and every connection sees it. The sample sink is what webrtc-rs
/// binds to senders; capture pumps write into it.
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    sample_track: Arc<TrackLocalStaticSample>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>, stream_id: &str) -> Arc<Self> {
        let id = format!("{kind}-{}", rand::random::<u32>());
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            kind.codec_capability(),
            id.clone(),
            stream_id.to_owned(),
        ));
        let (ended, _) = watch::channel(false);
        Arc::new(Self {
            id,
            kind,
            label: label.into(),
            enabled: AtomicBool::new(true),
            ended,
            sample_track,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Disabled tracks stay bound to their senders but carry no media.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn stop(&self) {
        self.ended.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Resolves once the track has been stopped, locally or by its source.
    pub async fn ended(&self) {
        let mut rx = self.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    pub fn sample_track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.sample_track
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Opaque handle returned by a capture device.
#[derive(Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    /// Builds a stream with one fresh track per requested kind.
    pub fn generate(label: &str, kinds: &[TrackKind]) -> Arc<Self> {
        let id = format!(
            "{label}-{}",
            Alphanumeric.sample_string(&mut rand::thread_rng(), 8)
        );
        let tracks = kinds
            .iter()
            .map(|kind| MediaTrack::new(*kind, label, &id))
            .collect();
        Arc::new(Self { id, tracks })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn first_audio(&self) -> Option<Arc<MediaTrack>> {
        self.audio_tracks().next().cloned()
    }

    pub fn first_video(&self) -> Option<Arc<MediaTrack>> {
        self.video_tracks().next().cloned()
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Camera, microphone and display acquisition.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Camera video plus microphone audio.
    async fn camera(&self) -> Result<Arc<MediaStream>, CaptureError>;
    /// A display capture; its video track ends when the source goes away.
    async fn display(&self) -> Result<Arc<MediaStream>, CaptureError>;
}

/// Local media toggles and the streams they act on.
///
/// Every method is a plain state transition; pushing the result onto peer
/// connections is the broadcaster's job.
#[derive(Debug, Default)]
pub struct LocalMediaState {
    camera_stream: Option<Arc<MediaStream>>,
    screen_stream: Option<Arc<MediaStream>>,
    audio_muted: bool,
    video_off: bool,
    screen_sharing: bool,
}

impl LocalMediaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a camera stream was already installed.
    pub fn set_camera_stream(&mut self, stream: Arc<MediaStream>) -> bool {
        if self.camera_stream.is_some() {
            log::warn!("camera stream already set, ignoring {}", stream.id());
            return false;
        }
        self.camera_stream = Some(stream);
        true
    }

    pub fn camera_stream(&self) -> Option<&Arc<MediaStream>> {
        self.camera_stream.as_ref()
    }

    pub fn screen_stream(&self) -> Option<&Arc<MediaStream>> {
        self.screen_stream.as_ref()
    }

    pub fn audio_muted(&self) -> bool {
        self.audio_muted
    }

    pub fn video_off(&self) -> bool {
        self.video_off
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    pub fn outgoing_audio(&self) -> Option<Arc<MediaTrack>> {
        self.camera_stream.as_ref().and_then(|s| s.first_audio())
    }

    pub fn camera_video(&self) -> Option<Arc<MediaTrack>> {
        self.camera_stream.as_ref().and_then(|s| s.first_video())
    }

    /// The track a newly created peer should send in its video slot.
    pub fn outgoing_video(&self) -> Option<Arc<MediaTrack>> {
        if self.screen_sharing {
            if let Some(track) = self.screen_stream.as_ref().and_then(|s| s.first_video()) {
                return Some(track);
            }
        }
        self.camera_video()
    }

    /// What the video slot goes back to when screen sharing stops.
    pub fn restored_video(&self) -> Option<Arc<MediaTrack>> {
        if self.video_off {
            None
        } else {
            self.camera_video()
        }
    }

    /// Returns the new muted state. Without a camera stream nothing changes.
    pub fn toggle_audio(&mut self) -> bool {
        let Some(stream) = &self.camera_stream else {
            return self.audio_muted;
        };
        self.audio_muted = !self.audio_muted;
        for track in stream.audio_tracks() {
            track.set_enabled(!self.audio_muted);
        }
        log::info!("Audio {}", if self.audio_muted { "muted" } else { "unmuted" });
        self.audio_muted
    }

    /// Returns the new camera-off state. Without a camera stream nothing changes.
    pub fn toggle_video(&mut self) -> bool {
        let Some(stream) = &self.camera_stream else {
            return self.video_off;
        };
        self.video_off = !self.video_off;
        for track in stream.video_tracks() {
            track.set_enabled(!self.video_off);
        }
        log::info!("Video {}", if self.video_off { "disabled" } else { "enabled" });
        self.video_off
    }

    /// Installs the screen stream and returns its video track.
    pub fn begin_screen_share(&mut self, stream: Arc<MediaStream>) -> Option<Arc<MediaTrack>> {
        let track = stream.first_video();
        if let Some(previous) = self.screen_stream.replace(stream) {
            previous.stop();
        }
        self.screen_sharing = true;
        track
    }

    /// Stops and drops the screen stream. `None` if nothing was being shared.
    pub fn end_screen_share(&mut self) -> Option<Arc<MediaStream>> {
        let stream = self.screen_stream.take()?;
        stream.stop();
        self.screen_sharing = false;
        Some(stream)
    }

    /// Session end: stop everything we captured.
    pub fn release(&mut self) {
        self.end_screen_share();
        if let Some(stream) = self.camera_stream.take() {
            stream.stop();
        }
    }
}
