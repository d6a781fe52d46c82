use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:3000/signaling";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Where the session connects and what it sends.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<String>,
    /// IVF (VP8) file looped as the camera.
    pub video_file: Option<PathBuf>,
    /// Ogg/Opus file looped as the microphone.
    pub audio_file: Option<PathBuf>,
    /// IVF (VP8) file played once as the shared screen.
    pub screen_file: Option<PathBuf>,
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_owned(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_owned()],
            video_file: None,
            audio_file: None,
            screen_file: None,
            reconnect_delay: Duration::from_secs(3),
        }
    }
}
