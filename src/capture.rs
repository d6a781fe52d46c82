use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::Sample;

use crate::config::SessionConfig;
use crate::error::CaptureError;
use crate::media::{CaptureDevices, MediaStream, MediaTrack, TrackKind};

const OGG_PAGE_DURATION: Duration = Duration::from_millis(20);
const OPUS_CLOCK_RATE: u64 = 48000;

/// Capture devices backed by media files.
///
/// Camera files loop forever; the screen file plays once and its track ends
/// at EOF, the same way a revoked display capture would.
pub struct FileCapture {
    video_file: Option<PathBuf>,
    audio_file: Option<PathBuf>,
    screen_file: Option<PathBuf>,
}

impl FileCapture {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            video_file: config.video_file.clone(),
            audio_file: config.audio_file.clone(),
            screen_file: config.screen_file.clone(),
        }
    }
}

fn check_readable(path: &Path) -> Result<(), CaptureError> {
    File::open(path)
        .map(drop)
        .map_err(|e| CaptureError::Unavailable(format!("{}: {e}", path.display())))
}

#[async_trait]
impl CaptureDevices for FileCapture {
    async fn camera(&self) -> Result<Arc<MediaStream>, CaptureError> {
        for path in self.video_file.iter().chain(self.audio_file.iter()) {
            check_readable(path)?;
        }

        let stream = MediaStream::generate("camera", &[TrackKind::Audio, TrackKind::Video]);
        if let (Some(path), Some(track)) = (&self.audio_file, stream.first_audio()) {
            spawn_pump(track, path.clone(), true);
        }
        if let (Some(path), Some(track)) = (&self.video_file, stream.first_video()) {
            spawn_pump(track, path.clone(), true);
        }
        Ok(stream)
    }

    async fn display(&self) -> Result<Arc<MediaStream>, CaptureError> {
        let Some(path) = &self.screen_file else {
            return Err(CaptureError::Unavailable("no screen source configured".into()));
        };
        check_readable(path)?;

        let stream = MediaStream::generate("screen", &[TrackKind::Video]);
        if let Some(track) = stream.first_video() {
            spawn_pump(track, path.clone(), false);
        }
        Ok(stream)
    }
}

fn spawn_pump(track: Arc<MediaTrack>, path: PathBuf, looping: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let played = match track.kind() {
                TrackKind::Video => pump_ivf(&track, &path).await,
                TrackKind::Audio => pump_ogg(&track, &path).await,
            };
            match played {
                Err(e) => {
                    log::error!("Capture from {} failed: {e}", path.display());
                    break;
                }
                Ok(0) if looping && !track.is_ended() => {
                    log::warn!("{} has no frames, not looping it", path.display());
                    break;
                }
                Ok(_) => {}
            }
            if !looping || track.is_ended() {
                break;
            }
        }
        if !looping {
            track.stop();
        }
        log::debug!("Pump for {} finished", track.id());
    })
}

/// Writes one pass of an IVF file. Returns the number of frames read, at EOF
/// or when the track ends.
async fn pump_ivf(track: &MediaTrack, path: &Path) -> Result<usize> {
    let file = File::open(path)?;
    let (mut ivf, header) = IVFReader::new(BufReader::new(file))?;
    let frame_ms =
        (1000 * header.timebase_numerator as u64) / (header.timebase_denominator.max(1) as u64);
    let duration = Duration::from_millis(frame_ms.max(1));
    let mut ticker = tokio::time::interval(duration);
    let mut frames = 0;

    loop {
        tokio::select! {
            _ = track.ended() => return Ok(frames),
            _ = ticker.tick() => {}
        }
        let frame = match ivf.parse_next_frame() {
            Ok((frame, _)) => frame,
            Err(_) => return Ok(frames),
        };
        frames += 1;
        if !track.is_enabled() {
            continue;
        }
        track
            .sample_track()
            .write_sample(&Sample {
                data: frame.freeze(),
                duration,
                ..Default::default()
            })
            .await?;
    }
}

/// Writes one pass of an Ogg/Opus file, one page per tick.
async fn pump_ogg(track: &MediaTrack, path: &Path) -> Result<usize> {
    let file = File::open(path)?;
    let (mut ogg, _) = OggReader::new(BufReader::new(file), true)?;
    let mut ticker = tokio::time::interval(OGG_PAGE_DURATION);
    let mut last_granule: u64 = 0;
    let mut pages = 0;

    loop {
        tokio::select! {
            _ = track.ended() => return Ok(pages),
            _ = ticker.tick() => {}
        }
        let (page, page_header) = match ogg.parse_next_page() {
            Ok(page) => page,
            Err(_) => return Ok(pages),
        };
        pages += 1;
        let sample_count = page_header.granule_position.saturating_sub(last_granule);
        last_granule = page_header.granule_position;
        if !track.is_enabled() {
            continue;
        }
        track
            .sample_track()
            .write_sample(&Sample {
                data: page.freeze(),
                duration: Duration::from_millis(sample_count * 1000 / OPUS_CLOCK_RATE),
                ..Default::default()
            })
            .await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_screen_source_is_unavailable() {
        let capture = FileCapture::new(&SessionConfig::default());
        assert!(matches!(
            capture.display().await,
            Err(CaptureError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn camera_without_files_still_has_both_tracks() {
        let capture = FileCapture::new(&SessionConfig::default());
        let stream = capture.camera().await.unwrap();
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().count(), 1);
    }

    #[tokio::test]
    async fn unreadable_file_is_reported() {
        let config = SessionConfig {
            video_file: Some(PathBuf::from("/nonexistent/camera.ivf")),
            ..Default::default()
        };
        let err = FileCapture::new(&config).camera().await.unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(msg) if msg.contains("camera.ivf")));
    }

    fn header_only_ivf() -> PathBuf {
        let mut header = Vec::with_capacity(32);
        header.extend_from_slice(b"DKIF");
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&32u16.to_le_bytes());
        header.extend_from_slice(b"VP80");
        header.extend_from_slice(&640u16.to_le_bytes());
        header.extend_from_slice(&480u16.to_le_bytes());
        header.extend_from_slice(&30u32.to_le_bytes());
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        let path = std::env::temp_dir().join(format!("meshrtc-empty-{}.ivf", rand::random::<u32>()));
        std::fs::write(&path, header).unwrap();
        path
    }

    #[tokio::test]
    async fn looping_an_empty_file_gives_up() {
        let path = header_only_ivf();
        let track = MediaTrack::new(TrackKind::Video, "camera", "camera");

        let pump = spawn_pump(track.clone(), path.clone(), true);
        let finished = tokio::time::timeout(Duration::from_secs(2), pump).await;
        std::fs::remove_file(&path).unwrap();

        assert!(finished.is_ok());
        assert!(!track.is_ended());
    }
}
