use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use meshrtc::capture::FileCapture;
use meshrtc::config::{SessionConfig, DEFAULT_SIGNALING_URL, DEFAULT_STUN_SERVER};
use meshrtc::control::ControlMsg;
use meshrtc::rtc::RtcConnector;
use meshrtc::signal;
use meshrtc::state::{PeerNotification, Session, SessionHandle};

#[derive(Parser, Debug)]
#[command(version, about = "Mesh WebRTC call client")]
struct Cli {
    /// Signaling relay websocket url
    #[arg(short, long, default_value = DEFAULT_SIGNALING_URL)]
    url: String,

    /// STUN/TURN server, repeatable
    #[arg(long = "ice-server", default_value = DEFAULT_STUN_SERVER)]
    ice_servers: Vec<String>,

    /// IVF (VP8) file to loop as the camera
    #[arg(long)]
    video_file: Option<PathBuf>,

    /// Ogg/Opus file to loop as the microphone
    #[arg(long)]
    audio_file: Option<PathBuf>,

    /// IVF (VP8) file to play when sharing the screen
    #[arg(long)]
    screen_file: Option<PathBuf>,

    /// Seconds to wait before reconnecting to the relay
    #[arg(long, default_value_t = 3)]
    reconnect_secs: u64,

    /// Turn on debug output
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
}

impl From<Cli> for SessionConfig {
    fn from(cli: Cli) -> Self {
        Self {
            signaling_url: cli.url,
            ice_servers: cli.ice_servers,
            video_file: cli.video_file,
            audio_file: cli.audio_file,
            screen_file: cli.screen_file,
            reconnect_delay: Duration::from_secs(cli.reconnect_secs),
        }
    }
}

fn init_logging(debug: u8) {
    if debug > 0 {
        env_logger::Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log::LevelFilter::Trace)
            .init();
    } else {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    }
}

async fn read_controls(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let msg = match ControlMsg::parse(&line) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Unknown command {line:?} ({e}), try mute, camera, share or unshare");
                continue;
            }
        };
        let handle = handle.clone();
        // Screen acquisition may take a while; keep reading so `unshare` can cancel it.
        tokio::spawn(async move {
            match handle.control(msg).await {
                Ok(outcome) => log::info!("{outcome}"),
                Err(e) => log::error!("{msg:?} failed: {e}"),
            }
        });
    }
}

async fn log_peers(mut notifications: mpsc::UnboundedReceiver<PeerNotification>) {
    while let Some(note) = notifications.recv().await {
        match note {
            PeerNotification::Connected { id, stream } => {
                log::info!("{id} joined the call ({} tracks)", stream.tracks().len())
            }
            PeerNotification::TrackAdded { id, track } => {
                log::info!("{id} is sending {} ({})", track.kind, track.id)
            }
            PeerNotification::Disconnected { id } => log::info!("{id} left the call"),
        }
    }
}

/// Keeps a relay connection up for as long as the process runs.
async fn relay(
    config: &SessionConfig,
    handle: &SessionHandle,
    mut outbound: mpsc::UnboundedReceiver<meshrtc::signal::OutboundMessage>,
) -> Result<()> {
    loop {
        if let Err(e) = signal::connect(&config.signaling_url, handle, &mut outbound).await {
            log::error!("Signaling error: {e}");
        }
        handle.transport_lost()?;
        log::info!("Reconnecting in {:?}", config.reconnect_delay);
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let config = SessionConfig::from(cli);

    let connector = Arc::new(RtcConnector::new(&config)?);
    let devices = Arc::new(FileCapture::new(&config));
    let (mut session, handle, channels) = Session::new(connector, devices);

    if let Err(e) = session.acquire_camera().await {
        log::error!("{}", e.user_message());
    }

    let session_task = tokio::spawn(session.run());
    tokio::spawn(read_controls(handle.clone()));
    tokio::spawn(log_peers(channels.notifications));

    tokio::select! {
        res = relay(&config, &handle, channels.outbound) => res?,
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted, leaving the call"),
    }

    handle.shutdown()?;
    session_task.await?;
    Ok(())
}
