use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Local UI intents. The browser sends these as JSON; the terminal client
/// also accepts the bare words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export)]
pub enum ControlMsg {
    ToggleAudio,
    ToggleVideo,
    StartScreenShare,
    StopScreenShare,
}

impl ControlMsg {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let line = line.trim();
        match line {
            "mute" | "audio" => Ok(ControlMsg::ToggleAudio),
            "camera" | "video" => Ok(ControlMsg::ToggleVideo),
            "share" => Ok(ControlMsg::StartScreenShare),
            "unshare" => Ok(ControlMsg::StopScreenShare),
            _ => serde_json::from_str(line),
        }
    }
}

/// Result of applying a [`ControlMsg`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export)]
pub enum ControlOutcome {
    Audio { muted: bool },
    Video { off: bool },
    Sharing { stream_id: String },
    SharingStopped,
}

impl fmt::Display for ControlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlOutcome::Audio { muted: true } => f.write_str("microphone muted"),
            ControlOutcome::Audio { muted: false } => f.write_str("microphone live"),
            ControlOutcome::Video { off: true } => f.write_str("camera off"),
            ControlOutcome::Video { off: false } => f.write_str("camera on"),
            ControlOutcome::Sharing { stream_id } => write!(f, "sharing screen {stream_id}"),
            ControlOutcome::SharingStopped => f.write_str("screen sharing stopped"),
        }
    }
}
