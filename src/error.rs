use thiserror::Error;

use crate::peer::{NegotiationState, PeerId};

/// Camera, microphone or display acquisition failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture source unavailable: {0}")]
    Unavailable(String),
    #[error("capture cancelled before it completed")]
    Cancelled,
}

impl CaptureError {
    /// Message meant for the person in front of the screen.
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::PermissionDenied(_) => {
                "Access to the capture device was denied. Check the permissions and try again."
                    .to_string()
            }
            CaptureError::Unavailable(detail) => {
                format!("The capture device could not be opened ({detail}). Check that it is connected and not in use.")
            }
            CaptureError::Cancelled => "Screen sharing was cancelled.".to_string(),
        }
    }
}

/// Malformed or out-of-sequence signaling. Logged and dropped, never fatal.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed signaling message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{kind} from {peer} while {state:?}")]
    UnexpectedMessage {
        peer: PeerId,
        kind: &'static str,
        state: NegotiationState,
    },
    #[error("signaling message for {0} arrived before our id was assigned")]
    NoLocalId(PeerId),
}

/// A failure reported by a peer connection while negotiating.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error(transparent)]
    Protocol(#[from] SignalingError),
    #[error("peer connection error: {0}")]
    Connection(String),
    #[error("outbound signaling channel closed")]
    OutboundClosed,
    /// The remote description was applied but the step could not finish.
    /// The peer cannot go back to `Idle` and has to be evicted.
    #[error("negotiation with {peer} broke off: {source}")]
    Abandoned {
        peer: PeerId,
        source: Box<NegotiationError>,
    },
}

impl NegotiationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, NegotiationError::Abandoned { .. })
    }
}

impl From<webrtc::Error> for NegotiationError {
    fn from(err: webrtc::Error) -> Self {
        NegotiationError::Connection(err.to_string())
    }
}

/// Errors surfaced to callers of [`crate::state::SessionHandle`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("screen share acquisition already in progress")]
    ScreenShareBusy,
    #[error("session is no longer running")]
    Closed,
}
