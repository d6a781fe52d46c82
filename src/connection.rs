use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::track::track_remote::TrackRemote;

use crate::error::NegotiationError;
use crate::media::{MediaTrack, TrackKind};
use crate::peer::PeerId;
use crate::signal::{IceCandidate, SessionDescription};
use crate::state::SessionEvent;

/// Transport-level state as reported by the connection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
    /// The webrtc-rs track to read RTP from; absent for non-RTC connections.
    pub rtp: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// Tracks received from one remote participant. Cloned handles share the list,
/// so a renderer holding one sees tracks that arrive after it was handed out.
#[derive(Clone, Debug, Default)]
pub struct RemoteStream {
    tracks: Arc<Mutex<Vec<RemoteTrack>>>,
}

impl RemoteStream {
    pub fn push(&self, track: RemoteTrack) {
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(track);
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    LocalCandidate(IceCandidate),
    StateChanged(ConnectionState),
    RemoteTrack(RemoteTrack),
}

/// Handed to a connection at creation so its callbacks can reach the session.
///
/// Every event carries the generation of the peer it was issued for; the
/// session drops events whose peer has since been removed or recreated.
#[derive(Clone)]
pub struct ConnectionEvents {
    peer: PeerId,
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ConnectionEvents {
    pub(crate) fn new(
        peer: PeerId,
        generation: u64,
        tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            peer,
            generation,
            tx,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn emit(&self, event: ConnectionEvent) {
        let sent = self.tx.send(SessionEvent::Connection {
            peer: self.peer.clone(),
            generation: self.generation,
            event,
        });
        if sent.is_err() {
            log::debug!("session gone, dropping connection event for {}", self.peer);
        }
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(ConnectionEvent::LocalCandidate(candidate));
    }

    pub fn state_changed(&self, state: ConnectionState) {
        self.emit(ConnectionEvent::StateChanged(state));
    }

    pub fn remote_track(&self, track: RemoteTrack) {
        self.emit(ConnectionEvent::RemoteTrack(track));
    }
}

/// One peer transport. Owned by exactly one [`crate::peer::Peer`].
#[async_trait]
pub trait Connection: Send + Sync {
    /// Binds the outgoing audio and video slots. Called once, at creation.
    async fn attach_tracks(
        &self,
        audio: Option<Arc<MediaTrack>>,
        video: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError>;

    /// Swaps the source feeding the video slot without renegotiating.
    async fn replace_video_track(
        &self,
        track: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError>;

    /// Creates an offer and installs it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Creates an answer and installs it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Creates connections for newly discovered peers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        peer: &PeerId,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn Connection>, NegotiationError>;
}
