use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use ts_rs::TS;

use crate::connection::{Connection, ConnectionEvents, Connector, RemoteStream};
use crate::error::NegotiationError;
use crate::media::{LocalMediaState, MediaTrack};
use crate::signal::IceCandidate;
use crate::state::{PeerNotification, SessionEvent};

/// Participant id handed out by the relay. Ordered lexicographically, which
/// is what the offer tie-break relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// The side whose id sorts lower sends the offer.
    pub fn between(local: &PeerId, remote: &PeerId) -> Self {
        if local < remote {
            Role::Initiator
        } else {
            Role::Responder
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerSent,
    Connected,
    Closed,
}

pub struct Peer {
    id: PeerId,
    generation: u64,
    connection: Arc<dyn Connection>,
    pub(crate) role: Option<Role>,
    pub(crate) state: NegotiationState,
    pub(crate) pending_remote_candidates: Vec<IceCandidate>,
    pub(crate) has_remote_description: bool,
    pub(crate) video_track: Option<Arc<MediaTrack>>,
    pub(crate) remote_stream: RemoteStream,
    pub(crate) announced: bool,
}

impl Peer {
    fn new(id: PeerId, generation: u64, connection: Arc<dyn Connection>) -> Self {
        Self {
            id,
            generation,
            connection,
            role: None,
            state: NegotiationState::Idle,
            pending_remote_candidates: Vec::new(),
            has_remote_description: false,
            video_track: None,
            remote_stream: RemoteStream::default(),
            announced: false,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn pending_remote_candidates(&self) -> &[IceCandidate] {
        &self.pending_remote_candidates
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    /// The track currently feeding this peer's video slot.
    pub fn video_track(&self) -> Option<&Arc<MediaTrack>> {
        self.video_track.as_ref()
    }

    pub fn remote_stream(&self) -> &RemoteStream {
        &self.remote_stream
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("pending", &self.pending_remote_candidates.len())
            .field("has_remote_description", &self.has_remote_description)
            .finish()
    }
}

/// Live peers, keyed by remote id. Owns connection creation and teardown.
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<SessionEvent>,
    notifications: mpsc::UnboundedSender<PeerNotification>,
    next_generation: u64,
}

impl PeerRegistry {
    pub fn new(
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<SessionEvent>,
        notifications: mpsc::UnboundedSender<PeerNotification>,
    ) -> Self {
        Self {
            peers: HashMap::new(),
            connector,
            events,
            notifications,
            next_generation: 0,
        }
    }

    /// Returns the live peer for `id`, creating it (and its connection,
    /// seeded with the current outgoing tracks) on first contact.
    pub async fn ensure_peer(
        &mut self,
        id: &PeerId,
        media: &LocalMediaState,
    ) -> Result<&mut Peer, NegotiationError> {
        match self.peers.entry(id.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                self.next_generation += 1;
                let generation = self.next_generation;
                let events = ConnectionEvents::new(id.clone(), generation, self.events.clone());
                let connection = self.connector.connect(id, events).await?;

                let audio = media.outgoing_audio();
                let video = media.outgoing_video();
                if let Err(e) = connection.attach_tracks(audio, video.clone()).await {
                    log::error!("Failed to attach local tracks for {id}: {e}");
                    if let Err(e) = connection.close().await {
                        log::warn!("Error closing connection for {id}: {e}");
                    }
                    return Err(e);
                }

                log::info!("Created peer {id} (generation {generation})");
                let mut peer = Peer::new(id.clone(), generation, connection);
                peer.video_track = video;
                Ok(entry.insert(peer))
            }
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    /// The peer for `id`, but only if it is still the incarnation `generation`
    /// was issued for.
    pub fn live_mut(&mut self, id: &PeerId, generation: u64) -> Option<&mut Peer> {
        self.peers
            .get_mut(id)
            .filter(|peer| peer.generation == generation)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    /// Closes and evicts the peer. Returns false if it was not live.
    pub async fn remove(&mut self, id: &PeerId) -> bool {
        let Some(mut peer) = self.peers.remove(id) else {
            log::debug!("remove: no live peer {id}");
            return false;
        };
        peer.state = NegotiationState::Closed;
        peer.pending_remote_candidates.clear();
        if let Err(e) = peer.connection.close().await {
            log::warn!("Error closing connection for {id}: {e}");
        }
        log::info!("Removed peer {id}");
        let _ = self
            .notifications
            .send(PeerNotification::Disconnected { id: id.clone() });
        true
    }

    pub async fn close_all(&mut self) {
        for id in self.ids() {
            self.remove(&id).await;
        }
    }
}
