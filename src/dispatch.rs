use std::collections::HashSet;

use crate::connection::ConnectionEvent;
use crate::error::NegotiationError;
use crate::media::LocalMediaState;
use crate::negotiation::{Disposition, NegotiationEngine};
use crate::peer::{NegotiationState, Peer, PeerId, PeerRegistry};
use crate::signal::SignalingMessage;

/// Routes relay messages and connection callbacks to the registry and engine.
///
/// Failures are scoped to the peer a message concerns: they are logged here
/// and never reach the session loop.
#[derive(Debug, Default)]
pub struct SignalingDispatcher {
    local_id: Option<PeerId>,
    /// Ids that left or were evicted. Their late offers, answers and
    /// candidates are dropped until the relay announces them again.
    departed: HashSet<PeerId>,
}

impl SignalingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    /// The relay connection is gone; the next one hands out a new id and a
    /// fresh roster.
    pub fn reset(&mut self) {
        self.local_id = None;
        self.departed.clear();
    }

    pub async fn dispatch(
        &mut self,
        message: SignalingMessage,
        registry: &mut PeerRegistry,
        engine: &NegotiationEngine,
        media: &LocalMediaState,
    ) {
        let kind = message.kind();
        if let Err(e) = self.route(message, registry, engine, media).await {
            log::warn!("Dropped {kind}: {e}");
        }
    }

    async fn route(
        &mut self,
        message: SignalingMessage,
        registry: &mut PeerRegistry,
        engine: &NegotiationEngine,
        media: &LocalMediaState,
    ) -> Result<(), NegotiationError> {
        match message {
            SignalingMessage::AssignId { user_id } => {
                log::info!("Assigned id {user_id}");
                self.local_id = Some(user_id.clone());
                for peer in registry.peers_mut() {
                    if peer.role().is_some() || peer.state() != NegotiationState::Idle {
                        continue;
                    }
                    if let Err(e) = engine.begin(&user_id, peer).await {
                        log::warn!("Could not start negotiating with {}: {e}", peer.id());
                    }
                }
                Ok(())
            }
            SignalingMessage::UserJoined { user_id } => {
                self.discover(&user_id, registry, engine, media).await
            }
            SignalingMessage::ExistingUsers { user_ids } => {
                log::info!("{} participants already present", user_ids.len());
                for id in user_ids {
                    if let Err(e) = self.discover(&id, registry, engine, media).await {
                        log::warn!("Could not set up peer {id}: {e}");
                    }
                }
                Ok(())
            }
            SignalingMessage::UserLeft { user_id } => {
                if !registry.remove(&user_id).await {
                    log::debug!("user-left for unknown peer {user_id}");
                }
                self.departed.insert(user_id);
                Ok(())
            }
            SignalingMessage::Offer { from_user_id, offer } => {
                let Some((peer, created)) = self.peer_for(&from_user_id, registry, media).await?
                else {
                    return Ok(());
                };
                let result = engine
                    .handle_offer(self.local_id.as_ref(), peer, offer)
                    .await;
                self.settle(&from_user_id, created, result, registry).await
            }
            SignalingMessage::Answer {
                from_user_id,
                answer,
            } => {
                let Some((peer, created)) = self.peer_for(&from_user_id, registry, media).await?
                else {
                    return Ok(());
                };
                let result = engine.handle_answer(peer, answer).await;
                self.settle(&from_user_id, created, result, registry).await
            }
            SignalingMessage::IceCandidate {
                from_user_id,
                candidate,
            } => {
                let Some((peer, created)) = self.peer_for(&from_user_id, registry, media).await?
                else {
                    return Ok(());
                };
                let result = engine.handle_remote_candidate(peer, candidate).await;
                self.settle(&from_user_id, created, result, registry).await
            }
        }
    }

    /// The peer a negotiation message is for, created on first contact, and
    /// whether it was created just now. `None` for ids that have departed.
    async fn peer_for<'r>(
        &self,
        id: &PeerId,
        registry: &'r mut PeerRegistry,
        media: &LocalMediaState,
    ) -> Result<Option<(&'r mut Peer, bool)>, NegotiationError> {
        if self.departed.contains(id) {
            log::debug!("Ignoring signaling from departed peer {id}");
            return Ok(None);
        }
        let created = !registry.contains(id);
        let peer = registry.ensure_peer(id, media).await?;
        Ok(Some((peer, created)))
    }

    /// Cleans up after a failed step: an abandoned negotiation is evicted and
    /// a peer created only for the rejected message is discarded.
    async fn settle(
        &mut self,
        id: &PeerId,
        created: bool,
        result: Result<(), NegotiationError>,
        registry: &mut PeerRegistry,
    ) -> Result<(), NegotiationError> {
        let Err(e) = result else {
            return Ok(());
        };
        if e.is_fatal() {
            self.evict(id, registry).await;
        } else if created {
            log::debug!("Discarding peer {id} created for a rejected message");
            registry.remove(id).await;
        }
        Err(e)
    }

    async fn evict(&mut self, id: &PeerId, registry: &mut PeerRegistry) {
        registry.remove(id).await;
        self.departed.insert(id.clone());
    }

    async fn discover(
        &mut self,
        id: &PeerId,
        registry: &mut PeerRegistry,
        engine: &NegotiationEngine,
        media: &LocalMediaState,
    ) -> Result<(), NegotiationError> {
        if self.local_id.as_ref() == Some(id) {
            log::debug!("Ignoring discovery of our own id");
            return Ok(());
        }
        self.departed.remove(id);
        let peer = registry.ensure_peer(id, media).await?;
        match &self.local_id {
            Some(local_id) => engine.begin(local_id, peer).await,
            None => {
                log::debug!("Discovered {id} before our id was assigned");
                Ok(())
            }
        }
    }

    /// Applies a callback from a peer's connection, unless that peer has been
    /// removed or recreated since the callback was issued.
    pub async fn connection_event(
        &mut self,
        id: PeerId,
        generation: u64,
        event: ConnectionEvent,
        registry: &mut PeerRegistry,
        engine: &NegotiationEngine,
    ) {
        let Some(peer) = registry.live_mut(&id, generation) else {
            log::debug!("Dropping stale connection event for {id} (generation {generation})");
            return;
        };

        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                if let Err(e) = engine.handle_local_candidate(self.local_id.as_ref(), peer, candidate)
                {
                    log::warn!("Could not send candidate to {id}: {e}");
                }
            }
            ConnectionEvent::StateChanged(state) => {
                if engine.handle_connection_state(peer, state) == Disposition::Evict {
                    self.evict(&id, registry).await;
                }
            }
            ConnectionEvent::RemoteTrack(track) => engine.handle_remote_track(peer, track),
        }
    }
}
