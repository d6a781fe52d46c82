use std::sync::Arc;

use tokio::sync::mpsc;

use crate::connection::{ConnectionState, RemoteTrack};
use crate::error::{NegotiationError, SignalingError};
use crate::media::MediaTrack;
use crate::peer::{NegotiationState, Peer, PeerId, Role};
use crate::signal::{IceCandidate, OutboundMessage, SessionDescription};
use crate::state::PeerNotification;

/// What the caller should do with a peer after a connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Evict,
}

/// Drives one peer at a time through offer/answer/ICE.
///
/// A step that fails before the remote description is applied leaves the
/// peer exactly as it found it. Once the description is in, a failure closes
/// the peer and comes back as [`NegotiationError::Abandoned`] for the caller
/// to evict. No failure touches any other peer.
pub struct NegotiationEngine {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    notifications: mpsc::UnboundedSender<PeerNotification>,
}

impl NegotiationEngine {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        notifications: mpsc::UnboundedSender<PeerNotification>,
    ) -> Self {
        Self {
            outbound,
            notifications,
        }
    }

    fn send(&self, message: OutboundMessage) -> Result<(), NegotiationError> {
        log::debug!("Sending {:?} to {}", kind_of(&message), message.to());
        self.outbound
            .send(message)
            .map_err(|_| NegotiationError::OutboundClosed)
    }

    /// Called when a peer is discovered. Fixes the role by id comparison and,
    /// if we are the lower id, sends the one offer for this pair.
    pub async fn begin(&self, local_id: &PeerId, peer: &mut Peer) -> Result<(), NegotiationError> {
        if peer.state != NegotiationState::Idle {
            log::debug!("{} already negotiating ({:?})", peer.id(), peer.state);
            return Ok(());
        }
        if peer.role == Some(Role::Responder) {
            return Ok(());
        }

        let role = Role::between(local_id, peer.id());
        peer.role = Some(role);
        match role {
            Role::Responder => {
                log::info!("Waiting for offer from {}", peer.id());
                Ok(())
            }
            Role::Initiator => {
                let offer = peer.connection().create_offer().await?;
                self.send(OutboundMessage::Offer {
                    to_user_id: peer.id().clone(),
                    from_user_id: local_id.clone(),
                    offer,
                })?;
                peer.state = NegotiationState::OfferSent;
                log::info!("Sent offer to {}", peer.id());
                Ok(())
            }
        }
    }

    pub async fn handle_offer(
        &self,
        local_id: Option<&PeerId>,
        peer: &mut Peer,
        offer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if peer.state != NegotiationState::Idle {
            return Err(unexpected(peer, "offer").into());
        }
        let Some(local_id) = local_id else {
            return Err(SignalingError::NoLocalId(peer.id().clone()).into());
        };

        self.apply_remote_description(peer, offer).await?;
        peer.role = Some(Role::Responder);
        peer.state = NegotiationState::OfferReceived;

        if let Err(e) = self.answer(local_id, peer).await {
            peer.state = NegotiationState::Closed;
            return Err(NegotiationError::Abandoned {
                peer: peer.id().clone(),
                source: Box::new(e),
            });
        }
        peer.state = NegotiationState::AnswerSent;
        log::info!("Answered offer from {}", peer.id());
        Ok(())
    }

    async fn answer(&self, local_id: &PeerId, peer: &Peer) -> Result<(), NegotiationError> {
        let answer = peer.connection().create_answer().await?;
        self.send(OutboundMessage::Answer {
            to_user_id: peer.id().clone(),
            from_user_id: local_id.clone(),
            answer,
        })
    }

    pub async fn handle_answer(
        &self,
        peer: &mut Peer,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if peer.state != NegotiationState::OfferSent {
            return Err(unexpected(peer, "answer").into());
        }
        self.apply_remote_description(peer, answer).await?;
        peer.state = NegotiationState::Connected;
        log::info!("Negotiation with {} complete", peer.id());
        Ok(())
    }

    /// Buffers the candidate until a remote description exists, then applies.
    pub async fn handle_remote_candidate(
        &self,
        peer: &mut Peer,
        candidate: IceCandidate,
    ) -> Result<(), NegotiationError> {
        if !peer.has_remote_description {
            log::debug!(
                "Buffering candidate from {} ({} pending)",
                peer.id(),
                peer.pending_remote_candidates.len() + 1
            );
            peer.pending_remote_candidates.push(candidate);
            return Ok(());
        }
        peer.connection().add_ice_candidate(candidate).await
    }

    pub fn handle_local_candidate(
        &self,
        local_id: Option<&PeerId>,
        peer: &Peer,
        candidate: IceCandidate,
    ) -> Result<(), NegotiationError> {
        let Some(local_id) = local_id else {
            return Err(SignalingError::NoLocalId(peer.id().clone()).into());
        };
        self.send(OutboundMessage::IceCandidate {
            to_user_id: peer.id().clone(),
            from_user_id: local_id.clone(),
            candidate,
        })
    }

    pub fn handle_connection_state(&self, peer: &mut Peer, state: ConnectionState) -> Disposition {
        match state {
            ConnectionState::Connected => {
                if peer.state == NegotiationState::AnswerSent {
                    peer.state = NegotiationState::Connected;
                }
                if !peer.announced {
                    peer.announced = true;
                    log::info!("Peer {} connected", peer.id());
                    let _ = self.notifications.send(PeerNotification::Connected {
                        id: peer.id().clone(),
                        stream: peer.remote_stream.clone(),
                    });
                }
                Disposition::Keep
            }
            ConnectionState::Failed => {
                log::warn!("Connection to {} failed, closing it", peer.id());
                Disposition::Evict
            }
            ConnectionState::Closed => {
                log::info!("Connection to {} closed", peer.id());
                Disposition::Evict
            }
            ConnectionState::Disconnected => {
                log::warn!("Connection to {} interrupted", peer.id());
                Disposition::Keep
            }
            ConnectionState::New | ConnectionState::Connecting => {
                log::debug!("Connection to {} is {:?}", peer.id(), state);
                Disposition::Keep
            }
        }
    }

    pub fn handle_remote_track(&self, peer: &mut Peer, track: RemoteTrack) {
        log::info!("Received {} track {} from {}", track.kind, track.id, peer.id());
        peer.remote_stream.push(track.clone());
        let _ = self.notifications.send(PeerNotification::TrackAdded {
            id: peer.id().clone(),
            track,
        });
    }

    /// Substitutes the source of the peer's video slot. No renegotiation.
    pub async fn apply_video_track(
        &self,
        peer: &mut Peer,
        track: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        peer.connection().replace_video_track(track.clone()).await?;
        peer.video_track = track;
        Ok(())
    }

    async fn apply_remote_description(
        &self,
        peer: &mut Peer,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        peer.connection()
            .set_remote_description(description)
            .await?;
        let pending = std::mem::take(&mut peer.pending_remote_candidates);
        peer.has_remote_description = true;
        if !pending.is_empty() {
            log::debug!("Applying {} buffered candidates for {}", pending.len(), peer.id());
        }
        for candidate in pending {
            if let Err(e) = peer.connection().add_ice_candidate(candidate).await {
                log::warn!("Failed to apply buffered candidate for {}: {e}", peer.id());
            }
        }
        Ok(())
    }
}

fn unexpected(peer: &Peer, kind: &'static str) -> SignalingError {
    SignalingError::UnexpectedMessage {
        peer: peer.id().clone(),
        kind,
        state: peer.state,
    }
}

fn kind_of(message: &OutboundMessage) -> &'static str {
    match message {
        OutboundMessage::Offer { .. } => "offer",
        OutboundMessage::Answer { .. } => "answer",
        OutboundMessage::IceCandidate { .. } => "ice-candidate",
    }
}
