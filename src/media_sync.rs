use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{CaptureError, SessionError};
use crate::media::{LocalMediaState, MediaStream, MediaTrack};
use crate::negotiation::NegotiationEngine;
use crate::peer::PeerRegistry;
use crate::state::{ScreenShareReply, SessionEvent};

struct PendingShare {
    ticket: u64,
    reply: ScreenShareReply,
}

/// Applies local media changes to every live peer.
///
/// Screen acquisition happens outside the session loop. While it is in flight
/// the broadcaster holds a ticket for it; a completion carrying any other
/// ticket was cancelled and is released without touching local state.
pub struct MediaSyncBroadcaster {
    events: mpsc::UnboundedSender<SessionEvent>,
    pending: Option<PendingShare>,
    next_ticket: u64,
}

impl MediaSyncBroadcaster {
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            events,
            pending: None,
            next_ticket: 0,
        }
    }

    pub fn acquiring(&self) -> bool {
        self.pending.is_some()
    }

    /// Mute only disables the audio tracks; senders keep the same track.
    pub fn toggle_audio(&self, media: &mut LocalMediaState) -> bool {
        media.toggle_audio()
    }

    pub async fn toggle_video(
        &self,
        media: &mut LocalMediaState,
        registry: &mut PeerRegistry,
        engine: &NegotiationEngine,
    ) -> bool {
        let video_off = media.toggle_video();
        if video_off || media.screen_sharing() {
            return video_off;
        }

        // A peer whose slot was emptied by stopping a share while the camera
        // was off gets the camera back now.
        let Some(camera) = media.camera_video() else {
            return video_off;
        };
        for peer in registry.peers_mut() {
            if peer.video_track().is_some() {
                continue;
            }
            if let Err(e) = engine.apply_video_track(peer, Some(camera.clone())).await {
                log::warn!("Failed to restore camera for {}: {e}", peer.id());
            }
        }
        video_off
    }

    /// Registers a screen-share request. Returns the ticket the caller should
    /// run an acquisition for, or `None` if the request was answered already.
    pub fn request_screen_share(
        &mut self,
        media: &LocalMediaState,
        reply: ScreenShareReply,
    ) -> Option<u64> {
        if let Some(stream) = media.screen_stream() {
            log::debug!("Already sharing {}", stream.id());
            let _ = reply.send(Ok(stream.clone()));
            return None;
        }
        if self.pending.is_some() {
            let _ = reply.send(Err(SessionError::ScreenShareBusy));
            return None;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending = Some(PendingShare { ticket, reply });
        log::info!("Acquiring screen capture (ticket {ticket})");
        Some(ticket)
    }

    pub async fn complete_screen_share(
        &mut self,
        ticket: u64,
        result: Result<Arc<MediaStream>, CaptureError>,
        media: &mut LocalMediaState,
        registry: &mut PeerRegistry,
        engine: &NegotiationEngine,
    ) {
        let reply = match self.pending.take() {
            Some(pending) if pending.ticket == ticket => pending.reply,
            other => {
                self.pending = other;
                log::info!("Screen capture {ticket} finished after it was cancelled");
                if let Ok(stream) = result {
                    stream.stop();
                }
                return;
            }
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Screen share failed: {}", e.user_message());
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        let Some(track) = stream.first_video() else {
            stream.stop();
            let err = CaptureError::Unavailable("display capture has no video track".into());
            log::error!("Screen share failed: {}", err.user_message());
            let _ = reply.send(Err(err.into()));
            return;
        };

        media.begin_screen_share(stream.clone());
        broadcast_video(registry, engine, Some(track.clone())).await;
        self.watch_end(&stream, track);
        log::info!("Sharing screen {} with {} peers", stream.id(), registry.len());
        let _ = reply.send(Ok(stream));
    }

    /// Stops sharing, or cancels an acquisition that has not finished yet.
    pub async fn stop_screen_share(
        &mut self,
        media: &mut LocalMediaState,
        registry: &mut PeerRegistry,
        engine: &NegotiationEngine,
    ) {
        if let Some(pending) = self.pending.take() {
            log::info!("Cancelling screen capture {}", pending.ticket);
            let _ = pending
                .reply
                .send(Err(SessionError::Capture(CaptureError::Cancelled)));
        }

        let Some(stream) = media.end_screen_share() else {
            return;
        };
        let restored = media.restored_video();
        broadcast_video(registry, engine, restored).await;
        log::info!("Stopped sharing screen {}", stream.id());
    }

    /// The capture ended on its own. Only acts if `stream_id` is still the
    /// stream being shared.
    pub async fn screen_ended(
        &mut self,
        stream_id: &str,
        media: &mut LocalMediaState,
        registry: &mut PeerRegistry,
        engine: &NegotiationEngine,
    ) {
        if media.screen_stream().map(|s| s.id()) != Some(stream_id) {
            log::debug!("Ignoring end of stale screen stream {stream_id}");
            return;
        }
        log::info!("Screen capture {stream_id} ended");
        self.stop_screen_share(media, registry, engine).await;
    }

    fn watch_end(&self, stream: &Arc<MediaStream>, track: Arc<MediaTrack>) {
        let events = self.events.clone();
        let stream_id = stream.id().to_owned();
        tokio::spawn(async move {
            track.ended().await;
            let _ = events.send(SessionEvent::ScreenEnded { stream_id });
        });
    }
}

async fn broadcast_video(
    registry: &mut PeerRegistry,
    engine: &NegotiationEngine,
    track: Option<Arc<MediaTrack>>,
) {
    for peer in registry.peers_mut() {
        if let Err(e) = engine.apply_video_track(peer, track.clone()).await {
            log::warn!("Failed to replace video for {}: {e}", peer.id());
        }
    }
}
