use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::connection::{ConnectionEvent, Connector, RemoteStream, RemoteTrack};
use crate::control::{ControlMsg, ControlOutcome};
use crate::dispatch::SignalingDispatcher;
use crate::error::{CaptureError, SessionError};
use crate::media::{CaptureDevices, LocalMediaState, MediaStream};
use crate::media_sync::MediaSyncBroadcaster;
use crate::negotiation::NegotiationEngine;
use crate::peer::{PeerId, PeerRegistry};
use crate::signal::{OutboundMessage, SignalingMessage};

pub type ScreenShareReply = oneshot::Sender<Result<Arc<MediaStream>, SessionError>>;

/// A local intent waiting for the session loop, with its reply slot.
#[derive(Debug)]
pub enum ControlRequest {
    ToggleAudio(oneshot::Sender<bool>),
    ToggleVideo(oneshot::Sender<bool>),
    StartScreenShare(ScreenShareReply),
    StopScreenShare(oneshot::Sender<()>),
}

/// Everything the session loop reacts to. Each event is handled to
/// completion before the next one is taken off the queue.
#[derive(Debug)]
pub enum SessionEvent {
    Signal(SignalingMessage),
    TransportLost,
    Connection {
        peer: PeerId,
        generation: u64,
        event: ConnectionEvent,
    },
    Control(ControlRequest),
    ScreenCaptured {
        ticket: u64,
        result: Result<Arc<MediaStream>, CaptureError>,
    },
    ScreenEnded {
        stream_id: String,
    },
    Shutdown,
}

/// Peer lifecycle, for whatever renders remote participants.
#[derive(Debug, Clone)]
pub enum PeerNotification {
    Connected { id: PeerId, stream: RemoteStream },
    TrackAdded { id: PeerId, track: RemoteTrack },
    Disconnected { id: PeerId },
}

/// Receiving ends a transport and a renderer attach to.
pub struct SessionChannels {
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub notifications: mpsc::UnboundedReceiver<PeerNotification>,
}

/// Cloneable entry point into a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    fn send(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.tx.send(event).map_err(|_| SessionError::Closed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlRequest,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionEvent::Control(build(tx)))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Returns true if the microphone is now muted.
    pub async fn toggle_audio(&self) -> Result<bool, SessionError> {
        self.request(ControlRequest::ToggleAudio).await
    }

    /// Returns true if the camera is now off.
    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        self.request(ControlRequest::ToggleVideo).await
    }

    pub async fn start_screen_share(&self) -> Result<Arc<MediaStream>, SessionError> {
        self.request(ControlRequest::StartScreenShare).await?
    }

    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        self.request(ControlRequest::StopScreenShare).await
    }

    pub async fn control(&self, msg: ControlMsg) -> Result<ControlOutcome, SessionError> {
        Ok(match msg {
            ControlMsg::ToggleAudio => ControlOutcome::Audio {
                muted: self.toggle_audio().await?,
            },
            ControlMsg::ToggleVideo => ControlOutcome::Video {
                off: self.toggle_video().await?,
            },
            ControlMsg::StartScreenShare => ControlOutcome::Sharing {
                stream_id: self.start_screen_share().await?.id().to_owned(),
            },
            ControlMsg::StopScreenShare => {
                self.stop_screen_share().await?;
                ControlOutcome::SharingStopped
            }
        })
    }

    pub fn signal(&self, message: SignalingMessage) -> Result<(), SessionError> {
        self.send(SessionEvent::Signal(message))
    }

    pub fn transport_lost(&self) -> Result<(), SessionError> {
        self.send(SessionEvent::TransportLost)
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionEvent::Shutdown)
    }
}

/// One participant's view of the mesh: local media plus a peer per remote.
pub struct Session {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    devices: Arc<dyn CaptureDevices>,
    media: LocalMediaState,
    registry: PeerRegistry,
    engine: NegotiationEngine,
    dispatcher: SignalingDispatcher,
    broadcaster: MediaSyncBroadcaster,
}

impl Session {
    pub fn new(
        connector: Arc<dyn Connector>,
        devices: Arc<dyn CaptureDevices>,
    ) -> (Self, SessionHandle, SessionChannels) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (notify_tx, notifications) = mpsc::unbounded_channel();

        let session = Self {
            events,
            devices,
            media: LocalMediaState::new(),
            registry: PeerRegistry::new(connector, events_tx.clone(), notify_tx.clone()),
            engine: NegotiationEngine::new(outbound_tx, notify_tx),
            dispatcher: SignalingDispatcher::new(),
            broadcaster: MediaSyncBroadcaster::new(events_tx.clone()),
            events_tx: events_tx.clone(),
        };
        let handle = SessionHandle { tx: events_tx };
        let channels = SessionChannels {
            outbound,
            notifications,
        };
        (session, handle, channels)
    }

    /// Opens camera and microphone. On failure the session still runs, just
    /// without local media.
    pub async fn acquire_camera(&mut self) -> Result<(), CaptureError> {
        let stream = self.devices.camera().await?;
        log::info!("Camera stream {} ready", stream.id());
        self.media.set_camera_stream(stream);
        Ok(())
    }

    pub fn media(&self) -> &LocalMediaState {
        &self.media
    }

    pub async fn run(mut self) {
        log::info!("Session started");
        while let Some(event) = self.events.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        self.registry.close_all().await;
        self.media.release();
        log::info!("Session ended");
    }

    async fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Signal(message) => {
                self.dispatcher
                    .dispatch(message, &mut self.registry, &self.engine, &self.media)
                    .await;
            }
            SessionEvent::Connection {
                peer,
                generation,
                event,
            } => {
                self.dispatcher
                    .connection_event(peer, generation, event, &mut self.registry, &self.engine)
                    .await;
            }
            SessionEvent::TransportLost => {
                log::warn!("Signaling transport lost, closing {} peers", self.registry.len());
                self.registry.close_all().await;
                self.dispatcher.reset();
            }
            SessionEvent::Control(request) => self.control(request).await,
            SessionEvent::ScreenCaptured { ticket, result } => {
                self.broadcaster
                    .complete_screen_share(
                        ticket,
                        result,
                        &mut self.media,
                        &mut self.registry,
                        &self.engine,
                    )
                    .await;
            }
            SessionEvent::ScreenEnded { stream_id } => {
                self.broadcaster
                    .screen_ended(&stream_id, &mut self.media, &mut self.registry, &self.engine)
                    .await;
            }
            SessionEvent::Shutdown => return false,
        }
        true
    }

    async fn control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::ToggleAudio(reply) => {
                let _ = reply.send(self.broadcaster.toggle_audio(&mut self.media));
            }
            ControlRequest::ToggleVideo(reply) => {
                let off = self
                    .broadcaster
                    .toggle_video(&mut self.media, &mut self.registry, &self.engine)
                    .await;
                let _ = reply.send(off);
            }
            ControlRequest::StartScreenShare(reply) => {
                let Some(ticket) = self.broadcaster.request_screen_share(&self.media, reply)
                else {
                    return;
                };
                let devices = self.devices.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let result = devices.display().await;
                    let _ = events.send(SessionEvent::ScreenCaptured { ticket, result });
                });
            }
            ControlRequest::StopScreenShare(reply) => {
                self.broadcaster
                    .stop_screen_share(&mut self.media, &mut self.registry, &self.engine)
                    .await;
                let _ = reply.send(());
            }
        }
    }
}
