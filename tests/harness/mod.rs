//! Recording connector and scripted capture devices for driving a whole
//! session through its public handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meshrtc::connection::{Connection, ConnectionEvents, Connector};
use meshrtc::error::{CaptureError, NegotiationError};
use meshrtc::media::{CaptureDevices, MediaStream, MediaTrack, TrackKind};
use meshrtc::peer::PeerId;
use meshrtc::signal::{IceCandidate, OutboundMessage, SessionDescription};
use meshrtc::state::{PeerNotification, Session, SessionChannels, SessionHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct FakeConnection {
    video: Mutex<Option<Arc<MediaTrack>>>,
    candidates: Mutex<Vec<String>>,
    remote: AtomicBool,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn video(&self) -> Option<Arc<MediaTrack>> {
        self.video.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn attach_tracks(
        &self,
        _audio: Option<Arc<MediaTrack>>,
        video: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        *self.video.lock().unwrap() = video;
        Ok(())
    }

    async fn replace_video_track(
        &self,
        track: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        *self.video.lock().unwrap() = track;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer("v=0 fake"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::answer("v=0 fake"))
    }

    async fn set_remote_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.remote.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if !self.remote.load(Ordering::SeqCst) {
            return Err(NegotiationError::Connection("no remote description".into()));
        }
        self.candidates.lock().unwrap().push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    connections: Mutex<HashMap<PeerId, Vec<Arc<FakeConnection>>>>,
    events: Mutex<HashMap<PeerId, ConnectionEvents>>,
}

impl FakeConnector {
    pub fn count(&self, id: &str) -> usize {
        self.connections
            .lock()
            .unwrap()
            .get(&PeerId::from(id))
            .map_or(0, Vec::len)
    }

    pub fn last(&self, id: &str) -> Arc<FakeConnection> {
        self.connections.lock().unwrap()[&PeerId::from(id)]
            .last()
            .cloned()
            .unwrap()
    }

    pub fn events(&self, id: &str) -> ConnectionEvents {
        self.events.lock().unwrap()[&PeerId::from(id)].clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        peer: &PeerId,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn Connection>, NegotiationError> {
        let connection = Arc::new(FakeConnection::default());
        self.connections
            .lock()
            .unwrap()
            .entry(peer.clone())
            .or_default()
            .push(connection.clone());
        self.events.lock().unwrap().insert(peer.clone(), events);
        Ok(connection)
    }
}

pub struct FakeDevices {
    pub deny_display: bool,
}

#[async_trait]
impl CaptureDevices for FakeDevices {
    async fn camera(&self) -> Result<Arc<MediaStream>, CaptureError> {
        Ok(MediaStream::generate(
            "camera",
            &[TrackKind::Audio, TrackKind::Video],
        ))
    }

    async fn display(&self) -> Result<Arc<MediaStream>, CaptureError> {
        if self.deny_display {
            return Err(CaptureError::PermissionDenied("denied by user".into()));
        }
        Ok(MediaStream::generate("screen", &[TrackKind::Video]))
    }
}

pub struct Running {
    pub handle: SessionHandle,
    pub connector: Arc<FakeConnector>,
    pub camera_video: Arc<MediaTrack>,
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub notifications: mpsc::UnboundedReceiver<PeerNotification>,
    task: JoinHandle<()>,
}

impl Running {
    pub async fn start(deny_display: bool) -> Self {
        let connector = Arc::new(FakeConnector::default());
        let (mut session, handle, SessionChannels { outbound, notifications }) = Session::new(
            connector.clone(),
            Arc::new(FakeDevices { deny_display }),
        );
        session.acquire_camera().await.unwrap();
        let camera_video = session.media().camera_video().unwrap();
        let task = tokio::spawn(session.run());
        Self {
            handle,
            connector,
            camera_video,
            outbound,
            notifications,
            task,
        }
    }

    /// Round-trips two mute toggles so every event queued before them has
    /// been handled. Leaves the mute state as it was.
    pub async fn settle(&self) {
        self.handle.toggle_audio().await.unwrap();
        self.handle.toggle_audio().await.unwrap();
    }

    pub async fn next_outbound(&mut self) -> Option<OutboundMessage> {
        tokio::time::timeout(Duration::from_millis(200), self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn drain_outbound(&mut self) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn drain_notifications(&mut self) -> Vec<PeerNotification> {
        let mut out = Vec::new();
        while let Ok(msg) = self.notifications.try_recv() {
            out.push(msg);
        }
        out
    }

    pub async fn stop(self) {
        self.handle.shutdown().unwrap();
        self.task.await.unwrap();
    }
}
