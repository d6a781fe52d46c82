//! Recording doubles for the connection and capture seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::connection::{Connection, ConnectionEvents, Connector};
use crate::error::{CaptureError, NegotiationError};
use crate::media::{CaptureDevices, LocalMediaState, MediaStream, MediaTrack, TrackKind};
use crate::negotiation::NegotiationEngine;
use crate::peer::{PeerId, PeerRegistry};
use crate::signal::{IceCandidate, OutboundMessage, SessionDescription};
use crate::state::{PeerNotification, SessionEvent};

#[derive(Debug, Clone)]
pub enum Call {
    Attach {
        audio: Option<Arc<MediaTrack>>,
        video: Option<Arc<MediaTrack>>,
    },
    ReplaceVideo(Option<Arc<MediaTrack>>),
    CreateOffer,
    CreateAnswer,
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    Close,
}

#[derive(Default)]
pub struct MockConnection {
    calls: Mutex<Vec<Call>>,
    has_remote: AtomicBool,
    fail_remote: AtomicBool,
    fail_answer: AtomicBool,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_remote_descriptions(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub fn fail_answers(&self) {
        self.fail_answer.store(true, Ordering::SeqCst);
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AddCandidate(c) => Some(c.candidate),
                _ => None,
            })
            .collect()
    }

    pub fn video_replacements(&self) -> Vec<Option<Arc<MediaTrack>>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ReplaceVideo(track) => Some(track),
                _ => None,
            })
            .collect()
    }

    pub fn offers_created(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::CreateOffer))
            .count()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn attach_tracks(
        &self,
        audio: Option<Arc<MediaTrack>>,
        video: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        self.record(Call::Attach { audio, video });
        Ok(())
    }

    async fn replace_video_track(
        &self,
        track: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        self.record(Call::ReplaceVideo(track));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(Call::CreateOffer);
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(Call::CreateAnswer);
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(NegotiationError::Connection("answer rejected".into()));
        }
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(NegotiationError::Connection("bad sdp".into()));
        }
        self.record(Call::SetRemote(description));
        self.has_remote.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if !self.has_remote.load(Ordering::SeqCst) {
            return Err(NegotiationError::Connection(
                "candidate before remote description".into(),
            ));
        }
        self.record(Call::AddCandidate(candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.record(Call::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockConnector {
    connections: Mutex<HashMap<PeerId, Vec<Arc<MockConnection>>>>,
    events: Mutex<HashMap<PeerId, ConnectionEvents>>,
}

impl MockConnector {
    pub fn connections(&self, peer: &PeerId) -> Vec<Arc<MockConnection>> {
        self.connections
            .lock()
            .unwrap()
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }

    pub fn last(&self, peer: &PeerId) -> Option<Arc<MockConnection>> {
        self.connections(peer).pop()
    }

    pub fn events(&self, peer: &PeerId) -> Option<ConnectionEvents> {
        self.events.lock().unwrap().get(peer).cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        peer: &PeerId,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn Connection>, NegotiationError> {
        let connection = Arc::new(MockConnection::default());
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

/// Camera always succeeds; the display result is scripted per call and can
/// be held back behind a gate to model a pending permission prompt.
#[derive(Default)]
pub struct MockDevices {
    deny_display: AtomicBool,
    gate: Option<Arc<Notify>>,
}

impl MockDevices {
    pub fn denying() -> Self {
        Self {
            deny_display: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CaptureDevices for MockDevices {
    async fn camera(&self) -> Result<Arc<MediaStream>, CaptureError> {
        Ok(MediaStream::generate(
            "camera",
            &[TrackKind::Audio, TrackKind::Video],
        ))
    }

    async fn display(&self) -> Result<Arc<MediaStream>, CaptureError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.deny_display.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied("user dismissed the picker".into()));
        }
        Ok(MediaStream::generate("screen", &[TrackKind::Video]))
    }
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// Registry plus engine wired to inspectable channels.
pub struct Harness {
    pub connector: Arc<MockConnector>,
    pub registry: PeerRegistry,
    pub engine: NegotiationEngine,
    pub media: LocalMediaState,
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub notifications: mpsc::UnboundedReceiver<PeerNotification>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let connector = Arc::new(MockConnector::default());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        Self {
            registry: PeerRegistry::new(connector.clone(), events_tx, notify_tx.clone()),
            engine: NegotiationEngine::new(outbound_tx, notify_tx),
            connector,
            media: LocalMediaState::new(),
            outbound,
            notifications,
            events,
        }
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
}
