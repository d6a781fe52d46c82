use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

use crate::config::SessionConfig;
use crate::connection::{Connection, ConnectionEvents, ConnectionState, Connector, RemoteTrack};
use crate::error::NegotiationError;
use crate::media::{MediaTrack, TrackKind};
use crate::peer::PeerId;
use crate::signal::{IceCandidate, SdpType, SessionDescription};

/// Builds webrtc-rs peer connections sharing one API instance.
pub struct RtcConnector {
    api: API,
    config: RTCConfiguration,
}

impl RtcConnector {
    pub fn new(config: &SessionConfig) -> anyhow::Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        // NACKs, RTCP reports and the rest of the default RTP pipeline.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        Ok(Self { api, config })
    }
}

#[async_trait]
impl Connector for RtcConnector {
    async fn connect(
        &self,
        peer: &PeerId,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn Connection>, NegotiationError> {
        let pc = Arc::new(self.api.new_peer_connection(self.config.clone()).await?);

        let ev = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ev = ev.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => ev.local_candidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => log::warn!("Could not serialize candidate for {}: {e}", ev.peer()),
                }
            })
        }));

        let ev = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            log::debug!("Peer connection to {} is {s}", ev.peer());
            let state = match s {
                RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                RTCPeerConnectionState::Connected => ConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => ConnectionState::Failed,
                RTCPeerConnectionState::Closed => ConnectionState::Closed,
                RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                    ConnectionState::New
                }
            };
            ev.state_changed(state);
            Box::pin(async {})
        }));

        let ev = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let ev = ev.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                ev.remote_track(RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                    rtp: Some(track),
                });
            })
        }));

        log::debug!("Created peer connection for {peer}");
        Ok(Arc::new(RtcConnection {
            peer: peer.clone(),
            pc,
            video_sender: Mutex::new(None),
        }))
    }
}

pub struct RtcConnection {
    peer: PeerId,
    pc: Arc<RTCPeerConnection>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

impl RtcConnection {
    async fn add_slot(
        &self,
        kind: RTPCodecType,
        track: Option<Arc<MediaTrack>>,
    ) -> Result<Arc<RTCRtpSender>, NegotiationError> {
        let sender = match track {
            Some(track) => {
                self.pc
                    .add_track(Arc::clone(track.sample_track()) as Arc<dyn TrackLocal + Send + Sync>)
                    .await?
            }
            // Keep the m-line so the slot can be filled later without renegotiating.
            None => {
                self.pc
                    .add_transceiver_from_kind(kind, None)
                    .await?
                    .sender()
                    .await
            }
        };

        // Interceptors only run while RTCP is being read.
        let rtcp = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtcp.read(&mut rtcp_buf).await {}
        });
        Ok(sender)
    }
}

#[async_trait]
impl Connection for RtcConnection {
    async fn attach_tracks(
        &self,
        audio: Option<Arc<MediaTrack>>,
        video: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        self.add_slot(RTPCodecType::Audio, audio).await?;
        let sender = self.add_slot(RTPCodecType::Video, video).await?;
        *self.video_sender.lock().await = Some(sender);
        Ok(())
    }

    async fn replace_video_track(
        &self,
        track: Option<Arc<MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        let sender = self.video_sender.lock().await.clone().ok_or_else(|| {
            NegotiationError::Connection(format!("no video sender for {}", self.peer))
        })?;
        let track =
            track.map(|t| Arc::clone(t.sample_track()) as Arc<dyn TrackLocal + Send + Sync>);
        sender.replace_track(track).await?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
            SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
        };
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await?;
        Ok(())
    }
}
