use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;
use ts_rs::TS;

use crate::error::SignalingError;
use crate::peer::PeerId;
use crate::state::SessionHandle;
use crate::utils::to_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SdpType {
    Offer,
    Answer,
}

/// Browser-shaped session description: `{"type": "offer", "sdp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

/// Everything the relay can deliver to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export)]
pub enum SignalingMessage {
    AssignId {
        #[serde(rename = "userId")]
        user_id: PeerId,
    },
    UserJoined {
        #[serde(rename = "userId")]
        user_id: PeerId,
    },
    ExistingUsers {
        #[serde(rename = "userIds")]
        user_ids: Vec<PeerId>,
    },
    UserLeft {
        #[serde(rename = "userId")]
        user_id: PeerId,
    },
    Offer {
        #[serde(rename = "fromUserId")]
        from_user_id: PeerId,
        offer: SessionDescription,
    },
    Answer {
        #[serde(rename = "fromUserId")]
        from_user_id: PeerId,
        answer: SessionDescription,
    },
    IceCandidate {
        #[serde(rename = "fromUserId")]
        from_user_id: PeerId,
        candidate: IceCandidate,
    },
}

impl SignalingMessage {
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::AssignId { .. } => "assign-id",
            SignalingMessage::UserJoined { .. } => "user-joined",
            SignalingMessage::ExistingUsers { .. } => "existing-users",
            SignalingMessage::UserLeft { .. } => "user-left",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// What we send back through the relay, addressed by `toUserId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export)]
pub enum OutboundMessage {
    Offer {
        #[serde(rename = "toUserId")]
        to_user_id: PeerId,
        #[serde(rename = "fromUserId")]
        from_user_id: PeerId,
        offer: SessionDescription,
    },
    Answer {
        #[serde(rename = "toUserId")]
        to_user_id: PeerId,
        #[serde(rename = "fromUserId")]
        from_user_id: PeerId,
        answer: SessionDescription,
    },
    IceCandidate {
        #[serde(rename = "toUserId")]
        to_user_id: PeerId,
        #[serde(rename = "fromUserId")]
        from_user_id: PeerId,
        candidate: IceCandidate,
    },
}

impl OutboundMessage {
    pub fn to(&self) -> &PeerId {
        match self {
            OutboundMessage::Offer { to_user_id, .. }
            | OutboundMessage::Answer { to_user_id, .. }
            | OutboundMessage::IceCandidate { to_user_id, .. } => to_user_id,
        }
    }
}

/// Runs one relay connection: inbound frames become session events,
/// queued outbound messages become text frames. Returns when either side
/// closes; the caller decides whether to reconnect.
pub async fn connect(
    url: &str,
    handle: &SessionHandle,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();
    log::info!("Connected to signaling server {url}");

    // Anything still queued was addressed through the previous connection.
    let mut stale = 0usize;
    while outbound.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        log::debug!("Dropped {stale} stale outbound signaling messages");
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    log::trace!("<- {text}");
                    match SignalingMessage::parse(&text) {
                        Ok(message) => handle.signal(message)?,
                        Err(e) => log::warn!("Dropping signaling frame: {e}"),
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    log::info!("Signaling server closed the connection: {frame:?}");
                    break;
                }
                Some(Ok(_)) => {
                    log::debug!("Ignoring non-text websocket frame");
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            out = outbound.recv() => match out {
                Some(message) => {
                    let json = to_json(&message)?;
                    log::trace!("-> {json}");
                    write.send(tungstenite::Message::Text(json)).await?;
                }
                None => {
                    log::info!("Outbound signaling channel closed");
                    break;
                }
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_relay_messages() {
        let msg = SignalingMessage::parse(r#"{"type":"assign-id","userId":"u1"}"#).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::AssignId {
                user_id: "u1".into()
            }
        );

        let msg =
            SignalingMessage::parse(r#"{"type":"existing-users","userIds":["u2","u3"]}"#).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::ExistingUsers {
                user_ids: vec!["u2".into(), "u3".into()]
            }
        );
        assert_eq!(msg.kind(), "existing-users");
    }

    #[test]
    fn parses_browser_candidate_with_nulls() {
        let text = json!({
            "type": "ice-candidate",
            "fromUserId": "u2",
            "candidate": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": null
            }
        })
        .to_string();

        match SignalingMessage::parse(&text).unwrap() {
            SignalingMessage::IceCandidate {
                from_user_id,
                candidate,
            } => {
                assert_eq!(from_user_id.as_str(), "u2");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert!(candidate.username_fragment.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(matches!(
            SignalingMessage::parse(r#"{"type":"chat","text":"hi"}"#),
            Err(SignalingError::Malformed(_))
        ));
        assert!(SignalingMessage::parse(r#"{"type":"offer","fromUserId":"u2"}"#).is_err());
        assert!(SignalingMessage::parse("not json").is_err());
    }

    #[test]
    fn outbound_offer_wire_shape() {
        let msg = OutboundMessage::Offer {
            to_user_id: "u2".into(),
            from_user_id: "u1".into(),
            offer: SessionDescription::offer("v=0"),
        };
        let value: serde_json::Value = serde_json::from_str(&to_json(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "offer",
                "toUserId": "u2",
                "fromUserId": "u1",
                "offer": { "type": "offer", "sdp": "v=0" }
            })
        );
        assert_eq!(msg.to().as_str(), "u2");
    }
}
