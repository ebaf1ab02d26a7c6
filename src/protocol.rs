use serde::{Deserialize, Serialize};

/// Action dispatched for plain chat messages.
pub const ACTION_MESSAGE: &str = "message";
/// Action carrying an SDP offer towards the game backend.
pub const ACTION_WEBRTC: &str = "webrtc";
/// Action carrying the remote SDP answer.
pub const ACTION_ANSWER: &str = "answer";
/// Action carrying a remote ICE candidate.
pub const ACTION_CANDIDATE: &str = "candidate";

/// Message wrapper exchanged over the control channel.
///
/// `pid` is a locally incrementing sequence number rendered as a string; it is
/// unique per producer only, and nothing resequences on it. The envelope lives
/// for the duration of one socket connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub action: String,
    pub group: String,
    pub payload: String,
    pub pid: String,
    pub producer: String,
}

/// Outbound fields of an envelope; `pid` and `producer` are stamped on by the
/// control channel at send time.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub action: String,
    pub group: String,
    pub payload: String,
}

impl OutboundMessage {
    pub fn new(
        action: impl Into<String>,
        group: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            group: group.into(),
            payload: payload.into(),
        }
    }
}

/// Payload of the `webrtc` offer envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferSignal {
    pub payload: OfferBody,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferBody {
    pub sdp: String,
    pub player_id: String,
    pub game_id: String,
    pub session_id: String,
}

impl OfferSignal {
    pub fn offer(sdp: String, player_id: String, game_id: String, session_id: String) -> Self {
        Self {
            payload: OfferBody {
                sdp,
                player_id,
                game_id,
                session_id,
            },
            kind: "offer".to_string(),
        }
    }
}

/// Payload of an `answer` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSignal {
    pub sdp: String,
}

/// ICE candidate as carried in a `candidate` envelope payload. Wire names
/// follow the browser's `RTCIceCandidateInit` dictionary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateBlob {
    pub candidate: String,
    #[serde(default, rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}
