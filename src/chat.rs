use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio::sync::watch;

use crate::config::Config;
use crate::protocol::{
    ACTION_ANSWER, ACTION_CANDIDATE, ACTION_MESSAGE, ACTION_WEBRTC, AnswerSignal, CandidateBlob,
    Envelope, OfferSignal, OutboundMessage,
};
use crate::transport::TransportError;
use crate::transport::control::{ControlChannel, Handler};
use crate::transport::webrtc::PeerLink;

/// Identifiers stamped on outbound signaling traffic.
#[derive(Debug, Clone)]
struct SessionIds {
    endpoint_id: String,
    group_id: String,
    game_id: String,
    session_id: String,
}

/// Orchestrates the control channel and the peer link. Owns no protocol logic
/// of its own: inbound `answer` envelopes feed the remote SDP into the peer
/// link, inbound `candidate` envelopes feed ICE candidates, and everything
/// else is ignored.
pub struct ChatSession {
    control: Arc<ControlChannel>,
    peer: Arc<PeerLink>,
    ids: SessionIds,
    connected: Arc<watch::Sender<bool>>,
    messages: Mutex<Vec<String>>,
    answer_handler: Handler,
    candidate_handler: Handler,
}

impl ChatSession {
    pub fn new(config: &Config) -> Self {
        let control = Arc::new(ControlChannel::new(&config.ws_base));
        let peer = Arc::new(PeerLink::new(config.peer_config()));
        let (connected, _) = watch::channel(false);

        let peer_for_answer = Arc::clone(&peer);
        let answer_handler: Handler = Arc::new(move |envelope| {
            let Some(sdp) = answer_sdp(envelope) else {
                return;
            };
            let peer = Arc::clone(&peer_for_answer);
            tokio::spawn(async move {
                if let Err(err) = peer.set_remote_description(&sdp).await {
                    tracing::warn!(target: "chat", "applying remote answer failed: {err}");
                }
            });
        });

        let peer_for_candidate = Arc::clone(&peer);
        let candidate_handler: Handler = Arc::new(move |envelope| {
            let Some(blob) = candidate_blob(envelope) else {
                return;
            };
            let peer = Arc::clone(&peer_for_candidate);
            tokio::spawn(async move {
                if let Err(err) = peer.add_ice_candidate(blob).await {
                    tracing::warn!(target: "chat", "adding remote candidate failed: {err}");
                }
            });
        });

        Self {
            control,
            peer,
            ids: SessionIds {
                endpoint_id: config.endpoint_id.clone(),
                group_id: config.group_id.clone(),
                game_id: config.game_id.clone(),
                session_id: config.session_id.clone(),
            },
            connected: Arc::new(connected),
            messages: Mutex::new(Vec::new()),
            answer_handler,
            candidate_handler,
        }
    }

    /// Open the control channel and subscribe the answer/candidate handlers.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.control.connect(&self.ids.endpoint_id).await?;
        self.connected.send_replace(true);
        self.control.register_handler(&self.answer_handler);
        self.control.register_handler(&self.candidate_handler);
        Ok(())
    }

    /// Publish a chat message for the configured group.
    pub fn send_chat(&self, text: impl Into<String>) {
        self.control.send(OutboundMessage::new(
            ACTION_MESSAGE,
            self.ids.group_id.as_str(),
            text.into(),
        ));
    }

    /// Create the peer connection and publish its offer over the control
    /// channel. Locally discovered candidates are drained into the log.
    pub async fn start_peer(&self) -> Result<(), TransportError> {
        let sdp = self.peer.init_peer().await?;
        if let Ok(mut candidates) = self.peer.candidates().await {
            tokio::spawn(async move {
                while let Some(blob) = candidates.recv().await {
                    tracing::debug!(target: "chat", candidate = %blob.candidate, "local candidate");
                }
            });
        }
        let signal = OfferSignal::offer(
            sdp,
            self.ids.endpoint_id.clone(),
            self.ids.game_id.clone(),
            self.ids.session_id.clone(),
        );
        let payload = serde_json::to_string(&signal)
            .map_err(|err| TransportError::Setup(format!("offer serialization failed: {err}")))?;
        self.control.send(OutboundMessage::new(
            ACTION_WEBRTC,
            self.ids.group_id.as_str(),
            payload,
        ));
        Ok(())
    }

    /// Ping the remote end over the data channel; records a local message
    /// entry only when the send actually went out.
    pub async fn send_ping(&self) -> bool {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let sent = self
            .peer
            .send_command(&json!({ "type": "ping", "timestamp": timestamp }))
            .await;
        if sent {
            self.messages
                .lock()
                .unwrap()
                .push(format!("ping sent at {timestamp}"));
        }
        sent
    }

    /// Close the control channel and clear the connected flag.
    pub fn disconnect(&self) {
        self.control.disconnect();
        self.connected.send_replace(false);
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    pub fn peer(&self) -> &PeerLink {
        &self.peer
    }
}

/// Remote SDP of an `answer` envelope; `None` for any other action or an
/// unparsable payload.
fn answer_sdp(envelope: &Envelope) -> Option<String> {
    if envelope.action != ACTION_ANSWER {
        return None;
    }
    serde_json::from_str::<AnswerSignal>(&envelope.payload)
        .ok()
        .map(|signal| signal.sdp)
}

/// Candidate of a `candidate` envelope; `None` otherwise.
fn candidate_blob(envelope: &Envelope) -> Option<CandidateBlob> {
    if envelope.action != ACTION_CANDIDATE {
        return None;
    }
    serde_json::from_str(&envelope.payload).ok()
}
