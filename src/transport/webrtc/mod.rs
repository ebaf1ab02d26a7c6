use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock, mpsc, watch};

use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::protocol::CandidateBlob;
use crate::transport::{ConnectionState, TransportError};

pub mod config;

use config::PeerConfig;

/// Wrapper around one peer connection with a single ordered data channel.
///
/// `init_peer` replaces any previous connection wholesale; there is no
/// renegotiation or retry model. Connection and ICE-gathering state are
/// mirrored into independent last-value streams, and locally discovered
/// candidates are relayed outward through a take-once stream.
pub struct PeerLink {
    config: PeerConfig,
    peer: AsyncRwLock<Option<Arc<RTCPeerConnection>>>,
    data_channel: AsyncRwLock<Option<Arc<RTCDataChannel>>>,
    connection_state: Arc<watch::Sender<ConnectionState>>,
    gathering_state: Arc<watch::Sender<RTCIceGathererState>>,
    candidates_tx: mpsc::UnboundedSender<CandidateBlob>,
    candidates_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<CandidateBlob>>>,
}

impl PeerLink {
    pub fn new(config: PeerConfig) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (gathering_state, _) = watch::channel(RTCIceGathererState::New);
        let (candidates_tx, candidates_rx) = mpsc::unbounded_channel();
        Self {
            config,
            peer: AsyncRwLock::new(None),
            data_channel: AsyncRwLock::new(None),
            connection_state: Arc::new(connection_state),
            gathering_state: Arc::new(gathering_state),
            candidates_tx,
            candidates_rx: AsyncMutex::new(Some(candidates_rx)),
        }
    }

    /// Build the peer connection, open the data channel and return the local
    /// offer SDP. Any previous peer connection is replaced in place.
    pub async fn init_peer(&self) -> Result<String, TransportError> {
        let api = APIBuilder::new().build();
        let rtc_config = RTCConfiguration {
            ice_servers: self.config.ice_servers.clone(),
            ..Default::default()
        };
        let peer = Arc::new(api.new_peer_connection(rtc_config).await?);

        let connection_state = Arc::clone(&self.connection_state);
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let connection_state = Arc::clone(&connection_state);
            Box::pin(async move {
                tracing::debug!(target: "webrtc", state = ?state, "connection state changed");
                match state {
                    RTCPeerConnectionState::Connecting => {
                        connection_state.send_replace(ConnectionState::Connecting);
                    }
                    RTCPeerConnectionState::Connected => {
                        connection_state.send_replace(ConnectionState::Connected);
                    }
                    RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed => {
                        connection_state.send_replace(ConnectionState::Disconnected);
                    }
                    _ => {}
                }
            })
        }));

        let gathering_state = Arc::clone(&self.gathering_state);
        peer.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            let gathering_state = Arc::clone(&gathering_state);
            Box::pin(async move {
                tracing::debug!(target: "webrtc", state = ?state, "ice gathering state changed");
                gathering_state.send_replace(state);
            })
        }));

        let candidates_tx = self.candidates_tx.clone();
        peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidates_tx = candidates_tx.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(json) => {
                            tracing::debug!(
                                target: "webrtc",
                                candidate = %json.candidate,
                                "new local ice candidate"
                            );
                            let _ = candidates_tx.send(CandidateBlob {
                                candidate: json.candidate,
                                sdp_mid: json.sdp_mid,
                                sdp_mline_index: json.sdp_mline_index,
                            });
                        }
                        Err(err) => {
                            tracing::warn!(
                                target: "webrtc",
                                "ice candidate serialization failed: {err}"
                            );
                        }
                    },
                    None => tracing::debug!(target: "webrtc", "ice gathering complete"),
                }
            })
        }));

        let init = RTCDataChannelInit {
            ordered: Some(self.config.ordered),
            ..Default::default()
        };
        let data_channel = peer
            .create_data_channel(&self.config.data_channel_label, Some(init))
            .await?;

        let state_for_open = Arc::clone(&self.connection_state);
        data_channel.on_open(Box::new(move || {
            let connection_state = Arc::clone(&state_for_open);
            Box::pin(async move {
                tracing::debug!(target: "webrtc", "data channel opened");
                connection_state.send_replace(ConnectionState::Connected);
            })
        }));

        let state_for_close = Arc::clone(&self.connection_state);
        data_channel.on_close(Box::new(move || {
            let connection_state = Arc::clone(&state_for_close);
            Box::pin(async move {
                tracing::debug!(target: "webrtc", "data channel closed");
                connection_state.send_replace(ConnectionState::Disconnected);
            })
        }));

        data_channel.on_message(Box::new(move |message: DataChannelMessage| {
            Box::pin(async move {
                tracing::info!(
                    target: "webrtc",
                    len = message.data.len(),
                    "data channel message received"
                );
            })
        }));

        let offer = peer.create_offer(None).await?;
        let sdp = offer.sdp.clone();
        peer.set_local_description(offer).await?;

        *self.peer.write().await = Some(peer);
        *self.data_channel.write().await = Some(data_channel);
        Ok(sdp)
    }

    /// Apply the remote answer. Fails when `init_peer` has not run.
    pub async fn set_remote_description(&self, sdp: &str) -> Result<(), TransportError> {
        let peer = self
            .peer
            .read()
            .await
            .clone()
            .ok_or(TransportError::PeerNotInitialized)?;
        let answer = RTCSessionDescription::answer(sdp.to_string())?;
        peer.set_remote_description(answer).await?;
        tracing::debug!(
            target: "webrtc",
            state = ?peer.signaling_state(),
            "remote description applied"
        );
        Ok(())
    }

    /// Pass a remote candidate through to the peer connection.
    pub async fn add_ice_candidate(&self, blob: CandidateBlob) -> Result<(), TransportError> {
        let peer = self
            .peer
            .read()
            .await
            .clone()
            .ok_or(TransportError::PeerNotInitialized)?;
        peer.add_ice_candidate(RTCIceCandidateInit {
            candidate: blob.candidate,
            sdp_mid: blob.sdp_mid,
            sdp_mline_index: blob.sdp_mline_index,
            username_fragment: None,
        })
        .await?;
        Ok(())
    }

    /// Send a command over the data channel. Fails closed: returns false when
    /// the channel is absent or not open, or when the send itself fails.
    pub async fn send_command(&self, command: &Value) -> bool {
        let Some(data_channel) = self.data_channel.read().await.clone() else {
            tracing::warn!(target: "webrtc", "data channel not ready");
            return false;
        };
        if data_channel.ready_state() != RTCDataChannelState::Open {
            tracing::warn!(
                target: "webrtc",
                state = ?data_channel.ready_state(),
                "data channel not open"
            );
            return false;
        }
        let text = command.to_string();
        match data_channel.send(&Bytes::from(text.into_bytes())).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(target: "webrtc", "data channel send failed: {err}");
                false
            }
        }
    }

    /// Last-value stream fed by peer-connection state changes and data-channel
    /// open/close events.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    /// Last-value stream of the ICE gathering state.
    pub fn gathering_state(&self) -> watch::Receiver<RTCIceGathererState> {
        self.gathering_state.subscribe()
    }

    /// Stream of locally discovered candidates. Take-once.
    pub async fn candidates(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<CandidateBlob>, TransportError> {
        let mut guard = self.candidates_rx.lock().await;
        guard
            .take()
            .ok_or_else(|| TransportError::Setup("candidate stream already taken".into()))
    }

    /// Tear down the active peer connection, if any.
    pub async fn close(&self) {
        self.data_channel.write().await.take();
        if let Some(peer) = self.peer.write().await.take() {
            if let Err(err) = peer.close().await {
                tracing::debug!(target: "webrtc", "peer close failed: {err}");
            }
        }
        self.connection_state
            .send_replace(ConnectionState::Disconnected);
    }
}
