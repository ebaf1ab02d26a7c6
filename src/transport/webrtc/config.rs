use webrtc::ice_transport::ice_server::RTCIceServer;

/// Configuration for the peer link.
#[derive(Clone)]
pub struct PeerConfig {
    /// ICE servers for connection establishment.
    pub ice_servers: Vec<RTCIceServer>,
    /// Data channel label.
    pub data_channel_label: String,
    /// Whether the data channel should be ordered.
    pub ordered: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            // Local coturn deployment used by the prototype.
            ice_servers: vec![
                RTCIceServer {
                    urls: vec!["stun:localhost:3478".to_string()],
                    username: "user".to_string(),
                    credential: "password".to_string(),
                    ..Default::default()
                },
                RTCIceServer {
                    urls: vec!["turn:localhost:3478?transport=udp".to_string()],
                    username: "user".to_string(),
                    credential: "password".to_string(),
                    ..Default::default()
                },
                RTCIceServer {
                    urls: vec!["turn:localhost:3478?transport=tcp".to_string()],
                    username: "user".to_string(),
                    credential: "password".to_string(),
                    ..Default::default()
                },
            ],
            data_channel_label: "gameData".to_string(),
            ordered: true,
        }
    }
}

impl PeerConfig {
    /// Host-candidates-only configuration (no STUN/TURN).
    pub fn localhost() -> Self {
        Self {
            ice_servers: vec![],
            ..Default::default()
        }
    }
}
