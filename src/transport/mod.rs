use thiserror::Error;

pub mod control;
pub mod webrtc;
pub mod webtransport;

/// Transport lifecycle, mirrored from the underlying transport's native state
/// machine into a last-value stream. Mutated only by transport callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("channel closed")]
    ChannelClosed,
    #[error("peer connection not initialized")]
    PeerNotInitialized,
    #[error(transparent)]
    Peer(#[from] ::webrtc::Error),
}
