use std::env;

use uuid::Uuid;

use crate::transport::webrtc::config::PeerConfig;

/// Client configuration, loaded from environment variables with the
/// prototype's hard-coded endpoints as defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the signaling WebSocket endpoint (no trailing path).
    pub ws_base: String,
    /// Base URL of the auth HTTP API.
    pub api_base: String,
    /// WebTransport endpoint for the alternate prototype.
    pub wt_url: String,
    /// Endpoint id announced to the signaling server (`producer` on envelopes).
    pub endpoint_id: String,
    /// Chat/room group id stamped on outbound envelopes.
    pub group_id: String,
    /// Game id carried in the offer payload.
    pub game_id: String,
    /// Session id carried in the offer payload.
    pub session_id: String,
    /// When set, drop the STUN/TURN list entirely (host candidates only).
    pub localhost_only: bool,
}

impl Config {
    /// Load configuration from the environment (reads a `.env` file when present).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            ws_base: env_or("GAMELINK_WS_URL", "ws://localhost:8089"),
            api_base: env_or("GAMELINK_API_URL", "http://localhost:8088"),
            wt_url: env_or("GAMELINK_WT_URL", "https://localhost:8087/webtransport"),
            endpoint_id: env::var("GAMELINK_ENDPOINT_ID")
                .unwrap_or_else(|_| Uuid::new_v4().to_string()),
            group_id: env_or("GAMELINK_GROUP_ID", "test-group"),
            game_id: env_or("GAMELINK_GAME_ID", "test-game123"),
            session_id: env_or("GAMELINK_SESSION_ID", "test-session456"),
            localhost_only: env_truthy("GAMELINK_LOCALHOST_ONLY"),
        }
    }

    /// Peer link configuration derived from this config.
    pub fn peer_config(&self) -> PeerConfig {
        if self.localhost_only {
            PeerConfig::localhost()
        } else {
            PeerConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_base: "ws://localhost:8089".to_string(),
            api_base: "http://localhost:8088".to_string(),
            wt_url: "https://localhost:8087/webtransport".to_string(),
            endpoint_id: Uuid::new_v4().to_string(),
            group_id: "test-group".to_string(),
            game_id: "test-game123".to_string(),
            session_id: "test-session456".to_string(),
            localhost_only: false,
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_truthy(var: &str) -> bool {
    env::var(var)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
