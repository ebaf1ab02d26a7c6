pub mod auth;
pub mod chat;
pub mod config;
pub mod protocol;
pub mod telemetry;
pub mod transport;
