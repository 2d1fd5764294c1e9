//! Injected runtime values: the two listener ports and the database path.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Stream (framed + sealed) transport port.
    pub tcp_port: u16,
    /// Message (WebSocket) transport port.
    pub ws_port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_owned(),
            tcp_port: 1234,
            ws_port: 8080,
            db_path: PathBuf::from("messenger.db"),
        }
    }
}
