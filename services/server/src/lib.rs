pub mod auth;
pub mod calls;
pub mod config;
pub mod connection;
pub mod contacts;
pub mod crypto;
pub mod db;
pub mod dispatcher;
pub mod framing;
pub mod messaging;
pub mod state;
pub mod tcp;
pub mod ws;

pub use config::ServerConfig;
pub use state::AppState;

use crate::db::{Db, DbError};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound but not yet running server.  Binding is separate from running so
/// callers (and tests) can bind port 0 and read back the real addresses.
pub struct Server {
    pub tcp_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    state: Arc<AppState>,
    tcp_listener: TcpListener,
    ws_listener: TcpListener,
}

impl Server {
    /// Open the store, build the shared state and bind both listeners.
    /// The registries exist before the first accept.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let db = Db::open(&config.db_path)?;
        let state = AppState::new(db);

        let tcp_listener =
            TcpListener::bind((config.bind_addr.as_str(), config.tcp_port)).await?;
        let ws_listener = TcpListener::bind((config.bind_addr.as_str(), config.ws_port)).await?;
        let tcp_addr = tcp_listener.local_addr()?;
        let ws_addr = ws_listener.local_addr()?;
        info!(%tcp_addr, "stream transport listening");
        info!(%ws_addr, "message transport listening");

        Ok(Self {
            tcp_addr,
            ws_addr,
            state,
            tcp_listener,
            ws_listener,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve both transports forever.
    pub async fn run(self) {
        tokio::join!(
            tcp::run_tcp_listener(self.tcp_listener, Arc::clone(&self.state)),
            ws::run_ws_listener(self.ws_listener, self.state),
        );
    }
}
