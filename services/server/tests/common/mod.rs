//! Shared setup for the integration suites: an isolated server per test
//! (ephemeral ports, throwaway database) plus login helpers.

use msgr_test_utils::TcpTestClient;
use serde_json::json;
use server::{Server, ServerConfig};
use std::net::SocketAddr;
use tempfile::TempDir;

pub struct TestServer {
    pub tcp_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    /// Holds the database directory alive for the duration of the test.
    _dir: TempDir,
}

pub async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ServerConfig {
        bind_addr: "127.0.0.1".to_owned(),
        tcp_port: 0,
        ws_port: 0,
        db_path: dir.path().join("messenger.db"),
    };
    let server = Server::bind(&config).await.expect("bind server");
    let (tcp_addr, ws_addr) = (server.tcp_addr, server.ws_addr);
    tokio::spawn(server.run());
    TestServer {
        tcp_addr,
        ws_addr,
        _dir: dir,
    }
}

pub fn ws_url(server: &TestServer) -> String {
    format!("ws://{}", server.ws_addr)
}

/// Register an account over a throwaway connection.
pub async fn register(server: &TestServer, username: &str, password: &str) {
    let mut client = TcpTestClient::connect(server.tcp_addr).await.expect("connect");
    client.handshake().await.expect("handshake");
    client
        .send(&json!({"type": "register", "username": username, "password": password}))
        .await
        .expect("send register");
    client.recv_type("register_success").await.expect("register_success");
}

/// Connect, handshake and log in; the returned client has consumed its
/// `login_success` but not the post-login pushes.
pub async fn login(server: &TestServer, username: &str, password: &str) -> TcpTestClient {
    let mut client = TcpTestClient::connect(server.tcp_addr).await.expect("connect");
    client.handshake().await.expect("handshake");
    client
        .send(&json!({"type": "login", "username": username, "password": password}))
        .await
        .expect("send login");
    client.recv_type("login_success").await.expect("login_success");
    client
}

/// Register and log in as a fresh user.
pub async fn register_and_login(
    server: &TestServer,
    username: &str,
    password: &str,
) -> TcpTestClient {
    register(server, username, password).await;
    login(server, username, password).await
}
