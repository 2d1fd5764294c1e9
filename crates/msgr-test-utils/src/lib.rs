// msgr-test-utils: independent client implementations for integration tests.
//
// The TCP client speaks the full framed wire format (length-delimited blobs,
// X25519 handshake, XChaCha20-Poly1305 sealing) without sharing any code
// with the server, so the tests double as interop checks on the exact
// serialization.

pub mod tcp_client;
pub mod ws_client;

pub use tcp_client::TcpTestClient;
pub use ws_client::WsTestClient;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// How long a test waits for one server message before giving up.
pub(crate) const RECV_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
