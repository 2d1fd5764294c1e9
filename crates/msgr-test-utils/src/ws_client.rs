//! A test client for the WebSocket (message) transport: one JSON text per
//! message, no handshake, no sealing.

use crate::{TestResult, RECV_TIMEOUT};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsTestClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl WsTestClient {
    pub async fn connect(url: &str) -> TestResult<Self> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send(&mut self, value: &Value) -> TestResult<()> {
        let json = serde_json::to_string(value)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> TestResult<Value> {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.read.next())
                .await
                .map_err(|_| "timed out waiting for a server message")?;
            match msg {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    pub async fn recv_type(&mut self, wanted: &str) -> TestResult<Value> {
        loop {
            let msg = self.recv().await?;
            if msg["type"] == wanted {
                return Ok(msg);
            }
        }
    }

    pub async fn close(&mut self) -> TestResult<()> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
