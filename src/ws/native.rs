//! Native agent channel — `tokio-tungstenite`.
//!
//! One background pump task per socket:
//! - inbound text frames forwarded as [`ChannelEvent::Frame`]
//! - WS-level pings answered in place
//! - close / error / end-of-stream surfaced once, then the task exits
//! - dropping the outbound sender sends a normal close frame

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::WsError;
use crate::ws::{Channel, ChannelEvent, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens agent sockets with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct NativeConnector {
    handshake_timeout: Duration,
    buffer: usize,
}

impl NativeConnector {
    pub fn new() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            buffer: 64,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Capacity of each direction's queue.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

impl Default for NativeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for NativeConnector {
    async fn open(&self, endpoint: &str) -> Result<Channel, WsError> {
        let (ws_stream, _) = tokio::time::timeout(self.handshake_timeout, connect_async(endpoint))
            .await
            .map_err(|_| WsError::Timeout)??;

        let (sink, stream) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::channel(self.buffer);
        let (in_tx, in_rx) = mpsc::channel(self.buffer);

        tokio::spawn(run_socket(sink, stream, out_rx, in_tx));

        tracing::debug!(endpoint, "agent socket open");
        Ok(Channel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Pump one socket until either side goes away.
async fn run_socket(
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<ChannelEvent>,
) {
    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        if inbound.send(ChannelEvent::Frame(text_str.to_string())).await.is_err() {
                            // Receiver dropped; nobody cares about this socket anymore.
                            let _ = sink.close().await;
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        let _ = inbound.send(ChannelEvent::Closed { code: Some(code), reason }).await;
                        return;
                    }
                    Some(Ok(_)) => {} // binary and pong frames are ignored
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        tracing::warn!("agent socket error: {}", reason);
                        let _ = inbound.send(ChannelEvent::Error(reason)).await;
                        return;
                    }
                    None => {
                        let _ = inbound.send(ChannelEvent::Closed {
                            code: None,
                            reason: "Stream ended".into(),
                        }).await;
                        return;
                    }
                }
            }

            out = outbound.recv() => {
                match out {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let reason = e.to_string();
                            tracing::warn!("agent socket send failed: {}", reason);
                            let _ = inbound.send(ChannelEvent::Error(reason)).await;
                            return;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}
