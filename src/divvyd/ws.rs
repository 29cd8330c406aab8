//! WebSocket transport for the divvyd connection.

use crate::divvyd::connection::NodeTransport;
use crate::divvyd::errors::{LedgerError, LedgerResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;

pub struct WsTransport {
    out_tx: mpsc::Sender<String>,
}

impl WsTransport {
    /// Connect to a divvyd WebSocket endpoint. Returns the transport and the
    /// inbound message stream to hand to the connection multiplexer.
    pub async fn connect(url: &str) -> LedgerResult<(Self, mpsc::Receiver<String>)> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| LedgerError::disconnected(format!("connect to {} failed: {}", url, e)))?;
        info!(url, "connected to divvyd");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(message)).await {
                    warn!(error = %e, "divvyd write failed, stopping writer");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
                    Ok(Message::Close(_)) => {
                        info!("divvyd closed the connection");
                        break;
                    }
                    Ok(Message::Frame(_)) => {}
                    Err(e) => {
                        warn!(error = %e, "divvyd read failed");
                        break;
                    }
                }
            }
            debug!("divvyd reader stopped");
        });

        Ok((Self { out_tx }, in_rx))
    }
}

#[async_trait]
impl NodeTransport for WsTransport {
    async fn send(&self, message: String) -> LedgerResult<()> {
        self.out_tx
            .send(message)
            .await
            .map_err(|_| LedgerError::disconnected("divvyd connection closed"))
    }
}
