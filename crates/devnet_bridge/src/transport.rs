//! WebSocket transport: carries a [`Link`] between processes.
//!
//! Each connection becomes an ordinary [`Link`]: a writer task drains the
//! link's outbox into the socket and a reader task forwards parsed envelopes
//! into its inbox. Everything above this module is transport-agnostic.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async, connect_async};
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;
use crate::link::Link;
use crate::message::Envelope;

/// Connect to a signer host and return the page-side end of the link.
pub async fn connect(url: &str) -> Result<Link, BridgeError> {
    let (ws, _response) = connect_async(url)
        .await
        .map_err(|e| BridgeError::Transport(format!("Connect to {url} failed: {e}")))?;
    info!("Connected to signer at {url}");
    Ok(spawn_link(ws, url.to_string()))
}

/// Bind `addr` and accept connections in the background. Each accepted
/// connection is delivered as a [`Link`] on the returned channel. Returns the
/// bound address (useful with port 0).
pub async fn listen(addr: SocketAddr) -> Result<(SocketAddr, mpsc::Receiver<Link>), BridgeError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (link_tx, link_rx) = mpsc::channel(16);
    info!("Signer bridge listening on {local_addr}");

    tokio::spawn(async move {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed: {e}");
                    continue;
                }
            };
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake with {peer_addr} failed: {e}");
                    continue;
                }
            };
            debug!("Accepted bridge connection from {peer_addr}");
            if link_tx.send(spawn_link(ws, peer_addr.to_string())).await.is_err() {
                debug!("Link receiver dropped, stopping accept loop");
                break;
            }
        }
    });

    Ok((local_addr, link_rx))
}

/// Wire a WebSocket stream to a fresh [`Link`].
fn spawn_link<S>(ws: WebSocketStream<S>, peer: String) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Envelope>();

    let writer_peer = peer.clone();
    tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            let json = match envelope.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Serialize error for {}: {e}", envelope.kind);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json.into())).await {
                warn!("Send to {writer_peer} failed: {e}");
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        debug!("Writer for {writer_peer} finished");
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match Envelope::from_json(text.as_str()) {
                    Ok(envelope) => {
                        if in_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Malformed envelope from {peer}: {e}"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Receive from {peer} failed: {e}");
                    break;
                }
            }
        }
        debug!("Reader for {peer} finished");
    });

    Link::from_parts(out_tx, in_rx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_to_unbound_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&format!("ws://{addr}")).await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
    }

    #[tokio::test]
    async fn test_envelopes_cross_the_socket() {
        let (addr, mut links) = listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let mut page = connect(&format!("ws://{addr}")).await.unwrap();
        let mut signer = tokio::time::timeout(Duration::from_secs(2), links.recv())
            .await
            .unwrap()
            .unwrap();

        page.outbox.post(Envelope::new(
            MessageKind::RequestSign,
            serde_json::json!({"typedData": {"n": 1}}),
        ));
        let request = tokio::time::timeout(Duration::from_secs(2), signer.inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.kind, MessageKind::RequestSign);
        assert_eq!(request.payload["typedData"]["n"], 1);

        signer.outbox.post(Envelope::new(
            MessageKind::ReplySignOk,
            serde_json::json!({"signature": ["0x1", "0x2"]}),
        ));
        let reply = tokio::time::timeout(Duration::from_secs(2), page.inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, MessageKind::ReplySignOk);
    }
}
