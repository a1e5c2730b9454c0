use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcaster::Broadcaster;

/// WebSocket endpoint feeding a [`Broadcaster`]. Clients only connect and
/// disconnect; anything they send other than a close is ignored.
pub struct LiveServer {
    listener: TcpListener,
    broadcaster: Broadcaster,
}

impl LiveServer {
    pub async fn bind(addr: SocketAddr, broadcaster: Broadcaster) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            broadcaster,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "live updates listening");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted live connection");
                        tokio::spawn(serve_client(stream, peer, self.broadcaster.clone(), cancel.clone()));
                    }
                    Err(e) => warn!(error = %e, "failed to accept live connection"),
                },
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: Broadcaster,
    cancel: CancellationToken,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };

    let (client_id, mut updates) = broadcaster.connect();
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }

            update = updates.recv() => {
                let Some(text) = update else { break };
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    debug!(%peer, error = %e, "live client write failed");
                    break;
                }
            }

            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(%peer, error = %e, "live client read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    broadcaster.disconnect(client_id);
}
