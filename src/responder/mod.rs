//! Companion UDP echo responder.
//!
//! Stateless bounce-back loop: every datagram is sent back to its source
//! unmodified. The prober's wire payload is self-describing, so the
//! responder never inspects it.

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECV_BUF_LEN: usize = 64 * 1024;

/// Bind the responder socket. Split from [`run`] so callers can learn the
/// bound address before the loop starts.
pub async fn bind(addr: &str) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .with_context(|| format!("binding echo socket on {addr}"))
}

/// Echo datagrams on `socket` until the token is cancelled.
pub async fn run(socket: UdpSocket, cancel: CancellationToken) -> Result<()> {
    info!(addr = %socket.local_addr()?, "echo responder listening");

    let mut buf = vec![0u8; RECV_BUF_LEN];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("echo responder stopping");
                return Ok(());
            }
            res = socket.recv_from(&mut buf) => {
                match res {
                    Ok((n, peer)) => {
                        if let Err(e) = socket.send_to(&buf[..n], peer).await {
                            warn!(%peer, error = %e, "echo send failed");
                        } else {
                            debug!(%peer, len = n, "echoed datagram");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "echo recv failed");
                    }
                }
            }
        }
    }
}
