use crate::sip::{parse::parse_message, SipMessage};
use crate::transport::{TransportEvent, TransportSender};
use crate::{Error, Result};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct UdpTransportInner {
    socket: UdpSocket,
    local: SocketAddr,
}

/// The gateway's single SIP socket. Any task may send through a clone;
/// ordering across tasks is the dialog layer's concern, not ours.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

impl UdpTransport {
    pub async fn bind(local: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| Error::Transport(format!("bind {}: {}", local, e)))?;
        let local = socket.local_addr()?;
        info!("SIP transport bound on {}", local);
        Ok(UdpTransport {
            inner: Arc::new(UdpTransportInner { socket, local }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local
    }

    /// Receive loop: parse each datagram and push it to the engine.
    /// Malformed datagrams are logged and dropped, never answered.
    pub async fn serve_loop(
        &self,
        sender: TransportSender,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; 65536];
        loop {
            let (len, addr) = tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("SIP transport loop cancelled");
                    return Ok(());
                }
                received = self.inner.socket.recv_from(&mut buf) => match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("error receiving datagram: {}", e);
                        continue;
                    }
                },
            };

            // bare CRLF (or CRLFCRLF) keepalives
            if buf[..len].iter().all(|b| *b == b'\r' || *b == b'\n') {
                continue;
            }

            let text = match std::str::from_utf8(&buf[..len]) {
                Ok(s) => s,
                Err(e) => {
                    debug!("dropping non-UTF8 datagram from {}: {}", addr, e);
                    continue;
                }
            };

            let msg = match parse_message(text) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("dropping unparseable datagram from {}: {}", addr, e);
                    continue;
                }
            };

            trace!("received {} bytes {} -> {}", len, addr, self.inner.local);
            sender.send(TransportEvent::Incoming(msg, addr))?;
        }
    }

    /// Best-effort send; retransmission is the transaction layer's job.
    pub async fn send(&self, msg: &SipMessage, target: SocketAddr) -> Result<()> {
        let buf = msg.to_string();
        trace!("sending {} bytes {} -> {}", buf.len(), self.inner.local, target);
        self.inner
            .socket
            .send_to(buf.as_bytes(), target)
            .await
            .map_err(|e| Error::Transport(format!("send to {}: {}", target, e)))
            .map(|_| ())
    }
}

impl std::fmt::Display for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.local)
    }
}
