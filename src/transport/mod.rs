pub mod udp;
pub use udp::UdpTransport;

use crate::sip::SipMessage;
use std::net::SocketAddr;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// What the UDP loop hands upward: one parsed message plus the datagram
/// source, which the engine needs for NAT fixups and hop-by-hop routing.
pub enum TransportEvent {
    Incoming(SipMessage, SocketAddr),
}

pub type TransportSender = UnboundedSender<TransportEvent>;
pub type TransportReceiver = UnboundedReceiver<TransportEvent>;
