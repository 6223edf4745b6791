//! Role behaviors layered on the engine: the responder answers probes with
//! identity records, the requester broadcasts probes and reports peers.

use std::fmt;
use std::net::SocketAddr;

use log::{info, warn};
use scout_core::protocol::{kind_name, KIND_PROBE};
use scout_core::wire::encode_frame;
use scout_core::IdentityRecord;
use tokio::sync::mpsc::UnboundedSender;

use crate::binding::Binding;

/// Pluggable engine behavior. Hooks default to no-ops so a role implements
/// only what it cares about.
pub trait Role: Send {
    /// A discovery probe arrived from `from` on `binding`.
    fn on_probe(&mut self, _binding: &Binding, _from: SocketAddr, _payload: &[u8]) {}

    /// The reconciler just bound a new interface.
    fn on_interface_added(&mut self, _binding: &Binding) {}

    /// A non-reserved frame arrived from a peer.
    fn on_peer_discovered(&mut self, _from: SocketAddr, _kind: u8, _payload: &[u8]) {}
}

/// Answers discovery probes with the configured identity records, one frame
/// per record, in list order.
pub struct Responder {
    identities: Vec<IdentityRecord>,
}

impl Responder {
    pub fn new(identities: Vec<IdentityRecord>) -> Responder {
        Responder { identities }
    }
}

impl Role for Responder {
    fn on_probe(&mut self, binding: &Binding, from: SocketAddr, _payload: &[u8]) {
        info!("probe from {}", from);
        for record in &self.identities {
            let frame = match encode_frame(record.kind, &record.payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("identity record (kind {}) not encodable: {}", record.kind, e);
                    continue;
                }
            };
            if let Err(e) = binding.send_to(&frame, from) {
                warn!("reply to {} failed: {}", from, e);
            }
        }
    }
}

/// A peer reported by the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub addr: SocketAddr,
    pub kind: u8,
    pub payload: String,
}

impl fmt::Display for Discovered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match kind_name(self.kind) {
            Some(name) => write!(f, "found {} at {} [{:?}]", name, self.addr, self.payload),
            None => write!(
                f,
                "found device at {} [kind={}][{:?}]",
                self.addr, self.kind, self.payload
            ),
        }
    }
}

/// Broadcasts a probe on every newly bound interface and reports every
/// non-reserved frame received as a discovered peer.
pub struct Requester {
    report: Option<UnboundedSender<Discovered>>,
}

impl Requester {
    pub fn new(report: Option<UnboundedSender<Discovered>>) -> Requester {
        Requester { report }
    }
}

impl Role for Requester {
    fn on_interface_added(&mut self, binding: &Binding) {
        let dest = binding.broadcast_addr();
        info!("probing {} via {}", dest, binding.name);
        let frame = match encode_frame(KIND_PROBE, "") {
            Ok(frame) => frame,
            Err(_) => return, // empty payload always encodes
        };
        if let Err(e) = binding.send_to(&frame, dest) {
            warn!("probe on {} failed: {}", binding.name, e);
        }
    }

    fn on_peer_discovered(&mut self, from: SocketAddr, kind: u8, payload: &[u8]) {
        let peer = Discovered {
            addr: from,
            kind,
            payload: String::from_utf8_lossy(payload).into_owned(),
        };
        info!("{}", peer);
        if let Some(tx) = &self.report {
            let _ = tx.send(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Datagram;
    use crate::ifaces::IfaceInfo;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn loopback_iface() -> IfaceInfo {
        IfaceInfo {
            name: "lo-test".to_string(),
            ip: Ipv4Addr::LOCALHOST,
            broadcast: Ipv4Addr::LOCALHOST,
        }
    }

    #[tokio::test]
    async fn responder_replies_with_exactly_one_frame_per_identity() {
        let (tx, _rx) = mpsc::unbounded_channel::<Datagram>();
        let binding = Binding::open(&loopback_iface(), 0, false, tx).unwrap();

        let prober = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        prober
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let from = prober.local_addr().unwrap();

        let mut responder = Responder::new(vec![IdentityRecord {
            kind: 3,
            payload: "Living Room".to_string(),
        }]);
        responder.on_probe(&binding, from, b"");

        let mut buf = [0u8; 64];
        let (n, _) = prober.recv_from(&mut buf).unwrap();
        let mut expected = vec![0x29, 0xad, 0x03, 0x0b];
        expected.extend_from_slice(b"Living Room");
        assert_eq!(&buf[..n], expected.as_slice());

        // No second frame for a single identity record.
        assert!(prober.recv_from(&mut buf).is_err());
    }

    #[tokio::test]
    async fn responder_sends_records_in_order() {
        let (tx, _rx) = mpsc::unbounded_channel::<Datagram>();
        let binding = Binding::open(&loopback_iface(), 0, false, tx).unwrap();

        let prober = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        prober
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let from = prober.local_addr().unwrap();

        let mut responder = Responder::new(vec![
            IdentityRecord {
                kind: 3,
                payload: "Living Room".to_string(),
            },
            IdentityRecord {
                kind: 5,
                payload: "Door Camera".to_string(),
            },
        ]);
        responder.on_probe(&binding, from, b"");

        let mut buf = [0u8; 64];
        let (n, _) = prober.recv_from(&mut buf).unwrap();
        assert_eq!(buf[2], 3);
        assert_eq!(&buf[4..n], b"Living Room");
        let (n, _) = prober.recv_from(&mut buf).unwrap();
        assert_eq!(buf[2], 5);
        assert_eq!(&buf[4..n], b"Door Camera");
    }

    #[tokio::test]
    async fn requester_probes_new_interface() {
        // The listener stands in for the broadcast destination.
        let listener = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, _rx) = mpsc::unbounded_channel::<Datagram>();
        let binding = Binding::open(&loopback_iface(), port, false, tx).unwrap();

        let mut requester = Requester::new(None);
        requester.on_interface_added(&binding);

        let mut buf = [0u8; 16];
        let (n, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x29, 0xad, 0x00, 0x00]);

        // Exactly one probe per interface-added event.
        assert!(listener.recv_from(&mut buf).is_err());
    }

    #[tokio::test]
    async fn requester_reports_discovered_peers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut requester = Requester::new(Some(tx));
        let from: SocketAddr = "10.0.0.9:7991".parse().unwrap();
        requester.on_peer_discovered(from, 5, b"garden camera");
        let peer = rx.recv().await.unwrap();
        assert_eq!(peer.addr, from);
        assert_eq!(peer.kind, 5);
        assert_eq!(peer.payload, "garden camera");
    }
}
