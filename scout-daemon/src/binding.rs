//! One interface's UDP socket: opened with broadcast permission, a reader
//! task forwarding datagrams to the engine, closed exactly once on drop.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::ifaces::IfaceInfo;

/// Largest datagram the engine reads. A frame is at most 259 bytes; anything
/// longer is several frames or garbage, both handled by the reassembler.
pub const MAX_DATAGRAM: usize = 1024;

/// A datagram forwarded from a binding's reader task to the engine.
#[derive(Debug)]
pub struct Datagram {
    pub iface: String,
    pub from: SocketAddr,
    pub bytes: Vec<u8>,
}

/// A socket bound for one network interface.
pub struct Binding {
    pub name: String,
    pub local_ip: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub port: u16,
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
}

impl Binding {
    /// Open a UDP socket for `info` and start its reader task. Hosting mode
    /// binds the wildcard address on the discovery port so the responder
    /// receives from any interface; enumeration mode binds the interface
    /// address on an ephemeral port (send-capable, receives unicast replies).
    pub fn open(
        info: &IfaceInfo,
        port: u16,
        hosting: bool,
        tx: UnboundedSender<Datagram>,
    ) -> io::Result<Binding> {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_reuse_address(true)?;
        sock.set_broadcast(true)?;
        sock.set_nonblocking(true)?;
        let bind_addr = if hosting {
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)
        } else {
            SocketAddrV4::new(info.ip, 0)
        };
        sock.bind(&SocketAddr::from(bind_addr).into())?;
        let socket = Arc::new(UdpSocket::from_std(sock.into())?);

        let reader = tokio::spawn(reader_loop(info.name.clone(), socket.clone(), tx));
        Ok(Binding {
            name: info.name.clone(),
            local_ip: info.ip,
            broadcast: info.broadcast,
            port,
            socket,
            reader,
        })
    }

    /// Fire-and-forget UDP send; callers log failures and move on.
    pub fn send_to(&self, bytes: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.socket.try_send_to(bytes, to)
    }

    /// Destination for probes on this interface.
    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::from(SocketAddrV4::new(self.broadcast, self.port))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn reader_loop(name: String, socket: Arc<UdpSocket>, tx: UnboundedSender<Datagram>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                let dgram = Datagram {
                    iface: name.clone(),
                    from,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(dgram).is_err() {
                    // Engine is gone; nothing left to feed.
                    return;
                }
            }
            Err(e) => {
                // Receive failures are transient; the reader stays up.
                log::warn!("recv on {} failed: {}", name, e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
