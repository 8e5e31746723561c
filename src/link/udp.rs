//! Mesh transport over UDP
//!
//! Every datagram is `[6-byte source address][payload]`. A leaf knows the
//! root's socket address from its config; the root learns each child's socket
//! address from the frames the child sends (announcements arrive first, so a
//! child is routable before anyone can command it).

use super::{Destination, LinkError, MeshFrame, MeshTransport};
use crate::device::HardwareAddress;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const HEADER_LEN: usize = 6;
const MAX_DATAGRAM: usize = 1500;
const INBOUND_CAPACITY: usize = 32;

type Routes = Arc<Mutex<HashMap<HardwareAddress, SocketAddr>>>;

pub struct UdpMesh {
    local: HardwareAddress,
    socket: Arc<UdpSocket>,
    upstream: Option<SocketAddr>,
    routes: Routes,
}

impl UdpMesh {
    /// Binds the mesh socket and spawns the receive task.
    pub async fn bind(
        local: HardwareAddress,
        bind: &str,
        upstream: Option<&str>,
    ) -> Result<(Self, mpsc::Receiver<MeshFrame>, JoinHandle<()>), LinkError> {
        let upstream = match upstream {
            Some(host) => Some(resolve(host).await?),
            None => None,
        };
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        debug!("Mesh socket bound to {}", socket.local_addr()?);

        let routes = Routes::default();
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let task = tokio::spawn(receive_loop(socket.clone(), routes.clone(), tx));

        Ok((
            Self {
                local,
                socket,
                upstream,
                routes,
            },
            rx,
            task,
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.local_addr()?)
    }

    fn resolve_destination(&self, to: Destination) -> Result<SocketAddr, LinkError> {
        match to {
            Destination::Root => self.upstream.ok_or(LinkError::NoUpstream),
            Destination::Node(node) => self
                .routes
                .lock()
                .map_err(|_| LinkError::Send("route table lock poisoned".into()))?
                .get(&node)
                .copied()
                .ok_or(LinkError::NoRoute(node)),
        }
    }
}

async fn resolve(host: &str) -> Result<SocketAddr, LinkError> {
    lookup_host(host)
        .await?
        .next()
        .ok_or_else(|| LinkError::Address(host.to_string()))
}

async fn receive_loop(socket: Arc<UdpSocket>, routes: Routes, tx: mpsc::Sender<MeshFrame>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!("Mesh receive failed: {}", e);
                continue;
            }
        };
        if len < HEADER_LEN {
            warn!("Dropping {} byte datagram from {}", len, peer);
            continue;
        }

        let mut octets = [0u8; HEADER_LEN];
        octets.copy_from_slice(&buf[..HEADER_LEN]);
        let source = HardwareAddress::new(octets);
        if let Ok(mut routes) = routes.lock() {
            if routes.insert(source, peer) != Some(peer) {
                debug!("Route {} -> {}", source, peer);
            }
        }

        let frame = MeshFrame {
            source,
            payload: buf[HEADER_LEN..len].to_vec(),
        };
        if tx.send(frame).await.is_err() {
            debug!("Mesh consumer gone, stopping receiver");
            break;
        }
    }
}

impl MeshTransport for UdpMesh {
    fn send(&self, to: Destination, payload: &[u8]) -> Result<(), LinkError> {
        let addr = self.resolve_destination(to)?;
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&self.local.octets());
        frame.extend_from_slice(payload);

        self.socket
            .try_send_to(&frame, addr)
            .map_err(|e| LinkError::Send(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: HardwareAddress = HardwareAddress::new([0x24, 0x0A, 0xC4, 0, 0, 1]);
    const LEAF: HardwareAddress = HardwareAddress::new([0x24, 0x0A, 0xC4, 0, 0, 2]);

    #[tokio::test]
    async fn leaf_frames_teach_root_a_route() {
        let (root, mut root_rx, _root_task) = UdpMesh::bind(ROOT, "127.0.0.1:0", None).await.unwrap();
        let root_addr = root.local_addr().unwrap().to_string();
        let (leaf, mut leaf_rx, _leaf_task) =
            UdpMesh::bind(LEAF, "127.0.0.1:0", Some(root_addr.as_str())).await.unwrap();

        assert!(matches!(
            root.send(Destination::Node(LEAF), b"early"),
            Err(LinkError::NoRoute(_))
        ));

        leaf.send(Destination::Root, b"hello").unwrap();
        let frame = root_rx.recv().await.unwrap();
        assert_eq!(frame.source, LEAF);
        assert_eq!(frame.payload, b"hello");

        root.send(Destination::Node(LEAF), b"{\"relay_1\":true}").unwrap();
        let reply = leaf_rx.recv().await.unwrap();
        assert_eq!(reply.source, ROOT);
        assert_eq!(reply.payload, b"{\"relay_1\":true}");
    }

    #[tokio::test]
    async fn root_has_no_upstream() {
        let (root, _rx, _task) = UdpMesh::bind(ROOT, "127.0.0.1:0", None).await.unwrap();
        assert!(matches!(
            root.send(Destination::Root, b"x"),
            Err(LinkError::NoUpstream)
        ));
    }
}
