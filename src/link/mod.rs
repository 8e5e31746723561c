//! Message transports
//!
//! Two seams keep the node logic independent of the radio and the broker:
//!
//! - [`MeshTransport`]: addressed, fire-and-forget datagrams between nodes.
//!   Inbound frames arrive on an mpsc receiver handed out by the adapter.
//! - [`Uplink`]: where telemetry and announcements go. A leaf's uplink is the
//!   mesh path to the root ([`MeshUplink`]); the root's is the broker
//!   ([`broker::BrokerUplink`]).

pub mod broker;
#[cfg(test)]
pub mod memory;
pub mod udp;

pub use broker::{BrokerLink, BrokerUplink, Topics};
pub use udp::UdpMesh;

use crate::device::HardwareAddress;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mesh send failed: {0}")]
    Send(String),

    #[error("No route to {0}")]
    NoRoute(HardwareAddress),

    #[error("No upstream configured")]
    NoUpstream,

    #[error("Broker publish failed: {0}")]
    Publish(String),

    #[error("Invalid address '{0}'")]
    Address(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    /// The mesh root, whatever its address
    Root,
    Node(HardwareAddress),
}

/// Inbound mesh datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshFrame {
    pub source: HardwareAddress,
    pub payload: Vec<u8>,
}

pub trait MeshTransport: Send + Sync {
    /// Queues `payload` for `to`. Delivery is not confirmed.
    fn send(&self, to: Destination, payload: &[u8]) -> Result<(), LinkError>;
}

pub trait Uplink: Send + Sync {
    fn publish(&self, payload: &[u8]) -> Result<(), LinkError>;
}

/// A leaf's uplink: everything goes to the mesh root
pub struct MeshUplink {
    mesh: Arc<dyn MeshTransport>,
}

impl MeshUplink {
    pub fn new(mesh: Arc<dyn MeshTransport>) -> Self {
        Self { mesh }
    }
}

impl Uplink for MeshUplink {
    fn publish(&self, payload: &[u8]) -> Result<(), LinkError> {
        self.mesh.send(Destination::Root, payload)
    }
}
