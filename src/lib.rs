//! relaymesh: relay node firmware for a broker-bridged mesh
//!
//! Each node drives up to six relays with paired push buttons and describes
//! itself as a set of typed channels. The root node bridges an MQTT broker to
//! the mesh; leaves hang off the root.
//!
//! ```text
//!  Broker ◄──► Root ──► Leaf
//!               │  ◄──  │
//!            relays    relays
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod link;
pub mod node;
pub mod protocol;
pub mod provisioning;
pub mod relay;
pub mod storage;

pub use error::FatalError;
