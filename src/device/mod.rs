//! Device data model
//!
//! - [`identity`] - hardware address and the `deviceID` derived from it
//! - [`channel`] - typed channels and their values
//! - [`registry`] - the ordered channel set plus document rendering

pub mod channel;
pub mod identity;
pub mod registry;

pub use channel::{Channel, ChannelKind, ChannelSpec, ChannelValue};
pub use identity::{DeviceId, HardwareAddress, IdentityError, IdentitySource, InterfaceIdentity};
pub use registry::{ChannelRegistry, RegistryError};

/// Fixed device label announced in the provisioning document
pub const DEVICE_NAME: &str = "relay";
