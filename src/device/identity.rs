//! Stable device identity
//!
//! Every node is addressed by the 12-hex-character form of its station hardware
//! address. The same six bytes double as the node's mesh address, so the root can
//! turn a `deviceID` from the broker straight into a mesh destination.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

const SYSFS_NET: &str = "/sys/class/net";

/// Errors raised while resolving or parsing a hardware address
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Hardware address unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid hardware address '{0}'")]
    Malformed(String),
}

/// Six-byte hardware (and mesh) address
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddress([u8; 6]);

impl HardwareAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Parses the compact 12-hex-digit form used as `deviceID` on the wire.
    ///
    /// Case-insensitive; separators are not accepted here.
    pub fn from_device_id(id: &str) -> Result<Self, IdentityError> {
        if id.len() != 12 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdentityError::Malformed(id.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&id[2 * i..2 * i + 2], 16)
                .map_err(|_| IdentityError::Malformed(id.to_string()))?;
        }
        Ok(Self(octets))
    }

    /// Reads the address of a network interface from sysfs
    pub fn from_interface(interface: &str) -> Result<Self, IdentityError> {
        Self::from_sysfs(Path::new(SYSFS_NET), interface)
    }

    fn from_sysfs(root: &Path, interface: &str) -> Result<Self, IdentityError> {
        let mut path = PathBuf::from(root);
        path.push(interface);
        path.push("address");

        debug!("Reading hardware address from {}", path.display());
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            IdentityError::Unavailable(format!("{}: {}", path.display(), e))
        })?;
        raw.trim().parse()
    }
}

impl FromStr for HardwareAddress {
    type Err = IdentityError;

    /// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` and `AABBCCDDEEFF`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if compact.len() != 12 || (compact.len() != s.len() && s.len() != 17) {
            return Err(IdentityError::Malformed(s.to_string()));
        }
        Self::from_device_id(&compact).map_err(|_| IdentityError::Malformed(s.to_string()))
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Anything that can hand out the node's hardware address at boot
pub trait IdentitySource {
    fn hardware_address(&self) -> Result<HardwareAddress, IdentityError>;
}

impl IdentitySource for HardwareAddress {
    fn hardware_address(&self) -> Result<HardwareAddress, IdentityError> {
        Ok(*self)
    }
}

/// Identity taken from a named network interface (e.g. `wlan0`)
#[derive(Clone, Debug)]
pub struct InterfaceIdentity {
    pub interface: String,
}

impl IdentitySource for InterfaceIdentity {
    fn hardware_address(&self) -> Result<HardwareAddress, IdentityError> {
        HardwareAddress::from_interface(&self.interface)
    }
}

/// 12 uppercase hex characters, e.g. `240AC4A1B2C3`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `other` names this device, ignoring hex case
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl From<HardwareAddress> for DeviceId {
    fn from(address: HardwareAddress) -> Self {
        let id = address
            .octets()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<String>();
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
