//! Channel registry of one device
//!
//! Holds the device identity and its ordered channel set, and renders the
//! provisioning and telemetry documents. Channels are kept newest-first: each
//! `add_channel` prepends, and both documents list channels in that order so the
//! output matches what deployed brokers already see.

use super::channel::{Channel, ChannelSpec, ChannelValue};
use super::identity::{DeviceId, IdentityError, IdentitySource};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::{debug, info};

/// Registry lookup and mutation errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Channel '{0}' already exists")]
    DuplicateChannel(String),

    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("Value {value} does not fit channel '{name}'")]
    KindMismatch { name: String, value: Value },
}

#[derive(Clone, Debug)]
pub struct ChannelRegistry {
    name: String,
    id: DeviceId,
    channels: Vec<Channel>,
}

impl ChannelRegistry {
    /// Creates an empty registry for the device, deriving its id from `identity`.
    ///
    /// # Errors
    ///
    /// Fails only if the hardware address cannot be obtained. Callers treat this
    /// as fatal: a node without a stable id cannot be addressed.
    pub fn create(device_name: &str, identity: &dyn IdentitySource) -> Result<Self, IdentityError> {
        let id = DeviceId::from(identity.hardware_address()?);
        info!("Device registry created: name={}, id={}", device_name, id);

        Ok(Self {
            name: device_name.to_string(),
            id,
            channels: Vec::new(),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.id
    }

    /// Prepends a new zero-valued channel. Names must be unique.
    pub fn add_channel(
        &mut self,
        name: &str,
        commandable: bool,
        spec: ChannelSpec,
    ) -> Result<(), RegistryError> {
        if self.get(name).is_some() {
            return Err(RegistryError::DuplicateChannel(name.to_string()));
        }

        debug!("Adding channel {} (command={}, {:?})", name, commandable, spec.kind());
        self.channels.insert(0, Channel::new(name, commandable, spec));
        Ok(())
    }

    /// Removes a channel by name; absent names are ignored
    pub fn remove_channel(&mut self, name: &str) {
        self.channels.retain(|c| c.name() != name);
    }

    /// Replaces the value of `name`, coercing it to the channel kind.
    ///
    /// Nothing changes on error; callers log and carry on.
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> Result<(), RegistryError> {
        let value = value.into();
        let channel = self
            .channels
            .iter_mut()
            .find(|c| c.name() == name)
            .ok_or_else(|| RegistryError::UnknownChannel(name.to_string()))?;

        if channel.set(&value) {
            Ok(())
        } else {
            Err(RegistryError::KindMismatch {
                name: name.to_string(),
                value,
            })
        }
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name() == name)
    }

    pub fn value(&self, name: &str) -> Option<&ChannelValue> {
        self.get(name).map(Channel::value)
    }

    /// Channels in document order (newest first)
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// `{action:"provision", deviceName, deviceID, channels:{name:{command, type, ...}}}`
    pub fn to_provisioning_document(&self) -> Value {
        let channels: Map<String, Value> = self
            .channels
            .iter()
            .map(|c| (c.name().to_string(), c.descriptor()))
            .collect();

        json!({
            "action": "provision",
            "deviceName": self.name,
            "deviceID": self.id.as_str(),
            "channels": channels,
        })
    }

    /// `{action:"telemetry", deviceID, channels:{name:value}}`, commandable channels only
    pub fn to_telemetry_document(&self) -> Value {
        let channels: Map<String, Value> = self
            .channels
            .iter()
            .filter(|c| c.is_commandable())
            .map(|c| (c.name().to_string(), c.value().to_json()))
            .collect();

        json!({
            "action": "telemetry",
            "deviceID": self.id.as_str(),
            "channels": channels,
        })
    }
}

impl fmt::Display for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device {} ({}) channels:", self.name, self.id)?;
        for channel in &self.channels {
            writeln!(
                f,
                "{:>10}: {:?} cmd={} value={}",
                channel.name(),
                channel.kind(),
                channel.is_commandable(),
                channel.value()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::identity::HardwareAddress;

    const ADDRESS: HardwareAddress = HardwareAddress::new([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01]);

    fn relay_registry(commandable: &[bool]) -> ChannelRegistry {
        let mut registry = ChannelRegistry::create("relay", &ADDRESS).unwrap();
        for (i, cmd) in commandable.iter().enumerate() {
            registry
                .add_channel(&format!("relay_{}", i + 1), *cmd, ChannelSpec::Boolean)
                .unwrap();
        }
        registry
    }

    struct NoAddress;

    impl IdentitySource for NoAddress {
        fn hardware_address(&self) -> Result<crate::device::identity::HardwareAddress, IdentityError> {
            Err(IdentityError::Unavailable("no interface".into()))
        }
    }

    #[test]
    fn create_fails_without_identity() {
        assert!(ChannelRegistry::create("relay", &NoAddress).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = relay_registry(&[true]);
        let err = registry
            .add_channel("relay_1", false, ChannelSpec::Text)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateChannel(_)));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("relay_1").unwrap().is_commandable());
    }

    #[test]
    fn channels_iterate_newest_first() {
        let registry = relay_registry(&[true, true, true]);
        let names: Vec<&str> = registry.iter().map(Channel::name).collect();
        assert_eq!(names, ["relay_3", "relay_2", "relay_1"]);

        let doc = registry.to_provisioning_document();
        let keys: Vec<&String> = doc["channels"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["relay_3", "relay_2", "relay_1"]);
    }

    #[test]
    fn set_value_ignores_unknown_and_mismatched() {
        let mut registry = relay_registry(&[true]);
        assert!(matches!(
            registry.set_value("relay_9", true),
            Err(RegistryError::UnknownChannel(_))
        ));
        assert!(matches!(
            registry.set_value("relay_1", "on"),
            Err(RegistryError::KindMismatch { .. })
        ));
        assert_eq!(registry.value("relay_1"), Some(&ChannelValue::Boolean(false)));

        registry.set_value("relay_1", true).unwrap();
        assert_eq!(registry.value("relay_1"), Some(&ChannelValue::Boolean(true)));
    }

    #[test]
    fn remove_channel_is_idempotent() {
        let mut registry = relay_registry(&[true, false]);
        registry.remove_channel("relay_1");
        registry.remove_channel("relay_1");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("relay_2").is_some());
    }

    #[test]
    fn provisioning_document_shape() {
        let mut registry = relay_registry(&[true, false]);
        registry
            .add_channel(
                "dimmer",
                true,
                ChannelSpec::Number {
                    min: 0.0,
                    max: 100.0,
                    multiple_of: 10.0,
                },
            )
            .unwrap();

        let doc = registry.to_provisioning_document();
        assert_eq!(doc["action"], "provision");
        assert_eq!(doc["deviceName"], "relay");
        assert_eq!(doc["deviceID"], "240AC4000001");
        assert_eq!(
            doc["channels"]["relay_1"],
            json!({"command": true, "type": "boolean"})
        );
        assert_eq!(
            doc["channels"]["relay_2"],
            json!({"command": false, "type": "boolean"})
        );
        assert_eq!(doc["channels"]["dimmer"]["multipleof"], 10.0);
    }

    #[test]
    fn telemetry_lists_commandable_channels_only() {
        let mut registry = relay_registry(&[true, false, true]);
        registry.set_value("relay_3", true).unwrap();

        let doc = registry.to_telemetry_document();
        assert_eq!(
            doc,
            json!({
                "action": "telemetry",
                "deviceID": "240AC4000001",
                "channels": {"relay_3": true, "relay_1": false}
            })
        );
    }

    #[test]
    fn telemetry_values_round_trip_through_set_value() {
        let build = || {
            let mut registry = relay_registry(&[true, true]);
            registry.add_channel("note", true, ChannelSpec::Text).unwrap();
            registry
                .add_channel(
                    "mode",
                    true,
                    ChannelSpec::Choice {
                        options: vec!["eco".into(), "boost".into()],
                    },
                )
                .unwrap();
            registry
        };

        let mut source = build();
        source.set_value("relay_2", true).unwrap();
        source.set_value("note", "hallway").unwrap();
        source.set_value("mode", "boost").unwrap();
        let telemetry = source.to_telemetry_document();

        let mut replica = build();
        for (name, value) in telemetry["channels"].as_object().unwrap() {
            replica.set_value(name, value.clone()).unwrap();
        }
        assert_eq!(replica.to_telemetry_document(), telemetry);
    }
}
