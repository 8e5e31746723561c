//! Controller directives
//!
//! The broker sends JSON objects with an `action` of `command` or
//! `provision` and the target `deviceID`. The root forwards only the
//! `channels` object of a command to the addressed leaf, so a leaf sees either
//! that bare `{channel: value}` map or a full directive.

use serde_json::{json, Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing or non-string action")]
    MissingAction,

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Missing or non-string deviceID")]
    MissingDeviceId,

    #[error("Command without a channels object")]
    MissingChannels,
}

/// Directive as received by the root from the broker
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    Command {
        device_id: String,
        channels: Map<String, Value>,
    },
    Provision {
        device_id: Option<String>,
    },
}

impl Directive {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let doc: Value = serde_json::from_slice(bytes)?;
        let object = doc.as_object().ok_or(ProtocolError::NotAnObject)?;
        Self::from_object(object)
    }

    fn from_object(object: &Map<String, Value>) -> Result<Self, ProtocolError> {
        let action = object
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingAction)?;
        let device_id = match object.get("deviceID") {
            None => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(_) => return Err(ProtocolError::MissingDeviceId),
        };

        match action {
            "command" => Ok(Directive::Command {
                device_id: device_id.ok_or(ProtocolError::MissingDeviceId)?,
                channels: object
                    .get("channels")
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or(ProtocolError::MissingChannels)?,
            }),
            "provision" => Ok(Directive::Provision { device_id }),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// What a leaf makes of an inbound mesh payload
#[derive(Clone, Debug, PartialEq)]
pub enum LeafMessage {
    /// Channel map, either bare (`device_id` is `None`) or from a command
    Channels {
        device_id: Option<String>,
        channels: Map<String, Value>,
    },
    Provision {
        device_id: Option<String>,
    },
    /// A JSON object carrying nothing to act on
    Unhandled(String),
}

impl LeafMessage {
    /// Fails only for payloads that are not a JSON object
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let doc: Value = serde_json::from_slice(bytes)?;
        let object = doc.as_object().ok_or(ProtocolError::NotAnObject)?;
        if !object.contains_key("action") {
            return Ok(LeafMessage::Channels {
                device_id: None,
                channels: object.clone(),
            });
        }

        Ok(match Directive::from_object(object) {
            Ok(Directive::Command {
                device_id,
                channels,
            }) => LeafMessage::Channels {
                device_id: Some(device_id),
                channels,
            },
            Ok(Directive::Provision { device_id }) => LeafMessage::Provision { device_id },
            Err(e) => LeafMessage::Unhandled(e.to_string()),
        })
    }
}

/// Provision directive the root sends down to a child
pub fn provision_directive(device_id: &str) -> Value {
    json!({"action": "provision", "deviceID": device_id})
}
