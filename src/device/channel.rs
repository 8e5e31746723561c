//! Typed channels
//!
//! A channel is one named point on a device. Its kind and the kind-specific
//! metadata live together in [`ChannelSpec`], and its current value in
//! [`ChannelValue`], so a number channel can never hold a string and a choice
//! channel always carries its option list.

use serde_json::{json, Map, Value};
use std::fmt;

/// Wire kind of a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Boolean,
    Number,
    Choice,
    Text,
}

impl ChannelKind {
    /// `type` string used in the provisioning document.
    ///
    /// Choice channels are described by their `enum` list only.
    pub fn type_name(self) -> Option<&'static str> {
        match self {
            ChannelKind::Boolean => Some("boolean"),
            ChannelKind::Number => Some("number"),
            ChannelKind::Choice => None,
            ChannelKind::Text => Some("string"),
        }
    }
}

/// Kind plus the immutable metadata that goes with it
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelSpec {
    Boolean,
    Number { min: f64, max: f64, multiple_of: f64 },
    Choice { options: Vec<String> },
    Text,
}

impl ChannelSpec {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelSpec::Boolean => ChannelKind::Boolean,
            ChannelSpec::Number { .. } => ChannelKind::Number,
            ChannelSpec::Choice { .. } => ChannelKind::Choice,
            ChannelSpec::Text => ChannelKind::Text,
        }
    }

    pub fn zero_value(&self) -> ChannelValue {
        match self {
            ChannelSpec::Boolean => ChannelValue::Boolean(false),
            ChannelSpec::Number { .. } => ChannelValue::Number(0.0),
            ChannelSpec::Choice { .. } => ChannelValue::Choice(String::new()),
            ChannelSpec::Text => ChannelValue::Text(String::new()),
        }
    }

    /// Converts an incoming JSON value into this channel's value shape.
    ///
    /// Returns `None` when no sensible conversion exists. Choice values must be
    /// one of the declared options.
    pub fn coerce(&self, value: &Value) -> Option<ChannelValue> {
        match (self, value) {
            (ChannelSpec::Boolean, Value::Bool(b)) => Some(ChannelValue::Boolean(*b)),
            (ChannelSpec::Boolean, Value::Number(n)) => {
                n.as_f64().map(|n| ChannelValue::Boolean(n != 0.0))
            }
            (ChannelSpec::Number { .. }, Value::Number(n)) => n.as_f64().map(ChannelValue::Number),
            (ChannelSpec::Number { .. }, Value::Bool(b)) => {
                Some(ChannelValue::Number(if *b { 1.0 } else { 0.0 }))
            }
            (ChannelSpec::Choice { options }, Value::String(s)) => options
                .iter()
                .any(|o| o == s)
                .then(|| ChannelValue::Choice(s.clone())),
            (ChannelSpec::Text, Value::String(s)) => Some(ChannelValue::Text(s.clone())),
            _ => None,
        }
    }
}

/// Current value of a channel
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelValue {
    Boolean(bool),
    Number(f64),
    Choice(String),
    Text(String),
}

impl ChannelValue {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelValue::Boolean(_) => ChannelKind::Boolean,
            ChannelValue::Number(_) => ChannelKind::Number,
            ChannelValue::Choice(_) => ChannelKind::Choice,
            ChannelValue::Text(_) => ChannelKind::Text,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ChannelValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ChannelValue::Boolean(b) => Value::Bool(*b),
            ChannelValue::Number(n) => json!(n),
            ChannelValue::Choice(s) | ChannelValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Boolean(b) => write!(f, "{b}"),
            ChannelValue::Number(n) => write!(f, "{n:.2}"),
            ChannelValue::Choice(s) | ChannelValue::Text(s) if s.is_empty() => f.write_str("null"),
            ChannelValue::Choice(s) | ChannelValue::Text(s) => f.write_str(s),
        }
    }
}

/// One named, typed point on a device
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    name: String,
    commandable: bool,
    spec: ChannelSpec,
    value: ChannelValue,
}

impl Channel {
    pub(crate) fn new(name: &str, commandable: bool, spec: ChannelSpec) -> Self {
        let value = spec.zero_value();
        Self {
            name: name.to_string(),
            commandable,
            spec,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_commandable(&self) -> bool {
        self.commandable
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    pub fn kind(&self) -> ChannelKind {
        self.spec.kind()
    }

    pub fn value(&self) -> &ChannelValue {
        &self.value
    }

    /// Applies a coerced value; false if the value does not fit the kind
    pub(crate) fn set(&mut self, value: &Value) -> bool {
        match self.spec.coerce(value) {
            Some(v) => {
                self.value = v;
                true
            }
            None => false,
        }
    }

    /// Entry of the `channels` object in the provisioning document
    pub(crate) fn descriptor(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("command".into(), Value::Bool(self.commandable));
        if let Some(type_name) = self.kind().type_name() {
            entry.insert("type".into(), Value::String(type_name.into()));
        }

        match &self.spec {
            ChannelSpec::Number {
                min,
                max,
                multiple_of,
            } => {
                entry.insert("min".into(), json!(min));
                entry.insert("max".into(), json!(max));
                entry.insert("multipleof".into(), json!(multiple_of));
            }
            ChannelSpec::Choice { options } => {
                entry.insert("enum".into(), json!(options));
            }
            ChannelSpec::Boolean | ChannelSpec::Text => {}
        }

        Value::Object(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_match_kind() {
        for spec in [
            ChannelSpec::Boolean,
            ChannelSpec::Number {
                min: 0.0,
                max: 100.0,
                multiple_of: 1.0,
            },
            ChannelSpec::Choice {
                options: vec!["low".into()],
            },
            ChannelSpec::Text,
        ] {
            assert_eq!(spec.zero_value().kind(), spec.kind());
        }
    }

    #[test]
    fn coercion_follows_channel_kind() {
        assert_eq!(
            ChannelSpec::Boolean.coerce(&json!(1)),
            Some(ChannelValue::Boolean(true))
        );
        assert_eq!(ChannelSpec::Boolean.coerce(&json!("on")), None);

        let dimmer = ChannelSpec::Number {
            min: 0.0,
            max: 100.0,
            multiple_of: 5.0,
        };
        assert_eq!(dimmer.coerce(&json!(40)), Some(ChannelValue::Number(40.0)));
        assert_eq!(dimmer.coerce(&json!(true)), Some(ChannelValue::Number(1.0)));

        let mode = ChannelSpec::Choice {
            options: vec!["auto".into(), "manual".into()],
        };
        assert_eq!(
            mode.coerce(&json!("manual")),
            Some(ChannelValue::Choice("manual".into()))
        );
        assert_eq!(mode.coerce(&json!("turbo")), None);
        assert_eq!(ChannelSpec::Text.coerce(&json!(3)), None);
    }

    #[test]
    fn descriptor_carries_kind_metadata() {
        let dimmer = Channel::new(
            "level",
            true,
            ChannelSpec::Number {
                min: 0.0,
                max: 10.0,
                multiple_of: 0.5,
            },
        );
        assert_eq!(
            dimmer.descriptor(),
            json!({"command": true, "type": "number", "min": 0.0, "max": 10.0, "multipleof": 0.5})
        );

        let mode = Channel::new(
            "mode",
            false,
            ChannelSpec::Choice {
                options: vec!["a".into(), "b".into()],
            },
        );
        assert_eq!(mode.descriptor(), json!({"command": false, "enum": ["a", "b"]}));
    }
}
