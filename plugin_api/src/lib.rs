use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the stdio protocol spoken between the host and plugin processes.
pub const PROTOCOL_VERSION: &str = "1";

/// Method and topic names used on the wire.
pub mod methods {
    pub const HELLO: &str = "core.hello";
    pub const INIT: &str = "plugin.init";
    pub const STOP: &str = "plugin.stop";
    pub const RUN: &str = "command.run";
    pub const LOG: &str = "log.write";
}

/// Declared type of a flag.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    #[default]
    String,
    Number,
    Array,
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlagType::Boolean => "boolean",
            FlagType::String => "string",
            FlagType::Number => "number",
            FlagType::Array => "array",
        };
        f.write_str(s)
    }
}

/// A parsed flag value.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Number(f64),
    Array(Vec<String>),
    String(String),
}

impl FlagValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            FlagValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Bool(b) => write!(f, "{b}"),
            FlagValue::Number(n) => write!(f, "{n}"),
            FlagValue::Array(items) => f.write_str(&items.join(",")),
            FlagValue::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(v: bool) -> Self {
        FlagValue::Bool(v)
    }
}

impl From<f64> for FlagValue {
    fn from(v: f64) -> Self {
        FlagValue::Number(v)
    }
}

impl From<&str> for FlagValue {
    fn from(v: &str) -> Self {
        FlagValue::String(v.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(v: String) -> Self {
        FlagValue::String(v)
    }
}

impl From<Vec<String>> for FlagValue {
    fn from(v: Vec<String>) -> Self {
        FlagValue::Array(v)
    }
}

/// Schema of a single flag accepted by a command.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OptionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: FlagType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<FlagValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OptionSpec {
    pub fn new(name: impl Into<String>, kind: FlagType) -> Self {
        Self {
            name: name.into(),
            alias: None,
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FlagType::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FlagType::Boolean)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FlagType::Number)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, FlagType::Array)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<FlagValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// Serializable description of a command, used by out-of-process plugins to
/// declare what they provide.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
    #[serde(default)]
    pub subcommands: Vec<CommandSpec>,
}

/// Metadata every plugin carries.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Kind of envelope used in the JSON protocol.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Request,
    Response,
    #[default]
    Event,
}

/// Standard RPC style error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Error code for a method the receiver does not handle.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Error code for a request whose handler failed.
pub const HANDLER_FAILED: i32 = -32000;

/// Top level envelope exchanged between the host and plugins.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Envelope {
    pub id: Option<String>,
    pub kind: Kind,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
    pub topic: Option<String>,
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn request(id: impl Into<String>, method: &str, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind: Kind::Request,
            method: Some(method.to_string()),
            params: Some(params),
            ..Default::default()
        }
    }

    pub fn response(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            kind: Kind::Response,
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn error_response(id: Option<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            kind: Kind::Response,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    pub fn event(topic: &str, payload: Option<Value>) -> Self {
        Self {
            kind: Kind::Event,
            topic: Some(topic.to_string()),
            payload,
            ..Default::default()
        }
    }

    pub fn is_request(&self, method: &str) -> bool {
        self.kind == Kind::Request && self.method.as_deref() == Some(method)
    }

    /// Turn a response into its result, failing on an RPC error.
    pub fn into_result(self) -> anyhow::Result<Value> {
        if let Some(err) = self.error {
            anyhow::bail!(err.message);
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Payload of the `plugin.init` request sent by a plugin process.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InitParams {
    pub metadata: PluginMetadata,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

/// Payload of the `command.run` request sent by the host.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RunParams {
    pub command: Vec<String>,
    #[serde(default)]
    pub flags: BTreeMap<String, FlagValue>,
    #[serde(default)]
    pub positionals: Vec<String>,
}

/// Result of a `command.run` request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RunResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Payload of a `log.write` request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LogParams {
    pub level: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope::request("1", methods::RUN, json!({"command": ["hello"]}));
        let s = serde_json::to_string(&env).unwrap();
        let de: Envelope = serde_json::from_str(&s).unwrap();
        assert_eq!(env, de);
    }

    #[test]
    fn error_response_fails_into_result() {
        let env = Envelope::error_response(Some("7".into()), METHOD_NOT_FOUND, "nope");
        let err = env.into_result().unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn flag_values_deserialize_untagged() {
        let flags: BTreeMap<String, FlagValue> =
            serde_json::from_value(json!({"a": true, "b": 2.5, "c": ["x", "y"], "d": "z"}))
                .unwrap();
        assert_eq!(flags["a"], FlagValue::Bool(true));
        assert_eq!(flags["b"], FlagValue::Number(2.5));
        assert_eq!(flags["c"], FlagValue::Array(vec!["x".into(), "y".into()]));
        assert_eq!(flags["d"], FlagValue::String("z".into()));
    }

    #[test]
    fn option_spec_reads_type_field() {
        let opt: OptionSpec =
            serde_json::from_value(json!({"name": "count", "type": "number", "default": 3}))
                .unwrap();
        assert_eq!(opt.kind, FlagType::Number);
        assert!(!opt.required);
        assert_eq!(opt.default, Some(FlagValue::Number(3.0)));
    }

    #[test]
    fn array_value_displays_comma_joined() {
        let v = FlagValue::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(v.to_string(), "a,b");
    }
}
