//! Call payload values and structured errors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::address::{Address, ComponentAddress, ControlAddress};
use super::error::{
    AddressError, CallError, ContainerError, HandOffError, InstallError, RuntimeError,
};

/// Error categories carried by [`PError`]
pub mod category {
    /// Unknown destination or control
    pub const ROUTING: &str = "routing";
    /// Pending request expired
    pub const TIMEOUT: &str = "timeout";
    /// Script evaluation failure
    pub const SCRIPT: &str = "script";
    /// Malformed call arguments
    pub const ARGUMENT: &str = "argument";
    /// Lifecycle hook failure
    pub const LIFECYCLE: &str = "lifecycle";
    /// Iteration install failure
    pub const INSTALL: &str = "install";
    /// Aborted by the caller
    pub const CANCELLED: &str = "cancelled";
    /// No further information
    pub const UNKNOWN: &str = "unknown";
}

/// Structured error value: category plus message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Error)]
#[error("{category}: {message}")]
pub struct PError {
    /// Error category (see [`category`])
    pub category: String,
    /// Human-readable message
    pub message: String,
}

impl PError {
    /// Create an error with an explicit category
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Unknown destination/control
    pub fn routing(message: impl Into<String>) -> Self {
        Self::new(category::ROUTING, message)
    }

    /// Request expired
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(category::TIMEOUT, message)
    }

    /// Script failure
    pub fn script(message: impl Into<String>) -> Self {
        Self::new(category::SCRIPT, message)
    }

    /// Malformed arguments
    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(category::ARGUMENT, message)
    }

    /// Aborted by the caller
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(category::CANCELLED, message)
    }

    /// Error with no further information
    pub fn unknown() -> Self {
        Self::new(category::UNKNOWN, "unknown error")
    }

    /// Build an error from an error call's payload.
    ///
    /// The first element is used when present: an error value is taken as is,
    /// anything else becomes the message of an `unknown` error.
    pub fn from_args(args: &[Value]) -> Self {
        match args.first() {
            Some(Value::Error(error)) => error.clone(),
            Some(other) => Self::new(category::UNKNOWN, other.to_string()),
            None => Self::unknown(),
        }
    }
}

impl From<AddressError> for PError {
    fn from(error: AddressError) -> Self {
        PError::argument(error.to_string())
    }
}

impl From<CallError> for PError {
    fn from(error: CallError) -> Self {
        PError::new(category::ROUTING, error.to_string())
    }
}

impl From<InstallError> for PError {
    fn from(error: InstallError) -> Self {
        PError::new(category::INSTALL, error.to_string())
    }
}

impl From<ContainerError> for PError {
    fn from(error: ContainerError) -> Self {
        match error {
            ContainerError::Install(install) => install.into(),
            other => PError::argument(other.to_string()),
        }
    }
}

impl From<RuntimeError> for PError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Address(error) => error.into(),
            RuntimeError::Call(error) => error.into(),
            RuntimeError::Install(error) => error.into(),
            RuntimeError::Container(error) => error.into(),
            RuntimeError::HandOff(HandOffError::Timeout(wait)) => {
                PError::timeout(format!("no answer within {:?}", wait))
            }
            other => PError::new(category::UNKNOWN, other.to_string()),
        }
    }
}

/// Shape of a value, used for property compatibility checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Accepts anything
    Any,
    /// Boolean
    Bool,
    /// Signed integer
    Int,
    /// Floating point
    Float,
    /// Text
    Text,
    /// List of values
    List,
    /// String-keyed map
    Map,
    /// Address
    Address,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::List => "list",
            ValueType::Map => "map",
            ValueType::Address => "address",
        };
        f.write_str(name)
    }
}

/// Payload value carried by calls, properties and script variables
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Ordered list
    List(Vec<Value>),
    /// Map with ordered string keys
    Map(BTreeMap<String, Value>),
    /// Address of a unit, control or port
    Address(Address),
    /// Structured error
    Error(PError),
}

impl Value {
    /// Text value helper
    pub fn text(text: impl Into<String>) -> Self {
        Value::Text(text.into())
    }

    /// Whether the value is [`Value::None`]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Borrow text content
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Integer view, parsing text when needed
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(num) => Some(*num),
            Value::Float(num) => whole_float(*num),
            Value::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float view, parsing text when needed
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(num) => Some(*num),
            Value::Int(num) => Some(*num as f64),
            Value::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view, parsing `true`/`false` text
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            Value::Text(text) => match text.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Map view
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// List view; text is split on whitespace, other scalars become one item
    pub fn to_list(&self) -> Vec<Value> {
        match self {
            Value::List(items) => items.clone(),
            Value::Text(text) => text
                .split_whitespace()
                .map(|item| Value::Text(item.to_string()))
                .collect(),
            Value::None => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Address view, parsing text when needed
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(address) => Some(address.clone()),
            Value::Text(text) => Address::parse(text).ok(),
            _ => None,
        }
    }

    /// Control address view
    pub fn as_control_address(&self) -> Option<ControlAddress> {
        match self.as_address()? {
            Address::Control(address) => Some(address),
            _ => None,
        }
    }

    /// Component address view
    pub fn as_component_address(&self) -> Option<ComponentAddress> {
        match self.as_address()? {
            Address::Component(address) => Some(address),
            _ => None,
        }
    }

    /// Shape of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::None | Value::Error(_) => ValueType::Any,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
            Value::Address(_) => ValueType::Address,
        }
    }

    /// Coerce into the given shape, `None` if not representable
    pub fn coerce(&self, value_type: ValueType) -> Option<Value> {
        match value_type {
            ValueType::Any => Some(self.clone()),
            ValueType::Bool => self.as_bool().map(Value::Bool),
            ValueType::Int => self.as_int().map(Value::Int),
            ValueType::Float => self.as_float().map(Value::Float),
            ValueType::Text => Some(Value::Text(self.to_string())),
            ValueType::List => Some(Value::List(self.to_list())),
            ValueType::Map => self.as_map().map(|map| Value::Map(map.clone())),
            ValueType::Address => self.as_address().map(Value::Address),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => Ok(()),
            Value::Bool(flag) => write!(f, "{}", flag),
            Value::Int(num) => write!(f, "{}", num),
            Value::Float(num) => write!(f, "{}", num),
            Value::Text(text) => f.write_str(text),
            Value::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" ")?;
                    }
                    write_list_item(f, item)?;
                }
                Ok(())
            }
            Value::Map(map) => {
                for (idx, (key, item)) in map.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{} ", key)?;
                    write_list_item(f, item)?;
                }
                Ok(())
            }
            Value::Address(address) => write!(f, "{}", address),
            Value::Error(error) => f.write_str(&error.message),
        }
    }
}

fn write_list_item(f: &mut fmt::Formatter<'_>, item: &Value) -> fmt::Result {
    let text = item.to_string();
    if text.is_empty() || text.contains(char::is_whitespace) {
        write!(f, "{{{}}}", text)
    } else {
        f.write_str(&text)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<ControlAddress> for Value {
    fn from(value: ControlAddress) -> Self {
        Value::Address(Address::Control(value))
    }
}

impl From<ComponentAddress> for Value {
    fn from(value: ComponentAddress) -> Self {
        Value::Address(Address::Component(value))
    }
}

impl From<PError> for Value {
    fn from(value: PError) -> Self {
        Value::Error(value)
    }
}

// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
fn whole_float(num: f64) -> Option<i64> {
    let in_range = num >= i64::MIN as f64 && num < i64::MAX as f64;
    (in_range && num.fract() == 0.0).then(|| num as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_args() {
        let error = PError::script("boom");
        assert_eq!(PError::from_args(&[Value::Error(error.clone())]), error);
        assert_eq!(
            PError::from_args(&[Value::text("plain")]),
            PError::new(category::UNKNOWN, "plain")
        );
        assert_eq!(PError::from_args(&[]).message, "unknown error");
    }

    #[test]
    fn test_list_display_braces_items_with_spaces() {
        let list = Value::List(vec![Value::text("a"), Value::text("b c"), Value::Int(3)]);
        assert_eq!(list.to_string(), "a {b c} 3");
    }

    #[test]
    fn test_coercion() {
        assert_eq!(Value::text("42").coerce(ValueType::Int), Some(Value::Int(42)));
        assert_eq!(Value::text("nope").coerce(ValueType::Int), None);
        assert_eq!(Value::Int(2).coerce(ValueType::Float), Some(Value::Float(2.0)));
        assert_eq!(
            Value::text("/root/a.b").coerce(ValueType::Address),
            Some(Value::Address(Address::parse("/root/a.b").unwrap()))
        );
    }

    #[test]
    fn test_float_to_int_stays_in_range() {
        assert_eq!(Value::Float(-3.0).as_int(), Some(-3));
        assert_eq!(Value::Float(2.5).as_int(), None);
        assert_eq!(Value::Float(i64::MIN as f64).as_int(), Some(i64::MIN));
        assert_eq!(Value::Float(9.3e18).as_int(), None);
        assert_eq!(Value::Float(-1e19).as_int(), None);
        assert_eq!(Value::Float(f64::INFINITY).as_int(), None);
        assert_eq!(Value::Float(f64::NAN).coerce(ValueType::Int), None);
    }
}
