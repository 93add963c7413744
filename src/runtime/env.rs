//! Environment handed to controls and lifecycle hooks
//!
//! An [`Env`] never dispatches anything itself. Calls, port emissions and log
//! lines accumulate in an [`Outbox`] that the root flushes once the current
//! operation on the unit has finished.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::address::{ComponentAddress, ControlAddress};
use super::call::Call;
use super::error::CallError;
use super::value::{PError, Value};

/// Registered services: name to component address
pub type Services = BTreeMap<String, ComponentAddress>;

/// Log severity, most severe first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Failures
    Error,
    /// Suspicious conditions
    Warning,
    /// Normal operation
    #[default]
    Info,
    /// Diagnostics
    Debug,
}

impl LogLevel {
    /// Parse `error`, `warning`, `info` or `debug`
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "error" => Some(LogLevel::Error),
            "warning" | "warn" => Some(LogLevel::Warning),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        })
    }
}

/// One buffered log line
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Logical time the line was produced
    pub time: i64,
    /// Message text
    pub message: String,
}

impl LogEntry {
    /// Payload form: `[level time message]`
    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::text(self.level.to_string()),
            Value::Int(self.time),
            Value::text(self.message.clone()),
        ])
    }
}

/// Side effects produced while a unit runs
#[derive(Debug, Default)]
pub struct Outbox {
    /// Calls to route
    pub calls: Vec<Call>,
    /// Port emissions: output port id and values
    pub emissions: Vec<(String, Vec<Value>)>,
    /// Buffered log lines
    pub log: Vec<LogEntry>,
}

impl Outbox {
    /// Whether nothing was produced
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.emissions.is_empty() && self.log.is_empty()
    }
}

/// Handle for further routing from inside a control or hook
pub struct Env<'a> {
    address: Option<ComponentAddress>,
    time: i64,
    outbox: &'a mut Outbox,
    services: &'a Services,
    log_level: LogLevel,
    attached: Vec<String>,
}

impl<'a> Env<'a> {
    /// Create an environment for the unit at `address`
    pub fn new(
        address: Option<ComponentAddress>,
        time: i64,
        outbox: &'a mut Outbox,
        services: &'a Services,
        log_level: LogLevel,
    ) -> Self {
        Self {
            address,
            time,
            outbox,
            services,
            log_level,
            attached: Vec::new(),
        }
    }

    /// Address of the unit, `None` once detached
    pub fn address(&self) -> Option<&ComponentAddress> {
        self.address.as_ref()
    }

    /// Control address on this unit
    pub fn control_address(&self, id: &str) -> Result<ControlAddress, PError> {
        let address = self
            .address
            .as_ref()
            .ok_or_else(|| PError::routing("unit is detached"))?;
        Ok(address.control(id)?)
    }

    /// Current logical time
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Queue an already built call
    pub fn send(&mut self, call: Call) {
        self.outbox.calls.push(call);
    }

    /// Send a request from one of this unit's controls, returning the call
    /// so the caller can correlate the answer
    pub fn request(
        &mut self,
        to: ControlAddress,
        from_control: &str,
        args: Vec<Value>,
    ) -> Result<Call, PError> {
        let from = self.control_address(from_control)?;
        let call = Call::request(to, from, self.time, args);
        self.outbox.calls.push(call.clone());
        Ok(call)
    }

    /// Send a quiet request
    pub fn quiet(&mut self, to: ControlAddress, args: Vec<Value>) {
        let from = self
            .address
            .as_ref()
            .and_then(|address| address.control("_host").ok());
        self.outbox
            .calls
            .push(Call::quiet(to, from, self.time, args));
    }

    /// Answer a request successfully
    pub fn reply(&mut self, call: &Call, args: Vec<Value>) -> Result<(), CallError> {
        let reply = call.reply(args)?;
        self.outbox.calls.push(reply);
        Ok(())
    }

    /// Answer a request with an error
    pub fn error(&mut self, call: &Call, error: PError) -> Result<(), CallError> {
        let reply = call.error(error)?;
        self.outbox.calls.push(reply);
        Ok(())
    }

    /// Emit values on an output port
    pub fn emit(&mut self, port: &str, values: Vec<Value>) {
        self.outbox.emissions.push((port.to_string(), values));
    }

    /// Buffer a log line if `level` passes the configured threshold
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if level <= self.log_level {
            self.log_at(level, message);
        }
    }

    /// Buffer a log line the caller has already filtered with its own threshold
    pub fn log_at(&mut self, level: LogLevel, message: impl Into<String>) {
        self.outbox.log.push(LogEntry {
            level,
            time: self.time,
            message: message.into(),
        });
    }

    /// Configured log threshold
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Address of a registered service
    pub fn service(&self, name: &str) -> Option<&ComponentAddress> {
        self.services.get(name)
    }

    /// Ids of the controls attached so far during an install
    pub fn attached_controls(&self) -> &[String] {
        &self.attached
    }

    pub(crate) fn mark_attached(&mut self, id: &str) {
        self.attached.push(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_threshold() {
        let mut outbox = Outbox::default();
        let services = Services::new();
        let mut env = Env::new(None, 3, &mut outbox, &services, LogLevel::Warning);
        env.log(LogLevel::Debug, "hidden");
        env.log(LogLevel::Error, "shown");
        env.log_at(LogLevel::Debug, "forced");
        assert_eq!(outbox.log.len(), 2);
        assert_eq!(outbox.log[0].message, "shown");
        assert_eq!(outbox.log[0].time, 3);
        assert_eq!(outbox.log[1].level, LogLevel::Debug);
    }

    #[test]
    fn test_detached_env_cannot_request() {
        let mut outbox = Outbox::default();
        let services = Services::new();
        let mut env = Env::new(None, 0, &mut outbox, &services, LogLevel::Info);
        let to = ControlAddress::parse("/root/a.b").unwrap();
        assert!(env.request(to, "out", Vec::new()).is_err());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error < LogLevel::Debug);
    }
}
