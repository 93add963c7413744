//! Runtime units: addressable nodes hosting one iteration at a time

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::mem;

use super::address::ComponentAddress;
use super::arena::UnitId;
use super::call::Call;
use super::descriptor::PortDirection;
use super::env::{Env, LogLevel};
use super::error::ContainerError;
use super::iteration::{Hook, Iteration};
use super::value::{PError, Value};

/// Role of a unit in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Leaf component
    Component,
    /// Component that can hold children
    Container,
    /// Top of the tree; also a container
    Root,
}

impl UnitKind {
    /// Whether children may be added
    pub fn is_container(self) -> bool {
        !matches!(self, UnitKind::Component)
    }
}

/// Port-to-port link between two children of a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Connection {
    /// Emitting child id
    pub source: String,
    /// Output port on the source
    pub source_port: String,
    /// Receiving child id
    pub target: String,
    /// Input port on the target
    pub target_port: String,
}

impl Connection {
    /// Link `source!source_port` to `target!target_port`
    pub fn new(source: &str, source_port: &str, target: &str, target_port: &str) -> Self {
        Self {
            source: source.to_string(),
            source_port: source_port.to_string(),
            target: target.to_string(),
            target_port: target_port.to_string(),
        }
    }

    /// Parse `[source source-port target target-port]`
    pub fn from_args(args: &[Value]) -> Result<Self, ContainerError> {
        let flat: Vec<Value> = match args {
            [Value::List(items)] => items.clone(),
            other => other.to_vec(),
        };
        let texts: Vec<String> = flat.iter().map(|value| value.to_string()).collect();
        match texts.as_slice() {
            [source, source_port, target, target_port] => {
                Ok(Self::new(source, source_port, target, target_port))
            }
            _ => Err(ContainerError::InvalidConnection(format!(
                "expected 4 arguments, got {}",
                texts.len()
            ))),
        }
    }

    /// Payload form
    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::text(self.source.clone()),
            Value::text(self.source_port.clone()),
            Value::text(self.target.clone()),
            Value::text(self.target_port.clone()),
        ])
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{} -> {}!{}",
            self.source, self.source_port, self.target, self.target_port
        )
    }
}

/// Addressable node of the runtime tree
pub struct Unit {
    address: ComponentAddress,
    parent: Option<UnitId>,
    kind: UnitKind,
    type_name: String,
    iteration: Iteration,
    started: bool,
    children: IndexMap<String, UnitId>,
    connections: BTreeSet<Connection>,
    meta: BTreeMap<String, Value>,
}

impl Unit {
    /// Unit with an empty iteration
    pub fn new(
        address: ComponentAddress,
        parent: Option<UnitId>,
        kind: UnitKind,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            address,
            parent,
            kind,
            type_name: type_name.into(),
            iteration: Iteration::empty(),
            started: false,
            children: IndexMap::new(),
            connections: BTreeSet::new(),
            meta: BTreeMap::new(),
        }
    }

    /// Unit address
    pub fn address(&self) -> &ComponentAddress {
        &self.address
    }

    /// Parent unit handle
    pub fn parent(&self) -> Option<UnitId> {
        self.parent
    }

    /// Unit role
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Component type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Installed iteration
    pub fn iteration(&self) -> &Iteration {
        &self.iteration
    }

    pub(crate) fn iteration_mut(&mut self) -> &mut Iteration {
        &mut self.iteration
    }

    /// Whether `on_start` ran for the installed iteration
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Children in insertion order
    pub fn children(&self) -> &IndexMap<String, UnitId> {
        &self.children
    }

    /// Child handle by id
    pub fn child(&self, id: &str) -> Option<UnitId> {
        self.children.get(id).copied()
    }

    /// Connections between children
    pub fn connections(&self) -> &BTreeSet<Connection> {
        &self.connections
    }

    /// Free-form metadata
    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    /// Mutable metadata
    pub fn meta_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.meta
    }

    pub(crate) fn insert_child(&mut self, id: &str, unit: UnitId) {
        self.children.insert(id.to_string(), unit);
    }

    pub(crate) fn remove_child_entry(&mut self, id: &str) -> Option<UnitId> {
        self.connections
            .retain(|connection| connection.source != id && connection.target != id);
        self.children.shift_remove(id)
    }

    pub(crate) fn add_connection(&mut self, connection: Connection) -> bool {
        self.connections.insert(connection)
    }

    pub(crate) fn remove_connection(&mut self, connection: &Connection) -> bool {
        self.connections.remove(connection)
    }

    /// Replace the iteration, carrying compatible descriptors over.
    ///
    /// The previous iteration is fully detached before the new one is
    /// activated; `on_start` runs again on the next activation.
    pub fn install(&mut self, next: Iteration, active: bool, env: &mut Env<'_>) {
        let previous = mem::replace(&mut self.iteration, next);
        self.iteration.attach_from(Some(previous), env);
        self.started = false;
        if active {
            self.activate(env);
        }
    }

    /// Move to `Active`: init, then start on the first activation
    pub fn activate(&mut self, env: &mut Env<'_>) {
        self.iteration.run_hooks(Hook::Init, env);
        if !self.started {
            self.iteration.run_hooks(Hook::Start, env);
            self.started = true;
        }
    }

    /// First half of deactivation
    pub fn stop(&mut self, env: &mut Env<'_>) {
        self.iteration.run_hooks(Hook::Stop, env);
    }

    /// Second half of deactivation
    pub fn reset(&mut self, env: &mut Env<'_>) {
        self.iteration.run_hooks(Hook::Reset, env);
    }

    /// Invoke a declared control
    pub fn invoke(&mut self, call: &Call, env: &mut Env<'_>) -> Result<(), PError> {
        let control = self.iteration.control_mut(call.to().id()).ok_or_else(|| {
            PError::routing(format!("unknown control '{}'", call.to()))
        })?;
        control.invoke(call, env)
    }

    /// Deliver values to an input port
    pub fn receive(&mut self, port: &str, values: &[Value], env: &mut Env<'_>) {
        let Some(descriptor) = self.iteration.port_mut(port) else {
            tracing::warn!(unit = %self.address, port, "values for unknown port dropped");
            return;
        };
        if descriptor.port_direction() != Some(PortDirection::Input) {
            tracing::warn!(unit = %self.address, port, "values for output port dropped");
            return;
        }
        if let Err(err) = descriptor.receive(values, env) {
            tracing::error!(unit = %self.address, port, error = %err, "port handler failed");
            env.log(
                LogLevel::Error,
                format!("port '{}' handler failed: {}", port, err),
            );
        }
    }

    /// Run the tick handler
    pub fn tick(&mut self, env: &mut Env<'_>) {
        self.iteration.tick(env);
    }

    /// Dispose every descriptor
    pub fn dispose(&mut self, env: &mut Env<'_>) {
        self.iteration.dispose_all(env);
    }

    /// Description returned by the `info` control
    pub fn info(&self) -> Value {
        let texts = |ids: Vec<&str>| Value::List(ids.into_iter().map(Value::from).collect());
        let mut map = BTreeMap::new();
        map.insert("address".to_string(), Value::from(self.address.clone()));
        map.insert("type".to_string(), Value::text(self.type_name.clone()));
        map.insert(
            "kind".to_string(),
            Value::text(match self.kind {
                UnitKind::Component => "component",
                UnitKind::Container => "container",
                UnitKind::Root => "root",
            }),
        );
        map.insert(
            "controls".to_string(),
            texts(self.iteration.control_ids().collect()),
        );
        map.insert("ports".to_string(), texts(self.iteration.port_ids().collect()));
        map.insert(
            "references".to_string(),
            texts(self.iteration.reference_ids().collect()),
        );
        if self.kind.is_container() {
            map.insert(
                "children".to_string(),
                texts(self.children.keys().map(String::as_str).collect()),
            );
        }
        Value::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::env::{Outbox, Services};
    use crate::runtime::iteration::IterationBuilder;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Events = Arc<Mutex<Vec<String>>>;

    fn recording(
        events: Events,
    ) -> impl Fn(&mut IterationBuilder) -> anyhow::Result<()> + Send + Sync {
        move |b: &mut IterationBuilder| -> anyhow::Result<()> {
            let log = |name: &'static str, events: &Events| {
                let events = events.clone();
                move |_: &mut u8, _: &mut Env<'_>| -> anyhow::Result<()> {
                    events.lock().push(name.to_string());
                    Ok(())
                }
            };
            b.add_reference(
                crate::runtime::descriptor::ReferenceSpec::new("state", |_env| Ok(0u8))
                    .on_start(log("start", &events))
                    .on_stop(log("stop", &events))
                    .on_reset(log("reset", &events)),
            )?;
            Ok(())
        }
    }

    fn with_env(f: impl FnOnce(&mut Env<'_>)) {
        let mut outbox = Outbox::default();
        let services = Services::new();
        let mut env = Env::new(
            Some(ComponentAddress::parse("/root/u").unwrap()),
            0,
            &mut outbox,
            &services,
            LogLevel::Debug,
        );
        f(&mut env);
    }

    #[test]
    fn test_start_runs_once_per_install() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let behavior = recording(events.clone());
        let mut unit = Unit::new(
            ComponentAddress::parse("/root/u").unwrap(),
            None,
            UnitKind::Component,
            "test",
        );
        with_env(|env| {
            unit.install(Iteration::build(&behavior).unwrap(), false, env);
            unit.activate(env);
            unit.stop(env);
            unit.reset(env);
            unit.activate(env);
            unit.stop(env);
            unit.reset(env);
        });
        assert_eq!(
            *events.lock(),
            vec!["start", "stop", "reset", "stop", "reset"]
        );
    }

    #[test]
    fn test_connection_from_args() {
        let args = vec![
            Value::text("a"),
            Value::text("out"),
            Value::text("b"),
            Value::text("in"),
        ];
        let connection = Connection::from_args(&args).unwrap();
        assert_eq!(connection.to_string(), "a!out -> b!in");
        assert_eq!(
            Connection::from_args(&[connection.to_value()]).unwrap(),
            connection
        );
        assert!(Connection::from_args(&args[..2]).is_err());
    }
}
