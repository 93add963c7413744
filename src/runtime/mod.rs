//! Runtime root and public API
//!
//! A [`Root`] owns a tree of units, the execution context shared by them and
//! the call queues. All processing happens on whichever thread holds the root;
//! [`handoff`] moves the root onto a driver thread for cross-thread use.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

pub mod address;
pub mod arena;
pub mod call;
pub mod config;
pub mod context;
pub mod correlation;
pub mod descriptor;
pub mod env;
pub mod error;
pub mod handoff;
pub mod iteration;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod serialize;
pub mod unit;
pub mod value;

use address::{ComponentAddress, ControlAddress, PortAddress};
use arena::{Arena, UnitId};
use call::Call;
use config::RuntimeConfig;
use context::{ExecState, ExecutionContext, is_after};
use correlation::{Async, CallTable, Retention};
use env::{Env, LogLevel, Outbox, Services};
use error::{ContainerError, InstallError, Result};
use iteration::{Behavior, Iteration};
use registry::{ComponentCatalog, Compiler, ROOT_TYPE};
use scheduler::CallScheduler;
use unit::{Connection, Unit, UnitKind};
use value::{PError, Value};

/// System control receiving answers to host requests
pub const HOST_CONTROL: &str = "_host";

/// System control receiving scheduled request timeouts
pub const TIMEOUT_CONTROL: &str = "_timeout";

/// Top of a unit tree plus its scheduling state
pub struct Root {
    id: Uuid,
    config: RuntimeConfig,
    address: ComponentAddress,
    host: ControlAddress,
    timeout: ControlAddress,
    units: Arena<Unit>,
    index: HashMap<ComponentAddress, UnitId>,
    root_unit: UnitId,
    context: ExecutionContext,
    queue: VecDeque<Call>,
    scheduler: CallScheduler,
    port_queue: VecDeque<(PortAddress, Vec<Value>)>,
    catalog: ComponentCatalog,
    compiler: Option<Arc<dyn Compiler>>,
    services: Services,
    requests: CallTable<Vec<Value>>,
    callbacks: CallTable<Vec<Value>>,
}

impl Root {
    /// Create a root in the `New` state
    pub fn new(config: RuntimeConfig, catalog: ComponentCatalog) -> Result<Self> {
        config.validate()?;
        let address = ComponentAddress::root(&config.root_id)?;
        let host = address.control(HOST_CONTROL)?;
        let timeout = address.control(TIMEOUT_CONTROL)?;

        let mut units = Arena::new();
        let root_unit = units.insert(Unit::new(address.clone(), None, UnitKind::Root, ROOT_TYPE));
        let mut index = HashMap::new();
        index.insert(address.clone(), root_unit);
        let mut context = ExecutionContext::new(0);
        context.attach(root_unit);

        let id = Uuid::new_v4();
        tracing::info!(root = %address, %id, "root created");

        Ok(Self {
            id,
            config,
            address,
            host,
            timeout,
            units,
            index,
            root_unit,
            context,
            queue: VecDeque::new(),
            scheduler: CallScheduler::new(),
            port_queue: VecDeque::new(),
            catalog,
            compiler: None,
            services: Services::new(),
            requests: CallTable::payload(Retention::Weak),
            callbacks: CallTable::payload(Retention::Strong),
        })
    }

    /// Instance id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Root unit address
    pub fn address(&self) -> &ComponentAddress {
        &self.address
    }

    /// Source address of host requests
    pub fn host_address(&self) -> &ControlAddress {
        &self.host
    }

    /// Active configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current logical time
    pub fn time(&self) -> i64 {
        self.context.time()
    }

    /// Current activity state
    pub fn state(&self) -> ExecState {
        self.context.state()
    }

    /// Whether the root is `Active`
    pub fn is_running(&self) -> bool {
        self.context.is_active()
    }

    /// Component catalog
    pub fn catalog(&self) -> &ComponentCatalog {
        &self.catalog
    }

    /// Mutable component catalog
    pub fn catalog_mut(&mut self) -> &mut ComponentCatalog {
        &mut self.catalog
    }

    /// Compiler used by the `code` control
    pub fn set_compiler(&mut self, compiler: Arc<dyn Compiler>) {
        self.compiler = Some(compiler);
    }

    /// Register a named service visible to every unit
    pub fn register_service(&mut self, name: &str, address: ComponentAddress) {
        self.services.insert(name.to_string(), address);
    }

    /// Registered services
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The root unit itself
    pub fn root_unit(&self) -> Option<&Unit> {
        self.units.get(self.root_unit)
    }

    /// Unit at `address`
    pub fn unit(&self, address: &ComponentAddress) -> Option<&Unit> {
        self.index
            .get(address)
            .and_then(|&unit_id| self.units.get(unit_id))
    }

    /// Whether a unit exists at `address`
    pub fn contains(&self, address: &ComponentAddress) -> bool {
        self.index.contains_key(address)
    }

    /// Number of live units, the root included
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Current value of a property control
    pub fn property(&self, control: &ControlAddress) -> Option<Value> {
        self.unit(control.component())?
            .iteration()
            .properties()
            .into_iter()
            .find_map(|(id, value)| (id == control.id()).then_some(value))
    }

    /// Whether nothing is queued for immediate processing
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.port_queue.is_empty()
    }

    /// Calls waiting for the clock
    pub fn scheduled_calls(&self) -> usize {
        self.scheduler.len()
    }

    pub(crate) fn lookup(&self, address: &ComponentAddress) -> Result<UnitId> {
        self.index
            .get(address)
            .copied()
            .ok_or_else(|| InstallError::UnitNotFound(address.to_string()).into())
    }

    // ---- lifecycle ----

    /// Move to `Active`, running init (and first start) hooks on every unit
    pub fn start(&mut self) -> bool {
        if self.context.set_state(ExecState::Active).is_none() {
            return false;
        }
        for unit_id in self.context.listeners().to_vec() {
            self.with_unit_env(unit_id, |unit, env| unit.activate(env));
        }
        true
    }

    /// Move to `Idle`: every unit's stop hooks, then every unit's reset hooks
    pub fn stop(&mut self) -> bool {
        if self.context.set_state(ExecState::Idle).is_none() {
            return false;
        }
        let listeners = self.context.listeners().to_vec();
        for &unit_id in &listeners {
            self.with_unit_env(unit_id, |unit, env| unit.stop(env));
        }
        for &unit_id in &listeners {
            self.with_unit_env(unit_id, |unit, env| unit.reset(env));
        }
        true
    }

    /// Advance the clock, release due calls, tick active units and process
    /// until idle. Non-advancing times are ignored.
    pub fn tick(&mut self, time: i64) -> bool {
        if !self.context.tick(time) {
            return false;
        }
        self.queue.extend(self.scheduler.release_due(time));
        if self.context.is_active() {
            for unit_id in self.context.listeners().to_vec() {
                self.with_unit_env(unit_id, |unit, env| unit.tick(env));
            }
        }
        self.run_until_idle();
        true
    }

    // ---- tree ----

    /// Add a child instantiated from the catalog
    pub fn add_child(
        &mut self,
        parent: &ComponentAddress,
        id: &str,
        type_name: &str,
    ) -> Result<ComponentAddress> {
        let (behavior, container) = self.catalog.create(type_name)?;
        let kind = if container {
            UnitKind::Container
        } else {
            UnitKind::Component
        };
        self.add_unit(parent, id, type_name, kind, behavior.as_ref())
    }

    /// Add a leaf child running an explicit behavior
    pub fn add_child_with(
        &mut self,
        parent: &ComponentAddress,
        id: &str,
        type_name: &str,
        behavior: &dyn Behavior,
    ) -> Result<ComponentAddress> {
        self.add_unit(parent, id, type_name, UnitKind::Component, behavior)
    }

    fn add_unit(
        &mut self,
        parent: &ComponentAddress,
        id: &str,
        type_name: &str,
        kind: UnitKind,
        behavior: &dyn Behavior,
    ) -> Result<ComponentAddress> {
        let parent_id = self.lookup(parent)?;
        let parent_unit = self
            .units
            .get(parent_id)
            .ok_or_else(|| InstallError::UnitNotFound(parent.to_string()))?;
        if !parent_unit.kind().is_container() {
            return Err(ContainerError::NotAContainer(parent.to_string()).into());
        }
        if parent_unit.child(id).is_some() {
            return Err(ContainerError::DuplicateChild(id.to_string()).into());
        }
        let address = parent.child(id)?;
        let iteration = Iteration::build(behavior)?;

        let unit_id = self
            .units
            .insert(Unit::new(address.clone(), Some(parent_id), kind, type_name));
        if let Some(parent_unit) = self.units.get_mut(parent_id) {
            parent_unit.insert_child(id, unit_id);
        }
        self.index.insert(address.clone(), unit_id);
        self.context.attach(unit_id);

        let active = self.context.is_active();
        self.with_unit_env(unit_id, |unit, env| unit.install(iteration, active, env));
        tracing::debug!(unit = %address, type_name, "unit added");
        Ok(address)
    }

    /// Remove a child and its whole subtree, disposing every descriptor
    pub fn remove_child(&mut self, parent: &ComponentAddress, id: &str) -> Result<()> {
        let parent_id = self.lookup(parent)?;
        let child_id = self
            .units
            .get_mut(parent_id)
            .and_then(|unit| unit.remove_child_entry(id))
            .ok_or_else(|| ContainerError::UnknownChild(id.to_string()))?;
        self.remove_subtree(child_id);
        Ok(())
    }

    fn remove_subtree(&mut self, unit_id: UnitId) {
        let children: Vec<UnitId> = match self.units.get(unit_id) {
            Some(unit) => unit.children().values().copied().collect(),
            None => return,
        };
        for child in children {
            self.remove_subtree(child);
        }
        self.with_unit_env(unit_id, |unit, env| unit.dispose(env));
        self.context.detach(unit_id);
        if let Some(unit) = self.units.remove(unit_id) {
            self.index.remove(unit.address());
            tracing::debug!(unit = %unit.address(), "unit removed");
        }
    }

    /// Connect two children of a container, output port to input port
    pub fn connect(
        &mut self,
        container: &ComponentAddress,
        connection: Connection,
    ) -> Result<()> {
        let container_id = self.lookup(container)?;
        let unit = self
            .units
            .get(container_id)
            .ok_or_else(|| InstallError::UnitNotFound(container.to_string()))?;
        if !unit.kind().is_container() {
            return Err(ContainerError::NotAContainer(container.to_string()).into());
        }
        let port_direction = |child: &str, port: &str| {
            unit.child(child)
                .and_then(|child_id| self.units.get(child_id))
                .map(|child_unit| child_unit.iteration().port_direction(port))
        };
        match port_direction(&connection.source, &connection.source_port) {
            None => return Err(ContainerError::UnknownChild(connection.source.clone()).into()),
            Some(Some(descriptor::PortDirection::Output)) => {}
            Some(_) => {
                return Err(ContainerError::UnknownPort(format!(
                    "{}!{}",
                    connection.source, connection.source_port
                ))
                .into());
            }
        }
        match port_direction(&connection.target, &connection.target_port) {
            None => return Err(ContainerError::UnknownChild(connection.target.clone()).into()),
            Some(Some(descriptor::PortDirection::Input)) => {}
            Some(_) => {
                return Err(ContainerError::UnknownPort(format!(
                    "{}!{}",
                    connection.target, connection.target_port
                ))
                .into());
            }
        }
        let text = connection.to_string();
        let added = self
            .units
            .get_mut(container_id)
            .is_some_and(|unit| unit.add_connection(connection));
        if !added {
            return Err(ContainerError::DuplicateConnection(text).into());
        }
        tracing::debug!(container = %container, connection = %text, "connected");
        Ok(())
    }

    /// Remove a connection
    pub fn disconnect(
        &mut self,
        container: &ComponentAddress,
        connection: &Connection,
    ) -> Result<()> {
        let container_id = self.lookup(container)?;
        let removed = self
            .units
            .get_mut(container_id)
            .is_some_and(|unit| unit.remove_connection(connection));
        if !removed {
            return Err(
                ContainerError::InvalidConnection(format!("no connection {}", connection)).into(),
            );
        }
        Ok(())
    }

    // ---- hot-swap ----

    /// Replace a unit's iteration with one built from `behavior`.
    ///
    /// A failing declaration leaves the installed iteration untouched.
    pub fn install(&mut self, address: &ComponentAddress, behavior: &dyn Behavior) -> Result<()> {
        let unit_id = self.lookup(address)?;
        let iteration = Iteration::build(behavior)?;
        self.install_iteration(unit_id, iteration);
        Ok(())
    }

    /// Compile `source` and install it; unchanged source is a no-op.
    ///
    /// Returns whether a new iteration was installed.
    pub fn install_source(&mut self, address: &ComponentAddress, source: &str) -> Result<bool> {
        let unit_id = self.lookup(address)?;
        let hash = blake3::hash(source.as_bytes());
        let type_name = match self.units.get(unit_id) {
            Some(unit) if unit.iteration().source_hash() == Some(hash) => return Ok(false),
            Some(unit) => unit.type_name().to_string(),
            None => return Err(InstallError::UnitNotFound(address.to_string()).into()),
        };
        let compiler = self.compiler.clone().ok_or(InstallError::NoCompiler)?;
        let behavior = compiler
            .compile(&type_name, source)
            .map_err(|err| InstallError::Compile(format!("{:#}", err)))?;
        let mut iteration = Iteration::build(behavior.as_ref())?;
        iteration.set_source_hash(hash);
        self.install_iteration(unit_id, iteration);
        tracing::info!(unit = %address, hash = %hash.to_hex(), "source installed");
        Ok(true)
    }

    fn install_iteration(&mut self, unit_id: UnitId, iteration: Iteration) {
        let active = self.context.is_active();
        self.with_unit_env(unit_id, |unit, env| unit.install(iteration, active, env));
    }

    // ---- messaging ----

    /// Queue a call; calls dated after the clock wait for it
    pub fn send(&mut self, call: Call) {
        if is_after(call.time(), self.context.time()) {
            self.scheduler.schedule(call);
        } else {
            self.queue.push_back(call);
        }
    }

    /// Send a host request; the table only holds the returned handle weakly
    pub fn request(&mut self, to: ControlAddress, args: Vec<Value>) -> Async<Vec<Value>> {
        let call = Call::request(to, self.host.clone(), self.time(), args);
        let handle = Async::new();
        match self.requests.register(&call, &handle) {
            Ok(()) => self.send(call),
            Err(err) => {
                handle.fail(err.into());
            }
        }
        handle
    }

    /// Send a host request failing with a `timeout` error after `timeout`
    /// units of logical time (the configured default when `None`)
    pub fn request_with_timeout(
        &mut self,
        to: ControlAddress,
        args: Vec<Value>,
        timeout: Option<i64>,
    ) -> Async<Vec<Value>> {
        let call = Call::request(to, self.host.clone(), self.time(), args);
        let handle = Async::new();
        if let Err(err) = self.requests.register(&call, &handle) {
            handle.fail(err.into());
            return handle;
        }
        let at = self
            .time()
            .wrapping_add(timeout.unwrap_or(self.config.default_call_timeout));
        let expiry = self
            .requests
            .schedule_timeout(call.match_id(), self.timeout.clone(), at);
        self.send(call);
        self.send(expiry);
        handle
    }

    /// Send a host request whose answer is passed to `callback`
    pub fn request_with<F>(
        &mut self,
        to: ControlAddress,
        args: Vec<Value>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(std::result::Result<Vec<Value>, PError>) + Send + 'static,
    {
        let call = Call::request(to, self.host.clone(), self.time(), args);
        self.callbacks.register_callback(&call, callback)?;
        self.send(call);
        Ok(())
    }

    /// Send a quiet host request
    pub fn notify(&mut self, to: ControlAddress, args: Vec<Value>) {
        let call = Call::quiet(to, Some(self.host.clone()), self.time(), args);
        self.send(call);
    }

    /// Push values straight into an input port
    pub fn push(&mut self, port: &PortAddress, values: Vec<Value>) -> Result<()> {
        let unit_id = self.lookup(port.component())?;
        let port_id = port.id().to_string();
        self.with_unit_env(unit_id, |unit, env| unit.receive(&port_id, &values, env));
        Ok(())
    }

    /// Process queued calls and port emissions until nothing is left or the
    /// per-pass budget is spent; returns the number of items processed
    pub fn run_until_idle(&mut self) -> usize {
        let budget = self.config.call_budget;
        let mut processed = 0;
        while processed < budget {
            if let Some((port, values)) = self.port_queue.pop_front() {
                self.deliver(&port, &values);
            } else if let Some(call) = self.queue.pop_front() {
                self.dispatch(call);
            } else {
                break;
            }
            processed += 1;
        }
        if processed >= budget && !self.is_idle() {
            tracing::warn!(
                remaining = self.queue.len() + self.port_queue.len(),
                "call budget exhausted; remaining calls stay queued"
            );
        }
        processed
    }

    fn deliver(&mut self, port: &PortAddress, values: &[Value]) {
        let Some(&source_id) = self.index.get(port.component()) else {
            return;
        };
        let Some(parent_id) = self.units.get(source_id).and_then(Unit::parent) else {
            return;
        };
        let source = port.component().id();
        let targets: Vec<(UnitId, String)> = match self.units.get(parent_id) {
            Some(parent) => parent
                .connections()
                .iter()
                .filter(|c| c.source == source && c.source_port == port.id())
                .filter_map(|c| parent.child(&c.target).map(|id| (id, c.target_port.clone())))
                .collect(),
            None => return,
        };
        for (target, target_port) in targets {
            self.with_unit_env(target, |unit, env| unit.receive(&target_port, values, env));
        }
    }

    /// Run `f` against a unit with a fresh environment, then flush what it
    /// produced. `None` if the unit no longer exists.
    pub(crate) fn with_unit_env<R>(
        &mut self,
        unit_id: UnitId,
        f: impl FnOnce(&mut Unit, &mut Env<'_>) -> R,
    ) -> Option<R> {
        let mut outbox = Outbox::default();
        let unit = self.units.get_mut(unit_id)?;
        let address = unit.address().clone();
        let result = {
            let mut env = Env::new(
                Some(address.clone()),
                self.context.time(),
                &mut outbox,
                &self.services,
                self.config.log_level,
            );
            f(unit, &mut env)
        };
        self.flush(&address, outbox);
        Some(result)
    }

    /// Route what one operation on a unit produced. Log lines go out as a
    /// single quiet call to the configured log destination.
    fn flush(&mut self, source: &ComponentAddress, outbox: Outbox) {
        for call in outbox.calls {
            self.send(call);
        }
        for (port, values) in outbox.emissions {
            match source.port(&port) {
                Ok(address) => self.port_queue.push_back((address, values)),
                Err(err) => tracing::warn!(unit = %source, error = %err, "bad emission dropped"),
            }
        }
        if outbox.log.is_empty() {
            return;
        }
        for entry in &outbox.log {
            match entry.level {
                LogLevel::Error => tracing::error!(unit = %source, "{}", entry.message),
                LogLevel::Warning => tracing::warn!(unit = %source, "{}", entry.message),
                LogLevel::Info => tracing::info!(unit = %source, "{}", entry.message),
                LogLevel::Debug => tracing::debug!(unit = %source, "{}", entry.message),
            }
        }
        let Some(destination) = self.config.log_destination.clone() else {
            return;
        };
        if destination.component() == source {
            return;
        }
        let lines = outbox.log.iter().map(|entry| entry.to_value()).collect();
        let call = Call::quiet(
            destination,
            None,
            self.context.time(),
            vec![Value::from(source.clone()), Value::List(lines)],
        );
        self.send(call);
    }
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.context.state())
            .field("time", &self.context.time())
            .field("units", &self.units.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

// Re-export commonly used types
pub use address::Address;
pub use correlation::Resolution;
pub use error::RuntimeError;
