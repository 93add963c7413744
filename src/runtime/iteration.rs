//! Iterations: one generation of a unit's behavior
//!
//! A [`Behavior`] declares its descriptors through an [`IterationBuilder`].
//! Building either yields a complete [`Iteration`] or fails without touching
//! whatever is currently installed.

use indexmap::IndexMap;
use std::sync::Arc;

use super::address::is_valid_id;
use super::call::Call;
use super::descriptor::{
    Category, Descriptor, FunctionControl, InputPort, OutputPort, PortDirection, Property,
    PropertyControl, RawControl, Ref, ReferenceDescriptor, ReferenceSpec, TickHandler,
};
use super::env::{Env, LogLevel};
use super::error::InstallError;
use super::protocol;
use super::value::{PError, Value, ValueType};

/// Declares the descriptors of an iteration
pub trait Behavior: Send + Sync {
    /// Register controls, ports, references and a tick handler
    fn declare(&self, builder: &mut IterationBuilder) -> anyhow::Result<()>;
}

impl<F> Behavior for F
where
    F: Fn(&mut IterationBuilder) -> anyhow::Result<()> + Send + Sync,
{
    fn declare(&self, builder: &mut IterationBuilder) -> anyhow::Result<()> {
        self(builder)
    }
}

/// Behavior with no descriptors
pub fn empty_behavior() -> Arc<dyn Behavior> {
    Arc::new(|_: &mut IterationBuilder| -> anyhow::Result<()> { Ok(()) })
}

/// Lifecycle hook selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// `on_init`
    Init,
    /// `on_start`
    Start,
    /// `on_stop`
    Stop,
    /// `on_reset`
    Reset,
}

/// Collects descriptor declarations
#[derive(Default)]
pub struct IterationBuilder {
    controls: IndexMap<String, Box<dyn Descriptor>>,
    ports: IndexMap<String, Box<dyn Descriptor>>,
    references: IndexMap<String, Box<dyn Descriptor>>,
    tick: Option<TickHandler>,
}

impl IterationBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, category: Category, id: &str) -> Result<(), InstallError> {
        if !is_valid_id(id) {
            return Err(InstallError::InvalidId(id.to_string()));
        }
        let taken = match category {
            Category::Control => {
                if protocol::is_reserved(id) {
                    return Err(InstallError::ReservedId(id.to_string()));
                }
                self.controls.contains_key(id)
            }
            Category::Port => self.ports.contains_key(id),
            Category::Reference => self.references.contains_key(id),
        };
        if taken {
            return Err(InstallError::DuplicateId(id.to_string()));
        }
        Ok(())
    }

    fn push(&mut self, descriptor: Box<dyn Descriptor>) -> Result<(), InstallError> {
        let category = descriptor.category();
        let id = descriptor.id().to_string();
        self.check(category, &id)?;
        let table = match category {
            Category::Control => &mut self.controls,
            Category::Port => &mut self.ports,
            Category::Reference => &mut self.references,
        };
        table.insert(id, descriptor);
        Ok(())
    }

    /// Declare a custom descriptor; its category picks the table it joins
    pub fn descriptor(&mut self, descriptor: Box<dyn Descriptor>) -> Result<(), InstallError> {
        self.push(descriptor)
    }

    /// Declare a control that replies with the handler's result
    pub fn function<F>(&mut self, id: &str, handler: F) -> Result<(), InstallError>
    where
        F: FnMut(&[Value], &mut Env<'_>) -> Result<Vec<Value>, PError> + Send + 'static,
    {
        self.push(Box::new(FunctionControl::new(id, Box::new(handler))))
    }

    /// Declare a control that sees every call kind and answers itself
    pub fn raw<F>(&mut self, id: &str, handler: F) -> Result<(), InstallError>
    where
        F: FnMut(&Call, &mut Env<'_>) -> Result<(), PError> + Send + 'static,
    {
        self.push(Box::new(RawControl::new(id, Box::new(handler))))
    }

    /// Declare a property whose type follows the default value
    pub fn property(
        &mut self,
        id: &str,
        default: impl Into<Value>,
    ) -> Result<Property, InstallError> {
        let control = PropertyControl::new(id, default.into());
        let handle = control.handle();
        self.push(Box::new(control))?;
        Ok(handle)
    }

    /// Declare a property with an explicit value type
    pub fn typed_property(
        &mut self,
        id: &str,
        value_type: ValueType,
        default: impl Into<Value>,
    ) -> Result<Property, InstallError> {
        let control = PropertyControl::typed(id, value_type, default.into());
        let handle = control.handle();
        self.push(Box::new(control))?;
        Ok(handle)
    }

    /// Declare an input port
    pub fn input<F>(&mut self, id: &str, handler: F) -> Result<(), InstallError>
    where
        F: FnMut(&[Value], &mut Env<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.push(Box::new(InputPort::new(id, Box::new(handler))))
    }

    /// Declare an output port
    pub fn output(&mut self, id: &str) -> Result<(), InstallError> {
        self.push(Box::new(OutputPort::new(id)))
    }

    /// Declare a reference built by `init` when not carried over
    pub fn reference<T, F>(&mut self, id: &str, init: F) -> Result<Ref<T>, InstallError>
    where
        T: Send + 'static,
        F: FnMut(&mut Env<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        self.add_reference(ReferenceSpec::new(id, init))
    }

    /// Declare a reference with lifecycle handlers
    pub fn add_reference<T: Send + 'static>(
        &mut self,
        spec: ReferenceSpec<T>,
    ) -> Result<Ref<T>, InstallError> {
        let (descriptor, handle) = ReferenceDescriptor::new(spec);
        self.push(Box::new(descriptor))?;
        Ok(handle)
    }

    /// Run `handler` on every clock tick while active
    pub fn on_tick<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Env<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.tick = Some(Box::new(handler));
    }
}

/// Installed descriptor set of a unit
#[derive(Default)]
pub struct Iteration {
    controls: IndexMap<String, Box<dyn Descriptor>>,
    ports: IndexMap<String, Box<dyn Descriptor>>,
    references: IndexMap<String, Box<dyn Descriptor>>,
    tick: Option<TickHandler>,
    source_hash: Option<blake3::Hash>,
}

impl Iteration {
    /// Iteration with no descriptors
    pub fn empty() -> Self {
        Self::default()
    }

    /// Run a behavior's declaration
    pub fn build(behavior: &dyn Behavior) -> Result<Self, InstallError> {
        let mut builder = IterationBuilder::new();
        behavior.declare(&mut builder).map_err(|err| {
            match err.downcast::<InstallError>() {
                Ok(install) => install,
                Err(other) => InstallError::Declaration(format!("{:#}", other)),
            }
        })?;
        Ok(Self {
            controls: builder.controls,
            ports: builder.ports,
            references: builder.references,
            tick: builder.tick,
            source_hash: None,
        })
    }

    /// Hash of the source this iteration was compiled from
    pub fn source_hash(&self) -> Option<blake3::Hash> {
        self.source_hash
    }

    pub(crate) fn set_source_hash(&mut self, hash: blake3::Hash) {
        self.source_hash = Some(hash);
    }

    /// Attach every descriptor, offering each the previous descriptor with
    /// the same id, then dispose what was not carried over.
    pub fn attach_from(&mut self, previous: Option<Iteration>, env: &mut Env<'_>) {
        let (mut old_controls, mut old_ports, mut old_references) = match previous {
            Some(previous) => (previous.controls, previous.ports, previous.references),
            None => Default::default(),
        };
        let mut rejected: Vec<Box<dyn Descriptor>> = Vec::new();

        for (id, descriptor) in self.controls.iter_mut() {
            let prev = old_controls.shift_remove(id);
            rejected.extend(descriptor.attach(env, prev));
            env.mark_attached(id);
        }
        for (id, descriptor) in self.ports.iter_mut() {
            let prev = old_ports.shift_remove(id);
            rejected.extend(descriptor.attach(env, prev));
        }
        for (id, descriptor) in self.references.iter_mut() {
            let prev = old_references.shift_remove(id);
            rejected.extend(descriptor.attach(env, prev));
        }

        rejected.extend(old_controls.into_values());
        rejected.extend(old_ports.into_values());
        rejected.extend(old_references.into_values());
        for mut descriptor in rejected {
            if let Err(err) = descriptor.dispose(env) {
                report_hook_error(env, "dispose", descriptor.id(), &err);
            }
        }
    }

    /// Run one lifecycle hook on every descriptor; failures are logged and
    /// do not stop the remaining hooks
    pub fn run_hooks(&mut self, hook: Hook, env: &mut Env<'_>) {
        let tables = [&mut self.controls, &mut self.ports, &mut self.references];
        for table in tables {
            for descriptor in table.values_mut() {
                let outcome = match hook {
                    Hook::Init => descriptor.on_init(env),
                    Hook::Start => descriptor.on_start(env),
                    Hook::Stop => descriptor.on_stop(env),
                    Hook::Reset => descriptor.on_reset(env),
                };
                if let Err(err) = outcome {
                    report_hook_error(env, hook_name(hook), descriptor.id(), &err);
                }
            }
        }
    }

    /// Dispose every descriptor (unit removal)
    pub fn dispose_all(&mut self, env: &mut Env<'_>) {
        let tables = [&mut self.controls, &mut self.ports, &mut self.references];
        for table in tables {
            for (_, mut descriptor) in table.drain(..) {
                if let Err(err) = descriptor.dispose(env) {
                    report_hook_error(env, "dispose", descriptor.id(), &err);
                }
            }
        }
        self.tick = None;
    }

    /// Invoke the tick handler, if any
    pub fn tick(&mut self, env: &mut Env<'_>) {
        if let Some(handler) = self.tick.as_mut() {
            if let Err(err) = handler(env) {
                report_hook_error(env, "tick", "tick", &err);
            }
        }
    }

    /// Control by id
    pub fn control_mut(&mut self, id: &str) -> Option<&mut Box<dyn Descriptor>> {
        self.controls.get_mut(id)
    }

    /// Port by id
    pub fn port_mut(&mut self, id: &str) -> Option<&mut Box<dyn Descriptor>> {
        self.ports.get_mut(id)
    }

    /// Direction of a declared port
    pub fn port_direction(&self, id: &str) -> Option<PortDirection> {
        self.ports.get(id).and_then(|port| port.port_direction())
    }

    /// Control ids in declaration order
    pub fn control_ids(&self) -> impl Iterator<Item = &str> {
        self.controls.keys().map(String::as_str)
    }

    /// Port ids in declaration order
    pub fn port_ids(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }

    /// Reference ids in declaration order
    pub fn reference_ids(&self) -> impl Iterator<Item = &str> {
        self.references.keys().map(String::as_str)
    }

    /// Current property values keyed by control id
    pub fn properties(&self) -> Vec<(String, Value)> {
        self.controls
            .iter()
            .filter_map(|(id, control)| control.property().map(|value| (id.clone(), value)))
            .collect()
    }

    /// Restore a property value; `false` if there is no such property or the
    /// value does not fit its type
    pub fn restore_property(&mut self, id: &str, value: &Value) -> bool {
        self.controls
            .get_mut(id)
            .is_some_and(|control| control.restore_property(value))
    }
}

fn hook_name(hook: Hook) -> &'static str {
    match hook {
        Hook::Init => "init",
        Hook::Start => "start",
        Hook::Stop => "stop",
        Hook::Reset => "reset",
    }
}

fn report_hook_error(env: &mut Env<'_>, hook: &str, id: &str, err: &anyhow::Error) {
    let unit = env
        .address()
        .map(|address| address.to_string())
        .unwrap_or_default();
    tracing::error!(unit = %unit, descriptor = id, hook, error = %err, "lifecycle hook failed");
    env.log(
        LogLevel::Error,
        format!("{} hook of '{}' failed: {}", hook, id, err),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::address::ComponentAddress;
    use crate::runtime::env::{Outbox, Services};
    use parking_lot::Mutex;

    fn run<R>(f: impl FnOnce(&mut Env<'_>) -> R) -> (R, Outbox) {
        let mut outbox = Outbox::default();
        let services = Services::new();
        let result = {
            let mut env = Env::new(
                Some(ComponentAddress::parse("/root/unit").unwrap()),
                0,
                &mut outbox,
                &services,
                LogLevel::Debug,
            );
            f(&mut env)
        };
        (result, outbox)
    }

    #[test]
    fn test_builder_rejects_bad_ids() {
        let duplicate = |b: &mut IterationBuilder| -> anyhow::Result<()> {
            b.output("out")?;
            b.output("out")?;
            Ok(())
        };
        assert_eq!(
            Iteration::build(&duplicate).err(),
            Some(InstallError::DuplicateId("out".into()))
        );

        let reserved = |b: &mut IterationBuilder| -> anyhow::Result<()> {
            b.property("info", 1i64)?;
            Ok(())
        };
        assert_eq!(
            Iteration::build(&reserved).err(),
            Some(InstallError::ReservedId("info".into()))
        );

        let failing = |_: &mut IterationBuilder| -> anyhow::Result<()> { anyhow::bail!("nope") };
        assert!(matches!(
            Iteration::build(&failing),
            Err(InstallError::Declaration(_))
        ));
    }

    #[test]
    fn test_same_id_in_different_categories() {
        let behavior = |b: &mut IterationBuilder| -> anyhow::Result<()> {
            b.property("level", 0i64)?;
            b.output("level")?;
            b.reference("level", |_env| Ok(0u32))?;
            Ok(())
        };
        let iteration = Iteration::build(&behavior).unwrap();
        assert_eq!(iteration.control_ids().collect::<Vec<_>>(), vec!["level"]);
        assert_eq!(iteration.port_ids().collect::<Vec<_>>(), vec!["level"]);
    }

    #[test]
    fn test_failing_hook_does_not_stop_others() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let record = started.clone();
        let behavior = move |b: &mut IterationBuilder| -> anyhow::Result<()> {
            b.add_reference(
                ReferenceSpec::new("bad", |_env| Ok(()))
                    .on_start(|_, _| anyhow::bail!("broken")),
            )?;
            let record = record.clone();
            b.add_reference(ReferenceSpec::new("good", |_env| Ok(())).on_start(move |_, _| {
                record.lock().push("good");
                Ok(())
            }))?;
            Ok(())
        };
        let mut iteration = Iteration::build(&behavior).unwrap();
        let (_, outbox) = run(|env| {
            iteration.attach_from(None, env);
            iteration.run_hooks(Hook::Start, env);
        });
        assert_eq!(*started.lock(), vec!["good"]);
        assert_eq!(outbox.log.len(), 1);
        assert_eq!(outbox.log[0].level, LogLevel::Error);
    }

    #[test]
    fn test_unmatched_descriptors_disposed_once() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let sink = disposed.clone();
        let first = move |b: &mut IterationBuilder| -> anyhow::Result<()> {
            let sink = sink.clone();
            b.add_reference(
                ReferenceSpec::new("cache", |_env| Ok(String::from("old")))
                    .on_dispose(move |value, _env| sink.lock().push(value)),
            )?;
            Ok(())
        };
        let second = |b: &mut IterationBuilder| -> anyhow::Result<()> {
            b.reference("other", |_env| Ok(1u8))?;
            Ok(())
        };

        let mut a = Iteration::build(&first).unwrap();
        run(|env| a.attach_from(None, env));
        let mut b = Iteration::build(&second).unwrap();
        run(|env| b.attach_from(Some(a), env));
        assert_eq!(*disposed.lock(), vec!["old".to_string()]);
    }

    struct Counter {
        id: String,
        hooks: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Descriptor for Counter {
        fn id(&self) -> &str {
            &self.id
        }

        fn category(&self) -> Category {
            Category::Reference
        }

        fn shape(&self) -> String {
            "reference:counter".into()
        }

        fn on_init(&mut self, _env: &mut Env<'_>) -> anyhow::Result<()> {
            self.hooks.lock().push("init");
            Ok(())
        }

        fn on_start(&mut self, _env: &mut Env<'_>) -> anyhow::Result<()> {
            self.hooks.lock().push("start");
            Ok(())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_custom_descriptor_sees_every_init() {
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let shared = hooks.clone();
        let behavior = move |b: &mut IterationBuilder| -> anyhow::Result<()> {
            b.descriptor(Box::new(Counter {
                id: "counter".into(),
                hooks: shared.clone(),
            }))?;
            Ok(())
        };
        let mut iteration = Iteration::build(&behavior).unwrap();
        run(|env| {
            iteration.attach_from(None, env);
            iteration.run_hooks(Hook::Init, env);
            iteration.run_hooks(Hook::Start, env);
            iteration.run_hooks(Hook::Init, env);
        });
        assert_eq!(*hooks.lock(), vec!["init", "start", "init"]);

        let clash = |b: &mut IterationBuilder| -> anyhow::Result<()> {
            b.reference("counter", |_env| Ok(0u8))?;
            b.descriptor(Box::new(Counter {
                id: "counter".into(),
                hooks: Arc::default(),
            }))?;
            Ok(())
        };
        assert_eq!(
            Iteration::build(&clash).err(),
            Some(InstallError::DuplicateId("counter".into()))
        );
    }
}
