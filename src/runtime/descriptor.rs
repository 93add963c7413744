//! Named capabilities attached to a unit iteration
//!
//! Every control, port and reference of an iteration is a [`Descriptor`].
//! During a hot-swap each new descriptor is offered the previous descriptor
//! with the same id: when the shapes match it moves the live state over and
//! the previous one is dropped without being disposed; otherwise the previous
//! descriptor is handed back and disposed once all attaches are done.

use parking_lot::Mutex;
use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use super::call::Call;
use super::context::is_latest;
use super::env::{Env, LogLevel};
use super::value::{PError, Value, ValueType};

/// Descriptor category, also the attach order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Message endpoint
    Control,
    /// Dataflow endpoint
    Port,
    /// Typed state object
    Reference,
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Receives values from connections
    Input,
    /// Emits values along connections
    Output,
}

/// Capability attached to an iteration
pub trait Descriptor: Send + 'static {
    /// Descriptor id, unique within its category
    fn id(&self) -> &str;

    /// Descriptor category
    fn category(&self) -> Category;

    /// Compatibility key; equal shapes may carry state across a swap
    fn shape(&self) -> String;

    /// Take over `previous` if compatible.
    ///
    /// Returns the previous descriptor when it was not reused, so that the
    /// caller disposes it.
    fn attach(
        &mut self,
        _env: &mut Env<'_>,
        previous: Option<Box<dyn Descriptor>>,
    ) -> Option<Box<dyn Descriptor>> {
        previous
    }

    /// Activation hook, on every move to `Active`
    fn on_init(&mut self, _env: &mut Env<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// First activation after install
    fn on_start(&mut self, _env: &mut Env<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Deactivation hook, before any reset
    fn on_stop(&mut self, _env: &mut Env<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Deactivation hook, after all stops
    fn on_reset(&mut self, _env: &mut Env<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Final release when not carried over
    fn dispose(&mut self, _env: &mut Env<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a call addressed to this control
    ///
    /// An `Err` is answered by the router as an error reply when the call
    /// still expects one.
    fn invoke(&mut self, call: &Call, _env: &mut Env<'_>) -> Result<(), PError> {
        Err(PError::routing(format!(
            "'{}' does not accept calls ({})",
            self.id(),
            call.to()
        )))
    }

    /// Handle values arriving on an input port
    fn receive(&mut self, _values: &[Value], _env: &mut Env<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Port direction, `None` for non-ports
    fn port_direction(&self) -> Option<PortDirection> {
        None
    }

    /// Current property value, `None` for non-properties
    fn property(&self) -> Option<Value> {
        None
    }

    /// Overwrite a property value from a snapshot
    fn restore_property(&mut self, _value: &Value) -> bool {
        false
    }

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl fmt::Debug for dyn Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}, {})", self.category(), self.id(), self.shape())
    }
}

/// Handler of a function control: arguments in, reply arguments out
pub type FunctionHandler =
    Box<dyn FnMut(&[Value], &mut Env<'_>) -> Result<Vec<Value>, PError> + Send>;

/// Handler of a raw control: sees every call kind and answers itself
pub type RawHandler = Box<dyn FnMut(&Call, &mut Env<'_>) -> Result<(), PError> + Send>;

/// Handler of an input port
pub type InputHandler = Box<dyn FnMut(&[Value], &mut Env<'_>) -> anyhow::Result<()> + Send>;

/// Handler run on every clock tick while active
pub type TickHandler = Box<dyn FnMut(&mut Env<'_>) -> anyhow::Result<()> + Send>;

fn reuse<D: Descriptor>(
    shape: &str,
    previous: Option<Box<dyn Descriptor>>,
    mut take: impl FnMut(&mut D),
) -> Option<Box<dyn Descriptor>> {
    let mut previous = previous?;
    if previous.shape() != shape {
        return Some(previous);
    }
    if let Some(prev) = previous.as_any_mut().downcast_mut::<D>() {
        take(prev);
        return None;
    }
    Some(previous)
}

/// Control that replies automatically with its handler's result
pub struct FunctionControl {
    id: String,
    handler: FunctionHandler,
}

impl FunctionControl {
    /// Wrap a handler
    pub fn new(id: impl Into<String>, handler: FunctionHandler) -> Self {
        Self {
            id: id.into(),
            handler,
        }
    }
}

impl Descriptor for FunctionControl {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Category {
        Category::Control
    }

    fn shape(&self) -> String {
        "function".to_string()
    }

    fn attach(
        &mut self,
        _env: &mut Env<'_>,
        previous: Option<Box<dyn Descriptor>>,
    ) -> Option<Box<dyn Descriptor>> {
        reuse::<FunctionControl>(&self.shape(), previous, |_| {})
    }

    fn invoke(&mut self, call: &Call, env: &mut Env<'_>) -> Result<(), PError> {
        if !call.is_request() {
            tracing::warn!(control = %call.to(), match_id = call.match_id(), "unexpected answer dropped");
            return Ok(());
        }
        let result = (self.handler)(call.args(), env)?;
        if call.expects_reply() {
            env.reply(call, result)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Control whose handler sees requests, replies and errors unchanged
pub struct RawControl {
    id: String,
    handler: RawHandler,
}

impl RawControl {
    /// Wrap a handler
    pub fn new(id: impl Into<String>, handler: RawHandler) -> Self {
        Self {
            id: id.into(),
            handler,
        }
    }
}

impl Descriptor for RawControl {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Category {
        Category::Control
    }

    fn shape(&self) -> String {
        "raw".to_string()
    }

    fn attach(
        &mut self,
        _env: &mut Env<'_>,
        previous: Option<Box<dyn Descriptor>>,
    ) -> Option<Box<dyn Descriptor>> {
        reuse::<RawControl>(&self.shape(), previous, |_| {})
    }

    fn invoke(&mut self, call: &Call, env: &mut Env<'_>) -> Result<(), PError> {
        (self.handler)(call, env)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
struct PropertyState {
    value: Value,
    last_set: Option<i64>,
}

/// Shared handle to a property value
#[derive(Clone)]
pub struct Property {
    value_type: ValueType,
    inner: Arc<Mutex<PropertyState>>,
}

impl Property {
    fn new(value_type: ValueType, value: Value) -> Self {
        Self {
            value_type,
            inner: Arc::new(Mutex::new(PropertyState {
                value,
                last_set: None,
            })),
        }
    }

    /// Current value
    pub fn get(&self) -> Value {
        self.inner.lock().value.clone()
    }

    /// Declared value type
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Set a value stamped with `time`.
    ///
    /// Returns `Ok(false)` when the set is older than the last accepted one.
    pub fn set(&self, value: &Value, time: i64) -> Result<bool, PError> {
        let value = self.coerce(value)?;
        let mut state = self.inner.lock();
        if let Some(previous) = state.last_set {
            if !is_latest(time, previous) {
                return Ok(false);
            }
        }
        state.value = value;
        state.last_set = Some(time);
        Ok(true)
    }

    /// Overwrite the value without a time check
    pub fn replace(&self, value: &Value) -> Result<(), PError> {
        let value = self.coerce(value)?;
        self.inner.lock().value = value;
        Ok(())
    }

    fn coerce(&self, value: &Value) -> Result<Value, PError> {
        value.coerce(self.value_type).ok_or_else(|| {
            PError::argument(format!(
                "expected {} value, got '{}'",
                self.value_type, value
            ))
        })
    }
}

/// Control exposing a typed value with get/set semantics
pub struct PropertyControl {
    id: String,
    state: Property,
}

impl PropertyControl {
    /// Create a property with a default value; the type follows the default
    pub fn new(id: impl Into<String>, default: Value) -> Self {
        Self::typed(id, default.value_type(), default)
    }

    /// Create a property with an explicit value type
    pub fn typed(id: impl Into<String>, value_type: ValueType, default: Value) -> Self {
        Self {
            id: id.into(),
            state: Property::new(value_type, default),
        }
    }

    /// Shared handle to the value
    pub fn handle(&self) -> Property {
        self.state.clone()
    }
}

impl Descriptor for PropertyControl {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Category {
        Category::Control
    }

    fn shape(&self) -> String {
        format!("property:{}", self.state.value_type)
    }

    fn attach(
        &mut self,
        _env: &mut Env<'_>,
        previous: Option<Box<dyn Descriptor>>,
    ) -> Option<Box<dyn Descriptor>> {
        let target = self.state.inner.clone();
        reuse::<PropertyControl>(&self.shape(), previous, |prev| {
            let carried = prev.state.inner.lock().clone();
            *target.lock() = carried;
        })
    }

    fn invoke(&mut self, call: &Call, env: &mut Env<'_>) -> Result<(), PError> {
        if !call.is_request() {
            return Ok(());
        }
        let args = call.args();
        if !args.is_empty() {
            let value = match args {
                [single] => single.clone(),
                many => Value::List(many.to_vec()),
            };
            if !self.state.set(&value, call.time())? {
                tracing::debug!(property = %call.to(), time = call.time(), "stale set ignored");
            }
        }
        if call.expects_reply() {
            env.reply(call, vec![self.state.get()])?;
        }
        Ok(())
    }

    fn property(&self) -> Option<Value> {
        Some(self.state.get())
    }

    fn restore_property(&mut self, value: &Value) -> bool {
        self.state.replace(value).is_ok()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Port receiving values through connections
pub struct InputPort {
    id: String,
    handler: InputHandler,
}

impl InputPort {
    /// Wrap a handler
    pub fn new(id: impl Into<String>, handler: InputHandler) -> Self {
        Self {
            id: id.into(),
            handler,
        }
    }
}

impl Descriptor for InputPort {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Category {
        Category::Port
    }

    fn shape(&self) -> String {
        "input".to_string()
    }

    fn attach(
        &mut self,
        _env: &mut Env<'_>,
        previous: Option<Box<dyn Descriptor>>,
    ) -> Option<Box<dyn Descriptor>> {
        reuse::<InputPort>(&self.shape(), previous, |_| {})
    }

    fn receive(&mut self, values: &[Value], env: &mut Env<'_>) -> anyhow::Result<()> {
        (self.handler)(values, env)
    }

    fn port_direction(&self) -> Option<PortDirection> {
        Some(PortDirection::Input)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Port emitting values through [`Env::emit`]
pub struct OutputPort {
    id: String,
}

impl OutputPort {
    /// Declare an output port
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Descriptor for OutputPort {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Category {
        Category::Port
    }

    fn shape(&self) -> String {
        "output".to_string()
    }

    fn attach(
        &mut self,
        _env: &mut Env<'_>,
        previous: Option<Box<dyn Descriptor>>,
    ) -> Option<Box<dyn Descriptor>> {
        reuse::<OutputPort>(&self.shape(), previous, |_| {})
    }

    fn port_direction(&self) -> Option<PortDirection> {
        Some(PortDirection::Output)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Shared handle to a reference value
pub struct Ref<T> {
    cell: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Ref<T> {
    fn empty() -> Self {
        Self {
            cell: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `f` on the value, `None` if it is not constructed
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.cell.lock();
        guard.as_mut().map(f)
    }

    /// Whether the value is constructed
    pub fn is_set(&self) -> bool {
        self.cell.lock().is_some()
    }
}

impl<T: Clone> Ref<T> {
    /// Copy of the value
    pub fn get(&self) -> Option<T> {
        self.cell.lock().clone()
    }
}

type RefInit<T> = Box<dyn FnMut(&mut Env<'_>) -> anyhow::Result<T> + Send>;
type RefHook<T> = Box<dyn FnMut(&mut T, &mut Env<'_>) -> anyhow::Result<()> + Send>;
type RefDispose<T> = Box<dyn FnMut(T, &mut Env<'_>) + Send>;

/// Declaration of a typed reference and its optional handlers
pub struct ReferenceSpec<T> {
    id: String,
    init: RefInit<T>,
    activate: Option<RefHook<T>>,
    start: Option<RefHook<T>>,
    stop: Option<RefHook<T>>,
    reset: Option<RefHook<T>>,
    dispose: Option<RefDispose<T>>,
}

impl<T: Send + 'static> ReferenceSpec<T> {
    /// Reference constructed by `init` when not carried over
    pub fn new<F>(id: impl Into<String>, init: F) -> Self
    where
        F: FnMut(&mut Env<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            id: id.into(),
            init: Box::new(init),
            activate: None,
            start: None,
            stop: None,
            reset: None,
            dispose: None,
        }
    }

    /// Handler for every activation
    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut T, &mut Env<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.activate = Some(Box::new(f));
        self
    }

    /// Handler for the first activation after install
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut T, &mut Env<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.start = Some(Box::new(f));
        self
    }

    /// Handler for deactivation
    pub fn on_stop<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut T, &mut Env<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.stop = Some(Box::new(f));
        self
    }

    /// Handler run after all stops
    pub fn on_reset<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut T, &mut Env<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.reset = Some(Box::new(f));
        self
    }

    /// Handler receiving the value when it is not carried over
    pub fn on_dispose<F>(mut self, f: F) -> Self
    where
        F: FnMut(T, &mut Env<'_>) + Send + 'static,
    {
        self.dispose = Some(Box::new(f));
        self
    }
}

/// Descriptor owning a reference value
pub struct ReferenceDescriptor<T> {
    spec: ReferenceSpec<T>,
    value: Ref<T>,
}

impl<T: Send + 'static> ReferenceDescriptor<T> {
    /// Descriptor and the handle sharing its value
    pub fn new(spec: ReferenceSpec<T>) -> (Self, Ref<T>) {
        let value = Ref::empty();
        let handle = value.clone();
        (Self { spec, value }, handle)
    }

    fn run_hook(
        &mut self,
        hook: fn(&mut ReferenceSpec<T>) -> Option<&mut RefHook<T>>,
        env: &mut Env<'_>,
    ) -> anyhow::Result<()> {
        let Some(handler) = hook(&mut self.spec) else {
            return Ok(());
        };
        let mut guard = self.value.cell.lock();
        match guard.as_mut() {
            Some(value) => handler(value, env),
            None => Ok(()),
        }
    }
}

impl<T: Send + 'static> Descriptor for ReferenceDescriptor<T> {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn category(&self) -> Category {
        Category::Reference
    }

    fn shape(&self) -> String {
        format!("reference:{}", type_name::<T>())
    }

    fn attach(
        &mut self,
        env: &mut Env<'_>,
        previous: Option<Box<dyn Descriptor>>,
    ) -> Option<Box<dyn Descriptor>> {
        let target = self.value.cell.clone();
        let rejected = reuse::<ReferenceDescriptor<T>>(&self.shape(), previous, |prev| {
            let carried = prev.value.cell.lock().take();
            *target.lock() = carried;
        });
        if !self.value.is_set() {
            match (self.spec.init)(env) {
                Ok(value) => *self.value.cell.lock() = Some(value),
                Err(err) => {
                    tracing::error!(reference = %self.spec.id, error = %err, "reference init failed");
                    env.log(
                        LogLevel::Error,
                        format!("reference '{}' init failed: {}", self.spec.id, err),
                    );
                }
            }
        }
        rejected
    }

    fn on_init(&mut self, env: &mut Env<'_>) -> anyhow::Result<()> {
        self.run_hook(|spec| spec.activate.as_mut(), env)
    }

    fn on_start(&mut self, env: &mut Env<'_>) -> anyhow::Result<()> {
        self.run_hook(|spec| spec.start.as_mut(), env)
    }

    fn on_stop(&mut self, env: &mut Env<'_>) -> anyhow::Result<()> {
        self.run_hook(|spec| spec.stop.as_mut(), env)
    }

    fn on_reset(&mut self, env: &mut Env<'_>) -> anyhow::Result<()> {
        self.run_hook(|spec| spec.reset.as_mut(), env)
    }

    fn dispose(&mut self, env: &mut Env<'_>) -> anyhow::Result<()> {
        let value = self.value.cell.lock().take();
        if let (Some(value), Some(handler)) = (value, self.spec.dispose.as_mut()) {
            handler(value, env);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
