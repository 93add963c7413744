//! Script executor component.
//!
//! A `core:script` unit exposes two controls. `eval` takes script text and an
//! optional config map (`trap-errors`, `log-level`) and replies with the
//! script's final result once every call it makes has been answered. `clear`
//! aborts the running and queued scripts of the calling component.
//!
//! Each calling component gets its own context: a namespace that persists
//! across evals and a queue, so one caller's scripts run strictly in order
//! while scripts of different callers interleave at their suspension points.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::ast::Script;
use super::commands::install_builtins;
use super::frame::{FrameStack, ScriptEnv, StackOutcome, State, error_of};
use super::namespace::{CONTEXT_VAR, Namespace};
use super::parser::parse_script;
use super::script::ScriptFrame;
use crate::runtime::Root;
use crate::runtime::address::{ComponentAddress, ControlAddress};
use crate::runtime::call::Call;
use crate::runtime::descriptor::ReferenceSpec;
use crate::runtime::env::{Env, LogLevel};
use crate::runtime::error::RuntimeError;
use crate::runtime::iteration::{Behavior, IterationBuilder};
use crate::runtime::registry::ComponentCatalog;
use crate::runtime::value::{PError, Value, category};

/// Catalog type name of the script executor.
pub const SCRIPT_TYPE: &str = "core:script";

/// Service name of the script executor.
pub const SCRIPT_SERVICE: &str = "script";

/// Control evaluating a script.
pub const EVAL_CONTROL: &str = "eval";

/// Control aborting the caller's scripts.
pub const CLEAR_CONTROL: &str = "clear";

/// Per-eval options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalConfig {
    /// Collect line failures instead of stopping at the first one.
    pub trap_errors: bool,
    /// Most verbose level `log` lines are kept at.
    pub log_level: LogLevel,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            trap_errors: false,
            log_level: LogLevel::Info,
        }
    }
}

impl EvalConfig {
    /// Read `trap-errors` and `log-level` from a config map.
    pub fn from_value(value: &Value) -> Result<Self, PError> {
        let mut config = Self::default();
        let map = match value {
            Value::None => return Ok(config),
            Value::Map(map) => map,
            other => {
                return Err(PError::argument(format!(
                    "eval config must be a map, got {}",
                    other.value_type()
                )));
            }
        };
        if let Some(flag) = map.get("trap-errors") {
            config.trap_errors = flag
                .as_bool()
                .ok_or_else(|| PError::argument("trap-errors must be a boolean"))?;
        }
        if let Some(level) = map.get("log-level") {
            config.log_level = LogLevel::parse(&level.to_string())
                .ok_or_else(|| PError::argument(format!("unknown log level '{}'", level)))?;
        }
        Ok(config)
    }
}

struct Job {
    call: Call,
    script: Script,
    config: EvalConfig,
}

struct Running {
    call: Call,
    stack: FrameStack,
    config: EvalConfig,
}

struct CallerContext {
    namespace: Namespace,
    queue: VecDeque<Job>,
    running: Option<Running>,
}

struct UnitScriptEnv<'e, 'a> {
    env: &'e mut Env<'a>,
    reply: Option<ControlAddress>,
    log_level: LogLevel,
}

impl ScriptEnv for UnitScriptEnv<'_, '_> {
    fn time(&self) -> i64 {
        self.env.time()
    }

    fn reply_address(&self) -> Option<ControlAddress> {
        self.reply.clone()
    }

    fn send(&mut self, call: Call) {
        self.env.send(call);
    }

    fn log(&mut self, level: LogLevel, message: String) {
        if level <= self.log_level {
            self.env.log_at(level, message);
        }
    }
}

/// Script contexts of one executor unit.
pub struct ScriptExecutor {
    globals: Namespace,
    contexts: BTreeMap<String, CallerContext>,
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptExecutor {
    /// Executor with the built-in commands.
    pub fn new() -> Self {
        let globals = Namespace::new();
        install_builtins(&globals);
        Self {
            globals,
            contexts: BTreeMap::new(),
        }
    }

    /// Scope shared by every caller context.
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    /// Scripts running or queued across all contexts.
    pub fn pending(&self) -> usize {
        self.contexts
            .values()
            .map(|ctx| ctx.queue.len() + usize::from(ctx.running.is_some()))
            .sum()
    }

    /// Queue the script carried by an `eval` request and run what can run.
    pub fn eval(&mut self, call: &Call, env: &mut Env<'_>) -> Result<(), PError> {
        let source = call
            .args()
            .first()
            .ok_or_else(|| PError::argument("eval expects script text"))?
            .to_string();
        let config = EvalConfig::from_value(call.arg(1))?;
        let script = parse_script(&source).map_err(|err| PError::script(err.to_string()))?;

        let key = context_key(call);
        let globals = self.globals.clone();
        let context = self.contexts.entry(key.clone()).or_insert_with(|| {
            let namespace = globals.child();
            let home = call
                .from()
                .map(|from| from.component().clone())
                .or_else(|| env.address().cloned());
            if let Some(home) = home {
                namespace.set(CONTEXT_VAR, Value::from(home));
            }
            CallerContext {
                namespace,
                queue: VecDeque::new(),
                running: None,
            }
        });
        context.queue.push_back(Job {
            call: call.clone(),
            script,
            config,
        });
        self.pump(&key, env);
        Ok(())
    }

    /// Resume the script waiting on `call`; `false` if none is.
    pub fn handle_response(&mut self, call: &Call, env: &mut Env<'_>) -> bool {
        let key = self.contexts.iter_mut().find_map(|(key, ctx)| {
            let running = ctx.running.as_mut()?;
            running.stack.post_reply(call).then(|| key.clone())
        });
        match key {
            Some(key) => {
                self.pump(&key, env);
                true
            }
            None => {
                tracing::warn!(
                    match_id = call.match_id(),
                    kind = ?call.kind(),
                    "unexpected answer for script dropped"
                );
                false
            }
        }
    }

    /// Abort the running and queued scripts of the component behind `call`.
    pub fn clear(&mut self, call: &Call, env: &mut Env<'_>) -> usize {
        let key = context_key(call);
        match self.contexts.get_mut(&key) {
            Some(context) => abort(context, env),
            None => 0,
        }
    }

    /// Abort every script of every context.
    pub fn clear_all(&mut self, env: &mut Env<'_>) -> usize {
        self.contexts
            .values_mut()
            .map(|context| abort(context, env))
            .sum()
    }

    fn pump(&mut self, key: &str, env: &mut Env<'_>) {
        let reply = env.control_address(EVAL_CONTROL).ok();
        let Some(context) = self.contexts.get_mut(key) else {
            return;
        };
        loop {
            if context.running.is_none() {
                let Some(job) = context.queue.pop_front() else {
                    return;
                };
                let frame =
                    ScriptFrame::boxed(job.script, context.namespace.clone(), job.config.trap_errors);
                context.running = Some(Running {
                    call: job.call,
                    stack: FrameStack::new(frame),
                    config: job.config,
                });
            }
            let Some(running) = context.running.as_mut() else {
                return;
            };
            let mut script_env = UnitScriptEnv {
                env: &mut *env,
                reply: reply.clone(),
                log_level: running.config.log_level,
            };
            match running.stack.run(&mut script_env) {
                StackOutcome::Suspended(match_id) => {
                    tracing::trace!(context = key, match_id, "script suspended");
                    return;
                }
                StackOutcome::Done { state, result } => {
                    if let Some(done) = context.running.take() {
                        answer(&done.call, state, result, env);
                    }
                }
            }
        }
    }
}

fn context_key(call: &Call) -> String {
    call.from()
        .map(|from| from.component().to_string())
        .unwrap_or_default()
}

fn answer(call: &Call, state: State, result: Vec<Value>, env: &mut Env<'_>) {
    if !call.expects_reply() {
        if state == State::Error {
            let error = error_of(&result);
            env.log(LogLevel::Error, format!("script failed: {}", error.message));
        }
        return;
    }
    let sent = match state {
        State::Ok => env.reply(call, result),
        State::Error => env.error(call, error_of(&result)),
        State::Break | State::Continue => env.error(
            call,
            PError::script("break or continue outside of a loop"),
        ),
        State::Incomplete => return,
    };
    if let Err(err) = sent {
        tracing::warn!(error = %err, "script answer dropped");
    }
}

fn abort(context: &mut CallerContext, env: &mut Env<'_>) -> usize {
    let mut aborted = 0;
    let running = context.running.take().map(|running| running.call);
    let queued = context.queue.drain(..).map(|job| job.call);
    for call in running.into_iter().chain(queued) {
        aborted += 1;
        if call.expects_reply() {
            if let Err(err) = env.error(&call, PError::cancelled("script cleared")) {
                tracing::warn!(error = %err, "cancellation answer dropped");
            }
        }
    }
    aborted
}

fn unavailable() -> PError {
    PError::new(category::LIFECYCLE, "script executor is not available")
}

/// Behavior of the `core:script` type.
pub fn script_behavior() -> Arc<dyn Behavior> {
    Arc::new(|b: &mut IterationBuilder| -> anyhow::Result<()> {
        let executor = b.add_reference(
            ReferenceSpec::new("executor", |_env| Ok(ScriptExecutor::new())).on_dispose(
                |mut executor: ScriptExecutor, env| {
                    let aborted = executor.clear_all(env);
                    if aborted > 0 {
                        tracing::debug!(aborted, "scripts aborted on dispose");
                    }
                },
            ),
        )?;

        let eval = executor.clone();
        b.raw(EVAL_CONTROL, move |call, env| {
            eval.with(|executor| {
                if call.is_response() {
                    executor.handle_response(call, env);
                    Ok(())
                } else {
                    executor.eval(call, env)
                }
            })
            .unwrap_or_else(|| Err(unavailable()))
        })?;

        b.raw(CLEAR_CONTROL, move |call, env| {
            if !call.is_request() {
                return Ok(());
            }
            let aborted = executor
                .with(|executor| executor.clear(call, env))
                .ok_or_else(unavailable)?;
            if call.expects_reply() {
                env.reply(call, vec![Value::Int(aborted as i64)])?;
            }
            Ok(())
        })?;
        Ok(())
    })
}

/// Add the script executor type to `catalog`.
pub fn register(catalog: &mut ComponentCatalog) {
    catalog.register(SCRIPT_TYPE, script_behavior);
}

/// Add an executor unit under `parent` and register it as the
/// [`SCRIPT_SERVICE`] for units installed afterwards.
pub fn add_executor(
    root: &mut Root,
    parent: &ComponentAddress,
    id: &str,
) -> Result<ComponentAddress, RuntimeError> {
    let address = root.add_child(parent, id, SCRIPT_TYPE)?;
    root.register_service(SCRIPT_SERVICE, address.clone());
    Ok(address)
}
