//! Built-in script commands.

use std::collections::VecDeque;
use std::sync::Arc;

use super::ast::Script;
use super::frame::{FrameExt, ResultFrame, ScriptEnv, StackFrame, State, error_of};
use super::namespace::Namespace;
use super::parser::parse_script;
use super::script::ScriptFrame;
use crate::runtime::env::LogLevel;
use crate::runtime::value::{PError, Value};

/// Variable holding the error inside a `try` fallback.
pub const ERROR_VAR: &str = "_ERROR";

/// What a command sees when it is invoked.
pub struct CommandContext<'a> {
    /// Scope of the invoking line.
    pub namespace: &'a Namespace,
}

/// Named command: turns evaluated arguments into a frame.
pub trait Command: Send + Sync {
    /// Frame computing the command's result.
    fn create(
        &self,
        args: Vec<Value>,
        ctx: &CommandContext<'_>,
    ) -> Result<Box<dyn StackFrame>, PError>;
}

impl<F> Command for F
where
    F: Fn(Vec<Value>, &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> + Send + Sync,
{
    fn create(
        &self,
        args: Vec<Value>,
        ctx: &CommandContext<'_>,
    ) -> Result<Box<dyn StackFrame>, PError> {
        self(args, ctx)
    }
}

/// Define every built-in command in `namespace`.
pub fn install_builtins(namespace: &Namespace) {
    namespace.define("set", Arc::new(set));
    namespace.define("list", Arc::new(list));
    namespace.define("incr", Arc::new(incr));
    namespace.define("error", Arc::new(error));
    namespace.define("break", Arc::new(signal(State::Break)));
    namespace.define("continue", Arc::new(signal(State::Continue)));
    namespace.define("foreach", Arc::new(foreach));
    namespace.define("try", Arc::new(try_command));
    namespace.define("eval", Arc::new(eval));
    namespace.define("log", Arc::new(log));
}

fn parse_body(value: &Value) -> Result<Arc<Script>, PError> {
    parse_script(&value.to_string())
        .map(Arc::new)
        .map_err(|err| PError::script(err.to_string()))
}

fn usage(text: &str) -> PError {
    PError::argument(format!("usage: {}", text))
}

fn set(args: Vec<Value>, ctx: &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> {
    match args.as_slice() {
        [name] => {
            let name = name.to_string();
            let value = ctx
                .namespace
                .get(&name)
                .ok_or_else(|| PError::script(format!("no such variable '{}'", name)))?;
            Ok(ResultFrame::ok(vec![value]))
        }
        [name, value] => {
            ctx.namespace.set(&name.to_string(), value.clone());
            Ok(ResultFrame::ok(vec![value.clone()]))
        }
        _ => Err(usage("set name ?value?")),
    }
}

fn list(args: Vec<Value>, _ctx: &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> {
    Ok(ResultFrame::ok(vec![Value::List(args)]))
}

fn incr(args: Vec<Value>, ctx: &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> {
    let (name, by) = match args.as_slice() {
        [name] => (name.to_string(), 1),
        [name, by] => (
            name.to_string(),
            by.as_int()
                .ok_or_else(|| PError::argument(format!("expected integer, got '{}'", by)))?,
        ),
        _ => return Err(usage("incr name ?increment?")),
    };
    let current = match ctx.namespace.get(&name) {
        None => 0,
        Some(value) => value
            .as_int()
            .ok_or_else(|| PError::argument(format!("'{}' is not an integer", name)))?,
    };
    let next = Value::Int(current.wrapping_add(by));
    ctx.namespace.set(&name, next.clone());
    Ok(ResultFrame::ok(vec![next]))
}

fn error(args: Vec<Value>, _ctx: &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> {
    if let [Value::Error(error)] = args.as_slice() {
        return Ok(ResultFrame::error(error.clone()));
    }
    let message: Vec<String> = args.iter().map(Value::to_string).collect();
    Ok(ResultFrame::error(PError::script(message.join(" "))))
}

fn signal(
    state: State,
) -> impl Fn(Vec<Value>, &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> + Send + Sync
{
    move |_args: Vec<Value>, _ctx: &CommandContext<'_>| -> Result<Box<dyn StackFrame>, PError> {
        Ok(Box::new(ResultFrame::new(state, Vec::new())))
    }
}

fn foreach(args: Vec<Value>, ctx: &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> {
    let [var, items, body] = args.as_slice() else {
        return Err(usage("foreach var list body"));
    };
    Ok(Box::new(ForeachFrame {
        var: var.to_string(),
        items: items.to_list().into(),
        body: parse_body(body)?,
        namespace: ctx.namespace.clone(),
        state: State::Incomplete,
        result: Vec::new(),
    }))
}

fn try_command(args: Vec<Value>, ctx: &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> {
    let (body, fallback) = match args.as_slice() {
        [body] => (parse_body(body)?, None),
        [body, fallback] => (parse_body(body)?, Some(parse_body(fallback)?)),
        _ => return Err(usage("try body ?fallback?")),
    };
    let namespace = ctx.namespace.clone();
    let frame = ScriptFrame::boxed(body, namespace.clone(), false);
    Ok(frame.on_fail(move |error| match fallback {
        Some(script) => {
            namespace.set(ERROR_VAR, Value::Error(error));
            ScriptFrame::boxed(script, namespace, false)
        }
        None => ResultFrame::ok(vec![Value::Error(error)]),
    }))
}

fn eval(args: Vec<Value>, ctx: &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> {
    if args.is_empty() {
        return Err(usage("eval script"));
    }
    let source: Vec<String> = args.iter().map(Value::to_string).collect();
    let script = parse_body(&Value::Text(source.join(" ")))?;
    Ok(ScriptFrame::boxed(script, ctx.namespace.child(), false))
}

fn log(args: Vec<Value>, _ctx: &CommandContext<'_>) -> Result<Box<dyn StackFrame>, PError> {
    let (level, words) = match args.split_first() {
        Some((first, rest)) if !rest.is_empty() => match LogLevel::parse(&first.to_string()) {
            Some(level) => (level, rest),
            None => (LogLevel::Info, args.as_slice()),
        },
        _ => (LogLevel::Info, args.as_slice()),
    };
    let message: Vec<String> = words.iter().map(Value::to_string).collect();
    Ok(Box::new(LogFrame {
        level,
        message: Some(message.join(" ")),
        state: State::Incomplete,
    }))
}

struct LogFrame {
    level: LogLevel,
    message: Option<String>,
    state: State,
}

impl StackFrame for LogFrame {
    fn state(&self) -> State {
        self.state
    }

    fn process(&mut self, env: &mut dyn ScriptEnv) -> Option<Box<dyn StackFrame>> {
        if let Some(message) = self.message.take() {
            env.log(self.level, message);
        }
        self.state = State::Ok;
        None
    }

    fn take_result(&mut self) -> Vec<Value> {
        Vec::new()
    }
}

// Runs the body once per item; intercepts break and continue.
struct ForeachFrame {
    var: String,
    items: VecDeque<Value>,
    body: Arc<Script>,
    namespace: Namespace,
    state: State,
    result: Vec<Value>,
}

impl StackFrame for ForeachFrame {
    fn state(&self) -> State {
        self.state
    }

    fn process(&mut self, _env: &mut dyn ScriptEnv) -> Option<Box<dyn StackFrame>> {
        let Some(item) = self.items.pop_front() else {
            self.state = State::Ok;
            return None;
        };
        self.namespace.set(&self.var, item);
        Some(ScriptFrame::boxed(
            self.body.clone(),
            self.namespace.clone(),
            false,
        ))
    }

    fn post_result(&mut self, state: State, result: Vec<Value>) {
        match state {
            State::Ok => self.result = result,
            State::Continue | State::Incomplete => {}
            State::Break => self.state = State::Ok,
            State::Error => {
                self.state = State::Error;
                self.result = vec![Value::Error(error_of(&result))];
            }
        }
    }

    fn take_result(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.result)
    }
}
