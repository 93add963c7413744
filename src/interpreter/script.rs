//! Frame evaluating a parsed script line by line.

use std::sync::Arc;

use super::ast::{Line, Part, Script, Word};
use super::commands::CommandContext;
use super::frame::{CallFrame, ResultFrame, ScriptEnv, StackFrame, State, error_of};
use super::namespace::{CONTEXT_VAR, ERRORS_VAR, Namespace};
use crate::runtime::address::{Address, ControlAddress};
use crate::runtime::value::{PError, Value};

// What the child frame on top of this one is computing.
enum Pending {
    Word,
    Part,
    Command,
}

/// Evaluates a [`Script`] against a namespace.
///
/// Words are resolved left to right; a `[substitution]` suspends the line on
/// a child frame. When every word is ready the command runs as a child
/// frame. In trap mode `_ERRORS` starts empty, a failing line records
/// `line N: message` in it and evaluation continues with the next line.
pub struct ScriptFrame {
    script: Arc<Script>,
    namespace: Namespace,
    trap_errors: bool,
    started: bool,
    line: usize,
    words: Vec<Value>,
    parts: Option<(usize, String)>,
    pending: Option<Pending>,
    trapped: Vec<String>,
    last: Vec<Value>,
    state: State,
    result: Vec<Value>,
}

impl ScriptFrame {
    /// Frame evaluating `script` in `namespace`.
    pub fn new(script: impl Into<Arc<Script>>, namespace: Namespace, trap_errors: bool) -> Self {
        Self {
            script: script.into(),
            namespace,
            trap_errors,
            started: false,
            line: 0,
            words: Vec::new(),
            parts: None,
            pending: None,
            trapped: Vec::new(),
            last: Vec::new(),
            state: State::Incomplete,
            result: Vec::new(),
        }
    }

    /// Boxed frame.
    pub fn boxed(
        script: impl Into<Arc<Script>>,
        namespace: Namespace,
        trap_errors: bool,
    ) -> Box<dyn StackFrame> {
        Box::new(Self::new(script, namespace, trap_errors))
    }

    fn finish(&mut self, state: State, result: Vec<Value>) {
        self.state = state;
        self.result = result;
    }

    fn next_line(&mut self) {
        self.line += 1;
        self.words.clear();
        self.parts = None;
    }

    fn fail(&mut self, error: PError) {
        if !self.trap_errors {
            self.finish(State::Error, vec![Value::Error(error)]);
            return;
        }
        let number = self.script.lines.get(self.line).map_or(0, |line| line.number);
        let message = format!("line {}: {}", number, error.message);
        self.namespace.push(ERRORS_VAR, Value::text(message.clone()));
        self.trapped.push(message);
        self.next_line();
    }

    fn complete(&mut self) {
        if self.trapped.is_empty() {
            let last = std::mem::take(&mut self.last);
            self.finish(State::Ok, last);
        } else {
            let error = PError::script(self.trapped.join("\n"));
            self.finish(State::Error, vec![Value::Error(error)]);
        }
    }

    // Substitutions never trap; a failure fails the enclosing line.
    fn child_script(&self, script: &Script) -> Box<dyn StackFrame> {
        ScriptFrame::boxed(script.clone(), self.namespace.clone(), false)
    }

    fn variable(&self, name: &str) -> Result<Value, PError> {
        self.namespace
            .get(name)
            .ok_or_else(|| PError::script(format!("no such variable '{}'", name)))
    }

    // Resolve words of the current line; `Some` when a substitution suspends.
    fn resolve_words(&mut self, line: &Line) -> Result<Option<Box<dyn StackFrame>>, PError> {
        while self.words.len() < line.words.len() {
            match &line.words[self.words.len()] {
                Word::Literal(text) => self.words.push(literal(text)),
                Word::Variable(name) => {
                    let value = self.variable(name)?;
                    self.words.push(value);
                }
                Word::Block(text) => self.words.push(Value::text(text.clone())),
                Word::Substitution(script) => {
                    self.pending = Some(Pending::Word);
                    return Ok(Some(self.child_script(script)));
                }
                Word::Quoted(parts) => {
                    let (index, mut text) = self.parts.take().unwrap_or_default();
                    for (offset, part) in parts[index..].iter().enumerate() {
                        match part {
                            Part::Text(piece) => text.push_str(piece),
                            Part::Variable(name) => text.push_str(&self.variable(name)?.to_string()),
                            Part::Substitution(script) => {
                                self.parts = Some((index + offset + 1, text));
                                self.pending = Some(Pending::Part);
                                return Ok(Some(self.child_script(script)));
                            }
                        }
                    }
                    self.words.push(Value::Text(text));
                }
            }
        }
        Ok(None)
    }

    fn command_frame(&mut self) -> Result<Box<dyn StackFrame>, PError> {
        let mut args = std::mem::take(&mut self.words);
        if args.is_empty() {
            return Ok(ResultFrame::ok(Vec::new()));
        }
        let head = args.remove(0);

        if let Value::Address(Address::Control(to)) = &head {
            return Ok(Box::new(CallFrame::new(to.clone(), args)));
        }

        let name = head.to_string();
        if let Some(command) = self.namespace.command(&name) {
            let ctx = CommandContext {
                namespace: &self.namespace,
            };
            return command.create(args, &ctx);
        }

        if name.starts_with('.') {
            let to = self.relative_control(&name)?;
            return Ok(Box::new(CallFrame::new(to, args)));
        }

        if name.contains('/') && name.contains('.') {
            let to = ControlAddress::parse(&name)
                .map_err(|err| PError::argument(format!("bad control address '{}': {}", name, err)))?;
            return Ok(Box::new(CallFrame::new(to, args)));
        }

        Err(PError::script(format!("unknown command '{}'", name)))
    }

    // `.id` or `./child/path.id` against the `_CTXT` component.
    fn relative_control(&self, word: &str) -> Result<ControlAddress, PError> {
        let context = self
            .namespace
            .get(CONTEXT_VAR)
            .and_then(|value| value.as_component_address())
            .ok_or_else(|| PError::script(format!("no {} for '{}'", CONTEXT_VAR, word)))?;
        let relative = word.strip_prefix("./").unwrap_or(word);
        let (path, id) = relative
            .rsplit_once('.')
            .ok_or_else(|| PError::argument(format!("bad relative address '{}'", word)))?;
        let mut component = context;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            component = component.child(segment)?;
        }
        Ok(component.control(id)?)
    }
}

// Literal words read as numbers when they parse as one.
fn literal(text: &str) -> Value {
    if let Ok(num) = text.parse::<i64>() {
        return Value::Int(num);
    }
    if text.contains(['.', 'e', 'E']) && !text.contains('/') {
        if let Ok(num) = text.parse::<f64>() {
            if num.is_finite() {
                return Value::Float(num);
            }
        }
    }
    Value::text(text)
}

fn collapse(mut result: Vec<Value>) -> Value {
    match result.len() {
        0 => Value::None,
        1 => result.remove(0),
        _ => Value::List(result),
    }
}

impl StackFrame for ScriptFrame {
    fn state(&self) -> State {
        self.state
    }

    fn process(&mut self, _env: &mut dyn ScriptEnv) -> Option<Box<dyn StackFrame>> {
        if !self.started {
            self.started = true;
            if self.trap_errors {
                self.namespace.set(ERRORS_VAR, Value::List(Vec::new()));
            }
        }
        while !self.state.is_terminal() {
            let script = self.script.clone();
            let Some(line) = script.lines.get(self.line) else {
                self.complete();
                return None;
            };
            match self.resolve_words(line) {
                Ok(Some(child)) => return Some(child),
                Ok(None) => {}
                Err(error) => {
                    self.fail(error);
                    continue;
                }
            }
            match self.command_frame() {
                Ok(child) => {
                    self.pending = Some(Pending::Command);
                    return Some(child);
                }
                Err(error) => self.fail(error),
            }
        }
        None
    }

    fn post_result(&mut self, state: State, result: Vec<Value>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match state {
            State::Ok => match pending {
                Pending::Word => self.words.push(collapse(result)),
                Pending::Part => {
                    if let Some((_, text)) = self.parts.as_mut() {
                        text.push_str(&collapse(result).to_string());
                    }
                }
                Pending::Command => {
                    self.last = result;
                    self.next_line();
                }
            },
            State::Error => self.fail(error_of(&result)),
            State::Break | State::Continue => self.finish(state, result),
            State::Incomplete => {}
        }
    }

    fn take_result(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::commands::install_builtins;
    use crate::interpreter::frame::tests::RecordingEnv;
    use crate::interpreter::frame::{FrameStack, StackOutcome};
    use crate::interpreter::parser::parse_script;

    fn run(source: &str, trap: bool) -> (StackOutcome, Namespace, RecordingEnv) {
        let namespace = Namespace::new();
        install_builtins(&namespace);
        let script = parse_script(source).unwrap();
        let mut env = RecordingEnv::new();
        let mut stack = FrameStack::new(ScriptFrame::boxed(script, namespace.clone(), trap));
        let outcome = stack.run(&mut env);
        (outcome, namespace, env)
    }

    #[test]
    fn test_substitution_and_variables() {
        let (outcome, namespace, _) = run("set a 2\nset b [list $a x]\nset c \"v=$a\"", false);
        assert_eq!(
            namespace.get("b"),
            Some(Value::List(vec![Value::Int(2), Value::text("x")]))
        );
        assert_eq!(
            outcome,
            StackOutcome::Done {
                state: State::Ok,
                result: vec![Value::text("v=2")],
            }
        );
    }

    #[test]
    fn test_error_stops_without_trap() {
        let (outcome, namespace, _) = run("set a 1\nnope\nset a 2", false);
        let StackOutcome::Done { state, result } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state, State::Error);
        assert_eq!(error_of(&result).message, "unknown command 'nope'");
        assert_eq!(namespace.get("a"), Some(Value::Int(1)));
    }

    #[test]
    fn test_trap_collects_and_continues() {
        let (outcome, namespace, _) = run("nope\nset a [error bad]\nset b 3", true);
        let StackOutcome::Done { state, result } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state, State::Error);
        assert_eq!(
            error_of(&result).message,
            "line 1: unknown command 'nope'\nline 2: bad"
        );
        assert_eq!(namespace.get("b"), Some(Value::Int(3)));
        assert_eq!(namespace.get("a"), None);
    }

    #[test]
    fn test_control_word_suspends() {
        let (outcome, _, env) = run("/root/mixer.gain 0.5", false);
        assert!(matches!(outcome, StackOutcome::Suspended(_)));
        assert_eq!(env.sent.len(), 1);
        assert_eq!(env.sent[0].to().to_string(), "/root/mixer.gain");
        assert_eq!(env.sent[0].args(), &[Value::Float(0.5)]);
    }

    #[test]
    fn test_relative_control_uses_context() {
        let (outcome, _, env) = run("set _CTXT /root/rack\n./osc.freq 440", false);
        assert!(matches!(outcome, StackOutcome::Suspended(_)));
        assert_eq!(env.sent[0].to().to_string(), "/root/rack/osc.freq");
    }
}
