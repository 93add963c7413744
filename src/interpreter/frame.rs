//! Stack frames: the suspend/resume unit of the interpreter.
//!
//! A frame starts `Incomplete` and becomes terminal exactly once. Each call
//! to [`StackFrame::process`] either finishes the frame, sends one call and
//! waits for [`StackFrame::post_call`], or returns a child frame whose
//! terminal state comes back through [`StackFrame::post_result`]. The
//! [`FrameStack`] drives frames until the top one is waiting on a call.

use crate::runtime::address::ControlAddress;
use crate::runtime::call::{Call, CallKind};
use crate::runtime::env::LogLevel;
use crate::runtime::value::{PError, Value};

/// Frame state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Still running.
    Incomplete,
    /// Finished with a result.
    Ok,
    /// Failed; the result holds one error value.
    Error,
    /// `break` signal travelling to the enclosing loop.
    Break,
    /// `continue` signal travelling to the enclosing loop.
    Continue,
}

impl State {
    /// Whether the frame has finished.
    pub fn is_terminal(self) -> bool {
        self != State::Incomplete
    }
}

/// What frames may do to the outside world.
pub trait ScriptEnv {
    /// Current logical time.
    fn time(&self) -> i64;
    /// Address replies to script calls should come back to.
    fn reply_address(&self) -> Option<ControlAddress>;
    /// Send a call.
    fn send(&mut self, call: Call);
    /// Record a log line.
    fn log(&mut self, level: LogLevel, message: String);
}

/// One suspendable unit of evaluation.
pub trait StackFrame: Send {
    /// Current state.
    fn state(&self) -> State;

    /// Advance the frame; a returned frame is pushed on top of this one.
    fn process(&mut self, env: &mut dyn ScriptEnv) -> Option<Box<dyn StackFrame>>;

    /// Answer to the call this frame is waiting on.
    fn post_call(&mut self, _call: &Call) {}

    /// Terminal state and result of the child frame this frame pushed.
    fn post_result(&mut self, _state: State, _result: Vec<Value>) {}

    /// Match id of the call this frame is waiting on.
    fn awaiting(&self) -> Option<u64> {
        None
    }

    /// Move the result out of a terminal frame.
    fn take_result(&mut self) -> Vec<Value>;
}

/// Structured error carried by an `Error` result.
pub fn error_of(result: &[Value]) -> PError {
    match result.first() {
        Some(Value::Error(error)) => error.clone(),
        _ => PError::from_args(result),
    }
}

/// Frame that is terminal from the start.
pub struct ResultFrame {
    state: State,
    result: Vec<Value>,
}

impl ResultFrame {
    /// Frame finishing in `state` with `result`.
    pub fn new(state: State, result: Vec<Value>) -> Self {
        Self { state, result }
    }

    /// Successful frame.
    pub fn ok(result: Vec<Value>) -> Box<dyn StackFrame> {
        Box::new(Self::new(State::Ok, result))
    }

    /// Failed frame.
    pub fn error(error: PError) -> Box<dyn StackFrame> {
        Box::new(Self::new(State::Error, vec![Value::Error(error)]))
    }
}

impl StackFrame for ResultFrame {
    fn state(&self) -> State {
        self.state
    }

    fn process(&mut self, _env: &mut dyn ScriptEnv) -> Option<Box<dyn StackFrame>> {
        None
    }

    fn take_result(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.result)
    }
}

/// Frame that sends one request and finishes with its answer.
pub struct CallFrame {
    to: ControlAddress,
    args: Vec<Value>,
    pending: Option<u64>,
    state: State,
    result: Vec<Value>,
}

impl CallFrame {
    /// Request `to` with `args`.
    pub fn new(to: ControlAddress, args: Vec<Value>) -> Self {
        Self {
            to,
            args,
            pending: None,
            state: State::Incomplete,
            result: Vec::new(),
        }
    }

    fn finish(&mut self, state: State, result: Vec<Value>) {
        self.pending = None;
        self.state = state;
        self.result = result;
    }
}

impl StackFrame for CallFrame {
    fn state(&self) -> State {
        self.state
    }

    fn process(&mut self, env: &mut dyn ScriptEnv) -> Option<Box<dyn StackFrame>> {
        let Some(from) = env.reply_address() else {
            let error = PError::script(format!("no reply address for call to {}", self.to));
            self.finish(State::Error, vec![Value::Error(error)]);
            return None;
        };
        let call = Call::request(
            self.to.clone(),
            from,
            env.time(),
            std::mem::take(&mut self.args),
        );
        self.pending = Some(call.match_id());
        env.send(call);
        None
    }

    fn post_call(&mut self, call: &Call) {
        if self.pending != Some(call.match_id()) {
            return;
        }
        match call.kind() {
            CallKind::Reply => self.finish(State::Ok, call.args().to_vec()),
            CallKind::Error => {
                let error = PError::from_args(call.args());
                self.finish(State::Error, vec![Value::Error(error)]);
            }
            CallKind::Request | CallKind::RequestQuiet => {}
        }
    }

    fn awaiting(&self) -> Option<u64> {
        self.pending
    }

    fn take_result(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.result)
    }
}

/// Builds the next frame from the previous frame's result.
pub type Continuation = Box<dyn FnOnce(Vec<Value>) -> Box<dyn StackFrame> + Send>;

/// Runs a frame, then the frame built from its `Ok` result.
///
/// Any other terminal state of the base frame finishes the sequence.
pub struct ThenFrame {
    base: Option<Box<dyn StackFrame>>,
    next: Option<Continuation>,
    previous: Option<Vec<Value>>,
    state: State,
    result: Vec<Value>,
}

impl ThenFrame {
    /// Sequence `base` with `next`.
    pub fn new(base: Box<dyn StackFrame>, next: Continuation) -> Self {
        Self {
            base: Some(base),
            next: Some(next),
            previous: None,
            state: State::Incomplete,
            result: Vec::new(),
        }
    }
}

impl StackFrame for ThenFrame {
    fn state(&self) -> State {
        self.state
    }

    fn process(&mut self, _env: &mut dyn ScriptEnv) -> Option<Box<dyn StackFrame>> {
        if let Some(base) = self.base.take() {
            return Some(base);
        }
        if let (Some(previous), Some(next)) = (self.previous.take(), self.next.take()) {
            return Some(next(previous));
        }
        self.state = State::Ok;
        None
    }

    fn post_result(&mut self, state: State, result: Vec<Value>) {
        if state == State::Ok && self.next.is_some() {
            self.previous = Some(result);
            return;
        }
        self.next = None;
        self.state = state;
        self.result = result;
    }

    fn take_result(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.result)
    }
}

/// Builds a fallback frame from the failure of the guarded frame.
pub type Fallback = Box<dyn FnOnce(PError) -> Box<dyn StackFrame> + Send>;

/// Runs a frame; on `Error`, runs the fallback built from the error.
pub struct OnFailFrame {
    body: Option<Box<dyn StackFrame>>,
    fallback: Option<Fallback>,
    failure: Option<PError>,
    state: State,
    result: Vec<Value>,
}

impl OnFailFrame {
    /// Guard `body` with `fallback`.
    pub fn new(body: Box<dyn StackFrame>, fallback: Fallback) -> Self {
        Self {
            body: Some(body),
            fallback: Some(fallback),
            failure: None,
            state: State::Incomplete,
            result: Vec::new(),
        }
    }
}

impl StackFrame for OnFailFrame {
    fn state(&self) -> State {
        self.state
    }

    fn process(&mut self, _env: &mut dyn ScriptEnv) -> Option<Box<dyn StackFrame>> {
        if let Some(body) = self.body.take() {
            return Some(body);
        }
        if let (Some(error), Some(fallback)) = (self.failure.take(), self.fallback.take()) {
            return Some(fallback(error));
        }
        self.state = State::Error;
        None
    }

    fn post_result(&mut self, state: State, result: Vec<Value>) {
        if state == State::Error && self.fallback.is_some() {
            self.failure = Some(error_of(&result));
            return;
        }
        self.state = state;
        self.result = result;
    }

    fn take_result(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.result)
    }
}

/// Combinators on boxed frames.
pub trait FrameExt {
    /// Run the frame built by `next` from this frame's `Ok` result.
    fn then<F>(self, next: F) -> Box<dyn StackFrame>
    where
        F: FnOnce(Vec<Value>) -> Box<dyn StackFrame> + Send + 'static;

    /// Run the frame built by `fallback` when this frame fails.
    fn on_fail<F>(self, fallback: F) -> Box<dyn StackFrame>
    where
        F: FnOnce(PError) -> Box<dyn StackFrame> + Send + 'static;
}

impl FrameExt for Box<dyn StackFrame> {
    fn then<F>(self, next: F) -> Box<dyn StackFrame>
    where
        F: FnOnce(Vec<Value>) -> Box<dyn StackFrame> + Send + 'static,
    {
        Box::new(ThenFrame::new(self, Box::new(next)))
    }

    fn on_fail<F>(self, fallback: F) -> Box<dyn StackFrame>
    where
        F: FnOnce(PError) -> Box<dyn StackFrame> + Send + 'static,
    {
        Box::new(OnFailFrame::new(self, Box::new(fallback)))
    }
}

/// Where a [`FrameStack`] stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StackOutcome {
    /// Waiting for the answer to this match id.
    Suspended(u64),
    /// Bottom frame finished.
    Done {
        /// Terminal state of the bottom frame.
        state: State,
        /// Its result.
        result: Vec<Value>,
    },
}

/// Stack of frames evaluated without blocking.
pub struct FrameStack {
    frames: Vec<Box<dyn StackFrame>>,
}

impl FrameStack {
    /// Stack with `bottom` as its only frame.
    pub fn new(bottom: Box<dyn StackFrame>) -> Self {
        Self {
            frames: vec![bottom],
        }
    }

    /// Process until the stack is done or the top frame waits on a call.
    pub fn run(&mut self, env: &mut dyn ScriptEnv) -> StackOutcome {
        loop {
            let Some(top) = self.frames.last_mut() else {
                return StackOutcome::Done {
                    state: State::Ok,
                    result: Vec::new(),
                };
            };
            if top.state().is_terminal() {
                let state = top.state();
                let result = top.take_result();
                self.frames.pop();
                match self.frames.last_mut() {
                    Some(parent) => parent.post_result(state, result),
                    None => return StackOutcome::Done { state, result },
                }
                continue;
            }
            if let Some(match_id) = top.awaiting() {
                return StackOutcome::Suspended(match_id);
            }
            if let Some(child) = top.process(env) {
                self.frames.push(child);
            }
        }
    }

    /// Hand an answer to the waiting top frame; `false` if it is not the
    /// one being waited on.
    pub fn post_reply(&mut self, call: &Call) -> bool {
        match self.frames.last_mut() {
            Some(top) if top.awaiting() == Some(call.match_id()) => {
                top.post_call(call);
                true
            }
            _ => false,
        }
    }

    /// Match id the stack is waiting on.
    pub fn awaiting(&self) -> Option<u64> {
        self.frames.last().and_then(|top| top.awaiting())
    }

    /// Number of frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
