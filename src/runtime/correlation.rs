//! Correlation of outstanding requests with their answers
//!
//! A [`CallTable`] maps match ids to continuations. Strong tables keep every
//! continuation alive until it resolves; weak tables only hold a weak handle
//! plus the caller's cancellation token, and drop entries whose caller went
//! away or cancelled before each call they handle.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::address::ControlAddress;
use super::call::{Call, CallKind};
use super::error::CallError;
use super::value::{PError, Value};

/// How a table holds on to its continuations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Hard reference until resolved or removed
    Strong,
    /// Weak handle; dropped or cancelled entries are purged
    Weak,
}

/// Eventual outcome of a request
pub struct Async<T> {
    outcome: Arc<Mutex<Option<Result<T, PError>>>>,
    cancelled: Arc<AtomicBool>,
}

impl<T> Clone for Async<T> {
    fn clone(&self) -> Self {
        Self {
            outcome: self.outcome.clone(),
            cancelled: self.cancelled.clone(),
        }
    }
}

impl<T> Default for Async<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Async<T> {
    /// Unresolved handle
    pub fn new() -> Self {
        Self {
            outcome: Arc::new(Mutex::new(None)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolve successfully; ignored once resolved or cancelled
    pub fn complete(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve with an error; ignored once resolved or cancelled
    pub fn fail(&self, error: PError) -> bool {
        self.resolve(Err(error))
    }

    fn resolve(&self, outcome: Result<T, PError>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        true
    }

    /// Give up on the outcome; a pending table entry is purged
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether [`Async::cancel`] was called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether an outcome is available
    pub fn is_done(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// Take the outcome, leaving the handle resolved-but-empty
    pub fn take(&self) -> Option<Result<T, PError>> {
        self.outcome.lock().take()
    }

    /// Weak counterpart sharing the cancellation token
    pub fn downgrade(&self) -> WeakAsync<T> {
        WeakAsync {
            outcome: Arc::downgrade(&self.outcome),
            cancelled: self.cancelled.clone(),
        }
    }
}

impl<T: Clone> Async<T> {
    /// Copy of the outcome
    pub fn result(&self) -> Option<Result<T, PError>> {
        self.outcome.lock().clone()
    }
}

impl<T> fmt::Debug for Async<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Async")
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Weak handle held by weak tables
pub struct WeakAsync<T> {
    outcome: Weak<Mutex<Option<Result<T, PError>>>>,
    cancelled: Arc<AtomicBool>,
}

impl<T> WeakAsync<T> {
    /// Whether the owner dropped or cancelled the handle
    pub fn is_dead(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.outcome.strong_count() == 0
    }

    /// Strong handle, if still alive and not cancelled
    pub fn upgrade(&self) -> Option<Async<T>> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        self.outcome.upgrade().map(|outcome| Async {
            outcome,
            cancelled: self.cancelled.clone(),
        })
    }
}

/// One-shot callback continuation
pub type Callback<T> = Box<dyn FnOnce(Result<T, PError>) + Send>;

/// Converts a reply payload into the table's value type
pub type Converter<T> = Box<dyn Fn(&[Value]) -> Result<T, PError> + Send>;

enum Continuation<T> {
    Handle(Async<T>),
    Weak(WeakAsync<T>),
    Callback(Callback<T>),
}

impl<T> Continuation<T> {
    fn is_dead(&self) -> bool {
        match self {
            Continuation::Handle(handle) => handle.is_cancelled(),
            Continuation::Weak(handle) => handle.is_dead(),
            Continuation::Callback(_) => false,
        }
    }

    fn resolve(self, outcome: Result<T, PError>) -> bool {
        match self {
            Continuation::Handle(handle) => handle.resolve(outcome),
            Continuation::Weak(handle) => match handle.upgrade() {
                Some(handle) => handle.resolve(outcome),
                None => false,
            },
            Continuation::Callback(callback) => {
                callback(outcome);
                true
            }
        }
    }
}

/// What a table did with an incoming call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Reply matched and completed its continuation
    Completed,
    /// Error, timeout or conversion failure matched and failed its continuation
    Failed,
    /// No live entry for the match id; dropped
    Unexpected,
    /// Entry existed but its owner is gone; nothing invoked
    Ignored,
}

/// Match id to continuation table
pub struct CallTable<T> {
    retention: Retention,
    converter: Converter<T>,
    entries: HashMap<u64, Continuation<T>>,
}

impl CallTable<Vec<Value>> {
    /// Table whose value is the raw reply payload
    pub fn payload(retention: Retention) -> Self {
        Self::new(retention, |args: &[Value]| Ok(args.to_vec()))
    }
}

impl<T> CallTable<T> {
    /// Table applying `converter` to reply payloads
    pub fn new<F>(retention: Retention, converter: F) -> Self
    where
        F: Fn(&[Value]) -> Result<T, PError> + Send + 'static,
    {
        Self {
            retention,
            converter: Box::new(converter),
            entries: HashMap::new(),
        }
    }

    /// Retention mode
    pub fn retention(&self) -> Retention {
        self.retention
    }

    fn insert(&mut self, call: &Call, continuation: Continuation<T>) -> Result<(), CallError> {
        if call.kind() != CallKind::Request {
            return Err(CallError::NotARequest(call.match_id()));
        }
        if self.entries.contains_key(&call.match_id()) {
            return Err(CallError::DuplicateMatchId(call.match_id()));
        }
        self.entries.insert(call.match_id(), continuation);
        Ok(())
    }

    /// Register a handle for the request's answer
    pub fn register(&mut self, call: &Call, handle: &Async<T>) -> Result<(), CallError> {
        let continuation = match self.retention {
            Retention::Strong => Continuation::Handle(handle.clone()),
            Retention::Weak => Continuation::Weak(handle.downgrade()),
        };
        self.insert(call, continuation)
    }

    /// Register a callback; callbacks are always held strongly
    pub fn register_callback<F>(&mut self, call: &Call, callback: F) -> Result<(), CallError>
    where
        F: FnOnce(Result<T, PError>) + Send + 'static,
    {
        self.insert(call, Continuation::Callback(Box::new(callback)))
    }

    /// Resolve the continuation matching a reply or error
    pub fn handle(&mut self, call: &Call) -> Resolution {
        self.purge();
        if !call.is_response() {
            return Resolution::Ignored;
        }
        let Some(continuation) = self.entries.remove(&call.match_id()) else {
            tracing::warn!(match_id = call.match_id(), from = ?call.from(), "unexpected answer dropped");
            return Resolution::Unexpected;
        };
        let outcome = match call.kind() {
            CallKind::Reply => (self.converter)(call.args()),
            _ => Err(PError::from_args(call.args())),
        };
        let failed = outcome.is_err();
        if !continuation.resolve(outcome) {
            return Resolution::Ignored;
        }
        if failed {
            Resolution::Failed
        } else {
            Resolution::Completed
        }
    }

    /// Quiet self-call dated `at` that fails the entry if still pending
    pub fn schedule_timeout(&self, match_id: u64, to: ControlAddress, at: i64) -> Call {
        Call::quiet(to, None, at, vec![Value::Int(match_id as i64)])
    }

    /// Deliver a timeout produced by [`CallTable::schedule_timeout`]
    pub fn handle_timeout(&mut self, call: &Call) -> Resolution {
        self.purge();
        let Some(match_id) = call.arg(0).as_int() else {
            return Resolution::Ignored;
        };
        let match_id = match_id as u64;
        let Some(continuation) = self.entries.remove(&match_id) else {
            return Resolution::Ignored;
        };
        tracing::debug!(match_id, "request timed out");
        let error = PError::timeout(format!("request {} timed out", match_id));
        if continuation.resolve(Err(error)) {
            Resolution::Failed
        } else {
            Resolution::Ignored
        }
    }

    /// Remove an entry without invoking it
    pub fn cancel(&mut self, match_id: u64) -> bool {
        self.entries.remove(&match_id).is_some()
    }

    /// Drop entries whose owner cancelled or released them
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, continuation| !continuation.is_dead());
        before - self.entries.len()
    }

    /// Whether the match id is pending
    pub fn contains(&self, match_id: u64) -> bool {
        self.entries.contains_key(&match_id)
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
