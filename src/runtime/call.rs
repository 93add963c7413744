//! Correlated call envelopes
//!
//! A [`Call`] is immutable once created. Answering a request produces a new
//! reply or error call carrying the request's match id; a shared flag makes
//! sure each request is answered at most once, whichever clone answers it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::address::ControlAddress;
use super::error::CallError;
use super::value::{PError, Value};

static NEXT_MATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique match id
pub fn next_match_id() -> u64 {
    NEXT_MATCH_ID.fetch_add(1, Ordering::Relaxed)
}

/// Kind of call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// Request expecting a reply or error
    Request,
    /// Request that never produces a reply
    RequestQuiet,
    /// Successful answer to a request
    Reply,
    /// Failed answer to a request
    Error,
}

/// Immutable message envelope
#[derive(Clone)]
pub struct Call {
    match_id: u64,
    from: Option<ControlAddress>,
    to: ControlAddress,
    time: i64,
    kind: CallKind,
    args: Arc<[Value]>,
    answered: Arc<AtomicBool>,
}

impl Call {
    /// Create a request expecting a reply, with a fresh match id
    pub fn request(to: ControlAddress, from: ControlAddress, time: i64, args: Vec<Value>) -> Self {
        Self::build(next_match_id(), Some(from), to, time, CallKind::Request, args)
    }

    /// Create a quiet request; `from` is informational only
    pub fn quiet(
        to: ControlAddress,
        from: Option<ControlAddress>,
        time: i64,
        args: Vec<Value>,
    ) -> Self {
        Self::build(
            next_match_id(),
            from,
            to,
            time,
            CallKind::RequestQuiet,
            args,
        )
    }

    fn build(
        match_id: u64,
        from: Option<ControlAddress>,
        to: ControlAddress,
        time: i64,
        kind: CallKind,
        args: Vec<Value>,
    ) -> Self {
        Self {
            match_id,
            from,
            to,
            time,
            kind,
            args: Arc::from(args),
            answered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Correlation id
    pub fn match_id(&self) -> u64 {
        self.match_id
    }

    /// Source address, if any
    pub fn from(&self) -> Option<&ControlAddress> {
        self.from.as_ref()
    }

    /// Destination address
    pub fn to(&self) -> &ControlAddress {
        &self.to
    }

    /// Logical send time
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Call kind
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// Payload
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Payload element at `index`, or [`Value::None`]
    pub fn arg(&self, index: usize) -> &Value {
        static NONE: Value = Value::None;
        self.args.get(index).unwrap_or(&NONE)
    }

    /// Request or quiet request
    pub fn is_request(&self) -> bool {
        matches!(self.kind, CallKind::Request | CallKind::RequestQuiet)
    }

    /// Reply or error
    pub fn is_response(&self) -> bool {
        matches!(self.kind, CallKind::Reply | CallKind::Error)
    }

    /// Request whose sender waits for an answer
    pub fn expects_reply(&self) -> bool {
        self.kind == CallKind::Request
    }

    /// Whether a reply or error has been produced for this request
    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::Acquire)
    }

    /// Answer this request successfully
    pub fn reply(&self, args: Vec<Value>) -> Result<Call, CallError> {
        let to = self.claim_answer()?;
        Ok(Self::build(
            self.match_id,
            Some(self.to.clone()),
            to,
            self.time,
            CallKind::Reply,
            args,
        ))
    }

    /// Answer this request with a structured error
    pub fn error(&self, error: PError) -> Result<Call, CallError> {
        self.error_with(vec![Value::Error(error)])
    }

    /// Answer this request with an arbitrary error payload
    pub fn error_with(&self, args: Vec<Value>) -> Result<Call, CallError> {
        let to = self.claim_answer()?;
        Ok(Self::build(
            self.match_id,
            Some(self.to.clone()),
            to,
            self.time,
            CallKind::Error,
            args,
        ))
    }

    fn claim_answer(&self) -> Result<ControlAddress, CallError> {
        match self.kind {
            CallKind::Request => {}
            CallKind::RequestQuiet => return Err(CallError::QuietRequest(self.match_id)),
            CallKind::Reply | CallKind::Error => {
                return Err(CallError::NotARequest(self.match_id));
            }
        }
        let to = self
            .from
            .clone()
            .ok_or(CallError::NoSource(self.match_id))?;
        if self.answered.swap(true, Ordering::AcqRel) {
            return Err(CallError::AlreadyAnswered(self.match_id));
        }
        Ok(to)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("match_id", &self.match_id)
            .field("kind", &self.kind)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("time", &self.time)
            .field("args", &self.args)
            .finish()
    }
}
