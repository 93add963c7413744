//! Execution clock and activity state machine
//!
//! One [`ExecutionContext`] is shared by every unit of a root. It owns the
//! logical clock and the New/Active/Idle status, and keeps the ordered list
//! of listener units that are notified on state changes and ticks.

use serde::{Deserialize, Serialize};

use super::arena::UnitId;

/// Whether `time` is not older than `previous`.
///
/// Uses wrapping subtraction read as a signed value, so the check stays
/// correct across an `i64` wrap-around as long as the two stamps are less
/// than half the range apart.
pub fn is_latest(time: i64, previous: i64) -> bool {
    time.wrapping_sub(previous) >= 0
}

/// Whether `time` is strictly newer than `previous` (see [`is_latest`]).
pub fn is_after(time: i64, previous: i64) -> bool {
    time.wrapping_sub(previous) > 0
}

/// Activity status of a root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecState {
    /// Never started
    New,
    /// Running: hooks fired, ticks delivered
    Active,
    /// Stopped after having run
    Idle,
}

/// Accepted state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Previous state
    pub from: ExecState,
    /// New state
    pub to: ExecState,
}

/// Clock plus state machine shared by a root's units
#[derive(Debug)]
pub struct ExecutionContext {
    state: ExecState,
    time: i64,
    listeners: Vec<UnitId>,
}

impl ExecutionContext {
    /// Create a context in the `New` state
    pub fn new(time: i64) -> Self {
        Self {
            state: ExecState::New,
            time,
            listeners: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> ExecState {
        self.state
    }

    /// Whether the context is `Active`
    pub fn is_active(&self) -> bool {
        self.state == ExecState::Active
    }

    /// Current logical time
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Request a state change.
    ///
    /// Returns `None` when the state is unchanged or the move is not allowed
    /// (nothing returns to `New`, and `New` can only become `Active`).
    pub fn set_state(&mut self, to: ExecState) -> Option<Transition> {
        let from = self.state;
        let allowed = matches!(
            (from, to),
            (ExecState::New, ExecState::Active)
                | (ExecState::Active, ExecState::Idle)
                | (ExecState::Idle, ExecState::Active)
        );
        if !allowed {
            return None;
        }
        self.state = to;
        tracing::debug!(?from, ?to, "execution state changed");
        Some(Transition { from, to })
    }

    /// Advance the clock; non-advancing timestamps are ignored
    pub fn tick(&mut self, time: i64) -> bool {
        if !is_after(time, self.time) {
            return false;
        }
        self.time = time;
        true
    }

    /// Register a listener unit (idempotent)
    pub fn attach(&mut self, unit: UnitId) {
        if !self.listeners.contains(&unit) {
            self.listeners.push(unit);
        }
    }

    /// Remove a listener unit
    pub fn detach(&mut self, unit: UnitId) {
        self.listeners.retain(|id| *id != unit);
    }

    /// Listener units in attach order
    pub fn listeners(&self) -> &[UnitId] {
        &self.listeners
    }
}
