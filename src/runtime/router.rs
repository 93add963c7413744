//! Call dispatch
//!
//! Resolves a call's destination in the unit tree and hands it to the
//! control found there. A request that cannot be delivered is answered with
//! a `routing` error; undeliverable answers are logged and dropped.

use super::Root;
use super::call::Call;
use super::correlation::Resolution;
use super::protocol;
use super::value::{PError, Value};
use super::{HOST_CONTROL, TIMEOUT_CONTROL};

impl Root {
    /// Deliver one call
    pub(crate) fn dispatch(&mut self, call: Call) {
        tracing::debug!(
            match_id = call.match_id(),
            kind = ?call.kind(),
            to = %call.to(),
            "dispatch"
        );

        let to = call.to();
        if to.component() == &self.address && to.id().starts_with('_') {
            self.dispatch_system(&call);
            return;
        }

        let Some(&unit_id) = self.index.get(to.component()) else {
            let error = PError::routing(format!("no unit at {}", to.component()));
            self.reject(&call, error);
            return;
        };

        if call.is_request() && protocol::is_reserved(to.id()) {
            let outcome = self.handle_protocol(unit_id, &call);
            self.answer(&call, outcome);
            return;
        }

        let outcome = self.with_unit_env(unit_id, |unit, env| unit.invoke(&call, env));
        if let Some(Err(error)) = outcome {
            self.reject(&call, error);
        }
    }

    fn dispatch_system(&mut self, call: &Call) {
        match call.to().id() {
            HOST_CONTROL => {
                if !call.is_response() {
                    tracing::debug!(from = ?call.from(), "quiet call to host ignored");
                    return;
                }
                if self.callbacks.contains(call.match_id()) {
                    self.callbacks.handle(call);
                } else {
                    self.requests.handle(call);
                }
            }
            TIMEOUT_CONTROL => {
                if self.callbacks.handle_timeout(call) == Resolution::Ignored {
                    self.requests.handle_timeout(call);
                }
            }
            other => {
                let error = PError::routing(format!("unknown system control '{}'", other));
                self.reject(call, error);
            }
        }
    }

    /// Reply with `outcome`, or answer with its error
    pub(crate) fn answer(&mut self, call: &Call, outcome: Result<Vec<Value>, PError>) {
        match outcome {
            Ok(args) if call.expects_reply() => match call.reply(args) {
                Ok(reply) => self.send(reply),
                Err(err) => tracing::warn!(to = %call.to(), error = %err, "reply dropped"),
            },
            Ok(_) => {}
            Err(error) => self.reject(call, error),
        }
    }

    /// Answer a failed call with an error reply when one is still owed
    pub(crate) fn reject(&mut self, call: &Call, error: PError) {
        if call.expects_reply() && !call.is_answered() {
            match call.error(error) {
                Ok(reply) => self.send(reply),
                Err(err) => tracing::warn!(to = %call.to(), error = %err, "error reply dropped"),
            }
        } else {
            tracing::warn!(
                to = %call.to(),
                kind = ?call.kind(),
                error = %error,
                "call failed without reply"
            );
        }
    }
}
