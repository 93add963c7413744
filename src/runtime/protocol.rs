//! Built-in controls handled by the root for every unit
//!
//! Every unit answers `info`, `meta`, `meta-merge`, `code` and `serialize`.
//! Containers add the child and connection controls; the root unit adds
//! `start`, `stop` and `is-running`. These ids are reserved and cannot be
//! declared by a behavior.

use super::Root;
use super::arena::UnitId;
use super::call::Call;
use super::error::ContainerError;
use super::unit::{Connection, UnitKind};
use super::value::{PError, Value};

/// Describe the unit
pub const INFO: &str = "info";
/// Read or write one metadata key
pub const META: &str = "meta";
/// Merge a map into the metadata
pub const META_MERGE: &str = "meta-merge";
/// Replace the iteration from source
pub const CODE: &str = "code";
/// Instantiate a child from the catalog
pub const ADD_CHILD: &str = "add-child";
/// Remove a child subtree
pub const REMOVE_CHILD: &str = "remove-child";
/// List child ids
pub const CHILDREN: &str = "children";
/// Connect two children
pub const CONNECT: &str = "connect";
/// Remove a connection
pub const DISCONNECT: &str = "disconnect";
/// List connections
pub const CONNECTIONS: &str = "connections";
/// Snapshot the subtree
pub const SERIALIZE: &str = "serialize";
/// Activate the root
pub const START: &str = "start";
/// Deactivate the root
pub const STOP: &str = "stop";
/// Query the root state
pub const IS_RUNNING: &str = "is-running";

const RESERVED: &[&str] = &[
    INFO,
    META,
    META_MERGE,
    CODE,
    ADD_CHILD,
    REMOVE_CHILD,
    CHILDREN,
    CONNECT,
    DISCONNECT,
    CONNECTIONS,
    SERIALIZE,
    START,
    STOP,
    IS_RUNNING,
];

/// Whether `id` names a built-in control
pub fn is_reserved(id: &str) -> bool {
    RESERVED.contains(&id)
}

fn text_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, PError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| PError::argument(format!("missing {} argument", name)))
}

impl Root {
    /// Run a built-in control against `unit_id`
    pub(crate) fn handle_protocol(
        &mut self,
        unit_id: UnitId,
        call: &Call,
    ) -> Result<Vec<Value>, PError> {
        let (address, kind) = match self.units.get(unit_id) {
            Some(unit) => (unit.address().clone(), unit.kind()),
            None => return Err(PError::routing(format!("no unit at {}", call.to()))),
        };
        let args = call.args();
        let id = call.to().id();

        let container_only = [
            ADD_CHILD,
            REMOVE_CHILD,
            CHILDREN,
            CONNECT,
            DISCONNECT,
            CONNECTIONS,
        ];
        if container_only.contains(&id) && !kind.is_container() {
            return Err(ContainerError::NotAContainer(address.to_string()).into());
        }
        if [START, STOP, IS_RUNNING].contains(&id) && kind != UnitKind::Root {
            return Err(PError::routing(format!("unknown control '{}'", call.to())));
        }

        match id {
            INFO => Ok(self
                .units
                .get(unit_id)
                .map(|unit| vec![unit.info()])
                .unwrap_or_default()),
            META => self.meta(unit_id, args),
            META_MERGE => {
                let Some(Value::Map(entries)) = args.first() else {
                    return Err(PError::argument("meta-merge expects a map"));
                };
                let unit = self
                    .units
                    .get_mut(unit_id)
                    .ok_or_else(|| PError::routing("unit vanished"))?;
                unit.meta_mut()
                    .extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(vec![Value::Map(unit.meta().clone())])
            }
            CODE => {
                let source = text_arg(args, 0, "source")?;
                let installed = self.install_source(&address, source)?;
                Ok(vec![Value::Bool(installed)])
            }
            ADD_CHILD => {
                let child = text_arg(args, 0, "child id")?;
                let type_name = text_arg(args, 1, "type")?;
                let child = self.add_child(&address, child, type_name)?;
                Ok(vec![Value::from(child)])
            }
            REMOVE_CHILD => {
                let child = text_arg(args, 0, "child id")?;
                self.remove_child(&address, child)?;
                Ok(Vec::new())
            }
            CHILDREN => {
                let ids = self
                    .units
                    .get(unit_id)
                    .map(|unit| unit.children().keys().map(|id| Value::text(id.clone())).collect())
                    .unwrap_or_default();
                Ok(vec![Value::List(ids)])
            }
            CONNECT => {
                let connection = Connection::from_args(args)?;
                self.connect(&address, connection)?;
                Ok(Vec::new())
            }
            DISCONNECT => {
                let connection = Connection::from_args(args)?;
                self.disconnect(&address, &connection)?;
                Ok(Vec::new())
            }
            CONNECTIONS => {
                let list = self
                    .units
                    .get(unit_id)
                    .map(|unit| unit.connections().iter().map(Connection::to_value).collect())
                    .unwrap_or_default();
                Ok(vec![Value::List(list)])
            }
            SERIALIZE => Ok(vec![self.serialize(&address)?]),
            START => Ok(vec![Value::Bool(self.start())]),
            STOP => Ok(vec![Value::Bool(self.stop())]),
            IS_RUNNING => Ok(vec![Value::Bool(self.is_running())]),
            other => Err(PError::routing(format!("unknown control '{}'", other))),
        }
    }

    fn meta(&mut self, unit_id: UnitId, args: &[Value]) -> Result<Vec<Value>, PError> {
        let unit = self
            .units
            .get_mut(unit_id)
            .ok_or_else(|| PError::routing("unit vanished"))?;
        match args {
            [] => Ok(vec![Value::Map(unit.meta().clone())]),
            [key] => Ok(vec![unit.meta().get(&key.to_string()).cloned().unwrap_or_default()]),
            [key, value] => {
                unit.meta_mut().insert(key.to_string(), value.clone());
                Ok(vec![value.clone()])
            }
            _ => Err(PError::argument("meta expects at most a key and a value")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids() {
        assert!(is_reserved("info"));
        assert!(is_reserved("add-child"));
        assert!(!is_reserved("eval"));
    }
}
