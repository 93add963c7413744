//! Subtree snapshots
//!
//! A snapshot is a [`Value::Map`] holding the unit's `type`, its
//! `properties`, `meta`, `children` (child id to snapshot, in insertion
//! order kept by an `order` list) and `connections`. Building a snapshot
//! instantiates types through the catalog and restores the rest.

use std::collections::BTreeMap;

use super::Root;
use super::address::ComponentAddress;
use super::error::{ContainerError, Result};
use super::unit::Connection;
use super::value::Value;
use crate::util::io_value;

const TYPE: &str = "type";
const PROPERTIES: &str = "properties";
const META: &str = "meta";
const CHILDREN: &str = "children";
const ORDER: &str = "order";
const CONNECTIONS: &str = "connections";

fn invalid(message: impl Into<String>) -> ContainerError {
    ContainerError::InvalidArgument(message.into())
}

impl Root {
    /// Snapshot the subtree rooted at `address`
    pub fn serialize(&self, address: &ComponentAddress) -> Result<Value> {
        let unit_id = self.lookup(address)?;
        let Some(unit) = self.units.get(unit_id) else {
            return Err(invalid(format!("no unit at {}", address)).into());
        };

        let properties: BTreeMap<String, Value> = unit.iteration().properties().into_iter().collect();
        let mut children = BTreeMap::new();
        let mut order = Vec::new();
        for (id, &child_id) in unit.children() {
            if let Some(child) = self.units.get(child_id) {
                children.insert(id.clone(), self.serialize(child.address())?);
                order.push(Value::text(id.clone()));
            }
        }
        let connections = unit.connections().iter().map(Connection::to_value).collect();

        let mut map = BTreeMap::new();
        map.insert(TYPE.to_string(), Value::text(unit.type_name()));
        map.insert(PROPERTIES.to_string(), Value::Map(properties));
        map.insert(META.to_string(), Value::Map(unit.meta().clone()));
        if unit.kind().is_container() {
            map.insert(CHILDREN.to_string(), Value::Map(children));
            map.insert(ORDER.to_string(), Value::List(order));
            map.insert(CONNECTIONS.to_string(), Value::List(connections));
        }
        Ok(Value::Map(map))
    }

    /// Snapshot in preserves text syntax
    pub fn serialize_text(&self, address: &ComponentAddress) -> Result<String> {
        Ok(io_value::to_text(&self.serialize(address)?))
    }

    /// Instantiate `snapshot` as child `id` of `parent`
    pub fn build(
        &mut self,
        parent: &ComponentAddress,
        id: &str,
        snapshot: &Value,
    ) -> Result<ComponentAddress> {
        let map = snapshot
            .as_map()
            .ok_or_else(|| invalid("snapshot must be a map"))?;
        let type_name = map
            .get(TYPE)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("snapshot has no type"))?;
        let address = self.add_child(parent, id, type_name)?;
        self.restore(&address, snapshot)?;
        Ok(address)
    }

    /// Build from preserves text
    pub fn build_text(
        &mut self,
        parent: &ComponentAddress,
        id: &str,
        text: &str,
    ) -> Result<ComponentAddress> {
        let snapshot = io_value::from_text(text).map_err(invalid)?;
        self.build(parent, id, &snapshot)
    }

    /// Apply properties, metadata, children and connections from `snapshot`
    /// to the existing unit at `address`
    pub fn restore(&mut self, address: &ComponentAddress, snapshot: &Value) -> Result<()> {
        let unit_id = self.lookup(address)?;
        let map = snapshot
            .as_map()
            .ok_or_else(|| invalid("snapshot must be a map"))?;

        if let Some(unit) = self.units.get_mut(unit_id) {
            if let Some(properties) = map.get(PROPERTIES).and_then(Value::as_map) {
                for (id, value) in properties {
                    if !unit.iteration_mut().restore_property(id, value) {
                        tracing::warn!(unit = %address, property = %id, "property not restored");
                    }
                }
            }
            if let Some(meta) = map.get(META).and_then(Value::as_map) {
                unit.meta_mut()
                    .extend(meta.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        if let Some(children) = map.get(CHILDREN).and_then(Value::as_map) {
            let order: Vec<String> = match map.get(ORDER) {
                Some(Value::List(ids)) => ids.iter().map(Value::to_string).collect(),
                _ => children.keys().cloned().collect(),
            };
            for id in order {
                let Some(child) = children.get(&id) else {
                    continue;
                };
                self.build(address, &id, child)?;
            }
        }

        if let Some(Value::List(connections)) = map.get(CONNECTIONS) {
            for entry in connections {
                let connection = Connection::from_args(std::slice::from_ref(entry))?;
                self.connect(address, connection)?;
            }
        }
        Ok(())
    }
}
