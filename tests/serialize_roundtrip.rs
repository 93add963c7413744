//! Integration tests for subtree snapshots

use hotwire::runtime::address::ComponentAddress;
use hotwire::runtime::config::RuntimeConfig;
use hotwire::runtime::iteration::{Behavior, IterationBuilder};
use hotwire::runtime::registry::{CONTAINER_TYPE, ComponentCatalog};
use hotwire::runtime::unit::Connection;
use hotwire::runtime::value::Value;
use hotwire::runtime::Root;
use std::collections::BTreeMap;
use std::sync::Arc;

fn oscillator() -> Arc<dyn Behavior> {
    Arc::new(|b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.property("freq", Value::Float(440.0))?;
        b.property("shape", Value::text("sine"))?;
        b.output("out")?;
        Ok(())
    })
}

fn amplifier() -> Arc<dyn Behavior> {
    Arc::new(|b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.property("gain", Value::Float(1.0))?;
        b.input("in", |_values, _env| Ok(()))?;
        Ok(())
    })
}

fn rack() -> (Root, ComponentAddress) {
    let mut catalog = ComponentCatalog::new();
    catalog.register("test:osc", oscillator);
    catalog.register("test:amp", amplifier);
    let mut root = Root::new(RuntimeConfig::default(), catalog).unwrap();
    let top = root.address().clone();
    let rack = root.add_child(&top, "rack", CONTAINER_TYPE).unwrap();
    root.add_child(&rack, "osc", "test:osc").unwrap();
    root.add_child(&rack, "amp", "test:amp").unwrap();
    root.connect(&rack, Connection::new("osc", "out", "amp", "in"))
        .unwrap();

    let freq = root.request(rack.child("osc").unwrap().control("freq").unwrap(), vec![Value::Float(220.0)]);
    let mut meta = BTreeMap::new();
    meta.insert("label".to_string(), Value::text("lead voice"));
    let merge = root.request(rack.control("meta-merge").unwrap(), vec![Value::Map(meta)]);
    root.run_until_idle();
    assert!(freq.result().unwrap().is_ok());
    assert!(merge.result().unwrap().is_ok());
    (root, rack)
}

#[test]
fn test_text_snapshot_rebuilds_equal_subtree() {
    let (mut root, rack) = rack();
    let top = root.address().clone();

    let text = root.serialize_text(&rack).unwrap();
    let copy = root.build_text(&top, "copy", &text).unwrap();

    assert_eq!(root.serialize(&copy).unwrap(), root.serialize(&rack).unwrap());
    let osc = copy.child("osc").unwrap();
    assert_eq!(
        root.property(&osc.control("freq").unwrap()),
        Some(Value::Float(220.0))
    );
    let unit = root.unit(&copy).unwrap();
    let ids: Vec<&String> = unit.children().keys().collect();
    assert_eq!(ids, ["osc", "amp"]);
    assert!(
        unit.connections()
            .contains(&Connection::new("osc", "out", "amp", "in"))
    );
    assert_eq!(unit.meta().get("label"), Some(&Value::text("lead voice")));
}

#[test]
fn test_serialize_control_matches_host_api() {
    let (mut root, rack) = rack();
    let handle = root.request(rack.control("serialize").unwrap(), vec![]);
    root.run_until_idle();

    let expected = root.serialize(&rack).unwrap();
    assert_eq!(handle.result(), Some(Ok(vec![expected])));
}

#[test]
fn test_snapshot_with_unknown_type_fails() {
    let (mut root, rack) = rack();
    let top = root.address().clone();
    let mut snapshot = match root.serialize(&rack).unwrap() {
        Value::Map(map) => map,
        other => panic!("unexpected snapshot {:?}", other),
    };
    snapshot.insert("type".to_string(), Value::text("test:missing"));

    assert!(root.build(&top, "broken", &Value::Map(snapshot)).is_err());
    assert!(!root.contains(&top.child("broken").unwrap()));
}
