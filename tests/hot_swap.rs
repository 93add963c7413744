//! Integration tests for replacing a unit's behavior in place

use hotwire::runtime::address::ComponentAddress;
use hotwire::runtime::config::RuntimeConfig;
use hotwire::runtime::descriptor::ReferenceSpec;
use hotwire::runtime::iteration::{Behavior, IterationBuilder};
use hotwire::runtime::registry::{ComponentCatalog, Compiler};
use hotwire::runtime::value::{Value, category};
use hotwire::runtime::{Root, RuntimeError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn gain_behavior(default: f64) -> impl Behavior {
    move |b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.property("gain", Value::Float(default))?;
        Ok(())
    }
}

fn setup(behavior: &dyn Behavior) -> (Root, ComponentAddress) {
    let mut root = Root::new(RuntimeConfig::default(), ComponentCatalog::new()).unwrap();
    let top = root.address().clone();
    let unit = root.add_child_with(&top, "amp", "test:amp", behavior).unwrap();
    (root, unit)
}

fn set_gain(root: &mut Root, unit: &ComponentAddress, value: f64) {
    let handle = root.request(unit.control("gain").unwrap(), vec![Value::Float(value)]);
    root.run_until_idle();
    assert_eq!(handle.result(), Some(Ok(vec![Value::Float(value)])));
}

#[test]
fn test_compatible_property_keeps_value() {
    let (mut root, unit) = setup(&gain_behavior(1.0));
    set_gain(&mut root, &unit, 0.25);
    let gain = unit.control("gain").unwrap();

    // Same shape, new default: the live value wins.
    root.install(&unit, &gain_behavior(0.5)).unwrap();
    assert_eq!(root.property(&gain), Some(Value::Float(0.25)));

    // A -> B -> A' keeps carrying.
    let with_extra = |b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.property("gain", Value::Float(9.0))?;
        b.property("pan", Value::Float(0.0))?;
        Ok(())
    };
    root.install(&unit, &with_extra).unwrap();
    root.install(&unit, &gain_behavior(1.0)).unwrap();
    assert_eq!(root.property(&gain), Some(Value::Float(0.25)));
    assert_eq!(root.property(&unit.control("pan").unwrap()), None);
}

#[test]
fn test_incompatible_property_is_recreated() {
    let (mut root, unit) = setup(&gain_behavior(1.0));
    set_gain(&mut root, &unit, 0.25);

    let text_gain = |b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.property("gain", Value::text("loud"))?;
        Ok(())
    };
    root.install(&unit, &text_gain).unwrap();
    assert_eq!(
        root.property(&unit.control("gain").unwrap()),
        Some(Value::text("loud"))
    );
}

#[test]
fn test_failed_declaration_keeps_previous_iteration() {
    let (mut root, unit) = setup(&gain_behavior(1.0));
    set_gain(&mut root, &unit, 0.75);

    let broken = |b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.property("gain", Value::Float(0.0))?;
        anyhow::bail!("half-written behavior")
    };
    let err = root.install(&unit, &broken).unwrap_err();
    assert!(matches!(err, RuntimeError::Install(_)));

    let duplicate = |b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.property("gain", Value::Float(0.0))?;
        b.property("gain", Value::Float(0.0))?;
        Ok(())
    };
    assert!(root.install(&unit, &duplicate).is_err());

    assert_eq!(
        root.property(&unit.control("gain").unwrap()),
        Some(Value::Float(0.75))
    );
}

#[test]
fn test_reference_carries_and_disposes() {
    let created = Arc::new(AtomicUsize::new(0));
    let disposed = Arc::new(AtomicUsize::new(0));

    let counting = |created: Arc<AtomicUsize>, disposed: Arc<AtomicUsize>| {
        move |b: &mut IterationBuilder| -> anyhow::Result<()> {
            let created = created.clone();
            let disposed = disposed.clone();
            let state = b.add_reference(
                ReferenceSpec::new("state", move |_env| {
                    created.fetch_add(1, Ordering::SeqCst);
                    Ok(Vec::<i64>::new())
                })
                .on_dispose(move |_state, _env| {
                    disposed.fetch_add(1, Ordering::SeqCst);
                }),
            )?;
            b.function("push", move |args, _env| {
                let len = state
                    .with(|items| {
                        items.extend(args.iter().filter_map(Value::as_int));
                        items.len() as i64
                    })
                    .unwrap_or_default();
                Ok(vec![Value::Int(len)])
            })?;
            Ok(())
        }
    };

    let (mut root, unit) = setup(&counting(created.clone(), disposed.clone()));
    let push = unit.control("push").unwrap();
    root.request(push.clone(), vec![Value::Int(1), Value::Int(2)]);
    root.run_until_idle();

    root.install(&unit, &counting(created.clone(), disposed.clone()))
        .unwrap();
    let handle = root.request(push.clone(), vec![Value::Int(3)]);
    root.run_until_idle();
    assert_eq!(handle.result(), Some(Ok(vec![Value::Int(3)])));
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(disposed.load(Ordering::SeqCst), 0);

    // Dropping the reference disposes the carried value.
    root.install(&unit, &gain_behavior(1.0)).unwrap();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    let handle = root.request(push, vec![]);
    root.run_until_idle();
    assert_eq!(
        handle.result().unwrap().unwrap_err().category,
        category::ROUTING
    );
}

struct GainCompiler;

impl Compiler for GainCompiler {
    fn compile(&self, _type_name: &str, source: &str) -> anyhow::Result<Arc<dyn Behavior>> {
        let default: f64 = source
            .strip_prefix("gain=")
            .ok_or_else(|| anyhow::anyhow!("expected gain=<value>"))?
            .trim()
            .parse()?;
        Ok(Arc::new(gain_behavior(default)))
    }
}

#[test]
fn test_install_source_through_code_control() {
    let (mut root, unit) = setup(&gain_behavior(1.0));
    root.set_compiler(Arc::new(GainCompiler));
    let code = unit.control("code").unwrap();

    let first = root.request(code.clone(), vec![Value::text("gain=2.0")]);
    root.run_until_idle();
    assert_eq!(first.result(), Some(Ok(vec![Value::Bool(true)])));

    let again = root.request(code.clone(), vec![Value::text("gain=2.0")]);
    root.run_until_idle();
    assert_eq!(again.result(), Some(Ok(vec![Value::Bool(false)])));

    let broken = root.request(code, vec![Value::text("volume=3")]);
    root.run_until_idle();
    assert_eq!(
        broken.result().unwrap().unwrap_err().category,
        category::INSTALL
    );
    assert!(root.unit(&unit).unwrap().iteration().source_hash().is_some());
}
