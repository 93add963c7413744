//! Integration tests for scripts driving a live tree

use hotwire::interpreter::executor::{self, CLEAR_CONTROL, EVAL_CONTROL, SCRIPT_SERVICE};
use hotwire::runtime::address::ComponentAddress;
use hotwire::runtime::call::Call;
use hotwire::runtime::config::RuntimeConfig;
use hotwire::runtime::iteration::{Behavior, IterationBuilder};
use hotwire::runtime::registry::ComponentCatalog;
use hotwire::runtime::value::{Value, category};
use hotwire::runtime::Root;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

type Notes = Arc<Mutex<Vec<Value>>>;

// Holds `wait` requests and answers them on the next tick.
fn slow() -> Arc<dyn Behavior> {
    Arc::new(|b: &mut IterationBuilder| -> anyhow::Result<()> {
        let pending = b.reference("pending", |_env| Ok(Vec::<Call>::new()))?;
        let queue = pending.clone();
        b.raw("wait", move |call, _env| {
            queue.with(|calls| calls.push(call.clone()));
            Ok(())
        })?;
        b.on_tick(move |env| {
            let calls = pending.with(std::mem::take).unwrap_or_default();
            for call in calls {
                env.reply(&call, vec![Value::text("done")])?;
            }
            Ok(())
        });
        Ok(())
    })
}

fn recorder(notes: Notes) -> impl Fn() -> Arc<dyn Behavior> + Send + Sync {
    move || {
        let notes = notes.clone();
        Arc::new(move |b: &mut IterationBuilder| -> anyhow::Result<()> {
            let notes = notes.clone();
            let port_notes = notes.clone();
            b.function("note", move |args, _env| {
                notes.lock().extend(args.iter().cloned());
                Ok(Vec::new())
            })?;
            let received = b.reference("received", |_env| Ok(0i64))?;
            b.input("in", move |values, _env| {
                received.with(|count| *count += 1);
                port_notes.lock().extend(values.iter().cloned());
                Ok(())
            })?;
            Ok(())
        }) as Arc<dyn Behavior>
    }
}

fn source() -> Arc<dyn Behavior> {
    Arc::new(|b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.output("out")?;
        b.function("fire", |args, env| {
            env.emit("out", args.to_vec());
            Ok(Vec::new())
        })?;
        Ok(())
    })
}

// Reports what its reference could see while attaching.
fn client() -> Arc<dyn Behavior> {
    Arc::new(|b: &mut IterationBuilder| -> anyhow::Result<()> {
        let seen = b.reference("seen", |env| {
            let controls = env
                .attached_controls()
                .iter()
                .map(|id| Value::text(id.as_str()))
                .collect();
            let script = env
                .service(SCRIPT_SERVICE)
                .cloned()
                .map_or(Value::None, Value::from);
            Ok(vec![Value::List(controls), script])
        })?;
        b.output("out")?;
        b.function("ping", |_args, _env| Ok(vec![Value::text("pong")]))?;
        b.function("wiring", move |_args, _env| Ok(seen.get().unwrap_or_default()))?;
        Ok(())
    })
}

fn setup(config: RuntimeConfig, notes: &Notes) -> (Root, ComponentAddress) {
    let mut catalog = ComponentCatalog::new();
    executor::register(&mut catalog);
    catalog.register("test:slow", slow);
    catalog.register("test:recorder", recorder(notes.clone()));
    catalog.register("test:source", source);
    catalog.register("test:client", client);

    let mut root = Root::new(config, catalog).unwrap();
    let top = root.address().clone();
    root.add_child(&top, "slow", "test:slow").unwrap();
    root.add_child(&top, "rec", "test:recorder").unwrap();
    let script = executor::add_executor(&mut root, &top, "script").unwrap();
    root.start();
    (root, script)
}

#[test]
fn test_next_call_waits_for_previous_answer() {
    let notes = Notes::default();
    let (mut root, script) = setup(RuntimeConfig::default(), &notes);

    let handle = root.request(
        script.control(EVAL_CONTROL).unwrap(),
        vec![Value::text("set r [/root/slow.wait]\n/root/rec.note $r\nset r")],
    );
    root.run_until_idle();
    assert!(!handle.is_done());
    assert!(notes.lock().is_empty());

    root.tick(1);
    assert_eq!(*notes.lock(), vec![Value::text("done")]);
    assert_eq!(handle.result(), Some(Ok(vec![Value::text("done")])));
}

#[test]
fn test_evals_from_one_caller_run_in_order() {
    let notes = Notes::default();
    let (mut root, script) = setup(RuntimeConfig::default(), &notes);
    let eval = script.control(EVAL_CONTROL).unwrap();

    let first = root.request(
        eval.clone(),
        vec![Value::text("/root/slow.wait\n/root/rec.note first")],
    );
    let second = root.request(eval, vec![Value::text("/root/rec.note second")]);
    root.run_until_idle();
    assert!(notes.lock().is_empty());
    assert!(!second.is_done());

    root.tick(1);
    assert_eq!(
        *notes.lock(),
        vec![Value::text("first"), Value::text("second")]
    );
    assert!(first.result().unwrap().is_ok());
    assert!(second.result().unwrap().is_ok());
}

#[test]
fn test_script_builds_and_wires_tree() {
    let notes = Notes::default();
    let (mut root, script) = setup(RuntimeConfig::default(), &notes);

    let handle = root.request(
        script.control(EVAL_CONTROL).unwrap(),
        vec![Value::text(
            "/root.add-child src test:source\n\
             /root.add-child dst test:recorder\n\
             /root.connect src out dst in\n\
             /root/src.fire 7 8\n\
             /root.children",
        )],
    );
    root.run_until_idle();

    let children = ["slow", "rec", "script", "src", "dst"]
        .into_iter()
        .map(Value::text)
        .collect();
    assert_eq!(handle.result(), Some(Ok(vec![Value::List(children)])));
    assert_eq!(*notes.lock(), vec![Value::Int(7), Value::Int(8)]);
}

#[test]
fn test_trapped_failures_are_reported_together() {
    let notes = Notes::default();
    let (mut root, script) = setup(RuntimeConfig::default(), &notes);

    let mut options = BTreeMap::new();
    options.insert("trap-errors".to_string(), Value::Bool(true));
    let handle = root.request(
        script.control(EVAL_CONTROL).unwrap(),
        vec![
            Value::text("/root/ghost.note a\n/root/rec.note b\nbogus\n/root/rec.note c"),
            Value::Map(options),
        ],
    );
    root.run_until_idle();

    let error = handle.result().unwrap().unwrap_err();
    assert_eq!(error.category, category::SCRIPT);
    let lines: Vec<&str> = error.message.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("line 1: "));
    assert_eq!(lines[1], "line 3: unknown command 'bogus'");
    assert_eq!(*notes.lock(), vec![Value::text("b"), Value::text("c")]);
}

#[test]
fn test_failure_without_trap_stops_script() {
    let notes = Notes::default();
    let (mut root, script) = setup(RuntimeConfig::default(), &notes);

    let handle = root.request(
        script.control(EVAL_CONTROL).unwrap(),
        vec![Value::text("/root/rec.note a\n/root/ghost.note\n/root/rec.note b")],
    );
    root.run_until_idle();

    let error = handle.result().unwrap().unwrap_err();
    assert_eq!(error.category, category::ROUTING);
    assert_eq!(*notes.lock(), vec![Value::text("a")]);
}

#[test]
fn test_clear_aborts_waiting_script() {
    let notes = Notes::default();
    let (mut root, script) = setup(RuntimeConfig::default(), &notes);

    let handle = root.request(
        script.control(EVAL_CONTROL).unwrap(),
        vec![Value::text("/root/slow.wait\n/root/rec.note late")],
    );
    root.run_until_idle();
    let cleared = root.request(script.control(CLEAR_CONTROL).unwrap(), vec![]);
    root.run_until_idle();
    assert_eq!(cleared.result(), Some(Ok(vec![Value::Int(1)])));
    assert_eq!(
        handle.result().unwrap().unwrap_err().category,
        category::CANCELLED
    );

    // The late answer finds nothing waiting.
    root.tick(1);
    assert!(notes.lock().is_empty());
}

#[test]
fn test_log_lines_reach_destination() {
    let notes = Notes::default();
    let config = RuntimeConfig {
        log_destination: Some("/root/rec.note".parse().unwrap()),
        ..RuntimeConfig::default()
    };
    let (mut root, script) = setup(config, &notes);

    let mut options = BTreeMap::new();
    options.insert("log-level".to_string(), Value::text("warning"));
    let handle = root.request(
        script.control(EVAL_CONTROL).unwrap(),
        vec![
            Value::text("log warning tempo drift\nlog debug hidden"),
            Value::Map(options),
        ],
    );
    root.run_until_idle();
    assert!(handle.result().unwrap().is_ok());

    let notes = notes.lock();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0], Value::from(script.clone()));
    assert_eq!(
        notes[1],
        Value::List(vec![Value::List(vec![
            Value::text("warning"),
            Value::Int(0),
            Value::text("tempo drift"),
        ])])
    );
}

#[test]
fn test_eval_log_level_can_raise_verbosity() {
    let notes = Notes::default();
    let config = RuntimeConfig {
        log_destination: Some("/root/rec.note".parse().unwrap()),
        ..RuntimeConfig::default()
    };
    let (mut root, script) = setup(config, &notes);

    let mut options = BTreeMap::new();
    options.insert("log-level".to_string(), Value::text("debug"));
    let handle = root.request(
        script.control(EVAL_CONTROL).unwrap(),
        vec![Value::text("log debug voice count 4"), Value::Map(options)],
    );
    root.run_until_idle();
    assert!(handle.result().unwrap().is_ok());

    let notes = notes.lock();
    assert_eq!(
        notes[1],
        Value::List(vec![Value::List(vec![
            Value::text("debug"),
            Value::Int(0),
            Value::text("voice count 4"),
        ])])
    );
}

#[test]
fn test_reference_sees_controls_and_services_on_attach() {
    let notes = Notes::default();
    let (mut root, script) = setup(RuntimeConfig::default(), &notes);
    let top = root.address().clone();
    let client = root.add_child(&top, "client", "test:client").unwrap();

    let handle = root.request(client.control("wiring").unwrap(), vec![]);
    root.run_until_idle();
    assert_eq!(
        handle.result(),
        Some(Ok(vec![
            Value::List(vec![Value::text("ping"), Value::text("wiring")]),
            Value::from(script),
        ]))
    );
}
