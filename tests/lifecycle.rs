//! Integration tests for root activation and unit hooks

use hotwire::runtime::config::RuntimeConfig;
use hotwire::runtime::context::ExecState;
use hotwire::runtime::descriptor::ReferenceSpec;
use hotwire::runtime::iteration::IterationBuilder;
use hotwire::runtime::registry::ComponentCatalog;
use hotwire::runtime::value::Value;
use hotwire::runtime::Root;
use parking_lot::Mutex;
use std::sync::Arc;

type Journal = Arc<Mutex<Vec<String>>>;

fn recording(journal: Journal) -> impl Fn(&mut IterationBuilder) -> anyhow::Result<()> + Send + Sync {
    move |b: &mut IterationBuilder| -> anyhow::Result<()> {
        let (init, start, stop, reset, dispose) = (
            journal.clone(),
            journal.clone(),
            journal.clone(),
            journal.clone(),
            journal.clone(),
        );
        b.add_reference(
            ReferenceSpec::new("journal", |_env| Ok(()))
                .on_init(move |_, _env| {
                    init.lock().push("init".into());
                    Ok(())
                })
                .on_start(move |_, _env| {
                    start.lock().push("start".into());
                    Ok(())
                })
                .on_stop(move |_, _env| {
                    stop.lock().push("stop".into());
                    Ok(())
                })
                .on_reset(move |_, _env| {
                    reset.lock().push("reset".into());
                    Ok(())
                })
                .on_dispose(move |_, _env| {
                    dispose.lock().push("dispose".into());
                }),
        )?;
        let tick = journal.clone();
        b.on_tick(move |env| {
            tick.lock().push(format!("tick {}", env.time()));
            Ok(())
        });
        Ok(())
    }
}

fn setup(journal: &Journal) -> Root {
    let mut root = Root::new(RuntimeConfig::default(), ComponentCatalog::new()).unwrap();
    let top = root.address().clone();
    root.add_child_with(&top, "recorder", "test:recorder", &recording(journal.clone()))
        .unwrap();
    root
}

#[test]
fn test_start_runs_once_across_activations() {
    let journal = Journal::default();
    let mut root = setup(&journal);
    assert_eq!(root.state(), ExecState::New);

    assert!(root.start());
    assert!(!root.start());
    assert!(root.stop());
    assert!(root.start());
    assert!(root.stop());
    assert_eq!(root.state(), ExecState::Idle);

    assert_eq!(
        *journal.lock(),
        vec!["init", "start", "stop", "reset", "init", "stop", "reset"]
    );
}

#[test]
fn test_ticks_only_while_active() {
    let journal = Journal::default();
    let mut root = setup(&journal);

    root.tick(1);
    root.start();
    root.tick(2);
    assert!(!root.tick(2));
    root.stop();
    root.tick(3);

    let ticks: Vec<String> = journal
        .lock()
        .iter()
        .filter(|line| line.starts_with("tick"))
        .cloned()
        .collect();
    assert_eq!(ticks, vec!["tick 2"]);
    assert_eq!(root.time(), 3);
}

#[test]
fn test_unit_added_to_active_root_starts_immediately() {
    let journal = Journal::default();
    let mut root = Root::new(RuntimeConfig::default(), ComponentCatalog::new()).unwrap();
    root.start();
    let top = root.address().clone();
    root.add_child_with(&top, "late", "test:recorder", &recording(journal.clone()))
        .unwrap();
    assert_eq!(*journal.lock(), vec!["init", "start"]);

    root.remove_child(&top, "late").unwrap();
    assert_eq!(*journal.lock(), vec!["init", "start", "dispose"]);
}

#[test]
fn test_hot_swap_restarts_on_next_activation() {
    let journal = Journal::default();
    let mut root = setup(&journal);
    let recorder = root.address().child("recorder").unwrap();
    root.start();
    root.install(&recorder, &recording(journal.clone())).unwrap();

    // The carried reference starts again under the new iteration.
    assert_eq!(*journal.lock(), vec!["init", "start", "init", "start"]);
}

#[test]
fn test_root_protocol_controls() {
    let journal = Journal::default();
    let mut root = setup(&journal);
    let top = root.address().clone();

    let running = root.request(top.control("is-running").unwrap(), vec![]);
    let start = root.request(top.control("start").unwrap(), vec![]);
    let after = root.request(top.control("is-running").unwrap(), vec![]);
    root.run_until_idle();

    assert_eq!(running.result(), Some(Ok(vec![Value::Bool(false)])));
    assert_eq!(start.result(), Some(Ok(vec![Value::Bool(true)])));
    assert_eq!(after.result(), Some(Ok(vec![Value::Bool(true)])));

    // Only the root unit answers the activation controls.
    let recorder = root.address().child("recorder").unwrap();
    let refused = root.request(recorder.control("stop").unwrap(), vec![]);
    root.run_until_idle();
    assert!(refused.result().unwrap().is_err());
}
