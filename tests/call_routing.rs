//! Integration tests for call delivery and correlation
//!
//! Covers routing failures, function replies, clock-scheduled delivery and
//! request timeouts through a real root.

use hotwire::runtime::call::Call;
use hotwire::runtime::config::RuntimeConfig;
use hotwire::runtime::iteration::{Behavior, IterationBuilder};
use hotwire::runtime::registry::ComponentCatalog;
use hotwire::runtime::value::{PError, Value, category};
use hotwire::runtime::Root;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn arithmetic() -> Arc<dyn Behavior> {
    Arc::new(|b: &mut IterationBuilder| -> anyhow::Result<()> {
        b.function("double", |args, _env| {
            let n = args
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| PError::argument("expected an integer"))?;
            Ok(vec![Value::Int(n * 2)])
        })?;
        // Swallows requests without answering.
        b.raw("sink", |_call, _env| Ok(()))?;
        Ok(())
    })
}

fn setup() -> Root {
    let mut catalog = ComponentCatalog::new();
    catalog.register("test:arithmetic", arithmetic);
    let mut root = Root::new(RuntimeConfig::default(), catalog).unwrap();
    let top = root.address().clone();
    root.add_child(&top, "math", "test:arithmetic").unwrap();
    root
}

fn control(root: &Root, path: &str) -> hotwire::runtime::address::ControlAddress {
    format!("/{}/{}", root.address().id(), path).parse().unwrap()
}

#[test]
fn test_function_control_replies() {
    let mut root = setup();
    let handle = root.request(control(&root, "math.double"), vec![Value::Int(21)]);
    assert!(!handle.is_done());

    root.run_until_idle();
    assert_eq!(handle.result(), Some(Ok(vec![Value::Int(42)])));
}

#[test]
fn test_function_error_becomes_error_reply() {
    let mut root = setup();
    let handle = root.request(control(&root, "math.double"), vec![Value::text("x")]);
    root.run_until_idle();

    let error = handle.result().unwrap().unwrap_err();
    assert_eq!(error.category, category::ARGUMENT);
}

#[test]
fn test_unknown_destination_is_routing_error() {
    let mut root = setup();
    let missing_unit = root.request(control(&root, "nowhere.double"), vec![]);
    let missing_control = root.request(control(&root, "math.triple"), vec![]);
    root.run_until_idle();

    for handle in [missing_unit, missing_control] {
        let error = handle.result().unwrap().unwrap_err();
        assert_eq!(error.category, category::ROUTING);
    }
}

#[test]
fn test_future_calls_wait_for_clock() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let mut root = setup();
    let top = root.address().clone();
    let behavior = move |b: &mut IterationBuilder| -> anyhow::Result<()> {
        let counter = counter.clone();
        b.function("hit", move |_args, _env| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        })?;
        Ok(())
    };
    root.add_child_with(&top, "counter", "test:counter", &behavior)
        .unwrap();

    let to = control(&root, "counter.hit");
    root.send(Call::quiet(to, None, 10, vec![]));
    root.run_until_idle();
    assert_eq!(root.scheduled_calls(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    root.tick(5);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    root.tick(10);
    assert_eq!(root.scheduled_calls(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unanswered_request_times_out() {
    let mut root = setup();
    let handle = root.request_with_timeout(control(&root, "math.sink"), vec![], Some(5));
    root.run_until_idle();
    assert!(!handle.is_done());

    root.tick(3);
    assert!(!handle.is_done());

    root.tick(6);
    let error = handle.result().unwrap().unwrap_err();
    assert_eq!(error.category, category::TIMEOUT);
}

#[test]
fn test_callback_receives_answer() {
    let mut root = setup();
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let slot = seen.clone();
    root.request_with(control(&root, "math.double"), vec![Value::Int(4)], move |outcome| {
        *slot.lock() = Some(outcome);
    })
    .unwrap();
    root.run_until_idle();

    assert_eq!(*seen.lock(), Some(Ok(vec![Value::Int(8)])));
}

#[test]
fn test_reply_is_accepted_once() {
    let to = "/root/a.b".parse().unwrap();
    let from = "/root._host".parse().unwrap();
    let request = Call::request(to, from, 0, vec![]);

    assert!(request.reply(vec![Value::Int(1)]).is_ok());
    assert!(request.is_answered());
    assert!(request.reply(vec![Value::Int(2)]).is_err());
    assert!(request.error(PError::script("late")).is_err());
}
