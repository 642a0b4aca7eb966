use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kyrorv::{AssertionFailure, CallArgs, Event, RvError, SpecBuilder, SpecResult, Target, Value};

fn noop(name: &str) -> Target {
    Target::function(name, |_| Value::Null)
}

fn message(err: &RvError) -> &str {
    err.as_assertion().map_or("", AssertionFailure::message)
}

fn succeed(event: &Event<'_>) -> SpecResult {
    event.success();
    Ok(())
}

fn fail_buffy(event: &Event<'_>) -> SpecResult {
    event.failure("buffy");
    Ok(())
}

#[test]
fn success_removes_spec() {
    let m = noop("m");
    let handle = SpecBuilder::new("once")
        .bind("m", &m)
        .register(|event| {
            event.success();
            Err("first time only".into())
        })
        .unwrap();

    let err = m.call(CallArgs::new()).unwrap_err();
    assert_eq!(message(&err), "first time only");
    assert!(!handle.is_attached());

    for _ in 0..3 {
        m.call(CallArgs::new()).unwrap();
    }
}

#[test]
fn success_in_continuation_suppresses_spec() {
    let m = noop("m");
    let n = noop("n");
    let runs = Arc::new(AtomicUsize::new(0));

    let count = Arc::clone(&runs);
    let handle = SpecBuilder::new("until_second_m")
        .bind("m", &m)
        .bind("n", &n)
        .register(move |event| {
            count.fetch_add(1, Ordering::SeqCst);
            event.binding("m")?.next(succeed);
            Err("first time only".into())
        })
        .unwrap();

    let err = m.call(CallArgs::new()).unwrap_err();
    assert_eq!(message(&err), "first time only");

    for _ in 0..3 {
        m.call(CallArgs::new()).unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!handle.is_active());
    assert!(!handle.is_attached());
}

#[test]
fn failure_removes_spec() {
    let m = noop("m");
    SpecBuilder::new("fail_once")
        .bind("m", &m)
        .register(|event| {
            event.failure("first time only");
            Ok(())
        })
        .unwrap();

    let err = m.call(CallArgs::new()).unwrap_err();
    assert_eq!(message(&err), "first time only");
    for _ in 0..3 {
        m.call(CallArgs::new()).unwrap();
    }
}

#[test]
fn failure_in_continuation() {
    let m = noop("m");
    let n = noop("n");
    SpecBuilder::new("fail_on_second_m")
        .bind("m", &m)
        .bind("n", &n)
        .register(|event| {
            event.binding("m")?.next(fail_buffy);
            Ok(())
        })
        .unwrap();

    m.call(CallArgs::new()).unwrap();
    let err = m.call(CallArgs::new()).unwrap_err();
    assert_eq!(message(&err), "buffy");
    for _ in 0..3 {
        m.call(CallArgs::new()).unwrap();
    }
}

#[test]
fn finish_without_message_uses_spec_name() {
    let m = noop("m");
    SpecBuilder::new("quiet")
        .bind("m", &m)
        .register(|event| {
            event.finish(false, None);
            Ok(())
        })
        .unwrap();

    let err = m.call(CallArgs::new()).unwrap_err();
    assert_eq!(message(&err), "spec 'quiet' failed");
}

#[test]
fn finished_spec_keeps_binding_continuations_until_their_binding_runs() {
    let m = noop("m");
    let n = noop("n");
    let fired = Arc::new(AtomicUsize::new(0));

    let count = Arc::clone(&fired);
    let handle = SpecBuilder::new("lazy_detach")
        .bind("m", &m)
        .bind("n", &n)
        .register(move |event| {
            let count = Arc::clone(&count);
            event.binding("n")?.next(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            event.success();
            Ok(())
        })
        .unwrap();

    m.call(CallArgs::new()).unwrap();
    m.call(CallArgs::new()).unwrap();
    assert!(handle.is_attached());
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    n.call(CallArgs::new()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!handle.is_attached());
}

#[test]
fn handle_finish_is_lazy_and_detach_is_not() {
    let m = noop("m");
    let fired = Arc::new(AtomicUsize::new(0));

    let count = Arc::clone(&fired);
    let handle = SpecBuilder::new("handle_control")
        .bind("m", &m)
        .register(move |event| {
            let count = Arc::clone(&count);
            event.next(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        })
        .unwrap();

    m.call(CallArgs::new()).unwrap();
    assert!(!handle.finish(), "queued continuation delays detach");
    m.call(CallArgs::new()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!handle.is_attached());

    let count = Arc::clone(&fired);
    let forced = SpecBuilder::new("forced")
        .bind("m", &m)
        .register(move |event| {
            let count = Arc::clone(&count);
            event.next(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        })
        .unwrap();
    m.call(CallArgs::new()).unwrap();
    assert_eq!(forced.detach(), 1);
    m.call(CallArgs::new()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
