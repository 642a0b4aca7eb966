use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use kyrorv::{rv_ensure, CallArgs, SpecBuilder, Target, Value, UNBOUNDED_HISTORY};

/// What a spec observed on its last event.
#[derive(Debug, Default, Clone)]
struct Observed {
    binding_len: usize,
    binding_oldest_linked: bool,
    shared_len: usize,
    shared_oldest_linked: bool,
    inputs: Vec<i64>,
}

fn observe(history_size: i64, calls: usize) -> Observed {
    let m = Target::function("m", |args| args.get(0).cloned().unwrap_or_default());
    let seen = Arc::new(Mutex::new(Observed::default()));

    let sink = Arc::clone(&seen);
    SpecBuilder::new("observer")
        .bind("m", &m)
        .history_size(history_size)
        .register(move |event| {
            let view = event.binding("m")?;
            let binding = view.history();
            let shared = event.history();
            *sink.lock().unwrap() = Observed {
                binding_len: binding.len(),
                binding_oldest_linked: binding.first().map_or(false, |r| r.previous().is_some()),
                shared_len: shared.len(),
                shared_oldest_linked: shared.first().map_or(false, |r| r.previous().is_some()),
                inputs: binding
                    .iter()
                    .filter_map(|r| r.inputs().first().and_then(Value::as_int))
                    .collect(),
            };
            Ok(())
        })
        .unwrap();

    for i in 0..calls {
        m.call(CallArgs::new().arg(i as i64)).unwrap();
    }
    let observed = seen.lock().unwrap().clone();
    observed
}

#[test]
fn default_history_keeps_ten_calls() {
    let observed = observe(10, 25);
    assert_eq!(observed.binding_len, 10);
    assert_eq!(observed.inputs, (15..25).collect::<Vec<_>>());
    assert!(!observed.binding_oldest_linked);
}

#[test]
fn zero_history_keeps_only_the_current_call() {
    let observed = observe(0, 5);
    assert_eq!(observed.binding_len, 1);
    assert_eq!(observed.shared_len, 1);
    assert_eq!(observed.inputs, vec![4]);
    assert!(!observed.binding_oldest_linked);
}

#[test]
fn unbounded_history_keeps_everything() {
    let observed = observe(UNBOUNDED_HISTORY, 40);
    assert_eq!(observed.binding_len, 40);
    assert_eq!(observed.shared_len, 40);
    assert_eq!(observed.inputs.first(), Some(&0));
}

#[test]
fn previous_call_is_reachable_through_the_view() {
    let m = Target::function("m", |args| args.get(0).cloned().unwrap_or_default());

    SpecBuilder::new("increasing")
        .bind("m", &m)
        .register(|event| {
            let view = event.active();
            let current = view.require_call()?;
            if let Some(prev) = view.previous() {
                rv_ensure!(
                    prev.input(0)?.as_int() < current.input(0)?.as_int(),
                    "inputs must increase: {} then {}",
                    prev.input(0)?,
                    current.input(0)?
                );
                rv_ensure!(prev.sequence() < current.sequence());
            }
            Ok(())
        })
        .unwrap();

    m.call(CallArgs::new().arg(1)).unwrap();
    m.call(CallArgs::new().arg(2)).unwrap();
    let err = m.call(CallArgs::new().arg(2)).unwrap_err();
    assert_eq!(
        err.as_assertion().unwrap().message(),
        "inputs must increase: 2 then 2"
    );
}

#[test]
fn binding_histories_are_independent() {
    let m = Target::function("m", |_| Value::Null);
    let n = Target::function("n", |_| Value::Null);
    let lens = Arc::new(Mutex::new((0, 0, 0)));

    let sink = Arc::clone(&lens);
    SpecBuilder::new("per_binding")
        .bind("m", &m)
        .bind("n", &n)
        .history_size(3)
        .register(move |event| {
            *sink.lock().unwrap() = (
                event.binding("m")?.history().len(),
                event.binding("n")?.history().len(),
                event.history().len(),
            );
            Ok(())
        })
        .unwrap();

    for _ in 0..5 {
        m.call(CallArgs::new()).unwrap();
    }
    n.call(CallArgs::new()).unwrap();
    assert_eq!(*lens.lock().unwrap(), (3, 1, 3));
}

#[test]
fn unknown_binding_is_an_assertion_failure() {
    let m = Target::function("m", |_| Value::Null);
    SpecBuilder::new("typo")
        .bind("m", &m)
        .register(|event| {
            event.binding("mm")?;
            Ok(())
        })
        .unwrap();

    let err = m.call(CallArgs::new()).unwrap_err();
    assert!(err.as_assertion().unwrap().message().contains("'mm'"));
}

proptest! {
    #[test]
    fn truncation_keeps_max_n_one_and_unlinks_oldest(size in 0i64..12, extra in 1usize..15) {
        let calls = usize::try_from(size).unwrap() + extra;
        let observed = observe(size, calls);
        let bound = usize::try_from(size.max(1)).unwrap();

        prop_assert_eq!(observed.binding_len, bound);
        prop_assert_eq!(observed.shared_len, bound);
        prop_assert!(!observed.binding_oldest_linked);
        prop_assert!(!observed.shared_oldest_linked);

        let first = i64::try_from(calls - bound).unwrap();
        let expected: Vec<i64> = (first..i64::try_from(calls).unwrap()).collect();
        prop_assert_eq!(observed.inputs, expected);
    }
}
