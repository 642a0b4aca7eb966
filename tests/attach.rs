use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kyrorv::{
    rv_ensure, CallArgs, RvError, SpecBuilder, Target, TargetKind, Value, UNBOUNDED_HISTORY,
};

fn message(err: &RvError) -> String {
    err.flatten()
        .into_iter()
        .filter_map(RvError::as_assertion)
        .map(|f| f.message().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[test]
fn registration_leaves_unbound_targets_alone() {
    let a = Target::function("a", |_| Value::Int(1));
    let c = Target::function("c", |_| Value::Int(-1));

    SpecBuilder::new("a_only")
        .bind("a", &a)
        .register(|_| Err("a called".into()))
        .unwrap();

    assert!(a.is_monitored());
    assert!(!c.is_monitored());
    assert_eq!(c.hook_count(), 0);
    assert_eq!(c.call(CallArgs::new()).unwrap(), Value::Int(-1));
    assert_eq!(message(&a.call(CallArgs::new()).unwrap_err()), "a called");
}

#[test]
fn called_function_names_the_active_binding() {
    let a = Target::function("a", |_| Value::Int(1));
    let b = Target::function("b", |_| Value::Int(0));

    SpecBuilder::new("which")
        .bind("a", &a)
        .bind("b", &b)
        .register(|event| {
            rv_ensure!(event.called("a") || event.called("b"));
            Err(format!("{} called", event.called_function()).into())
        })
        .unwrap();

    assert_eq!(message(&a.call(CallArgs::new()).unwrap_err()), "a called");
    assert_eq!(message(&b.call(CallArgs::new()).unwrap_err()), "b called");
}

#[test]
fn second_spec_on_same_target_shares_the_hook() {
    let t = Target::function("t", |_| Value::Int(2));
    let enable_first = Arc::new(AtomicBool::new(true));

    let enabled = Arc::clone(&enable_first);
    SpecBuilder::new("first")
        .bind("test", &t)
        .register(move |event| {
            rv_ensure!(event.binding("test")?.called());
            rv_ensure!(!enabled.load(Ordering::SeqCst), "test called");
            Ok(())
        })
        .unwrap();

    assert_eq!(message(&t.call(CallArgs::new()).unwrap_err()), "test called");
    enable_first.store(false, Ordering::SeqCst);
    assert_eq!(t.call(CallArgs::new()).unwrap(), Value::Int(2));

    SpecBuilder::new("second")
        .bind("test", &t)
        .register(|_| Err("test called2".into()))
        .unwrap();
    assert_eq!(t.hook_count(), 1);
    assert_eq!(message(&t.call(CallArgs::new()).unwrap_err()), "test called2");

    enable_first.store(true, Ordering::SeqCst);
    assert_eq!(
        message(&t.call(CallArgs::new()).unwrap_err()),
        "test called, test called2"
    );
}

#[test]
fn class_method_receives_class_name() {
    let make = Target::new(
        "make",
        TargetKind::ClassMethod {
            class: "M".to_string(),
        },
        |args| args.get(0).cloned().unwrap_or_default(),
    );

    SpecBuilder::new("class_method")
        .bind("make", &make)
        .register(|event| {
            let inputs = event.active().inputs()?;
            rv_ensure!(inputs.first() == Some(&Value::from("M")), "inputs were {:?}", inputs);
            Ok(())
        })
        .unwrap();

    assert_eq!(make.call(CallArgs::new()).unwrap(), Value::from("M"));
}

#[test]
fn static_method_has_no_implicit_argument() {
    let count = Target::new(
        "count",
        TargetKind::StaticMethod {
            class: "M".to_string(),
        },
        |args| Value::Int(i64::try_from(args.positional().len()).unwrap_or(i64::MAX)),
    );

    SpecBuilder::new("static_method")
        .bind("count", &count)
        .register(|event| {
            let call = event.active().require_call()?;
            rv_ensure!(call.inputs().len() == 2, "inputs were {:?}", call.inputs());
            rv_ensure!(call.result() == &Value::Int(2));
            Ok(())
        })
        .unwrap();

    assert_eq!(count.call(CallArgs::new().arg(1).arg(2)).unwrap(), Value::Int(2));
}

#[test]
fn methods_on_different_receivers_are_different_targets() {
    let first = Value::object(Value::map([("id", 1)]));
    let second = Value::object(Value::map([("id", 2)]));
    let id = |args: &mut CallArgs| args.get(0).and_then(|this| this.field("id")).unwrap_or_default();
    let a = Target::method("id", first, id);
    let b = Target::method("id", second, id);

    SpecBuilder::new("only_first")
        .bind("first", &a)
        .register(|event| Err(format!("{} seen", event.active().result()?).into()))
        .unwrap();

    assert_eq!(message(&a.call(CallArgs::new()).unwrap_err()), "1 seen");
    assert_eq!(b.call(CallArgs::new()).unwrap(), Value::Int(2));
}

#[test]
fn dropping_the_target_frees_it_while_the_spec_is_active() {
    let token = Arc::new(());
    let captured = Arc::clone(&token);
    let m = Target::function("m", move |_| {
        let _held = &captured;
        Value::Null
    });
    let n = Target::function("n", |_| Value::Null);

    let handle = SpecBuilder::new("never_finishes")
        .bind("m", &m)
        .bind("n", &n)
        .history_size(UNBOUNDED_HISTORY)
        .register(|event| {
            rv_ensure!(!event.called("n"), "n called");
            Ok(())
        })
        .unwrap();
    for _ in 0..3 {
        m.call(CallArgs::new()).unwrap();
    }
    assert!(handle.is_active());
    assert_eq!(Arc::strong_count(&token), 2);

    drop(m);
    assert_eq!(Arc::strong_count(&token), 1);

    // The surviving target still dispatches, and detaching skips the dropped one.
    assert_eq!(message(&n.call(CallArgs::new()).unwrap_err()), "n called");
    assert_eq!(handle.detach(), 0);
    assert!(!handle.is_attached());
    assert!(n.call(CallArgs::new()).is_ok());
}
