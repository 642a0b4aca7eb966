use kyrorv::{
    rv_fail, CallArgs, ConfigurationError, Opaque, RvError, SpecBuilder, Target, Value,
};

fn mutating_method(receiver: &Value) -> Target {
    Target::method("m", receiver.clone(), |args| {
        if let Some(this) = args.get(0).and_then(Value::as_object) {
            this.set_field("foo", "m");
        }
        if let Some(x) = args.get(1).and_then(Value::as_object) {
            x.set_field("x2", 9);
        }
        if let Some(z) = args.get_kwarg("z").and_then(Value::as_object) {
            z.set_field("z", 0);
        }
        Value::from("ret")
    })
}

#[test]
fn inputs_outputs_and_result() {
    let receiver = Value::object(Value::map([("foo", "initial")]));
    let m = mutating_method(&receiver);

    SpecBuilder::new("report")
        .bind("m", &m)
        .register(|event| {
            let call = event.binding("m")?.require_call()?;
            let (old_self, x) = (call.input(0)?, call.input(1)?);
            let (out_self, out_x) = (call.output(0)?, call.output(1)?);
            let kw = |map: &std::collections::BTreeMap<String, Value>, key: &str| {
                map.get(key).cloned().unwrap_or_default()
            };
            Err(rv_fail!(
                "in({} {} {} {}) result({}) out({} {} {} {})",
                old_self.field("foo").unwrap_or_default(),
                x,
                kw(call.input_kwargs(), "y"),
                kw(call.input_kwargs(), "z"),
                call.result(),
                out_self.field("foo").unwrap_or_default(),
                out_x,
                kw(call.output_kwargs(), "y"),
                kw(call.output_kwargs(), "z"),
            ))
        })
        .unwrap();

    let err = m
        .call(
            CallArgs::new()
                .arg(Value::object(Value::map([("x", 7)])))
                .kwarg("y", "y")
                .kwarg("z", Value::object(Value::map([("z", 8)]))),
        )
        .unwrap_err();
    assert_eq!(
        err.as_assertion().unwrap().message(),
        r#"in("initial" {"x":7} "y" {"z":8}) result("ret") out("m" {"x":7,"x2":9} "y" {"z":0})"#
    );
    assert_eq!(receiver.field("foo"), Some(Value::from("m")));
}

#[test]
fn identity_policy_aliases_the_live_arguments() {
    let bump = Target::function("bump", |args| {
        if let Some(obj) = args.get(0).and_then(Value::as_object) {
            obj.set_field("x", 2);
        }
        Value::Null
    });

    SpecBuilder::new("aliased")
        .bind("bump", &bump)
        .copy_arguments(false)
        .register(|event| {
            let call = event.active().require_call()?;
            let (input, output) = (call.input(0)?, call.output(0)?);
            if !input.same(output) {
                return Err(rv_fail!("inputs and outputs should alias"));
            }
            if input.field("x") != Some(Value::Int(2)) {
                return Err(rv_fail!("inputs should show the post-call state, got {}", input));
            }
            Ok(())
        })
        .unwrap();

    let live = Value::object(Value::map([("x", 1)]));
    bump.call(CallArgs::new().arg(live.clone())).unwrap();
    assert_eq!(live.field("x"), Some(Value::Int(2)));
}

#[test]
fn opaque_arguments_cannot_be_copied() {
    let m = Target::function("m", |_| Value::Null);
    SpecBuilder::new("copying")
        .bind("m", &m)
        .copy_arguments(true)
        .register(|_| Ok(()))
        .unwrap();

    let err = m
        .call(CallArgs::new().arg(Opaque::new(std::time::Instant::now())))
        .unwrap_err();
    assert!(matches!(
        err,
        RvError::Configuration(ConfigurationError::NotCopyable { .. })
    ));
}

#[test]
fn opaque_arguments_pass_through_without_copying() {
    let m = Target::function("m", |args| {
        let tag = args
            .get(0)
            .and_then(Value::as_opaque)
            .and_then(|o| o.downcast_ref::<&'static str>().copied())
            .unwrap_or("missing");
        Value::from(tag)
    });
    SpecBuilder::new("identity")
        .bind("m", &m)
        .copy_arguments(false)
        .register(|event| {
            let call = event.active().require_call()?;
            if call.input(0)?.as_opaque().is_none() {
                return Err(rv_fail!("opaque argument missing from inputs"));
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(
        m.call(CallArgs::new().arg(Opaque::new("tagged"))).unwrap(),
        Value::from("tagged")
    );
}

#[test]
fn target_result_is_returned_unchanged() {
    let double = Target::function("double", |args| {
        Value::Int(args.get(0).and_then(Value::as_int).unwrap_or(0) * 2)
    });
    SpecBuilder::new("observer")
        .bind("double", &double)
        .register(|_| Ok(()))
        .unwrap();

    assert_eq!(double.call(CallArgs::new().arg(21)).unwrap(), Value::Int(42));
}

#[test]
fn cyclic_arguments_can_be_compared_and_reported() {
    let m = Target::function("m", |_| Value::Null);
    SpecBuilder::new("cyclic")
        .bind("m", &m)
        .copy_arguments(true)
        .register(|event| {
            let call = event.active().require_call()?;
            if call.inputs() != call.outputs() {
                return Err(rv_fail!("arguments changed: {} -> {}", call.input(0)?, call.output(0)?));
            }
            Err(rv_fail!("saw {}", call.input(0)?))
        })
        .unwrap();

    let node = Value::object(Value::map([("x", 1)]));
    if let Some(shared) = node.as_object() {
        shared.set_field("me", node.clone());
    }
    let err = m.call(CallArgs::new().arg(node)).unwrap_err();
    assert_eq!(
        err.as_assertion().unwrap().message(),
        r#"saw {"me":"<cycle>","x":1}"#
    );
}
