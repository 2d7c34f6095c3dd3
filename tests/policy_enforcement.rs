use transform_kernel::{
    Dataset, DynamicValue, Error, NativeEvaluator, RhaiEvaluator, Rule, Script, TransformError,
    TransformOutput, Transformer,
};

fn run(transformer: &Transformer, source: &str) -> Result<TransformOutput, TransformError> {
    transformer.run(
        &RhaiEvaluator::new(),
        &Script::new("policy.rhai", source),
        Dataset::default(),
    )
}

#[test]
fn download_cannot_touch_the_dataset() {
    let err = run(
        &Transformer::new(),
        r#"fn download(ctx) { dataset::set_meta("title", "early"); }"#,
    )
    .unwrap_err();
    assert_eq!(err.phase, "download");
    assert_eq!(
        err.kind.to_string(),
        "dataset.set_meta cannot be called in download phase"
    );
}

#[test]
fn load_phase_is_restricted() {
    let err = run(
        &Transformer::new(),
        "let secret = config::get_secret(\"token\");\nfn transform(ds, ctx) {}",
    )
    .unwrap_err();
    assert_eq!(err.phase, "load");
    match err.kind {
        Error::PolicyViolation { phase, method } => {
            assert_eq!(phase, "load");
            assert_eq!(method, "config.get_secret");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn last_matching_rule_wins() {
    let rules = vec![
        Rule::allow("*", "*"),
        Rule::deny("transform", "ctx.*"),
        Rule::allow("transform", "ctx.result"),
    ];
    let transformer = Transformer::new().with_rules(rules);
    let source = r#"
        fn download(ctx) { ctx.set("n", 1); 7 }
        fn transform(ds, ctx) { ctx.result("download") }
    "#;
    let output = run(&transformer, source).expect("run");
    assert_eq!(output.result.unwrap().value, DynamicValue::Int(7));

    let err = run(&transformer, r#"fn transform(ds, ctx) { ctx.get("n") }"#).unwrap_err();
    assert_eq!(err.kind.to_string(), "ctx.get cannot be called in transform phase");
}

#[test]
fn unmatched_methods_are_denied() {
    let transformer = Transformer::new().with_rules(vec![Rule::allow("transform", "dataset.set_body")]);
    let err = run(
        &transformer,
        r#"fn transform(ds, ctx) { ds.set_body([1]); ds.set_meta("title", "x"); }"#,
    )
    .unwrap_err();
    assert_eq!(
        err.kind.to_string(),
        "dataset.set_meta cannot be called in transform phase"
    );
}

#[test]
fn bare_method_names_match_any_namespace() {
    let mut rules = transform_kernel::default_rules();
    rules.push(Rule::deny("transform", "set_body"));
    let err = run(
        &Transformer::new().with_rules(rules),
        "fn transform(ds, ctx) { ds.set_body([1]); }",
    )
    .unwrap_err();
    assert!(err.kind.is_policy_violation());
}

#[test]
fn denied_call_has_no_effect() {
    let source = r#"
        fn transform(ds, ctx) {
            try {
                ds.set_meta("title", "blocked");
            } catch (err) {
                print(err);
            }
        }
    "#;
    let transformer =
        Transformer::new().with_rules(vec![Rule::allow("*", "*"), Rule::deny("*", "dataset.set_meta")]);
    let output = run(&transformer, source).expect("run");
    assert!(output.dataset.meta.is_none());
    assert_eq!(
        output.diagnostics,
        vec!["dataset.set_meta cannot be called in transform phase"]
    );
}

#[test]
fn native_phases_see_the_same_policy() {
    let evaluator = NativeEvaluator::new().phase("transform", 2, |host, _| {
        host.call("config", "get_secret", &[DynamicValue::string("token")])
    });
    let err = Transformer::new()
        .run(&evaluator, &Script::new("native", ""), Dataset::default())
        .unwrap_err();
    assert!(err.kind.is_policy_violation());
}
