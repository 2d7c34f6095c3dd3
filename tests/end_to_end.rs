use std::sync::Arc;
use std::thread;

use serde_json::json;

use transform_kernel::marshal::decode_body;
use transform_kernel::{
    Body, DataFormat, Dataset, DynamicValue, Error, InMemoryDatasetLoader, Mapping, RhaiEvaluator,
    SchemaKind, Script, Structure, TransformError, TransformOutput, Transformer,
};

fn run_with(transformer: &Transformer, source: &str) -> Result<TransformOutput, TransformError> {
    transformer.run(
        &RhaiEvaluator::new(),
        &Script::new("test.rhai", source),
        Dataset::default(),
    )
}

fn run(source: &str) -> Result<TransformOutput, TransformError> {
    run_with(&Transformer::new(), source)
}

fn body_of(output: &TransformOutput) -> DynamicValue {
    let structure = output.dataset.structure.as_ref().expect("structure");
    let body = output.dataset.body.as_ref().expect("body");
    decode_body(structure, body).expect("decode body")
}

#[test]
fn transform_sets_array_body() {
    let output = run("fn transform(ds, ctx) { ds.set_body([1, 2, 3]); }").expect("run");

    let structure = output.dataset.structure.clone().unwrap();
    assert_eq!(structure.schema_kind().unwrap(), SchemaKind::Array);
    assert_eq!(structure.format, DataFormat::Json);
    assert_eq!(
        body_of(&output),
        DynamicValue::Sequence(vec![1.into(), 2.into(), 3.into()])
    );
    assert_eq!(output.phases_run, vec!["transform"]);
}

#[test]
fn download_mapping_becomes_object_result() {
    let output = run("fn download(ctx) { #{ a: 1 } }").expect("run");

    let result = output.result.expect("result");
    assert_eq!(result.phase, "download");
    assert_eq!(
        result.structure.unwrap().schema_kind().unwrap(),
        SchemaKind::Object
    );
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].key.as_deref(), Some("a"));
    assert_eq!(result.entries[0].value, json!(1));

    // nothing was written explicitly, so the returned mapping is the body
    assert_eq!(
        output.dataset.structure.unwrap().schema_kind().unwrap(),
        SchemaKind::Object
    );
}

#[test]
fn script_without_phases_fails() {
    let err = run("let x = 1;").unwrap_err();
    assert_eq!(err.phase, "load");
    assert!(matches!(err.kind, Error::NoPhaseFunctions));
}

#[test]
fn policy_violation_is_distinguishable() {
    let err = run(r#"fn transform(ds, ctx) { http::get("http://127.0.0.1:9/") }"#).unwrap_err();
    assert_eq!(err.phase, "transform");
    assert!(err.kind.is_policy_violation());
    assert_eq!(
        err.kind.to_string(),
        "http.get cannot be called in transform phase"
    );
}

#[test]
fn script_errors_name_the_phase() {
    let err = run("fn transform(ds, ctx) { throw \"bad row\"; }").unwrap_err();
    assert_eq!(err.phase, "transform");
    match err.kind {
        Error::ScriptRuntime { message, .. } => assert_eq!(message, "bad row"),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn commit_is_single_shot() {
    let err = run("fn transform(ds, ctx) { ds.commit([1]); ds.commit([2]); }").unwrap_err();
    assert!(matches!(err.kind, Error::AlreadyCommitted));

    let output = run("fn transform(ds, ctx) { ds.commit(#{ total: 3 }); }").expect("run");
    let body = body_of(&output);
    assert_eq!(
        body.as_mapping().unwrap().get_str("total"),
        Some(&DynamicValue::Int(3))
    );
}

#[test]
fn context_values_carry_across_phases() {
    let source = r#"
        fn download(ctx) {
            ctx.set("rows", [4, 5]);
            "fetched"
        }
        fn transform(ds, ctx) {
            let rows = ctx.get("rows");
            rows.push(ctx.result("download"));
            ds.set_body(rows);
        }
    "#;
    let output = run(source).expect("run");
    assert_eq!(output.phases_run, vec!["download", "transform"]);
    assert_eq!(
        body_of(&output),
        DynamicValue::Sequence(vec![4.into(), 5.into(), "fetched".into()])
    );
}

#[test]
fn secrets_are_only_readable_while_downloading() {
    let transformer =
        Transformer::new().with_secrets(Mapping::from_iter([("token", "s3cret")]));

    let output = run_with(&transformer, r#"fn download(ctx) { config::get_secret("token") }"#)
        .expect("run");
    assert_eq!(output.result.unwrap().value, DynamicValue::string("s3cret"));

    let err = run_with(
        &transformer,
        r#"fn transform(ds, ctx) { config::get_secret("token") }"#,
    )
    .unwrap_err();
    assert!(err.kind.is_policy_violation());
}

#[test]
fn print_output_is_collected() {
    let output = run(r#"
        print("loading");
        fn transform(ds, ctx) { print(`rows: ${ds.get_body([]).len()}`); }
    "#)
    .expect("run");
    assert_eq!(output.diagnostics, vec!["loading", "rows: 0"]);
}

#[test]
fn existing_body_is_readable_and_replaceable() {
    let dataset = Dataset {
        structure: Some(Structure::base(SchemaKind::Array, DataFormat::Json)),
        body: Some(Body::new(DataFormat::Json, "[1,2,3]")),
        ..Dataset::default()
    };
    let source = r#"
        fn transform(ds, ctx) {
            let doubled = ds.get_body().map(|x| x * 2);
            ds.set_body(doubled);
            ds.set_meta("title", "doubled");
        }
    "#;
    let output = Transformer::new()
        .run(&RhaiEvaluator::new(), &Script::new("double.rhai", source), dataset)
        .expect("run");
    assert_eq!(
        body_of(&output),
        DynamicValue::Sequence(vec![2.into(), 4.into(), 6.into()])
    );
    assert_eq!(output.dataset.meta.unwrap()["title"], json!("doubled"));
}

#[test]
fn loaded_datasets_are_recorded() {
    let population = Dataset {
        structure: Some(Structure::base(SchemaKind::Array, DataFormat::Json)),
        body: Some(Body::new(DataFormat::Json, "[10,20]")),
        ..Dataset::default()
    };
    let transformer = Transformer::new()
        .with_loader(Arc::new(InMemoryDatasetLoader::new().with("me/population", population)));
    let source = r#"
        fn transform(ds, ctx) {
            let rows = datasets::load_dataset_body("me/population");
            ds.set_body(rows + datasets::list_datasets());
        }
    "#;
    let output = run_with(&transformer, source).expect("run");
    assert_eq!(
        body_of(&output),
        DynamicValue::Sequence(vec![10.into(), 20.into(), "me/population".into()])
    );
    let info = output.dataset.transform.unwrap();
    assert_eq!(info.syntax, "rhai");
    assert!(info.resources.contains_key("me/population"));
}

#[test]
fn concurrent_runs_are_isolated() {
    let source = r#"
        fn download(ctx) { ctx.set("n", config::get_config("n")); }
        fn transform(ds, ctx) { ds.set_body([ctx.get("n")]); }
    "#;
    let handles: Vec<_> = (0..4i64)
        .map(|n| {
            let transformer = Transformer::new().with_config(Mapping::from_iter([("n", n)]));
            thread::spawn(move || run_with(&transformer, source).map(|out| body_of(&out)))
        })
        .collect();
    for (n, handle) in handles.into_iter().enumerate() {
        let body = handle.join().expect("thread").expect("run");
        assert_eq!(body, DynamicValue::Sequence(vec![DynamicValue::Int(n as i64)]));
    }
}
