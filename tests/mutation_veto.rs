use std::sync::Arc;

use serde_json::json;

use transform_kernel::{
    freeze, Body, DataFormat, Dataset, Error, InMemoryDatasetLoader, RhaiEvaluator, SchemaKind,
    Script, Structure, TransformError, TransformOutput, Transformer,
};

fn seeded() -> Dataset {
    let mut dataset = Dataset {
        structure: Some(Structure::base(SchemaKind::Array, DataFormat::Json)),
        body: Some(Body::new(DataFormat::Json, "[1]")),
        ..Dataset::default()
    };
    dataset.set_meta("title", json!("original")).expect("seed meta");
    dataset
}

fn run(transformer: &Transformer, source: &str) -> Result<TransformOutput, TransformError> {
    transformer.run(&RhaiEvaluator::new(), &Script::new("veto.rhai", source), seeded())
}

fn read_only() -> Transformer {
    Transformer::new().with_mutation_check(|path| {
        Err(Error::MutationRejected {
            path: path.join("."),
            reason: "dataset is read-only".to_string(),
        })
    })
}

fn assert_vetoed(err: TransformError, path: &str) {
    assert_eq!(err.phase, "transform");
    match err.kind {
        Error::MutationRejected { path: rejected, reason } => {
            assert_eq!(rejected, path);
            assert_eq!(reason, "dataset is read-only");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn veto_error_is_returned_unchanged() {
    let transformer = read_only();
    assert_vetoed(
        run(&transformer, "fn transform(ds, ctx) { ds.set_body([2]); }").unwrap_err(),
        "body",
    );
    assert_vetoed(
        run(&transformer, r#"fn transform(ds, ctx) { ds.set_meta("title", "new"); }"#).unwrap_err(),
        "meta.title",
    );
    assert_vetoed(
        run(
            &transformer,
            r#"fn transform(ds, ctx) { ds.set_structure(#{ "type": "object" }); }"#,
        )
        .unwrap_err(),
        "structure",
    );
    assert_vetoed(
        run(&transformer, "fn transform(ds, ctx) { ds.commit([2]); }").unwrap_err(),
        "body",
    );
}

#[test]
fn vetoed_writes_leave_dataset_untouched() {
    let source = r#"
        fn transform(ds, ctx) {
            try { ds.set_body([2, 3]); } catch (err) { print(err); }
            try { ds.set_meta("title", "new"); } catch (err) { print(err); }
            try { ds.set_structure(#{ "type": "object" }); } catch (err) { print(err); }
        }
    "#;
    let output = run(&read_only(), source).expect("run");
    assert_eq!(output.diagnostics.len(), 3);
    let original = seeded();
    assert_eq!(output.dataset.meta, original.meta);
    assert_eq!(output.dataset.structure, original.structure);
    assert_eq!(output.dataset.body, original.body);
}

#[test]
fn returned_body_goes_through_the_veto() {
    let err = run(&read_only(), "fn transform(ds, ctx) { [9, 9] }").unwrap_err();
    assert_vetoed(err, "body");
}

#[test]
fn frozen_fields_reject_only_their_paths() {
    let transformer = Transformer::new()
        .with_mutation_check_arc(freeze(vec!["meta.title".to_string(), "structure".to_string()]));
    let source = r#"
        fn transform(ds, ctx) {
            ds.set_meta("description", "ok");
            ds.set_body([1, 2]);
            ds.set_meta("title", "blocked");
        }
    "#;
    let err = run(&transformer, source).unwrap_err();
    match err.kind {
        Error::MutationRejected { path, reason } => {
            assert_eq!(path, "meta.title");
            assert_eq!(reason, "field is frozen");
        }
        other => panic!("unexpected error {other}"),
    }

    let output = run(
        &transformer,
        r#"fn transform(ds, ctx) { ds.set_meta("description", "ok"); ds.set_body([1, 2]); }"#,
    )
    .expect("run");
    let meta = output.dataset.meta.unwrap();
    assert_eq!(meta["title"], json!("original"));
    assert_eq!(meta["description"], json!("ok"));
    assert_eq!(output.dataset.body.unwrap().bytes, b"[1,2]".to_vec());
}

#[test]
fn provenance_is_recorded_under_a_read_only_veto() {
    let population = Dataset {
        structure: Some(Structure::base(SchemaKind::Array, DataFormat::Json)),
        body: Some(Body::new(DataFormat::Json, "[10,20]")),
        ..Dataset::default()
    };
    let transformer = read_only()
        .with_loader(Arc::new(InMemoryDatasetLoader::new().with("me/population", population)));
    let source = r#"
        fn transform(ds, ctx) {
            let rows = datasets::load_dataset_body("me/population");
            print(`${rows.len()}`);
        }
    "#;
    let output = run(&transformer, source).expect("run");
    assert_eq!(output.diagnostics, vec!["2"]);

    let info = output.dataset.transform.expect("transform info");
    assert_eq!(info.syntax, "rhai");
    assert!(info.resources.contains_key("me/population"));
    assert_eq!(output.dataset.body, seeded().body);
}
