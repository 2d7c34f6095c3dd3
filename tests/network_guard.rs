use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use transform_kernel::{
    default_rules, Dataset, DynamicValue, Error, NativeEvaluator, RhaiEvaluator, Rule, Script,
    SchemaKind, Transformer,
};

/// Serves `requests` canned JSON responses on a loopback port.
fn stub_server(body: &'static str, requests: usize) -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        for _ in 0..requests {
            let (mut stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    (format!("http://{addr}/rows"), handle)
}

fn http_in_transform_rules() -> Vec<Rule> {
    let mut rules = default_rules();
    rules.push(Rule::allow("transform", "http.*"));
    rules
}

fn script() -> Script {
    Script::new("native", "")
}

#[test]
fn download_can_fetch() {
    let (url, server) = stub_server(r#"{"rows":[1,2]}"#, 1);
    let source = r#"
        fn download(ctx) {
            let res = http::get("URL", #{ params: #{ page: 1 } });
            if res.status_code != 200 { throw "unexpected status"; }
            res.json
        }
    "#
    .replace("URL", &url);

    let output = Transformer::new()
        .run(&RhaiEvaluator::new(), &Script::new("fetch.rhai", source), Dataset::default())
        .expect("run");
    server.join().expect("stub server");

    let result = output.result.expect("result");
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].key.as_deref(), Some("rows"));
    assert_eq!(
        output.dataset.structure.unwrap().schema_kind().unwrap(),
        SchemaKind::Object
    );
}

#[test]
fn transform_cannot_reach_network_even_when_policy_allows() {
    let source = r#"fn transform(ds, ctx) { http::get("http://127.0.0.1:9/") }"#;
    let err = Transformer::new()
        .with_rules(http_in_transform_rules())
        .run(&RhaiEvaluator::new(), &Script::new("t.rhai", source), Dataset::default())
        .unwrap_err();
    assert_eq!(err.phase, "transform");
    match err.kind {
        Error::NetworkDisabled { method } => assert_eq!(method, "http.get"),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn network_is_closed_again_after_download() {
    let (url, server) = stub_server("[]", 1);
    let fetch_url = url.clone();
    let evaluator = NativeEvaluator::new()
        .phase("download", 1, move |host, _| {
            host.call("http", "get", &[DynamicValue::string(fetch_url.as_str())])?;
            Ok(DynamicValue::Null)
        })
        .phase("transform", 2, move |host, _| {
            host.call("http", "get", &[DynamicValue::string(url.as_str())])
        });

    let err = Transformer::new()
        .with_rules(http_in_transform_rules())
        .run(&evaluator, &script(), Dataset::default())
        .unwrap_err();
    server.join().expect("stub server");
    assert_eq!(err.phase, "transform");
    assert!(matches!(err.kind, Error::NetworkDisabled { .. }));
}

#[test]
fn network_is_closed_after_failed_request() {
    let evaluator = NativeEvaluator::new()
        .phase("download", 1, |host, _| {
            // nothing listens on the discard port
            let failed = host.call("http", "get", &[DynamicValue::string("http://127.0.0.1:9/")]);
            assert!(matches!(failed, Err(Error::Http(_))));
            Ok(DynamicValue::Null)
        })
        .phase("transform", 2, |host, _| {
            host.call("http", "get", &[DynamicValue::string("http://127.0.0.1:9/")])
        });

    let err = Transformer::new()
        .with_rules(http_in_transform_rules())
        .run(&evaluator, &script(), Dataset::default())
        .unwrap_err();
    assert!(matches!(err.kind, Error::NetworkDisabled { .. }));
}

#[test]
fn network_phases_are_configurable() {
    let evaluator = NativeEvaluator::new().phase("download", 1, |host, _| {
        host.call("http", "get", &[DynamicValue::string("http://127.0.0.1:9/")])
    });
    let err = Transformer::new()
        .with_network_phases(&[])
        .run(&evaluator, &script(), Dataset::default())
        .unwrap_err();
    assert_eq!(err.phase, "download");
    assert!(matches!(err.kind, Error::NetworkDisabled { .. }));
}

#[test]
fn non_http_urls_are_rejected() {
    let evaluator = NativeEvaluator::new().phase("download", 1, |host, _| {
        host.call("http", "get", &[DynamicValue::string("file:///etc/passwd")])
    });
    let err = Transformer::new()
        .run(&evaluator, &script(), Dataset::default())
        .unwrap_err();
    match err.kind {
        Error::Http(message) => assert!(message.contains("unsupported url scheme file")),
        other => panic!("unexpected error {other}"),
    }
}
