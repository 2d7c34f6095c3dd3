//! Rhai-backed evaluator.
//!
//! Host namespaces are registered as static modules (`http::get(url)`,
//! `config::get_secret("key")`). Handles passed to phase functions are
//! `HostObject`s whose methods dispatch to their namespace, so
//! `ds.set_body([1, 2, 3])` and `dataset::set_body([1, 2, 3])` reach the same
//! host callable. Module imports are disabled.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Module, Position, Scope, AST};

use crate::error::{Error, Result};
use crate::module_runtime::{arity_error, CallArg, Evaluator, HostBinding, PhaseFunction, Program, Script};
use crate::value::{DynamicValue, Mapping};

type RhaiResult = std::result::Result<Dynamic, Box<EvalAltResult>>;

/// Host error raised by the most recent failing host call.
type Stash = Rc<RefCell<Option<Error>>>;

#[derive(Clone, Debug, Default)]
pub struct RhaiEvaluator {
    max_call_levels: Option<usize>,
}

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_call_levels(mut self, levels: usize) -> Self {
        self.max_call_levels = Some(levels);
        self
    }
}

/// Script-side handle for a host namespace.
#[derive(Clone, Debug)]
pub struct HostObject {
    namespace: String,
}

impl Evaluator for RhaiEvaluator {
    type Program = RhaiProgram;

    fn syntax(&self) -> &'static str {
        "rhai"
    }

    fn load(&self, script: &Script, host: HostBinding) -> Result<RhaiProgram> {
        let stash: Stash = Rc::default();
        let mut engine = Engine::new();
        engine.set_module_resolver(DummyModuleResolver::new());
        if let Some(levels) = self.max_call_levels {
            engine.set_max_call_levels(levels);
        }

        let printer = host.clone();
        engine.on_print(move |text| printer.print(text));
        let debugger = host.clone();
        engine.on_debug(move |text, source, pos| match source {
            Some(source) => debugger.print(&format!("{source} @ {pos} | {text}")),
            None => debugger.print(&format!("{pos} | {text}")),
        });

        register_host(&mut engine, &host, &stash);

        let mut ast = engine.compile(&script.source).map_err(|err| Error::ScriptLoad {
            message: format!("{}: {err}", script.name),
            trace: None,
        })?;
        ast.set_source(script.name.as_str());

        let mut scope = Scope::new();
        if let Err(err) = engine.run_ast_with_scope(&mut scope, &ast) {
            return Err(match take_host_error(&stash, &err) {
                Some(host_err) => host_err,
                None => {
                    let (message, trace) = render(*err);
                    Error::ScriptLoad {
                        message,
                        trace: Some(trace),
                    }
                }
            });
        }

        Ok(RhaiProgram {
            engine,
            ast,
            scope,
            stash,
        })
    }
}

pub struct RhaiProgram {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    stash: Stash,
}

impl Program for RhaiProgram {
    fn lookup(&self, name: &str) -> Option<PhaseFunction> {
        self.ast
            .iter_functions()
            .filter(|f| f.name == name)
            .map(|f| PhaseFunction {
                name: f.name.to_string(),
                arity: f.params.len(),
            })
            .max_by_key(|f| f.arity)
    }

    fn call(&mut self, function: &PhaseFunction, args: &[CallArg]) -> Result<DynamicValue> {
        if function.arity > args.len() {
            return Err(arity_error(function, args.len()));
        }
        let args: Vec<Dynamic> = args[..function.arity].iter().map(arg_to_dynamic).collect();
        self.stash.borrow_mut().take();

        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        match self.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut self.scope,
            &self.ast,
            &function.name,
            args,
        ) {
            Ok(value) => Ok(from_dynamic(value)),
            Err(err) => match take_host_error(&self.stash, &err) {
                Some(host_err) => Err(host_err),
                None => {
                    let (message, trace) = render(*err);
                    Err(Error::ScriptRuntime {
                        message,
                        trace: Some(trace),
                    })
                }
            },
        }
    }
}

fn register_host(engine: &mut Engine, host: &HostBinding, stash: &Stash) {
    engine.register_type_with_name::<HostObject>("HostObject");

    let mut methods = BTreeSet::new();
    for (namespace, names) in host.namespaces() {
        let mut module = Module::new();
        for method in &names {
            let (b, s, ns, m) = (host.clone(), stash.clone(), namespace.clone(), method.clone());
            module.set_native_fn(method.as_str(), move || host_call(&b, &s, &ns, &m, &[]));
            let (b, s, ns, m) = (host.clone(), stash.clone(), namespace.clone(), method.clone());
            module.set_native_fn(method.as_str(), move |a: Dynamic| {
                host_call(&b, &s, &ns, &m, &[a])
            });
            let (b, s, ns, m) = (host.clone(), stash.clone(), namespace.clone(), method.clone());
            module.set_native_fn(method.as_str(), move |a: Dynamic, c: Dynamic| {
                host_call(&b, &s, &ns, &m, &[a, c])
            });
            let (b, s, ns, m) = (host.clone(), stash.clone(), namespace.clone(), method.clone());
            module.set_native_fn(method.as_str(), move |a: Dynamic, c: Dynamic, d: Dynamic| {
                host_call(&b, &s, &ns, &m, &[a, c, d])
            });
        }
        engine.register_static_module(namespace.as_str(), module.into());
        methods.extend(names);
    }

    for method in methods {
        let (b, s, m) = (host.clone(), stash.clone(), method.clone());
        engine.register_fn(method.as_str(), move |obj: &mut HostObject| {
            host_call(&b, &s, &obj.namespace, &m, &[])
        });
        let (b, s, m) = (host.clone(), stash.clone(), method.clone());
        engine.register_fn(method.as_str(), move |obj: &mut HostObject, a: Dynamic| {
            host_call(&b, &s, &obj.namespace, &m, &[a])
        });
        let (b, s, m) = (host.clone(), stash.clone(), method.clone());
        engine.register_fn(
            method.as_str(),
            move |obj: &mut HostObject, a: Dynamic, c: Dynamic| {
                host_call(&b, &s, &obj.namespace, &m, &[a, c])
            },
        );
        let (b, s, m) = (host.clone(), stash.clone(), method.clone());
        engine.register_fn(
            method.as_str(),
            move |obj: &mut HostObject, a: Dynamic, c: Dynamic, d: Dynamic| {
                host_call(&b, &s, &obj.namespace, &m, &[a, c, d])
            },
        );
    }
}

fn host_call(
    host: &HostBinding,
    stash: &Stash,
    namespace: &str,
    method: &str,
    args: &[Dynamic],
) -> RhaiResult {
    let args: Vec<DynamicValue> = args.iter().cloned().map(from_dynamic).collect();
    match host.call(namespace, method, &args) {
        Ok(value) => Ok(to_dynamic(&value)),
        Err(err) => {
            let message = err.to_string();
            *stash.borrow_mut() = Some(err);
            Err(EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE).into())
        }
    }
}

/// Returns the stashed host error if it is what aborted the script. A host
/// error the script caught and recovered from is discarded.
fn take_host_error(stash: &Stash, err: &EvalAltResult) -> Option<Error> {
    let stashed = stash.borrow_mut().take()?;
    let mut current = err;
    while let EvalAltResult::ErrorInFunctionCall(_, _, inner, _) = current {
        current = &**inner;
    }
    match current {
        EvalAltResult::ErrorRuntime(value, _) if value.to_string() == stashed.to_string() => {
            Some(stashed)
        }
        _ => None,
    }
}

/// Splits an evaluation error into the root message and a backtrace with one
/// line per call frame, outermost first.
fn render(err: EvalAltResult) -> (String, String) {
    let mut frames = Vec::new();
    let mut current = err;
    let root = loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) => {
                frames.push(frame(&name, &source, pos));
                current = *inner;
            }
            other => break other,
        }
    };
    let pos = root.position();
    let message = match root {
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        mut other => {
            other.clear_position();
            other.to_string()
        }
    };
    if !pos.is_none() {
        frames.push(format!("  at {pos}"));
    }
    (message, frames.join("\n"))
}

fn frame(name: &str, source: &str, pos: Position) -> String {
    if source.is_empty() {
        format!("  at {name} ({pos})")
    } else {
        format!("  at {name} ({source} {pos})")
    }
}

fn arg_to_dynamic(arg: &CallArg) -> Dynamic {
    match arg {
        CallArg::Handle(namespace) => Dynamic::from(HostObject {
            namespace: namespace.clone(),
        }),
        CallArg::Value(value) => to_dynamic(value),
    }
}

pub(crate) fn from_dynamic(value: Dynamic) -> DynamicValue {
    let value = value.flatten();
    if value.is_unit() {
        return DynamicValue::Null;
    }
    if let Ok(b) = value.as_bool() {
        return DynamicValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return DynamicValue::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return DynamicValue::Float(f);
    }
    if let Ok(c) = value.as_char() {
        return DynamicValue::String(c.to_string());
    }
    if value.is_string() {
        return match value.into_immutable_string() {
            Ok(s) => DynamicValue::String(s.to_string()),
            Err(type_name) => DynamicValue::Unsupported(type_name.to_string()),
        };
    }
    if value.is_array() {
        return match value.into_array() {
            Ok(items) => DynamicValue::Sequence(items.into_iter().map(from_dynamic).collect()),
            Err(type_name) => DynamicValue::Unsupported(type_name.to_string()),
        };
    }
    if value.is_map() {
        let type_name = value.type_name().to_string();
        return match value.try_cast::<Map>() {
            Some(map) => DynamicValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (DynamicValue::String(k.to_string()), from_dynamic(v)))
                    .collect(),
            ),
            None => DynamicValue::Unsupported(type_name),
        };
    }
    DynamicValue::Unsupported(value.type_name().to_string())
}

pub(crate) fn to_dynamic(value: &DynamicValue) -> Dynamic {
    match value {
        DynamicValue::Null | DynamicValue::Unsupported(_) => Dynamic::UNIT,
        DynamicValue::Bool(b) => Dynamic::from_bool(*b),
        DynamicValue::Int(i) => Dynamic::from_int(*i),
        DynamicValue::Float(f) => Dynamic::from_float(*f),
        DynamicValue::String(s) => Dynamic::from(s.clone()),
        DynamicValue::Sequence(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        DynamicValue::Mapping(map) => Dynamic::from_map(mapping_to_map(map)),
    }
}

fn mapping_to_map(mapping: &Mapping) -> Map {
    mapping
        .iter()
        .map(|(k, v)| {
            let key = match k.as_str() {
                Some(s) => s.to_string(),
                None => k.to_string(),
            };
            (key.into(), to_dynamic(v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ModuleSurface, Namespace};
    use crate::module_runtime::Diagnostics;

    fn load(source: &str, surface: ModuleSurface) -> Result<(RhaiProgram, HostBinding)> {
        let host = HostBinding::new(Diagnostics::default());
        host.install(surface);
        let program = RhaiEvaluator::new().load(&Script::new("test.rhai", source), host.clone())?;
        Ok((program, host))
    }

    #[test]
    fn lookup_reports_defined_functions_only() {
        let (program, _) = load("fn transform(ds, ctx) { 1 }", ModuleSurface::new()).unwrap();
        assert_eq!(
            program.lookup("transform"),
            Some(PhaseFunction {
                name: "transform".to_string(),
                arity: 2
            })
        );
        assert_eq!(program.lookup("download"), None);
    }

    #[test]
    fn syntax_errors_fail_at_load() {
        let err = load("fn transform( {", ModuleSurface::new()).err().unwrap();
        assert!(matches!(err, Error::ScriptLoad { .. }));
    }

    #[test]
    fn values_cross_the_boundary() {
        let (mut program, _) = load(
            r#"fn download(ctx) { #{ b: [1, 2.5, "x", ()], a: true } }"#,
            ModuleSurface::new(),
        )
        .unwrap();
        let f = program.lookup("download").unwrap();
        let value = program.call(&f, &[CallArg::Value(DynamicValue::Null)]).unwrap();
        let map = value.as_mapping().unwrap();
        assert_eq!(map.get_str("a"), Some(&DynamicValue::Bool(true)));
        assert_eq!(
            map.get_str("b"),
            Some(&DynamicValue::Sequence(vec![
                DynamicValue::Int(1),
                DynamicValue::Float(2.5),
                DynamicValue::string("x"),
                DynamicValue::Null,
            ]))
        );
    }

    #[test]
    fn handles_and_static_modules_reach_the_host() {
        let surface = ModuleSurface::new().with(
            Namespace::new("ctx").with("echo", |args| Ok(args.first().cloned().unwrap_or_default())),
        );
        let (mut program, _) = load(
            "fn download(ctx) { ctx.echo(40) + ctx::echo(2) }",
            surface,
        )
        .unwrap();
        let f = program.lookup("download").unwrap();
        let value = program.call(&f, &[CallArg::Handle("ctx".to_string())]).unwrap();
        assert_eq!(value, DynamicValue::Int(42));
    }

    #[test]
    fn host_errors_surface_typed() {
        let surface = ModuleSurface::new().with(Namespace::new("http").with("get", |_| {
            Err(Error::PolicyViolation {
                phase: "transform".to_string(),
                method: "http.get".to_string(),
            })
        }));
        let (mut program, _) = load(
            r#"fn transform() { http::get("http://example.com") }"#,
            surface,
        )
        .unwrap();
        let f = program.lookup("transform").unwrap();
        let err = program.call(&f, &[]).unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[test]
    fn guest_errors_carry_a_backtrace() {
        let (mut program, _) = load(
            "fn inner() { throw \"boom\"; }\nfn transform(ds, ctx) { inner() }",
            ModuleSurface::new(),
        )
        .unwrap();
        let f = program.lookup("transform").unwrap();
        let err = program
            .call(&f, &[CallArg::Handle("dataset".into()), CallArg::Handle("ctx".into())])
            .unwrap_err();
        match err {
            Error::ScriptRuntime { message, trace } => {
                assert_eq!(message, "boom");
                assert!(trace.unwrap().contains("inner"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn top_level_errors_keep_their_backtrace() {
        let err = load(
            "fn setup() { throw \"no rows\"; }\nsetup();\nfn transform(ds, ctx) {}",
            ModuleSurface::new(),
        )
        .err()
        .unwrap();
        let rendered = err.to_string();
        match err {
            Error::ScriptLoad { message, trace } => {
                assert_eq!(message, "no rows");
                let trace = trace.unwrap();
                assert!(trace.contains("setup"), "trace was {trace:?}");
                assert_eq!(rendered, format!("script load error: no rows\n{trace}"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn print_goes_to_diagnostics() {
        let (_, host) = load("print(\"loaded\");", ModuleSurface::new()).unwrap();
        assert_eq!(host.diagnostics().lines(), vec!["loaded"]);
    }

    #[test]
    fn imports_are_disabled() {
        let err = load("import \"os\" as os;", ModuleSurface::new()).err().unwrap();
        assert!(matches!(err, Error::ScriptLoad { .. }));
    }
}
