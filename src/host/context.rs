//! Per-run context shared between phases.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::host::{Args, Namespace};
use crate::value::{DynamicValue, Mapping};

#[derive(Default)]
struct ContextState {
    config: Mapping,
    secrets: Mapping,
    results: Mapping,
    values: Mapping,
}

/// Config, secrets, recorded phase results and guest scratch values for one
/// run. Created at run start and dropped with the run.
#[derive(Clone, Default)]
pub struct RunContext {
    state: Rc<RefCell<ContextState>>,
}

impl RunContext {
    pub fn new(config: Mapping, secrets: Mapping) -> Self {
        Self {
            state: Rc::new(RefCell::new(ContextState {
                config,
                secrets,
                ..ContextState::default()
            })),
        }
    }

    pub fn config(&self) -> Mapping {
        self.state.borrow().config.clone()
    }

    pub fn config_value(&self, key: &str) -> DynamicValue {
        self.state
            .borrow()
            .config
            .get_str(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn secret(&self, key: &str) -> DynamicValue {
        self.state
            .borrow()
            .secrets
            .get_str(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Result<DynamicValue> {
        self.state
            .borrow()
            .values
            .get_str(key)
            .cloned()
            .ok_or_else(|| Error::invalid_argument("get", format!("value {key} not set in context")))
    }

    pub fn set(&self, key: &str, value: DynamicValue) {
        self.state.borrow_mut().values.insert(key, value);
    }

    pub fn record_result(&self, phase: &str, value: DynamicValue) {
        self.state.borrow_mut().results.insert(phase, value);
    }

    pub fn result(&self, phase: &str) -> Option<DynamicValue> {
        self.state.borrow().results.get_str(phase).cloned()
    }

    pub fn results(&self) -> Mapping {
        self.state.borrow().results.clone()
    }
}

/// The `ctx` namespace.
pub fn namespace(ctx: &RunContext) -> Namespace {
    let get = ctx.clone();
    let set = ctx.clone();
    let results = ctx.clone();
    let result = ctx.clone();
    Namespace::new("ctx")
        .with("get", move |args| {
            let args = Args::new("get", args, 1)?;
            get.get(args.string(0, "key")?)
        })
        .with("set", move |args| {
            let args = Args::new("set", args, 2)?;
            let key = args.string(0, "key")?;
            set.set(key, args.required(1, "value")?.clone());
            Ok(DynamicValue::Null)
        })
        .with("results", move |args| {
            Args::new("results", args, 0)?;
            Ok(DynamicValue::Mapping(results.results()))
        })
        .with("result", move |args| {
            let args = Args::new("result", args, 1)?;
            Ok(result.result(args.string(0, "phase")?).unwrap_or_default())
        })
}
