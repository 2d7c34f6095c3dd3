//! Host module surface bound into the guest's global scope.
//!
//! Each namespace is a flat table of host callables. The surface handed to a
//! phase is always rebuilt by the policy engine, so the tables here are never
//! mutated after construction.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::DynamicValue;

pub mod config;
pub mod context;
pub mod dataset;
pub mod datasets;
pub mod http;

pub use context::RunContext;
pub use dataset::{freeze, DatasetGateway, MutationCheck};
pub use datasets::{DatasetLoader, FilesystemDatasetLoader, InMemoryDatasetLoader};
pub use http::HttpSettings;

/// A host callable. Arguments arrive positionally.
pub type HostFn = Rc<dyn Fn(&[DynamicValue]) -> Result<DynamicValue>>;

#[derive(Clone)]
pub struct Namespace {
    name: String,
    methods: BTreeMap<String, HostFn>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    pub fn with<F>(mut self, method: &str, f: F) -> Self
    where
        F: Fn(&[DynamicValue]) -> Result<DynamicValue> + 'static,
    {
        self.methods.insert(method.to_string(), Rc::new(f));
        self
    }

    pub fn insert(&mut self, method: impl Into<String>, f: HostFn) {
        self.methods.insert(method.into(), f);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<&HostFn> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn methods(&self) -> impl Iterator<Item = (&str, &HostFn)> {
        self.methods.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModuleSurface {
    namespaces: BTreeMap<String, Namespace>,
}

impl ModuleSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, namespace: Namespace) -> Self {
        self.insert(namespace);
        self
    }

    pub fn insert(&mut self, namespace: Namespace) {
        self.namespaces.insert(namespace.name.clone(), namespace);
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    pub fn lookup(&self, namespace: &str, method: &str) -> Result<HostFn> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.method(method))
            .cloned()
            .ok_or_else(|| Error::ScriptRuntime {
                message: format!("{namespace} has no method {method}"),
                trace: None,
            })
    }

    pub fn call(&self, namespace: &str, method: &str, args: &[DynamicValue]) -> Result<DynamicValue> {
        let f = self.lookup(namespace, method)?;
        f(args)
    }
}

/// Positional argument access for host callables.
pub struct Args<'a> {
    function: &'static str,
    values: &'a [DynamicValue],
}

impl<'a> Args<'a> {
    pub fn new(function: &'static str, values: &'a [DynamicValue], max: usize) -> Result<Self> {
        if values.len() > max {
            return Err(Error::invalid_argument(
                function,
                format!("got {} arguments, want at most {max}", values.len()),
            ));
        }
        Ok(Self { function, values })
    }

    pub fn optional(&self, index: usize) -> Option<&'a DynamicValue> {
        self.values.get(index)
    }

    pub fn required(&self, index: usize, name: &str) -> Result<&'a DynamicValue> {
        self.values
            .get(index)
            .ok_or_else(|| Error::invalid_argument(self.function, format!("missing argument {name}")))
    }

    pub fn string(&self, index: usize, name: &str) -> Result<&'a str> {
        let value = self.required(index, name)?;
        value.as_str().ok_or_else(|| {
            Error::invalid_argument(
                self.function,
                format!("expected {name} to be a string, got {}", value.type_name()),
            )
        })
    }

    pub fn optional_bool(&self, index: usize, name: &str) -> Result<Option<bool>> {
        match self.values.get(index) {
            None | Some(DynamicValue::Null) => Ok(None),
            Some(DynamicValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(Error::invalid_argument(
                self.function,
                format!("expected {name} to be a bool, got {}", other.type_name()),
            )),
        }
    }

    pub fn optional_string(&self, index: usize, name: &str) -> Result<Option<&'a str>> {
        match self.values.get(index) {
            None | Some(DynamicValue::Null) => Ok(None),
            Some(DynamicValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(Error::invalid_argument(
                self.function,
                format!("expected {name} to be a string, got {}", other.type_name()),
            )),
        }
    }
}
