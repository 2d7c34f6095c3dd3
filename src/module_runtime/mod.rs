//! Script runtime boundary.
//!
//! The evaluator is a black box behind the `Evaluator`/`Program` traits. It
//! receives a `HostBinding` at load time and must route every host call
//! through it, so the orchestrator can swap the policy-protected surface
//! between phases without the evaluator knowing.

use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::host::ModuleSurface;
use crate::value::DynamicValue;

pub mod native;
pub mod script;

pub use native::NativeEvaluator;
pub use script::RhaiEvaluator;

/// Guest source text plus a name used in error messages.
#[derive(Clone, Debug)]
pub struct Script {
    pub name: String,
    pub source: String,
}

impl Script {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), source))
    }
}

/// A top-level function the guest defined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseFunction {
    pub name: String,
    pub arity: usize,
}

/// Argument handed to a phase function.
#[derive(Clone, Debug, PartialEq)]
pub enum CallArg {
    /// An object whose methods dispatch to the named host namespace.
    Handle(String),
    Value(DynamicValue),
}

pub trait Evaluator {
    type Program: Program;

    /// Name stamped into transform provenance.
    fn syntax(&self) -> &'static str;

    /// Compiles the script and runs its top level once.
    fn load(&self, script: &Script, host: HostBinding) -> Result<Self::Program>;
}

pub trait Program {
    fn lookup(&self, name: &str) -> Option<PhaseFunction>;

    fn call(&mut self, function: &PhaseFunction, args: &[CallArg]) -> Result<DynamicValue>;
}

pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Collects script `print`/`debug` output, optionally mirroring each line to
/// a caller-supplied writer.
#[derive(Clone, Default)]
pub struct Diagnostics {
    lines: Rc<RefCell<Vec<String>>>,
    mirror: Option<SharedWriter>,
}

impl Diagnostics {
    pub fn new(mirror: Option<SharedWriter>) -> Self {
        Self {
            lines: Rc::default(),
            mirror,
        }
    }

    pub fn print(&self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
        if let Some(mirror) = &self.mirror {
            let written = match mirror.lock() {
                Ok(mut w) => writeln!(w, "{line}"),
                Err(_) => Ok(()),
            };
            if let Err(err) = written {
                log::warn!("failed to write script output: {err}");
            }
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

/// The evaluator's view of the host for one run.
#[derive(Clone, Default)]
pub struct HostBinding {
    surface: Rc<RefCell<ModuleSurface>>,
    diagnostics: Diagnostics,
}

impl HostBinding {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            surface: Rc::default(),
            diagnostics,
        }
    }

    /// Replaces the surface every later call dispatches to.
    pub fn install(&self, surface: ModuleSurface) {
        *self.surface.borrow_mut() = surface;
    }

    pub fn call(&self, namespace: &str, method: &str, args: &[DynamicValue]) -> Result<DynamicValue> {
        // release the borrow before dispatch; host calls may reinstall
        let f = self.surface.borrow().lookup(namespace, method)?;
        f(args)
    }

    /// Namespace and method names of the installed surface.
    pub fn namespaces(&self) -> Vec<(String, Vec<String>)> {
        self.surface
            .borrow()
            .namespaces()
            .map(|ns| {
                (
                    ns.name().to_string(),
                    ns.method_names().map(str::to_string).collect(),
                )
            })
            .collect()
    }

    pub fn print(&self, line: &str) {
        self.diagnostics.print(line);
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

pub(crate) fn arity_error(function: &PhaseFunction, given: usize) -> Error {
    Error::ScriptRuntime {
        message: format!(
            "{} takes {} arguments, the host supplies {given}",
            function.name, function.arity
        ),
        trace: None,
    }
}
