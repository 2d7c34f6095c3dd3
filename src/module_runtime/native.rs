//! Evaluator whose phase functions are Rust closures.
//!
//! Useful for hosts that embed transformations directly and for exercising
//! the orchestrator without a script engine. The script source is ignored.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::module_runtime::{arity_error, CallArg, Evaluator, HostBinding, PhaseFunction, Program, Script};
use crate::value::DynamicValue;

pub type NativePhase = Arc<dyn Fn(&HostBinding, &[CallArg]) -> Result<DynamicValue> + Send + Sync>;

#[derive(Clone, Default)]
pub struct NativeEvaluator {
    phases: Vec<(PhaseFunction, NativePhase)>,
}

impl NativeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase<F>(mut self, name: &str, arity: usize, f: F) -> Self
    where
        F: Fn(&HostBinding, &[CallArg]) -> Result<DynamicValue> + Send + Sync + 'static,
    {
        let function = PhaseFunction {
            name: name.to_string(),
            arity,
        };
        self.phases.retain(|(existing, _)| existing.name != name);
        self.phases.push((function, Arc::new(f)));
        self
    }
}

impl Evaluator for NativeEvaluator {
    type Program = NativeProgram;

    fn syntax(&self) -> &'static str {
        "native"
    }

    fn load(&self, _script: &Script, host: HostBinding) -> Result<NativeProgram> {
        Ok(NativeProgram {
            phases: self.phases.clone(),
            host,
        })
    }
}

pub struct NativeProgram {
    phases: Vec<(PhaseFunction, NativePhase)>,
    host: HostBinding,
}

impl Program for NativeProgram {
    fn lookup(&self, name: &str) -> Option<PhaseFunction> {
        self.phases
            .iter()
            .find(|(f, _)| f.name == name)
            .map(|(f, _)| f.clone())
    }

    fn call(&mut self, function: &PhaseFunction, args: &[CallArg]) -> Result<DynamicValue> {
        if function.arity > args.len() {
            return Err(arity_error(function, args.len()));
        }
        match self.phases.iter().find(|(f, _)| f.name == function.name) {
            Some((_, phase)) => phase(&self.host, &args[..function.arity]),
            None => Err(Error::ScriptRuntime {
                message: format!("{} is not defined", function.name),
                trace: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_runtime::Diagnostics;

    #[test]
    fn phases_receive_declared_arguments_only() {
        let evaluator = NativeEvaluator::new().phase("transform", 1, |_, args| {
            Ok(DynamicValue::Int(args.len() as i64))
        });
        let mut program = evaluator
            .load(&Script::new("native", ""), HostBinding::new(Diagnostics::default()))
            .unwrap();
        let f = program.lookup("transform").unwrap();
        let args = [
            CallArg::Handle("dataset".to_string()),
            CallArg::Handle("ctx".to_string()),
        ];
        assert_eq!(program.call(&f, &args).unwrap(), DynamicValue::Int(1));
        assert!(program.lookup("download").is_none());
    }
}
