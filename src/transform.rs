//! Execution orchestrator.
//!
//! A run moves `Idle -> Loaded -> Running(phase)* -> Completed | Failed`.
//! Every run builds its own policy, network guard, run context and host
//! surface, so one `Transformer` can serve concurrent runs on different
//! threads.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cancel::CancelToken;
use crate::config::TransformConfig;
use crate::dataset::{Dataset, Structure};
use crate::entry::{read_all, Entry, EntryReader};
use crate::error::{Error, Result, TransformError};
use crate::host::{
    self, DatasetGateway, DatasetLoader, HttpSettings, ModuleSurface, MutationCheck, RunContext,
};
use crate::marshal;
use crate::module_runtime::{CallArg, Diagnostics, Evaluator, HostBinding, Program, Script, SharedWriter};
use crate::network::NetworkGuard;
use crate::policy::{default_rules, Policy, Rule};
use crate::value::{DynamicValue, Mapping};

/// Phase used while the script's top level runs.
pub const LOAD_PHASE: &str = "load";

/// Phase functions in the order they run.
pub const PHASES: &[&str] = &["download", "transform"];

#[derive(Clone, Debug, PartialEq, Eq)]
enum RunState {
    Idle,
    Loaded,
    Running(&'static str),
    Completed,
    Failed,
}

/// The last phase's return value, marshalled.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseResult {
    pub phase: String,
    pub value: DynamicValue,
    /// Present when the value is a sequence or mapping.
    pub structure: Option<Structure>,
    pub entries: Vec<Entry>,
}

impl PhaseResult {
    fn new(phase: &str, value: DynamicValue) -> Result<Self> {
        let (structure, entries) = match value {
            DynamicValue::Sequence(_) | DynamicValue::Mapping(_) => {
                let mut reader = marshal::from_dynamic(&value)?;
                let structure = reader.structure().clone();
                (Some(structure), read_all(&mut reader)?)
            }
            _ => (None, Vec::new()),
        };
        Ok(Self {
            phase: phase.to_string(),
            value,
            structure,
            entries,
        })
    }
}

#[derive(Clone, Debug)]
pub struct TransformOutput {
    pub dataset: Dataset,
    pub result: Option<PhaseResult>,
    /// Script `print`/`debug` lines, in order.
    pub diagnostics: Vec<String>,
    pub phases_run: Vec<String>,
}

#[derive(Clone)]
pub struct Transformer {
    config: Mapping,
    secrets: Mapping,
    rules: Vec<Rule>,
    mutation_check: Option<MutationCheck>,
    loader: Option<Arc<dyn DatasetLoader>>,
    output: Option<SharedWriter>,
    cancel: CancelToken,
    deadline: Option<Duration>,
    network_phases: Vec<String>,
    http: HttpSettings,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer {
    pub fn new() -> Self {
        Self {
            config: Mapping::new(),
            secrets: Mapping::new(),
            rules: default_rules(),
            mutation_check: None,
            loader: None,
            output: None,
            cancel: CancelToken::new(),
            deadline: None,
            network_phases: vec!["download".to_string()],
            http: HttpSettings::default(),
        }
    }

    pub fn from_config(config: &TransformConfig) -> Self {
        Self {
            rules: config.rules.clone(),
            network_phases: config.network_phases.clone(),
            http: config.http.clone(),
            deadline: config.deadline,
            ..Self::new()
        }
    }

    pub fn with_config(mut self, config: Mapping) -> Self {
        self.config = config;
        self
    }

    pub fn with_secrets(mut self, secrets: Mapping) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_mutation_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&[&str]) -> Result<()> + Send + Sync + 'static,
    {
        self.mutation_check = Some(Arc::new(check));
        self
    }

    pub fn with_mutation_check_arc(mut self, check: MutationCheck) -> Self {
        self.mutation_check = Some(check);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn DatasetLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_output(mut self, output: SharedWriter) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bounds each run's wall-clock time, checked between phases.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_network_phases(mut self, phases: &[&str]) -> Self {
        self.network_phases = phases.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_http(mut self, http: HttpSettings) -> Self {
        self.http = http;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs `script` against `dataset`. The first failure aborts the run and
    /// names the phase it happened in.
    pub fn run<E: Evaluator>(
        &self,
        evaluator: &E,
        script: &Script,
        dataset: Dataset,
    ) -> std::result::Result<TransformOutput, TransformError> {
        let mut state = RunState::Idle;
        log::info!("transform {} starting ({})", script.name, evaluator.syntax());

        let outcome = self.execute(evaluator, script, dataset, &mut state);
        match &outcome {
            Ok(output) => {
                transition(&mut state, RunState::Completed);
                log::info!(
                    "transform {} completed, phases run: {}",
                    script.name,
                    output.phases_run.join(", ")
                );
            }
            Err(err) => {
                transition(&mut state, RunState::Failed);
                log::info!("transform {} failed: {err}", script.name);
            }
        }
        outcome
    }

    fn execute<E: Evaluator>(
        &self,
        evaluator: &E,
        script: &Script,
        dataset: Dataset,
        state: &mut RunState,
    ) -> std::result::Result<TransformOutput, TransformError> {
        let load_failed = |err| TransformError::new(LOAD_PHASE, err);
        let cancel = match self.deadline {
            Some(deadline) => self.cancel.with_deadline(deadline),
            None => self.cancel.clone(),
        };

        let mut policy = Policy::new(self.rules.clone());
        let network = NetworkGuard::new();
        let ctx = RunContext::new(self.config.clone(), self.secrets.clone());
        let gateway = DatasetGateway::new(dataset, self.mutation_check.clone());
        self.stamp(&gateway, evaluator.syntax()).map_err(load_failed)?;

        let surface = self.surface(&ctx, &gateway, &network);
        let diagnostics = Diagnostics::new(self.output.clone());
        let host = HostBinding::new(diagnostics.clone());

        policy.set_phase(LOAD_PHASE);
        host.install(policy.protect(&surface));
        let mut program = evaluator.load(script, host.clone()).map_err(load_failed)?;
        transition(state, RunState::Loaded);

        let mut phases_run = Vec::new();
        let mut last = None;
        for &phase in PHASES {
            let function = match program.lookup(phase) {
                Some(function) => function,
                None => {
                    log::debug!("{phase} is not defined, skipping");
                    continue;
                }
            };
            let failed = |err| TransformError::new(phase, err);
            cancel.check().map_err(failed)?;
            transition(state, RunState::Running(phase));

            policy.set_phase(phase);
            host.install(policy.protect(&surface));
            let returned = {
                let _network = self.network_allowed(phase).then(|| network.scope());
                program.call(&function, &phase_args(phase))
            }
            .map_err(failed)?;

            let value = canonicalize(&returned).map_err(failed)?;
            ctx.record_result(phase, value.clone());
            phases_run.push(phase.to_string());
            last = Some((phase, value));
        }

        let (phase, value) = last.ok_or_else(|| load_failed(Error::NoPhaseFunctions))?;
        if !gateway.body_written()
            && matches!(value, DynamicValue::Sequence(_) | DynamicValue::Mapping(_))
        {
            gateway
                .set_body(&value, false, None)
                .map_err(|err| TransformError::new(phase, err))?;
        }
        let result = PhaseResult::new(phase, value).map_err(|err| TransformError::new(phase, err))?;

        Ok(TransformOutput {
            dataset: gateway.snapshot(),
            result: Some(result),
            diagnostics: diagnostics.lines(),
            phases_run,
        })
    }

    fn network_allowed(&self, phase: &str) -> bool {
        self.network_phases.iter().any(|p| p == phase)
    }

    fn stamp(&self, gateway: &DatasetGateway, syntax: &str) -> Result<()> {
        let config = match marshal::to_json(&DynamicValue::Mapping(self.config.clone()))? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        gateway.with_dataset(|ds| {
            let info = ds.transform.get_or_insert_with(Default::default);
            info.syntax = syntax.to_string();
            info.syntax_version = crate::VERSION.to_string();
            info.config = config;
        });
        Ok(())
    }

    /// Every namespace the host offers, before policy filtering.
    fn surface(&self, ctx: &RunContext, gateway: &DatasetGateway, network: &NetworkGuard) -> ModuleSurface {
        let mut surface = ModuleSurface::new()
            .with(host::context::namespace(ctx))
            .with(host::config::namespace(ctx))
            .with(gateway.namespace())
            .with(host::http::namespace(network, &self.http));
        if let Some(loader) = &self.loader {
            surface.insert(host::datasets::namespace(loader.clone(), gateway));
        }
        surface
    }
}

fn transition(state: &mut RunState, next: RunState) {
    log::debug!("transform state {state:?} -> {next:?}");
    *state = next;
}

fn phase_args(phase: &str) -> Vec<CallArg> {
    let ctx = CallArg::Handle("ctx".to_string());
    match phase {
        "transform" => vec![CallArg::Handle("dataset".to_string()), ctx],
        _ => vec![ctx],
    }
}

/// Marshals a phase return value into plain structured data and back,
/// rejecting anything that cannot be represented.
fn canonicalize(value: &DynamicValue) -> Result<DynamicValue> {
    marshal::from_json(&marshal::to_json(value)?)
}
