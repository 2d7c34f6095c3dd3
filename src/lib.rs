//! Transform Kernel
//!
//! Hosts semi-trusted transformation scripts that edit a structured dataset.
//!
//! # Architecture
//!
//! A transformation runs as an ordered series of phases (`download`, then
//! `transform`). The kernel keeps three boundaries in place for every run:
//!
//! - **Capability policy**: every host method is checked against ordered
//!   allow/deny rules for the current phase. The last matching rule wins and
//!   anything unmatched is denied.
//! - **Network gate**: outbound HTTP is only possible while a network scope
//!   is open, and the orchestrator opens one only around network phases.
//! - **Mutation gateway**: script writes to the dataset go through a single
//!   gateway that consults a host-supplied veto hook before applying them.
//!
//! Values cross the script boundary as [`DynamicValue`]s and are marshalled to
//! and from the entry streams that dataset bodies are stored as.
//!
//! # Module Structure
//!
//! - `policy`: rules and the policy-protected method surface
//! - `marshal`, `entry`, `value`: value conversion and schema inference
//! - `host`: the namespaces visible to scripts (`ctx`, `config`, `http`,
//!   `dataset`, `datasets`)
//! - `module_runtime`: script evaluators (Rhai and native closures)
//! - `transform`: the phase orchestrator

pub mod cancel;
pub mod config;
pub mod dataset;
pub mod entry;
pub mod error;
pub mod host;
pub mod marshal;
pub mod module_runtime;
pub mod network;
pub mod policy;
pub mod transform;
pub mod value;

pub use cancel::CancelToken;
pub use config::TransformConfig;
pub use dataset::{Body, DataFormat, Dataset, DatasetDocument, Meta, SchemaKind, Structure, TransformInfo};
pub use entry::{Entry, EntryReader, EntryWriter};
pub use error::{Error, MarshalError, Result, TransformError};
pub use host::{
    freeze, DatasetGateway, DatasetLoader, FilesystemDatasetLoader, HttpSettings,
    InMemoryDatasetLoader, MutationCheck, RunContext,
};
pub use marshal::{from_dynamic, infer_schema_kind, to_dynamic};
pub use module_runtime::{
    CallArg, Evaluator, HostBinding, NativeEvaluator, Program, RhaiEvaluator, Script,
};
pub use network::{NetworkGuard, NetworkScope};
pub use policy::{default_rules, Policy, Rule};
pub use transform::{PhaseResult, TransformOutput, Transformer, LOAD_PHASE, PHASES};
pub use value::{DynamicValue, Mapping};

/// Version stamped into the transform info of every dataset produced.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
