//! Error taxonomy for transformation runs.
//!
//! Every failure is fatal to the run that produced it. Host callables return
//! these errors directly so callers can tell a policy denial from a guest
//! script raising its own error.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Syntax or binding failure before any phase runs.
    #[error("script load error: {}", render_runtime(.message, .trace))]
    ScriptLoad {
        message: String,
        trace: Option<String>,
    },

    /// Guest-raised error or evaluator exception during a call.
    #[error("{}", render_runtime(.message, .trace))]
    ScriptRuntime {
        message: String,
        trace: Option<String>,
    },

    #[error("{method} cannot be called in {phase} phase")]
    PolicyViolation { phase: String, method: String },

    #[error("network access is disabled, {method} cannot make requests")]
    NetworkDisabled { method: String },

    #[error("mutation of {path} rejected: {reason}")]
    MutationRejected { path: String, reason: String },

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error("schema inference failed: {0}")]
    SchemaInference(String),

    #[error("{function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("commit can only be called once per transformation")]
    AlreadyCommitted,

    #[error("no transform functions defined")]
    NoPhaseFunctions,

    #[error("transformation cancelled")]
    Cancelled,

    #[error("http request failed: {0}")]
    Http(String),

    #[error("dataset load failed: {0}")]
    DatasetLoad(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_argument(function: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }
}

fn render_runtime(message: &str, trace: &Option<String>) -> String {
    match trace {
        Some(trace) if !trace.is_empty() => format!("{message}\n{trace}"),
        _ => message.to_string(),
    }
}

/// Failures converting between guest values and the entry stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarshalError {
    #[error("unsupported value type: {0}")]
    Unsupported(String),

    #[error("mapping keys must be strings, got {0}")]
    NonStringKey(String),

    #[error("integer out of range: {0}")]
    IntegerOutOfRange(String),

    #[error("non-finite float {0} cannot be marshalled")]
    NonFiniteFloat(f64),

    #[error("expected {expected} entry, got {found} entry")]
    EntryKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("schema declares {declared} but value is {found}")]
    SchemaMismatch {
        declared: &'static str,
        found: &'static str,
    },

    #[error("unsupported body format: {0}")]
    UnsupportedFormat(String),
}

/// The terminal error of a run: which phase failed and why.
#[derive(Debug, thiserror::Error)]
#[error("{phase} phase failed: {kind}")]
pub struct TransformError {
    pub phase: String,
    #[source]
    pub kind: Error,
}

impl TransformError {
    pub fn new(phase: impl Into<String>, kind: Error) -> Self {
        Self {
            phase: phase.into(),
            kind,
        }
    }
}
