//! Dataset mutation gateway.
//!
//! Every write consults the host's mutation check first with the path of the
//! field being written (`["meta", key]`, `["structure"]` or `["body"]`). A
//! veto aborts the write with the check's own error and leaves the dataset as
//! it was.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use crate::dataset::{Body, DataFormat, Dataset, Structure};
use crate::error::{Error, MarshalError, Result};
use crate::host::{Args, Namespace};
use crate::marshal;
use crate::value::DynamicValue;

/// Host-supplied veto over dataset writes.
pub type MutationCheck = Arc<dyn Fn(&[&str]) -> Result<()> + Send + Sync>;

/// A check that rejects writes to any of `paths`. A path covers itself and
/// everything below it, so `meta` freezes every metadata key.
pub fn freeze(paths: Vec<String>) -> MutationCheck {
    Arc::new(move |path: &[&str]| {
        let joined = path.join(".");
        let frozen = paths
            .iter()
            .any(|p| joined == *p || joined.starts_with(&format!("{p}.")));
        if frozen {
            Err(Error::MutationRejected {
                path: joined,
                reason: "field is frozen".to_string(),
            })
        } else {
            Ok(())
        }
    })
}

struct GatewayState {
    dataset: Dataset,
    check: Option<MutationCheck>,
    body_cache: Option<DynamicValue>,
    body_written: bool,
    committed: bool,
}

/// Shared handle over the dataset being transformed. Clones refer to the
/// same dataset.
#[derive(Clone)]
pub struct DatasetGateway {
    state: Rc<RefCell<GatewayState>>,
}

impl DatasetGateway {
    pub fn new(dataset: Dataset, check: Option<MutationCheck>) -> Self {
        Self {
            state: Rc::new(RefCell::new(GatewayState {
                dataset,
                check,
                body_cache: None,
                body_written: false,
                committed: false,
            })),
        }
    }

    fn check(&self, path: &[&str]) -> Result<()> {
        let check = self.state.borrow().check.clone();
        match check {
            Some(check) => check(path).map_err(|err| {
                log::warn!("write to {} vetoed: {err}", path.join("."));
                err
            }),
            None => Ok(()),
        }
    }

    pub fn snapshot(&self) -> Dataset {
        self.state.borrow().dataset.clone()
    }

    /// Runs `f` against the dataset without going through the veto.
    ///
    /// Reserved for host-owned provenance: the `transform` stamp and the
    /// resources recorded by dataset loads. Guest writes never reach this
    /// path, and the veto cannot suppress provenance.
    pub(crate) fn with_dataset<R>(&self, f: impl FnOnce(&mut Dataset) -> R) -> R {
        f(&mut self.state.borrow_mut().dataset)
    }

    /// True once the guest has replaced the body during this run.
    pub fn body_written(&self) -> bool {
        self.state.borrow().body_written
    }

    pub fn set_meta(&self, key: &str, value: &DynamicValue) -> Result<()> {
        self.check(&["meta", key])?;
        let value = marshal::to_json(value)?;
        self.state.borrow_mut().dataset.set_meta(key, value)
    }

    pub fn get_meta(&self) -> Result<DynamicValue> {
        match &self.state.borrow().dataset.meta {
            Some(meta) => marshal::from_json(&Value::Object(meta.clone())),
            None => Ok(DynamicValue::Null),
        }
    }

    pub fn get_structure(&self) -> Result<DynamicValue> {
        match &self.state.borrow().dataset.structure {
            Some(structure) => marshal::from_json(&serde_json::to_value(structure)?),
            None => Ok(DynamicValue::Null),
        }
    }

    /// Accepts either a full structure (`{format, schema}`) or a bare schema.
    pub fn set_structure(&self, value: &DynamicValue) -> Result<()> {
        self.check(&["structure"])?;
        let json = marshal::to_json(value)?;
        let mut state = self.state.borrow_mut();
        let current_format = state
            .dataset
            .structure
            .as_ref()
            .map(|st| st.format)
            .unwrap_or(DataFormat::Json);
        let structure = match json {
            Value::Object(map) if map.contains_key("schema") => {
                let has_format = map.contains_key("format");
                let mut structure: Structure = serde_json::from_value(Value::Object(map))?;
                if !has_format {
                    structure.format = current_format;
                }
                structure
            }
            Value::Object(map) => Structure {
                format: current_format,
                schema: Value::Object(map),
            },
            other => {
                return Err(Error::invalid_argument(
                    "set_structure",
                    format!("expected a mapping, got {}", crate::entry::json_kind(&other)),
                ))
            }
        };
        state.dataset.structure = Some(structure);
        Ok(())
    }

    /// Decodes the current body, or returns `default` when there is none.
    /// The decoded value is cached for the rest of the run.
    pub fn get_body(&self, default: Option<&DynamicValue>) -> Result<DynamicValue> {
        if let Some(cached) = &self.state.borrow().body_cache {
            return Ok(cached.clone());
        }
        let mut state = self.state.borrow_mut();
        let body = match &state.dataset.body {
            Some(body) => body,
            None => return Ok(default.cloned().unwrap_or_default()),
        };
        let structure = state.dataset.structure.as_ref().ok_or_else(|| {
            Error::invalid_argument("get_body", "no structure for previous dataset")
        })?;
        let value = marshal::decode_body(structure, body)?;
        state.body_cache = Some(value.clone());
        Ok(value)
    }

    /// Replaces the body. A raw body must be a string and is stored as is,
    /// tagged with `format` (json by default).
    pub fn set_body(&self, data: &DynamicValue, raw: bool, format: Option<&str>) -> Result<()> {
        self.check(&["body"])?;
        if raw {
            let text = data.as_str().ok_or_else(|| {
                Error::invalid_argument("set_body", "expected raw data for body to be a string")
            })?;
            let format = match format {
                Some(f) => DataFormat::parse(f)?,
                None => DataFormat::Json,
            };
            let mut state = self.state.borrow_mut();
            state.dataset.body = Some(Body::new(format, text.as_bytes()));
            if let Some(structure) = state.dataset.structure.as_mut() {
                structure.format = format;
            }
            state.body_cache = None;
            state.body_written = true;
            return Ok(());
        }

        let (inferred, body) = marshal::encode_body(data)?;
        let found = inferred.schema_kind()?;
        let mut state = self.state.borrow_mut();
        let structure = match state.dataset.structure.take() {
            Some(existing) => match existing.schema_kind() {
                Ok(declared) => {
                    if declared != found {
                        state.dataset.structure = Some(existing);
                        return Err(MarshalError::SchemaMismatch {
                            declared: declared.as_str(),
                            found: found.as_str(),
                        }
                        .into());
                    }
                    Structure {
                        format: DataFormat::Json,
                        schema: existing.schema,
                    }
                }
                // an unusable schema is replaced by the inferred one
                Err(_) => inferred,
            },
            None => inferred,
        };
        state.dataset.structure = Some(structure);
        state.dataset.body = Some(body);
        state.body_cache = Some(data.clone());
        state.body_written = true;
        Ok(())
    }

    /// Legacy single-shot body assignment.
    pub fn commit(&self, data: &DynamicValue) -> Result<()> {
        if self.state.borrow().committed {
            return Err(Error::AlreadyCommitted);
        }
        self.set_body(data, false, None)?;
        self.state.borrow_mut().committed = true;
        Ok(())
    }

    pub fn namespace(&self) -> Namespace {
        let set_meta = self.clone();
        let get_meta = self.clone();
        let get_structure = self.clone();
        let set_structure = self.clone();
        let get_body = self.clone();
        let set_body = self.clone();
        let commit = self.clone();
        Namespace::new("dataset")
            .with("set_meta", move |args| {
                let args = Args::new("set_meta", args, 2)?;
                let key = args.string(0, "key")?;
                set_meta.set_meta(key, args.required(1, "value")?)?;
                Ok(DynamicValue::Null)
            })
            .with("get_meta", move |args| {
                Args::new("get_meta", args, 0)?;
                get_meta.get_meta()
            })
            .with("get_structure", move |args| {
                Args::new("get_structure", args, 0)?;
                get_structure.get_structure()
            })
            .with("set_structure", move |args| {
                let args = Args::new("set_structure", args, 1)?;
                set_structure.set_structure(args.required(0, "structure")?)?;
                Ok(DynamicValue::Null)
            })
            .with("get_body", move |args| {
                let args = Args::new("get_body", args, 1)?;
                get_body.get_body(args.optional(0))
            })
            .with("set_body", move |args| {
                let args = Args::new("set_body", args, 3)?;
                let data = args.required(0, "data")?;
                let raw = args.optional_bool(1, "raw")?.unwrap_or(false);
                let format = args.optional_string(2, "format")?;
                set_body.set_body(data, raw, format)?;
                Ok(DynamicValue::Null)
            })
            .with("commit", move |args| {
                let args = Args::new("commit", args, 1)?;
                commit.commit(args.required(0, "data")?)?;
                Ok(DynamicValue::Null)
            })
    }
}
