//! Dataset document model.
//!
//! A dataset is metadata, a structure (format plus JSON schema), an opaque
//! body payload, and provenance for the transform that produced it. Only the
//! root `type` of the schema matters here: it decides whether the body is an
//! array or an object.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, MarshalError, Result};

pub type Meta = Map<String, Value>;

const STRING_META_FIELDS: &[&str] = &[
    "title",
    "description",
    "accessURL",
    "downloadURL",
    "homeURL",
    "readmeURL",
    "license",
    "version",
    "accrualPeriodicity",
];
const STRING_LIST_META_FIELDS: &[&str] = &["keywords", "language", "theme"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Array,
    Object,
}

impl SchemaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Json,
    Csv,
    #[default]
    Unknown,
}

impl DataFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "" | "unknown" => Ok(Self::Unknown),
            other => Err(MarshalError::UnsupportedFormat(other.to_string()).into()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default)]
    pub format: DataFormat,
    pub schema: Value,
}

impl Structure {
    /// A structure whose schema only pins the root type.
    pub fn base(kind: SchemaKind, format: DataFormat) -> Self {
        Self {
            format,
            schema: json!({ "type": kind.as_str() }),
        }
    }

    /// Answers the one schema question the kernel asks: is the root an array
    /// or an object.
    pub fn schema_kind(&self) -> Result<SchemaKind> {
        let root = self.schema.get("type");
        let kind = match root {
            Some(Value::String(t)) => kind_from_type(t),
            // ["object", "null"] style unions resolve when exactly one container type appears
            Some(Value::Array(types)) => {
                let kinds: Vec<SchemaKind> = types
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(kind_from_type)
                    .collect();
                match kinds.as_slice() {
                    [kind] => Some(*kind),
                    _ => None,
                }
            }
            _ => None,
        };
        kind.ok_or_else(|| {
            Error::SchemaInference(
                "invalid schema. root must be either an array or object type".to_string(),
            )
        })
    }
}

fn kind_from_type(t: &str) -> Option<SchemaKind> {
    match t {
        "array" => Some(SchemaKind::Array),
        "object" => Some(SchemaKind::Object),
        _ => None,
    }
}

/// Body payload as stored by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct Body {
    pub format: DataFormat,
    pub bytes: Vec<u8>,
}

impl Body {
    pub fn new(format: DataFormat, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            format,
            bytes: bytes.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformInfo {
    pub syntax: String,
    pub syntax_version: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    /// Datasets loaded during the run, keyed by reference.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformInfo>,
    #[serde(skip)]
    pub body: Option<Body>,
}

impl Dataset {
    /// Merges one metadata field, type-checking well-known keys.
    pub fn set_meta(&mut self, key: &str, value: Value) -> Result<()> {
        if STRING_META_FIELDS.contains(&key) && !value.is_string() {
            return Err(Error::invalid_argument(
                "set_meta",
                format!("meta field '{key}' must be a string"),
            ));
        }
        if STRING_LIST_META_FIELDS.contains(&key) {
            let valid = value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false);
            if !valid {
                return Err(Error::invalid_argument(
                    "set_meta",
                    format!("meta field '{key}' must be a list of strings"),
                ));
            }
        }
        self.meta
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// On-disk form of a dataset: the document plus its body inlined as JSON.
///
/// Numbers inside `meta` and `body` keep their source text.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DatasetDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DatasetDocument {
    pub fn into_dataset(self) -> Result<Dataset> {
        let body = match self.body {
            // string bodies are stored verbatim, like a raw set_body
            Some(Value::String(text)) => Some(Body::new(
                self.structure
                    .as_ref()
                    .map(|st| st.format)
                    .unwrap_or_default(),
                text.into_bytes(),
            )),
            Some(other) => Some(Body::new(DataFormat::Json, serde_json::to_vec(&other)?)),
            None => None,
        };
        Ok(Dataset {
            meta: self.meta,
            structure: self.structure,
            transform: self.transform,
            body,
        })
    }

    pub fn from_dataset(dataset: Dataset) -> Result<Self> {
        let body = match &dataset.body {
            Some(body) if body.format == DataFormat::Json => {
                Some(serde_json::from_slice(&body.bytes)?)
            }
            Some(body) => Some(Value::String(
                String::from_utf8_lossy(&body.bytes).into_owned(),
            )),
            None => None,
        };
        Ok(Self {
            meta: dataset.meta,
            structure: dataset.structure,
            transform: dataset.transform,
            body,
        })
    }
}
