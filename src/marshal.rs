//! Value marshalling between guest values and the entry stream.
//!
//! Kind mapping:
//! - `Null`, `Bool`, `String` map one to one.
//! - `Int` is a 64-bit signed integer. Incoming integers outside that range
//!   fail with `MarshalError::IntegerOutOfRange`; nothing wraps.
//! - `Float` is an IEEE double; NaN and infinities cannot be encoded.
//! - `Sequence` entries carry their position as `index`.
//! - `Mapping` entries carry a string `key`; non-string keys are rejected.
//! - `Unsupported` always fails.

use serde_json::{Map, Number, Value};

use crate::dataset::{Body, DataFormat, SchemaKind, Structure};
use crate::entry::{self, expected_entry, Entry, EntryReader, EntryWriter, JsonEntryBuffer, JsonEntryReader};
use crate::error::{Error, MarshalError, Result};
use crate::value::{DynamicValue, Mapping};

/// Converts a guest value into plain structured data.
pub fn to_json(value: &DynamicValue) -> Result<Value> {
    Ok(match value {
        DynamicValue::Null => Value::Null,
        DynamicValue::Bool(b) => Value::Bool(*b),
        DynamicValue::Int(i) => Value::Number(Number::from(*i)),
        DynamicValue::Float(f) => {
            Value::Number(Number::from_f64(*f).ok_or(MarshalError::NonFiniteFloat(*f))?)
        }
        DynamicValue::String(s) => Value::String(s.clone()),
        DynamicValue::Sequence(items) => {
            Value::Array(items.iter().map(to_json).collect::<Result<Vec<_>>>()?)
        }
        DynamicValue::Mapping(map) => {
            let mut out = Map::new();
            for (key, value) in map.iter() {
                out.insert(mapping_key(key)?, to_json(value)?);
            }
            Value::Object(out)
        }
        DynamicValue::Unsupported(name) => {
            return Err(MarshalError::Unsupported(name.clone()).into())
        }
    })
}

/// Converts plain structured data into a guest value.
pub fn from_json(value: &Value) -> Result<DynamicValue> {
    Ok(match value {
        Value::Null => DynamicValue::Null,
        Value::Bool(b) => DynamicValue::Bool(*b),
        Value::Number(n) => number(n)?,
        Value::String(s) => DynamicValue::String(s.clone()),
        Value::Array(items) => {
            DynamicValue::Sequence(items.iter().map(from_json).collect::<Result<Vec<_>>>()?)
        }
        Value::Object(map) => {
            let mut out = Mapping::new();
            for (key, value) in map {
                out.insert(key.as_str(), from_json(value)?);
            }
            DynamicValue::Mapping(out)
        }
    })
}

/// Numbers keep their source text, so integer literals are told apart from
/// fractional ones by spelling rather than by magnitude.
fn number(n: &Number) -> Result<DynamicValue> {
    let text = n.to_string();
    if text.contains(['.', 'e', 'E']) {
        return match n.as_f64() {
            Some(f) if f.is_finite() => Ok(DynamicValue::Float(f)),
            Some(f) => Err(MarshalError::NonFiniteFloat(f).into()),
            None => Err(MarshalError::Unsupported(format!("number {text}")).into()),
        };
    }
    text.parse::<i64>()
        .map(DynamicValue::Int)
        .map_err(|_| Error::from(MarshalError::IntegerOutOfRange(text)))
}

fn mapping_key(key: &DynamicValue) -> Result<String> {
    match key {
        DynamicValue::String(s) => Ok(s.clone()),
        other => Err(MarshalError::NonStringKey(other.type_name().to_string()).into()),
    }
}

/// Schema kind a value would have as a dataset body.
pub fn infer_schema_kind(value: &DynamicValue) -> Result<SchemaKind> {
    match value {
        DynamicValue::Sequence(_) => Ok(SchemaKind::Array),
        DynamicValue::Mapping(_) => Ok(SchemaKind::Object),
        other => Err(not_a_body(other)),
    }
}

fn not_a_body(value: &DynamicValue) -> Error {
    Error::SchemaInference(format!(
        "body must be a sequence or mapping, got {}",
        value.type_name()
    ))
}

enum Source {
    Sequence(std::vec::IntoIter<DynamicValue>),
    Mapping(std::vec::IntoIter<(DynamicValue, DynamicValue)>),
}

/// Reads entries out of a container value.
///
/// The reader owns a snapshot of the container taken at construction, so
/// iteration order is fixed and every element is emitted exactly once.
pub struct ValueEntryReader {
    structure: Structure,
    source: Source,
    position: usize,
}

impl ValueEntryReader {
    pub fn new(structure: Structure, value: &DynamicValue) -> Result<Self> {
        let declared = structure.schema_kind()?;
        let (found, source) = match value {
            DynamicValue::Sequence(items) => {
                (SchemaKind::Array, Source::Sequence(items.clone().into_iter()))
            }
            DynamicValue::Mapping(map) => (
                SchemaKind::Object,
                Source::Mapping(map.clone().into_iter().collect::<Vec<_>>().into_iter()),
            ),
            other => return Err(not_a_body(other)),
        };
        if declared != found {
            return Err(MarshalError::SchemaMismatch {
                declared: declared.as_str(),
                found: found.as_str(),
            }
            .into());
        }
        Ok(Self {
            structure,
            source,
            position: 0,
        })
    }
}

impl EntryReader for ValueEntryReader {
    fn structure(&self) -> &Structure {
        &self.structure
    }

    fn read_entry(&mut self) -> Result<Option<Entry>> {
        let entry = match &mut self.source {
            Source::Sequence(items) => match items.next() {
                Some(value) => Entry::indexed(self.position, to_json(&value)?),
                None => return Ok(None),
            },
            Source::Mapping(pairs) => match pairs.next() {
                Some((key, value)) => Entry::keyed(mapping_key(&key)?, to_json(&value)?),
                None => return Ok(None),
            },
        };
        self.position += 1;
        Ok(Some(entry))
    }
}

/// Accumulates entries into a container value of the declared schema kind.
pub struct ValueEntryWriter {
    structure: Structure,
    kind: SchemaKind,
    value: DynamicValue,
}

impl ValueEntryWriter {
    pub fn new(structure: Structure) -> Result<Self> {
        let kind = structure.schema_kind()?;
        let value = match kind {
            SchemaKind::Array => DynamicValue::Sequence(Vec::new()),
            SchemaKind::Object => DynamicValue::Mapping(Mapping::new()),
        };
        Ok(Self {
            structure,
            kind,
            value,
        })
    }

    pub fn into_value(self) -> DynamicValue {
        self.value
    }
}

impl EntryWriter for ValueEntryWriter {
    fn structure(&self) -> &Structure {
        &self.structure
    }

    fn write_entry(&mut self, entry: Entry) -> Result<()> {
        let found = entry.kind();
        match (&mut self.value, entry.key) {
            (DynamicValue::Sequence(items), None) => items.push(from_json(&entry.value)?),
            (DynamicValue::Mapping(map), Some(key)) => map.insert(key, from_json(&entry.value)?),
            _ => {
                return Err(MarshalError::EntryKind {
                    expected: expected_entry(self.kind),
                    found,
                }
                .into())
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Marshals a container value into its inferred structure and entry stream.
pub fn from_dynamic(value: &DynamicValue) -> Result<ValueEntryReader> {
    let kind = infer_schema_kind(value)?;
    ValueEntryReader::new(Structure::base(kind, DataFormat::Unknown), value)
}

/// Rebuilds a container value from an entry stream using the reader's structure.
pub fn to_dynamic(reader: &mut dyn EntryReader) -> Result<DynamicValue> {
    let mut writer = ValueEntryWriter::new(reader.structure().clone())?;
    entry::copy(reader, &mut writer)?;
    Ok(writer.into_value())
}

/// Encodes a container value as a JSON body. Returns the inferred structure.
pub fn encode_body(value: &DynamicValue) -> Result<(Structure, Body)> {
    let kind = infer_schema_kind(value)?;
    let structure = Structure::base(kind, DataFormat::Json);
    let mut reader = ValueEntryReader::new(structure.clone(), value)?;
    let mut buffer = JsonEntryBuffer::new(structure.clone())?;
    entry::copy(&mut reader, &mut buffer)?;
    Ok((structure, buffer.into_body()))
}

/// Decodes a body into a guest value according to `structure`.
pub fn decode_body(structure: &Structure, body: &Body) -> Result<DynamicValue> {
    let mut reader = JsonEntryReader::new(structure.clone(), body)?;
    to_dynamic(&mut reader)
}
