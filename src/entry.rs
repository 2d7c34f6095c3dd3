//! Canonical structured-entry stream.
//!
//! A body is read and written as a stream of entries. Entries from an array
//! body carry an `index`; entries from an object body carry a `key` and leave
//! `index` at zero.
//!
//! An entry's `value` is the canonical JSON form of a guest value, as produced
//! by `marshal::to_json` and read back by `marshal::from_json`. Integers
//! outside the signed 64-bit range and non-finite floats never appear in it.

use serde_json::{Map, Value};

use crate::dataset::{Body, DataFormat, SchemaKind, Structure};
use crate::error::{MarshalError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub index: usize,
    pub key: Option<String>,
    pub value: Value,
}

impl Entry {
    pub fn indexed(index: usize, value: Value) -> Self {
        Self {
            index,
            key: None,
            value,
        }
    }

    pub fn keyed(key: impl Into<String>, value: Value) -> Self {
        Self {
            index: 0,
            key: Some(key.into()),
            value,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        if self.key.is_some() {
            "keyed"
        } else {
            "indexed"
        }
    }
}

pub trait EntryReader {
    fn structure(&self) -> &Structure;

    /// Returns `Ok(None)` once the stream is exhausted.
    fn read_entry(&mut self) -> Result<Option<Entry>>;
}

pub trait EntryWriter {
    fn structure(&self) -> &Structure;

    fn write_entry(&mut self, entry: Entry) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Pumps every entry from `reader` into `writer`, then closes the writer.
pub fn copy(reader: &mut dyn EntryReader, writer: &mut dyn EntryWriter) -> Result<usize> {
    let mut count = 0;
    while let Some(entry) = reader.read_entry()? {
        writer.write_entry(entry)?;
        count += 1;
    }
    writer.close()?;
    Ok(count)
}

/// Collects the remaining entries of a reader.
pub fn read_all(reader: &mut dyn EntryReader) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    while let Some(entry) = reader.read_entry()? {
        entries.push(entry);
    }
    Ok(entries)
}

/// Reads entries out of a JSON body.
pub struct JsonEntryReader {
    structure: Structure,
    entries: std::vec::IntoIter<Entry>,
}

impl JsonEntryReader {
    pub fn new(structure: Structure, body: &Body) -> Result<Self> {
        if body.format != DataFormat::Json {
            return Err(MarshalError::UnsupportedFormat(body.format.as_str().to_string()).into());
        }
        let kind = structure.schema_kind()?;
        let root: Value = serde_json::from_slice(&body.bytes)?;
        let entries: Vec<Entry> = match (kind, root) {
            (SchemaKind::Array, Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| Entry::indexed(i, v))
                .collect(),
            (SchemaKind::Object, Value::Object(map)) => {
                map.into_iter().map(|(k, v)| Entry::keyed(k, v)).collect()
            }
            (kind, other) => {
                return Err(MarshalError::SchemaMismatch {
                    declared: kind.as_str(),
                    found: json_kind(&other),
                }
                .into())
            }
        };
        Ok(Self {
            structure,
            entries: entries.into_iter(),
        })
    }
}

impl EntryReader for JsonEntryReader {
    fn structure(&self) -> &Structure {
        &self.structure
    }

    fn read_entry(&mut self) -> Result<Option<Entry>> {
        Ok(self.entries.next())
    }
}

/// Buffers entries into a JSON document.
pub struct JsonEntryBuffer {
    structure: Structure,
    kind: SchemaKind,
    root: Value,
    bytes: Vec<u8>,
}

impl JsonEntryBuffer {
    pub fn new(structure: Structure) -> Result<Self> {
        let kind = structure.schema_kind()?;
        let root = match kind {
            SchemaKind::Array => Value::Array(Vec::new()),
            SchemaKind::Object => Value::Object(Map::new()),
        };
        Ok(Self {
            structure,
            kind,
            root,
            bytes: Vec::new(),
        })
    }

    /// Encoded document; empty until the buffer is closed.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_body(self) -> Body {
        Body::new(DataFormat::Json, self.bytes)
    }
}

impl EntryWriter for JsonEntryBuffer {
    fn structure(&self) -> &Structure {
        &self.structure
    }

    fn write_entry(&mut self, entry: Entry) -> Result<()> {
        match (&mut self.root, entry.key) {
            (Value::Array(items), None) => items.push(entry.value),
            (Value::Object(map), Some(key)) => {
                map.insert(key, entry.value);
            }
            (_, key) => {
                return Err(MarshalError::EntryKind {
                    expected: expected_entry(self.kind),
                    found: if key.is_some() { "keyed" } else { "indexed" },
                }
                .into())
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.bytes = serde_json::to_vec(&self.root)?;
        Ok(())
    }
}

pub(crate) fn expected_entry(kind: SchemaKind) -> &'static str {
    match kind {
        SchemaKind::Array => "indexed",
        SchemaKind::Object => "keyed",
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
