//! Evaluator-neutral dynamic values.
//!
//! Guest values cross the host boundary as `DynamicValue`. Evaluator adapters
//! convert their native values into this union; anything they cannot express
//! (sets, function pointers, opaque host objects) becomes `Unsupported` and is
//! rejected by the marshaller instead of being coerced.

use std::fmt;

use indexmap::map::Entry;
use indexmap::IndexMap;

#[derive(Clone, Debug, PartialEq, Default)]
pub enum DynamicValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<DynamicValue>),
    Mapping(Mapping),
    /// A guest value with no structured representation, tagged with its type name.
    Unsupported(String),
}

impl DynamicValue {
    pub fn type_name(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
            Self::Unsupported(name) => name,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }
}

impl From<bool> for DynamicValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for DynamicValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for DynamicValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for DynamicValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for DynamicValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for DynamicValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<DynamicValue>> for DynamicValue {
    fn from(value: Vec<DynamicValue>) -> Self {
        Self::Sequence(value)
    }
}

impl From<Mapping> for DynamicValue {
    fn from(value: Mapping) -> Self {
        Self::Mapping(value)
    }
}

impl fmt::Display for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Unsupported(name) => write!(f, "<{name}>"),
        }
    }
}

/// Lookup key for a mapping entry. String keys index by their text; any
/// other key by its kind and rendering, so `1` and `"1"` stay distinct.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Slot {
    Text(String),
    Other(String),
}

impl Slot {
    fn of(key: &DynamicValue) -> Self {
        match key {
            DynamicValue::String(s) => Self::Text(s.clone()),
            other => Self::Other(format!("{}:{other}", other.type_name())),
        }
    }
}

/// Insertion-ordered mapping with unique keys.
///
/// Re-inserting an existing key keeps the key at its original position and
/// replaces the value.
#[derive(Clone, Debug, Default)]
pub struct Mapping {
    entries: IndexMap<Slot, (DynamicValue, DynamicValue)>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, key: impl Into<DynamicValue>, value: impl Into<DynamicValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.entry(Slot::of(&key)) {
            Entry::Occupied(mut slot) => slot.get_mut().1 = value,
            Entry::Vacant(slot) => {
                slot.insert((key, value));
            }
        }
    }

    pub fn get(&self, key: &DynamicValue) -> Option<&DynamicValue> {
        self.entries.get(&Slot::of(key)).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&DynamicValue> {
        self.entries
            .get(&Slot::Text(key.to_string()))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DynamicValue> {
        self.entries.values().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DynamicValue, &DynamicValue)> {
        self.entries.values().map(|(k, v)| (k, v))
    }
}

/// Mappings are equal when they hold the same pairs in the same order.
impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

pub struct IntoIter {
    inner: indexmap::map::IntoValues<Slot, (DynamicValue, DynamicValue)>,
}

impl Iterator for IntoIter {
    type Item = (DynamicValue, DynamicValue);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl IntoIterator for Mapping {
    type Item = (DynamicValue, DynamicValue);
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            inner: self.entries.into_values(),
        }
    }
}

impl<K: Into<DynamicValue>, V: Into<DynamicValue>> FromIterator<(K, V)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Mapping::with_capacity(iter.size_hint().0);
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
