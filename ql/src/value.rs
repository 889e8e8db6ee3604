use std::fmt;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use serde_json::Number;

use crate::error::ValueError;
use crate::id::DocumentId;

/// Maximum container nesting accepted when converting external data into a [`Value`].
pub const MAX_DEPTH: usize = 100;

/// Name of the reserved identifier field.
pub const ID_FIELD: &str = "_id";

/// Insertion-ordered object representation.
pub type Map = IndexMap<String, Value>;

/// A JSON-compatible document value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(Map),
}

impl Value {
    /// The JSON type name, matching what the storage engine reports for the same value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn is_scalar(&self) -> bool { matches!(self, Value::Bool(_) | Value::Number(_) | Value::String(_)) }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Looks up a top-level key of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> { self.as_object().and_then(|map| map.get(key)) }

    /// Container nesting of this value; scalars are 0.
    pub fn depth(&self) -> usize {
        match self {
            Value::Array(items) => 1 + items.iter().map(Value::depth).max().unwrap_or(0),
            Value::Object(map) => 1 + map.values().map(Value::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    /// Converts external JSON, rejecting input nested deeper than [`MAX_DEPTH`].
    pub fn from_json(json: serde_json::Value) -> Result<Self, ValueError> { Self::from_json_at(json, 0) }

    fn from_json_at(json: serde_json::Value, depth: usize) -> Result<Self, ValueError> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                let depth = descend(depth)?;
                Value::Array(items.into_iter().map(|item| Self::from_json_at(item, depth)).collect::<Result<_, _>>()?)
            }
            serde_json::Value::Object(object) => {
                let depth = descend(depth)?;
                let mut map = Map::with_capacity(object.len());
                for (key, value) in object {
                    map.insert(key, Self::from_json_at(value, depth)?);
                }
                Value::Object(map)
            }
        })
    }

    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, ValueError> { Self::from_json(serde_json::to_value(value)?) }

    pub fn deserialize_into<T: DeserializeOwned>(self) -> Result<T, ValueError> { Ok(serde_json::from_value(self.into())?) }
}

fn descend(depth: usize) -> Result<usize, ValueError> {
    let depth = depth + 1;
    if depth > MAX_DEPTH {
        return Err(ValueError::DepthExceeded(MAX_DEPTH));
    }
    Ok(depth)
}

impl TryFrom<serde_json::Value> for Value {
    type Error = ValueError;
    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> { Value::from_json(json) }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => serde_json::Value::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self { Value::Number(n.into()) }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self { Value::Number(n.into()) }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self { Value::Number(n.into()) }
}

impl From<f64> for Value {
    /// Non-finite floats have no JSON representation and become `Null`.
    fn from(n: f64) -> Self { Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(s) }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self { Value::Array(items) }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self { Value::Object(map) }
}

impl From<DocumentId> for Value {
    fn from(id: DocumentId) -> Self { Value::String(id.into()) }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", serde_json::Value::from(self.clone())) }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(object) => {
                let mut map = serializer.serialize_map(Some(object.len()))?;
                for (key, value) in object {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(json).map_err(serde::de::Error::custom)
    }
}

/// A stored document: its identifier plus the remaining fields.
///
/// The identifier is held apart from the payload; [`Document::into_value`] puts `_id` back as the
/// first field.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub data: Map,
}

impl Document {
    pub fn new(id: DocumentId, data: Map) -> Self { Self { id, data } }

    /// Splits `_id` out of an object, generating a fresh identifier when the object has none.
    /// A null `_id` counts as none.
    pub fn from_object(mut object: Map) -> Result<Self, ValueError> {
        let id = match object.shift_remove(ID_FIELD) {
            None | Some(Value::Null) => DocumentId::new(),
            Some(Value::String(id)) => DocumentId::try_from(id)?,
            Some(other) => return Err(ValueError::IdNotAString(other.type_name())),
        };
        Ok(Self { id, data: object })
    }

    pub fn get(&self, key: &str) -> Option<&Value> { self.data.get(key) }

    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(self.data.len() + 1);
        map.insert(ID_FIELD.to_owned(), self.id.into());
        map.extend(self.data);
        Value::Object(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = ValueError;
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Self::from_object(map),
            other => Err(ValueError::NotAnObject(other.type_name())),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.data.len() + 1))?;
        map.serialize_entry(ID_FIELD, &self.id)?;
        for (key, value) in &self.data {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) if map.contains_key(ID_FIELD) => Document::from_object(map).map_err(serde::de::Error::custom),
            Value::Object(_) => Err(serde::de::Error::missing_field("_id")),
            other => Err(serde::de::Error::custom(ValueError::NotAnObject(other.type_name()))),
        }
    }
}
