//! The native-side value tree.
//!
//! [`Value`] is what the codec layer encodes from and decodes to: an ordered
//! tree of scalars, sequences, string-keyed maps, typed objects, and entity
//! references. Map and object field order is preserved end-to-end.

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use remora_schema::TypeName;
use smol_str::SmolStr;

use crate::locale::Locale;

/// An enum value: variant name plus zero-based ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    /// Variant name.
    pub name: SmolStr,
    /// Zero-based declaration ordinal.
    pub ordinal: i32,
}

impl EnumValue {
    /// Create an enum value.
    pub fn new(name: impl AsRef<str>, ordinal: i32) -> Self {
        Self {
            name: SmolStr::new(name.as_ref()),
            ordinal,
        }
    }
}

/// A typed object: the native counterpart of one mapped document.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    /// The concrete mapped type of this object.
    pub type_name: TypeName,
    /// Field values keyed by logical name, in insertion order.
    pub fields: IndexMap<String, Value>,
}

impl ObjectValue {
    /// Create an empty object of the given type.
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Set a field, builder-style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// A typed entity reference: the id plus the target type.
///
/// References are the cycle-breaking half of the model: encoding stores only
/// the id, and resolution to the full object is a separate, explicit fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// The referenced entity's mapped type.
    pub target: TypeName,
    /// The referenced entity's id value.
    pub id: Box<Value>,
}

impl Reference {
    /// Create a reference.
    pub fn new(target: impl Into<TypeName>, id: impl Into<Value>) -> Self {
        Self {
            target: target.into(),
            id: Box::new(id.into()),
        }
    }
}

/// A node of the native value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null / absent.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int32(i32),
    /// 64-bit integer.
    Int64(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// BSON ObjectId.
    ObjectId(ObjectId),
    /// Date/time. Stored with millisecond precision.
    DateTime(DateTime<Utc>),
    /// Locale tag.
    Locale(Locale),
    /// Enum variant.
    Enum(EnumValue),
    /// Ordered sequence (lists, sets, and arrays all carry this at runtime).
    List(Vec<Value>),
    /// String-keyed map, insertion-ordered.
    Map(IndexMap<String, Value>),
    /// Typed object.
    Object(ObjectValue),
    /// Typed entity reference.
    Reference(Reference),
}

impl Value {
    /// A short name for the runtime shape, used in error messages.
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::ObjectId(_) => "object-id",
            Self::DateTime(_) => "datetime",
            Self::Locale(_) => "locale",
            Self::Enum(_) => "enum",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Reference(_) => "reference",
        }
    }

    /// Check for null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Build a list value.
    pub fn list(items: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a map value preserving iteration order.
    pub fn map(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<Value>)>) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// View as an object, if it is one.
    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// View as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::ObjectId(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<Locale> for Value {
    fn from(v: Locale) -> Self {
        Self::Locale(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Self::Enum(v)
    }
}

impl From<ObjectValue> for Value {
    fn from(v: ObjectValue) -> Self {
        Self::Object(v)
    }
}

impl From<Reference> for Value {
    fn from(v: Reference) -> Self {
        Self::Reference(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_builder() {
        let obj = ObjectValue::new("blog.Author")
            .with("name", "Ada")
            .with("age", 36i32);
        assert_eq!(obj.get("name"), Some(&Value::String("Ada".into())));
        assert_eq!(obj.get("age"), Some(&Value::Int32(36)));
        let keys: Vec<_> = obj.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["name", "age"]);
    }

    #[test]
    fn test_value_list_helper() {
        let value = Value::list(["a", "b"]);
        assert_eq!(
            value,
            Value::List(vec![Value::String("a".into()), Value::String("b".into())])
        );
    }

    #[test]
    fn test_value_map_preserves_order() {
        let value = Value::map([("z", 1i32), ("a", 2i32)]);
        let Value::Map(map) = value else { panic!("not a map") };
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<i32> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(7i32)), Value::Int32(7));
    }

    #[test]
    fn test_shape_names() {
        assert_eq!(Value::Null.shape_name(), "null");
        assert_eq!(Value::from(1.5).shape_name(), "double");
        assert_eq!(Value::list([1i32]).shape_name(), "list");
    }
}
