//! Descriptor-driven encode/decode between value trees and BSON documents.
//!
//! One [`Codec`] serves every mapped type: it looks the descriptor up in the
//! registry and recursively descends the declared field shapes, delegating
//! element encode/decode to the shape of the declared element type and
//! resolving polymorphic embedded documents through the discriminator
//! dispatch table at decode time.

use bson::{Bson, Document};
use indexmap::IndexMap;
use remora_schema::{
    FieldShape, IdStrategy, MappedClass, MappedField, NullHandling, Registry, ScalarKind, TypeName,
};
use tracing::trace;

use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::locale::Locale;
use crate::value::{EnumValue, ObjectValue, Reference, Value};

/// The codec layer: bidirectional conversion driven by mapped-class
/// descriptors.
#[derive(Debug, Clone, Copy)]
pub struct Codec<'r> {
    registry: &'r Registry,
}

impl<'r> Codec<'r> {
    /// Create a codec over the given registry.
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// The registry this codec reads descriptors from.
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    /// Encode a top-level object value into a document.
    ///
    /// The object's type must be registered. The discriminator key is always
    /// written; a missing id is filled in per the configured id strategy.
    pub fn encode(&self, value: &Value) -> EncodeResult<Document> {
        match value {
            Value::Object(obj) => self.encode_object(obj),
            other => Err(EncodeError::NotAnObject {
                actual: other.shape_name().to_string(),
            }),
        }
    }

    fn encode_object(&self, obj: &ObjectValue) -> EncodeResult<Document> {
        let class = self.registry.get(&obj.type_name).ok_or_else(|| {
            EncodeError::UnmappedType {
                type_name: obj.type_name.as_str().to_string(),
            }
        })?;

        for name in obj.fields.keys() {
            if class.field(name).is_none() {
                return Err(EncodeError::UnknownField {
                    type_name: class.type_name.as_str().to_string(),
                    field: name.clone(),
                });
            }
        }

        let options = self.registry.options();
        let mut doc = Document::new();
        if let Some(discriminator) = class.discriminator() {
            doc.insert(options.discriminator_key.clone(), discriminator);
        }

        for field in class.fields.values() {
            let is_id = class.id_field.as_deref() == Some(field.name());

            match obj.get(field.name()) {
                Some(value) if !value.is_null() => {
                    let encoded = self.encode_value(&class, field, &field.shape, value)?;
                    if field.skip_default.as_ref() == Some(&encoded) {
                        continue;
                    }
                    doc.insert(field.storage_name(), encoded);
                }
                // Absent or explicitly null.
                _ => {
                    if is_id
                        && options.id_strategy == IdStrategy::GenerateObjectId
                        && field.shape == FieldShape::Scalar(ScalarKind::ObjectId)
                    {
                        doc.insert(field.storage_name(), bson::oid::ObjectId::new());
                    } else if field.optional {
                        if options.null_handling == NullHandling::StoreNull {
                            doc.insert(field.storage_name(), Bson::Null);
                        }
                    } else if field.shape.is_container() {
                        let empty = match field.shape {
                            FieldShape::Map(_) => Bson::Document(Document::new()),
                            _ => Bson::Array(Vec::new()),
                        };
                        doc.insert(field.storage_name(), empty);
                    } else {
                        doc.insert(field.storage_name(), Bson::Null);
                    }
                }
            }
        }

        trace!(type_name = %class.type_name, keys = doc.len(), "encoded object");
        Ok(doc)
    }

    fn encode_value(
        &self,
        class: &MappedClass,
        field: &MappedField,
        shape: &FieldShape,
        value: &Value,
    ) -> EncodeResult<Bson> {
        let mismatch = |expected: &str, actual: &Value| {
            EncodeError::shape_mismatch(
                class.type_name.as_str(),
                field.name(),
                expected,
                actual.shape_name(),
            )
        };

        match shape {
            FieldShape::Scalar(kind) => self.encode_scalar(class, field, kind, value),
            FieldShape::List(elem) | FieldShape::Set(elem) | FieldShape::Array(elem) => {
                let Value::List(items) = value else {
                    return Err(mismatch("list", value));
                };
                let mut array = Vec::with_capacity(items.len());
                for item in items {
                    array.push(self.encode_value(class, field, elem, item)?);
                }
                Ok(Bson::Array(array))
            }
            FieldShape::Map(elem) => {
                let Value::Map(entries) = value else {
                    return Err(mismatch("map", value));
                };
                let mut doc = Document::new();
                for (key, item) in entries {
                    doc.insert(key.clone(), self.encode_value(class, field, elem, item)?);
                }
                Ok(Bson::Document(doc))
            }
            FieldShape::Embedded(_) => {
                let Value::Object(obj) = value else {
                    return Err(mismatch("object", value));
                };
                Ok(Bson::Document(self.encode_object(obj)?))
            }
            FieldShape::Reference(target) => self.encode_reference(target, value),
            FieldShape::Unspecified => Err(mismatch("declared shape", value)),
        }
    }

    fn encode_scalar(
        &self,
        class: &MappedClass,
        field: &MappedField,
        kind: &ScalarKind,
        value: &Value,
    ) -> EncodeResult<Bson> {
        let mismatch = |expected: &str| {
            EncodeError::shape_mismatch(
                class.type_name.as_str(),
                field.name(),
                expected,
                value.shape_name(),
            )
        };

        match (kind, value) {
            (ScalarKind::Bool, Value::Bool(b)) => Ok(Bson::Boolean(*b)),
            (ScalarKind::Int32, Value::Int32(i)) => Ok(Bson::Int32(*i)),
            (ScalarKind::Int64, Value::Int64(i)) => Ok(Bson::Int64(*i)),
            (ScalarKind::Int64, Value::Int32(i)) => Ok(Bson::Int64(i64::from(*i))),
            (ScalarKind::Double, Value::Double(d)) => Ok(Bson::Double(*d)),
            (ScalarKind::Double, Value::Int32(i)) => Ok(Bson::Double(f64::from(*i))),
            (ScalarKind::Double, Value::Int64(i)) => Ok(Bson::Double(*i as f64)),
            (ScalarKind::String, Value::String(s)) => Ok(Bson::String(s.clone())),
            (ScalarKind::ObjectId, Value::ObjectId(oid)) => Ok(Bson::ObjectId(*oid)),
            (ScalarKind::DateTime, Value::DateTime(dt)) => {
                Ok(Bson::DateTime(bson::DateTime::from_chrono(*dt)))
            }
            (ScalarKind::Locale, Value::Locale(locale)) => Ok(Bson::String(locale.to_token())),
            (ScalarKind::Enum(def), Value::Enum(ev)) => {
                let ordinal = def.ordinal_of(&ev.name).ok_or_else(|| {
                    EncodeError::UnknownVariant {
                        type_name: class.type_name.as_str().to_string(),
                        field: field.name().to_string(),
                        name: ev.name.to_string(),
                    }
                })?;
                match def.repr {
                    remora_schema::EnumRepr::Name => Ok(Bson::String(ev.name.to_string())),
                    remora_schema::EnumRepr::Ordinal => Ok(Bson::Int32(ordinal)),
                }
            }
            (kind, _) => Err(mismatch(scalar_name(kind))),
        }
    }

    fn encode_reference(&self, target: &TypeName, value: &Value) -> EncodeResult<Bson> {
        match value {
            Value::Reference(reference) => {
                if reference.id.is_null() {
                    return Err(EncodeError::ReferenceWithoutId {
                        target: target.as_str().to_string(),
                    });
                }
                self.encode_plain(&reference.id)
            }
            // Convenience: a full object on a reference field stores its id.
            Value::Object(obj) => {
                let class = self.registry.get(&obj.type_name).ok_or_else(|| {
                    EncodeError::UnmappedType {
                        type_name: obj.type_name.as_str().to_string(),
                    }
                })?;
                let id = class
                    .id_field
                    .as_deref()
                    .and_then(|name| obj.get(name))
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| EncodeError::ReferenceWithoutId {
                        target: target.as_str().to_string(),
                    })?;
                self.encode_plain(id)
            }
            other => Err(EncodeError::ReferenceWithoutId {
                target: format!("{} (got {})", target, other.shape_name()),
            }),
        }
    }

    /// Encode a value without a declared shape.
    ///
    /// Used for reference ids and for literal values embedded in query or
    /// pipeline documents, where the shape is implied by the value itself.
    pub fn encode_plain(&self, value: &Value) -> EncodeResult<Bson> {
        Ok(match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int32(i) => Bson::Int32(*i),
            Value::Int64(i) => Bson::Int64(*i),
            Value::Double(d) => Bson::Double(*d),
            Value::String(s) => Bson::String(s.clone()),
            Value::ObjectId(oid) => Bson::ObjectId(*oid),
            Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
            Value::Locale(locale) => Bson::String(locale.to_token()),
            Value::Enum(ev) => Bson::String(ev.name.to_string()),
            Value::List(items) => Bson::Array(
                items
                    .iter()
                    .map(|item| self.encode_plain(item))
                    .collect::<EncodeResult<Vec<_>>>()?,
            ),
            Value::Map(entries) => {
                let mut doc = Document::new();
                for (key, item) in entries {
                    doc.insert(key.clone(), self.encode_plain(item)?);
                }
                Bson::Document(doc)
            }
            Value::Object(obj) => Bson::Document(self.encode_object(obj)?),
            Value::Reference(reference) => self.encode_plain(&reference.id)?,
        })
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    /// Decode a document into an object value of the declared type.
    ///
    /// When the document carries a discriminator, the concrete subtype is
    /// resolved through the hierarchy dispatch table; a document without a
    /// discriminator decodes as the declared type.
    pub fn decode(&self, declared: &TypeName, doc: &Document) -> DecodeResult<Value> {
        Ok(Value::Object(self.decode_object(declared, doc)?))
    }

    fn decode_object(&self, declared: &TypeName, doc: &Document) -> DecodeResult<ObjectValue> {
        let mut class = self.registry.get(declared).ok_or_else(|| {
            DecodeError::UnmappedType {
                type_name: declared.as_str().to_string(),
            }
        })?;

        let options = self.registry.options();
        if let Ok(value) = doc.get_str(&options.discriminator_key) {
            if class.discriminator() != Some(value) {
                class = self
                    .registry
                    .resolve_discriminator(declared, value)
                    .ok_or_else(|| DecodeError::UnknownDiscriminator {
                        base: declared.as_str().to_string(),
                        value: value.to_string(),
                    })?;
            }
        }

        let mut obj = ObjectValue::new(class.type_name.clone());
        for field in class.fields.values() {
            let decoded = match doc.get(field.storage_name()) {
                Some(Bson::Null) => Value::Null,
                Some(bson) => self.decode_value(&class, field, &field.shape, bson)?,
                None => match &field.skip_default {
                    // The field was omitted because it held its declared
                    // default; restore it.
                    Some(default) => self.decode_value(&class, field, &field.shape, default)?,
                    None if field.optional => Value::Null,
                    None if field.shape.is_container() => match field.shape {
                        FieldShape::Map(_) => Value::Map(IndexMap::new()),
                        _ => Value::List(Vec::new()),
                    },
                    None => {
                        return Err(DecodeError::MissingField {
                            type_name: class.type_name.as_str().to_string(),
                            field: field.name().to_string(),
                        });
                    }
                },
            };
            obj.fields.insert(field.name().to_string(), decoded);
        }
        Ok(obj)
    }

    fn decode_value(
        &self,
        class: &MappedClass,
        field: &MappedField,
        shape: &FieldShape,
        bson: &Bson,
    ) -> DecodeResult<Value> {
        let mismatch = |expected: &str| {
            DecodeError::shape_mismatch(
                class.type_name.as_str(),
                field.name(),
                expected,
                bson_name(bson),
            )
        };

        match shape {
            FieldShape::Scalar(kind) => self.decode_scalar(class, field, kind, bson),
            FieldShape::List(elem) | FieldShape::Array(elem) => {
                let Bson::Array(items) = bson else {
                    return Err(mismatch("array"));
                };
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(self.decode_value(class, field, elem, item)?);
                }
                Ok(Value::List(list))
            }
            FieldShape::Set(elem) => {
                let Bson::Array(items) = bson else {
                    return Err(mismatch("array"));
                };
                // Sets drop duplicates, keeping first-occurrence order.
                let mut list: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    let decoded = self.decode_value(class, field, elem, item)?;
                    if !list.contains(&decoded) {
                        list.push(decoded);
                    }
                }
                Ok(Value::List(list))
            }
            FieldShape::Map(elem) => {
                let Bson::Document(entries) = bson else {
                    return Err(mismatch("document"));
                };
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, item) in entries {
                    map.insert(key.clone(), self.decode_value(class, field, elem, item)?);
                }
                Ok(Value::Map(map))
            }
            FieldShape::Embedded(target) => {
                let Bson::Document(nested) = bson else {
                    return Err(mismatch("document"));
                };
                Ok(Value::Object(self.decode_object(target, nested)?))
            }
            FieldShape::Reference(target) => Ok(Value::Reference(Reference::new(
                target.clone(),
                plain_value(bson).ok_or_else(|| mismatch("scalar id"))?,
            ))),
            FieldShape::Unspecified => Err(mismatch("declared shape")),
        }
    }

    fn decode_scalar(
        &self,
        class: &MappedClass,
        field: &MappedField,
        kind: &ScalarKind,
        bson: &Bson,
    ) -> DecodeResult<Value> {
        let mismatch = || {
            DecodeError::shape_mismatch(
                class.type_name.as_str(),
                field.name(),
                scalar_name(kind),
                bson_name(bson),
            )
        };

        match (kind, bson) {
            (ScalarKind::Bool, Bson::Boolean(b)) => Ok(Value::Bool(*b)),
            (ScalarKind::Int32, Bson::Int32(i)) => Ok(Value::Int32(*i)),
            (ScalarKind::Int32, Bson::Int64(i)) => i32::try_from(*i)
                .map(Value::Int32)
                .map_err(|_| mismatch()),
            (ScalarKind::Int64, Bson::Int64(i)) => Ok(Value::Int64(*i)),
            (ScalarKind::Int64, Bson::Int32(i)) => Ok(Value::Int64(i64::from(*i))),
            (ScalarKind::Double, Bson::Double(d)) => Ok(Value::Double(*d)),
            (ScalarKind::Double, Bson::Int32(i)) => Ok(Value::Double(f64::from(*i))),
            (ScalarKind::Double, Bson::Int64(i)) => Ok(Value::Double(*i as f64)),
            (ScalarKind::String, Bson::String(s)) => Ok(Value::String(s.clone())),
            (ScalarKind::ObjectId, Bson::ObjectId(oid)) => Ok(Value::ObjectId(*oid)),
            (ScalarKind::ObjectId, Bson::String(s)) => bson::oid::ObjectId::parse_str(s)
                .map(Value::ObjectId)
                .map_err(|_| mismatch()),
            (ScalarKind::DateTime, Bson::DateTime(dt)) => Ok(Value::DateTime(dt.to_chrono())),
            (ScalarKind::DateTime, Bson::Int64(millis)) => Ok(Value::DateTime(
                bson::DateTime::from_millis(*millis).to_chrono(),
            )),
            (ScalarKind::Locale, Bson::String(token)) => Locale::parse(token).map(Value::Locale),
            (ScalarKind::Enum(def), Bson::String(name)) => {
                let ordinal = def.ordinal_of(name).ok_or_else(|| {
                    DecodeError::UnknownVariant {
                        type_name: class.type_name.as_str().to_string(),
                        field: field.name().to_string(),
                        value: name.clone(),
                    }
                })?;
                Ok(Value::Enum(EnumValue::new(name, ordinal)))
            }
            (ScalarKind::Enum(def), Bson::Int32(ordinal)) => {
                let name = def.name_of(*ordinal).ok_or_else(|| {
                    DecodeError::UnknownVariant {
                        type_name: class.type_name.as_str().to_string(),
                        field: field.name().to_string(),
                        value: ordinal.to_string(),
                    }
                })?;
                Ok(Value::Enum(EnumValue::new(name, *ordinal)))
            }
            _ => Err(mismatch()),
        }
    }
}

/// Decode a shapeless BSON scalar into a value, if it is one.
fn plain_value(bson: &Bson) -> Option<Value> {
    match bson {
        Bson::Null => Some(Value::Null),
        Bson::Boolean(b) => Some(Value::Bool(*b)),
        Bson::Int32(i) => Some(Value::Int32(*i)),
        Bson::Int64(i) => Some(Value::Int64(*i)),
        Bson::Double(d) => Some(Value::Double(*d)),
        Bson::String(s) => Some(Value::String(s.clone())),
        Bson::ObjectId(oid) => Some(Value::ObjectId(*oid)),
        Bson::DateTime(dt) => Some(Value::DateTime(dt.to_chrono())),
        _ => None,
    }
}

fn scalar_name(kind: &ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "bool",
        ScalarKind::Int32 => "int32",
        ScalarKind::Int64 => "int64",
        ScalarKind::Double => "double",
        ScalarKind::String => "string",
        ScalarKind::ObjectId => "object-id",
        ScalarKind::DateTime => "datetime",
        ScalarKind::Locale => "locale",
        ScalarKind::Enum(_) => "enum",
    }
}

fn bson_name(bson: &Bson) -> &'static str {
    match bson {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::ObjectId(_) => "object-id",
        Bson::DateTime(_) => "datetime",
        _ => "other",
    }
}
