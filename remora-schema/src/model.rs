//! Mapped-class descriptors.
//!
//! A [`MappedClass`] is the immutable per-type schema descriptor the rest of
//! the engine runs on: the codec layer drives encode/decode off its fields,
//! and the query builders validate dotted paths against it.

use bson::Document;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{MappingError, MappingResult};
use crate::field::{FieldShape, MappedField, ScalarKind, TypeName};

/// An immutable schema descriptor for one mapped domain type.
///
/// Built once via [`MappedClass::builder`], validated by
/// [`MappedClassBuilder::build`], and cached for process lifetime by the
/// registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedClass {
    /// Qualified type name.
    pub type_name: TypeName,
    /// Collection name for persisted classes; `None` for embeddable-only
    /// classes until the registry derives one (never derived if embeddable).
    pub collection: Option<String>,
    /// Persisted fields, keyed by logical name, in declaration order.
    pub fields: IndexMap<SmolStr, MappedField>,
    /// Logical name of the id field, if any.
    pub id_field: Option<SmolStr>,
    /// Discriminator value; filled in by the registry when not overridden.
    pub discriminator: Option<String>,
    /// Declared server-side validation filter, passed through verbatim as
    /// create-collection options and never interpreted locally.
    pub validation: Option<Document>,
    /// Embeddable-only classes have no id and no collection.
    pub embeddable: bool,
}

impl MappedClass {
    /// Create a builder for the given type name.
    pub fn builder(type_name: impl Into<TypeName>) -> MappedClassBuilder {
        MappedClassBuilder::new(type_name)
    }

    /// Look up a field by logical name.
    pub fn field(&self, name: &str) -> Option<&MappedField> {
        self.fields.get(name)
    }

    /// Look up a field by storage name.
    pub fn field_by_storage(&self, storage_name: &str) -> Option<&MappedField> {
        self.fields.values().find(|f| f.storage_name == storage_name)
    }

    /// The id field descriptor, if any.
    pub fn id(&self) -> Option<&MappedField> {
        self.id_field.as_ref().and_then(|name| self.fields.get(name.as_str()))
    }

    /// The discriminator value.
    ///
    /// Present after registration; absent only on a descriptor that was
    /// built but never registered and carried no explicit override.
    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    /// The collection name, if this class is persisted standalone.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }
}

/// Fluent builder for [`MappedClass`].
///
/// # Example
///
/// ```rust
/// use remora_schema::{FieldShape, MappedClass, MappedField, ScalarKind};
///
/// let class = MappedClass::builder("blog.Author")
///     .collection("authors")
///     .id(MappedField::new("id", FieldShape::scalar(ScalarKind::ObjectId)))
///     .field(MappedField::new("name", FieldShape::scalar(ScalarKind::String)))
///     .field(
///         MappedField::new("email", FieldShape::scalar(ScalarKind::String))
///             .stored_as("email_address"),
///     )
///     .build()
///     .unwrap();
///
/// assert_eq!(class.field("email").unwrap().storage_name(), "email_address");
/// ```
#[derive(Debug)]
pub struct MappedClassBuilder {
    type_name: TypeName,
    collection: Option<String>,
    fields: Vec<MappedField>,
    id_fields: Vec<SmolStr>,
    discriminator: Option<String>,
    validation: Option<Document>,
    embeddable: bool,
}

impl MappedClassBuilder {
    fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            collection: None,
            fields: Vec::new(),
            id_fields: Vec::new(),
            discriminator: None,
            validation: None,
            embeddable: false,
        }
    }

    /// Set an explicit collection name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Declare the id field. Its storage name is forced to `_id`.
    pub fn id(mut self, field: MappedField) -> Self {
        let field = field.stored_as("_id");
        self.id_fields.push(field.name.clone());
        self.fields.push(field);
        self
    }

    /// Declare a persisted field.
    pub fn field(mut self, field: MappedField) -> Self {
        self.fields.push(field);
        self
    }

    /// Override the discriminator value for this class.
    pub fn discriminator(mut self, value: impl Into<String>) -> Self {
        self.discriminator = Some(value.into());
        self
    }

    /// Attach a server-side validation filter (opaque passthrough).
    pub fn validation(mut self, filter: Document) -> Self {
        self.validation = Some(filter);
        self
    }

    /// Mark the class as embeddable-only: no id, no collection of its own.
    pub fn embeddable(mut self) -> Self {
        self.embeddable = true;
        self
    }

    /// Validate and build the descriptor.
    ///
    /// Fails when a class declares more than one id field, when two fields
    /// share a logical or storage name, or when a container field carries no
    /// declared element shape.
    pub fn build(self) -> MappingResult<MappedClass> {
        let type_name = self.type_name;

        if self.id_fields.len() > 1 {
            return Err(MappingError::DuplicateId {
                type_name: type_name.as_str().to_string(),
                first: self.id_fields[0].to_string(),
                second: self.id_fields[1].to_string(),
            });
        }

        let mut fields: IndexMap<SmolStr, MappedField> =
            IndexMap::with_capacity(self.fields.len());
        for field in self.fields {
            if field.shape.has_unspecified() {
                return Err(MappingError::AmbiguousElement {
                    type_name: type_name.as_str().to_string(),
                    field: field.name.to_string(),
                });
            }
            if fields.contains_key(&field.name) {
                return Err(MappingError::DuplicateName {
                    type_name: type_name.as_str().to_string(),
                    name: field.name.to_string(),
                });
            }
            if let Some(existing) = fields.values().find(|f| f.storage_name == field.storage_name) {
                return Err(MappingError::DuplicateField {
                    type_name: type_name.as_str().to_string(),
                    storage_name: field.storage_name.to_string(),
                    first: existing.name.to_string(),
                    second: field.name.to_string(),
                });
            }
            fields.insert(field.name.clone(), field);
        }

        Ok(MappedClass {
            type_name,
            collection: self.collection,
            id_field: self.id_fields.into_iter().next(),
            fields,
            discriminator: self.discriminator,
            validation: self.validation,
            embeddable: self.embeddable,
        })
    }
}

/// Convenience: a conventional ObjectId id field named `id`.
pub fn object_id_field() -> MappedField {
    MappedField::new("id", FieldShape::scalar(ScalarKind::ObjectId))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn author() -> MappedClass {
        MappedClass::builder("blog.Author")
            .collection("authors")
            .id(object_id_field())
            .field(MappedField::new("name", FieldShape::scalar(ScalarKind::String)))
            .field(
                MappedField::new("email", FieldShape::scalar(ScalarKind::String))
                    .stored_as("email_address")
                    .optional(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_basic() {
        let class = author();
        assert_eq!(class.type_name.as_str(), "blog.Author");
        assert_eq!(class.collection(), Some("authors"));
        assert_eq!(class.fields.len(), 3);
        assert_eq!(class.id().unwrap().storage_name(), "_id");
        assert!(!class.embeddable);
    }

    #[test]
    fn test_field_order_preserved() {
        let class = author();
        let names: Vec<_> = class.fields.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "email"]);
    }

    #[test]
    fn test_field_by_storage() {
        let class = author();
        let field = class.field_by_storage("email_address").unwrap();
        assert_eq!(field.name(), "email");
        assert!(class.field_by_storage("email").is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = MappedClass::builder("Broken")
            .id(object_id_field())
            .id(MappedField::new("key", FieldShape::scalar(ScalarKind::Int64)))
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::DuplicateId { .. }));
    }

    #[test]
    fn test_duplicate_storage_name_rejected() {
        let err = MappedClass::builder("Broken")
            .field(MappedField::new("a", FieldShape::scalar(ScalarKind::String)).stored_as("x"))
            .field(MappedField::new("b", FieldShape::scalar(ScalarKind::String)).stored_as("x"))
            .build()
            .unwrap_err();
        match err {
            MappingError::DuplicateField { storage_name, first, second, .. } => {
                assert_eq!(storage_name, "x");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_logical_name_rejected() {
        // Same logical name under two storage names must not silently
        // replace the first declaration.
        let err = MappedClass::builder("Broken")
            .field(MappedField::new("a", FieldShape::scalar(ScalarKind::String)))
            .field(MappedField::new("a", FieldShape::scalar(ScalarKind::Int32)).stored_as("b"))
            .build()
            .unwrap_err();
        match err {
            MappingError::DuplicateName { type_name, name } => {
                assert_eq!(type_name, "Broken");
                assert_eq!(name, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_raw_container_rejected() {
        let err = MappedClass::builder("Broken")
            .field(MappedField::new("items", FieldShape::list(FieldShape::Unspecified)))
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::AmbiguousElement { .. }));
    }

    #[test]
    fn test_embeddable_class() {
        let class = MappedClass::builder("blog.Address")
            .embeddable()
            .field(MappedField::new("street", FieldShape::scalar(ScalarKind::String)))
            .build()
            .unwrap();
        assert!(class.embeddable);
        assert!(class.id().is_none());
        assert!(class.collection().is_none());
    }

    #[test]
    fn test_validation_passthrough() {
        let class = MappedClass::builder("blog.Post")
            .id(object_id_field())
            .validation(doc! { "wordCount": { "$gt": 0 } })
            .build()
            .unwrap();
        assert_eq!(class.validation, Some(doc! { "wordCount": { "$gt": 0 } }));
    }
}
