//! Field descriptors: declared value shapes and per-field mapping metadata.

use bson::Bson;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A qualified type name identifying a mapped class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(SmolStr);

impl TypeName {
    /// Create a new type name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name.as_ref()))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last dot-separated segment of the qualified name.
    pub fn simple_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(SmolStr::new(&s))
    }
}

/// How an enum value is stored in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnumRepr {
    /// Store the variant name as a string.
    Name,
    /// Store the zero-based variant ordinal as an Int32.
    Ordinal,
}

/// An enum field descriptor: the declared variants and their storage form.
///
/// The variant list is load-bearing: it is what lets an ordinal-stored value
/// decode back to its name, and a name-stored value decode to its ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    /// Variant names in declaration order.
    pub variants: Vec<SmolStr>,
    /// Storage representation.
    pub repr: EnumRepr,
}

impl EnumDef {
    /// Create an enum descriptor stored by variant name.
    pub fn by_name<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            variants: variants.into_iter().map(|v| SmolStr::new(v.as_ref())).collect(),
            repr: EnumRepr::Name,
        }
    }

    /// Create an enum descriptor stored by ordinal.
    pub fn by_ordinal<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            repr: EnumRepr::Ordinal,
            ..Self::by_name(variants)
        }
    }

    /// Look up a variant's ordinal by name.
    pub fn ordinal_of(&self, name: &str) -> Option<i32> {
        self.variants.iter().position(|v| v == name).map(|i| i as i32)
    }

    /// Look up a variant's name by ordinal.
    pub fn name_of(&self, ordinal: i32) -> Option<&str> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.variants.get(i))
            .map(|v| v.as_str())
    }
}

/// Scalar value kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// BSON ObjectId.
    ObjectId,
    /// Date/time, stored as a BSON datetime (millisecond precision).
    DateTime,
    /// Locale tag, stored as a single delimited string token.
    Locale,
    /// Enum, stored by name or ordinal.
    Enum(EnumDef),
}

/// The declared shape of a persisted field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldShape {
    /// A single scalar value.
    Scalar(ScalarKind),
    /// An ordered sequence of elements.
    List(Box<FieldShape>),
    /// A set of elements (stored as an array; decode drops duplicates).
    Set(Box<FieldShape>),
    /// A fixed-size array of elements (stored identically to a list).
    Array(Box<FieldShape>),
    /// A string-keyed mapping to values of one shape.
    Map(Box<FieldShape>),
    /// A nested object stored inline as a full document.
    Embedded(TypeName),
    /// Another entity stored by id only; resolved by an explicit fetch.
    Reference(TypeName),
    /// A container whose element shape was never declared.
    ///
    /// Only valid transiently while building; `MappedClassBuilder::build`
    /// rejects any shape containing it.
    Unspecified,
}

impl FieldShape {
    /// Shorthand for a scalar shape.
    pub fn scalar(kind: ScalarKind) -> Self {
        Self::Scalar(kind)
    }

    /// Shorthand for a list of the given element shape.
    pub fn list(elem: FieldShape) -> Self {
        Self::List(Box::new(elem))
    }

    /// Shorthand for a set of the given element shape.
    pub fn set(elem: FieldShape) -> Self {
        Self::Set(Box::new(elem))
    }

    /// Shorthand for an array of the given element shape.
    pub fn array(elem: FieldShape) -> Self {
        Self::Array(Box::new(elem))
    }

    /// Shorthand for a string-keyed map of the given value shape.
    pub fn map(value: FieldShape) -> Self {
        Self::Map(Box::new(value))
    }

    /// Shorthand for an embedded object shape.
    pub fn embedded(type_name: impl Into<TypeName>) -> Self {
        Self::Embedded(type_name.into())
    }

    /// Shorthand for a referenced-entity shape.
    pub fn reference(type_name: impl Into<TypeName>) -> Self {
        Self::Reference(type_name.into())
    }

    /// Check if this shape is a container (list, set, array, or map).
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Self::List(_) | Self::Set(_) | Self::Array(_) | Self::Map(_)
        )
    }

    /// The element shape of a container, if any.
    pub fn element(&self) -> Option<&FieldShape> {
        match self {
            Self::List(e) | Self::Set(e) | Self::Array(e) | Self::Map(e) => Some(e),
            _ => None,
        }
    }

    /// Check whether any part of this shape is [`FieldShape::Unspecified`].
    pub fn has_unspecified(&self) -> bool {
        match self {
            Self::Unspecified => true,
            Self::List(e) | Self::Set(e) | Self::Array(e) | Self::Map(e) => e.has_unspecified(),
            _ => false,
        }
    }
}

/// A persisted field of a mapped class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedField {
    /// Logical name used in code and in query paths.
    pub name: SmolStr,
    /// Storage name used as the document key (may differ via aliasing).
    pub storage_name: SmolStr,
    /// Declared value shape.
    pub shape: FieldShape,
    /// Whether the field may be null/absent.
    pub optional: bool,
    /// Declared default; when the encoded value equals it, the field is
    /// omitted from the document.
    pub skip_default: Option<Bson>,
}

impl MappedField {
    /// Create a required field stored under its logical name.
    pub fn new(name: impl AsRef<str>, shape: FieldShape) -> Self {
        let name = SmolStr::new(name.as_ref());
        Self {
            storage_name: name.clone(),
            name,
            shape,
            optional: false,
            skip_default: None,
        }
    }

    /// Store this field under a different document key.
    pub fn stored_as(mut self, storage_name: impl AsRef<str>) -> Self {
        self.storage_name = SmolStr::new(storage_name.as_ref());
        self
    }

    /// Mark the field as optional (null/absent allowed).
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Omit the field from encoded documents when its value equals `default`.
    pub fn skip_when(mut self, default: impl Into<Bson>) -> Self {
        self.skip_default = Some(default.into());
        self
    }

    /// Get the logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the storage name.
    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    /// Check if the field is renamed in storage.
    pub fn is_aliased(&self) -> bool {
        self.name != self.storage_name
    }
}
