//! Error types for the object/document boundary.

use thiserror::Error;

/// Result type for encoding.
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Result type for decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors raised while encoding a value tree into a document.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The value's runtime shape does not match the field's declared shape.
    #[error("cannot encode `{type_name}.{field}`: expected {expected}, got {actual}")]
    ShapeMismatch {
        type_name: String,
        field: String,
        expected: String,
        actual: String,
    },

    /// The value refers to a type with no registered descriptor.
    #[error("no mapped class registered for `{type_name}`")]
    UnmappedType { type_name: String },

    /// The value carries a field the mapped class does not declare.
    #[error("`{type_name}` has no mapped field `{field}`")]
    UnknownField { type_name: String, field: String },

    /// An enum value is not a declared variant.
    #[error("`{name}` is not a variant of the enum mapped at `{type_name}.{field}`")]
    UnknownVariant {
        type_name: String,
        field: String,
        name: String,
    },

    /// A reference value has no id to store.
    #[error("reference to `{target}` has no id value")]
    ReferenceWithoutId { target: String },

    /// Only object values can be encoded as top-level documents.
    #[error("top-level encode requires an object value, got {actual}")]
    NotAnObject { actual: String },
}

/// Errors raised while decoding a document into a value tree.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// A document value's shape does not match the field's declared shape
    /// and no coercion rule applies.
    #[error("cannot decode `{type_name}.{field}`: expected {expected}, got {actual}")]
    ShapeMismatch {
        type_name: String,
        field: String,
        expected: String,
        actual: String,
    },

    /// The document names a type with no registered descriptor.
    #[error("no mapped class registered for `{type_name}`")]
    UnmappedType { type_name: String },

    /// A required field is absent from the document.
    #[error("document for `{type_name}` is missing required field `{field}`")]
    MissingField { type_name: String, field: String },

    /// The discriminator value resolves to no registered type.
    #[error("unknown discriminator `{value}` for hierarchy rooted at `{base}`")]
    UnknownDiscriminator { base: String, value: String },

    /// A locale token does not match the delimiter grammar.
    #[error("invalid locale token `{token}`")]
    InvalidLocale { token: String },

    /// An enum storage value maps to no declared variant.
    #[error("`{value}` is not a variant of the enum mapped at `{type_name}.{field}`")]
    UnknownVariant {
        type_name: String,
        field: String,
        value: String,
    },
}

impl DecodeError {
    /// Create a shape-mismatch error.
    pub fn shape_mismatch(
        type_name: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ShapeMismatch {
            type_name: type_name.into(),
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl EncodeError {
    /// Create a shape-mismatch error.
    pub fn shape_mismatch(
        type_name: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ShapeMismatch {
            type_name: type_name.into(),
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
