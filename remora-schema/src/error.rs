//! Error types for mapping and registry operations.

use miette::Diagnostic;
use thiserror::Error;

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// Errors that can occur while building mapped classes or registering them.
///
/// Mapping errors are fatal at mapping time and are never retried: a type
/// that fails to map stays unmapped until the definition is corrected.
#[derive(Error, Debug, Diagnostic)]
pub enum MappingError {
    /// A class declared more than one id field.
    #[error("mapped class `{type_name}` declares more than one id field (`{first}` and `{second}`)")]
    #[diagnostic(code(remora::mapping::duplicate_id))]
    DuplicateId {
        type_name: String,
        first: String,
        second: String,
    },

    /// A class declared the same logical field name twice.
    #[error("mapped class `{type_name}` declares field `{name}` more than once")]
    #[diagnostic(code(remora::mapping::duplicate_name))]
    DuplicateName { type_name: String, name: String },

    /// Two fields of the same class compile to the same storage name.
    #[error("mapped class `{type_name}` stores both `{first}` and `{second}` under key `{storage_name}`")]
    #[diagnostic(code(remora::mapping::duplicate_field))]
    DuplicateField {
        type_name: String,
        storage_name: String,
        first: String,
        second: String,
    },

    /// Two classes in the same hierarchy share a discriminator value.
    #[error("discriminator `{value}` is already taken by `{existing}` in the hierarchy rooted at `{base}`")]
    #[diagnostic(code(remora::mapping::duplicate_discriminator))]
    DuplicateDiscriminator {
        base: String,
        value: String,
        existing: String,
    },

    /// An embedded or referenced type has not been registered.
    #[error("`{type_name}` refers to `{target}` which has not been mapped")]
    #[diagnostic(
        code(remora::mapping::unmapped_type),
        help("register `{target}` before `{type_name}`")
    )]
    UnmappedType { type_name: String, target: String },

    /// A container field has no declared element shape.
    ///
    /// Raw containers are rejected outright rather than inferred from runtime
    /// values: silent misinference would corrupt round-trip semantics.
    #[error("field `{type_name}.{field}` is a container with no declared element shape")]
    #[diagnostic(code(remora::mapping::ambiguous_element))]
    AmbiguousElement { type_name: String, field: String },

    /// A dotted path did not resolve against the mapped schema.
    #[error("unknown field path `{path}` on mapped class `{type_name}`")]
    #[diagnostic(code(remora::mapping::unknown_field))]
    UnknownField { type_name: String, path: String },

    /// A type name was re-registered with a different definition.
    ///
    /// Registering the identical definition twice is fine (idempotent); only
    /// a conflicting redefinition is an error.
    #[error("`{type_name}` is already mapped with a different definition")]
    #[diagnostic(code(remora::mapping::conflicting_definition))]
    ConflictingDefinition { type_name: String },

    /// A subtype was registered under a base that is not mapped.
    #[error("cannot register `{subtype}` under unmapped base `{base}`")]
    #[diagnostic(code(remora::mapping::unmapped_base))]
    UnmappedBase { base: String, subtype: String },
}

impl MappingError {
    /// Create an unknown-field error.
    pub fn unknown_field(type_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnknownField {
            type_name: type_name.into(),
            path: path.into(),
        }
    }

    /// Create an unmapped-type error.
    pub fn unmapped_type(type_name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::UnmappedType {
            type_name: type_name.into(),
            target: target.into(),
        }
    }

    /// Check if this is a path-resolution failure.
    pub fn is_unknown_field(&self) -> bool {
        matches!(self, Self::UnknownField { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MappingError::DuplicateId {
            type_name: "Author".into(),
            first: "id".into(),
            second: "key".into(),
        };
        assert_eq!(
            err.to_string(),
            "mapped class `Author` declares more than one id field (`id` and `key`)"
        );
    }

    #[test]
    fn test_unknown_field_helper() {
        let err = MappingError::unknown_field("Author", "nam");
        assert!(err.is_unknown_field());
        assert_eq!(
            err.to_string(),
            "unknown field path `nam` on mapped class `Author`"
        );
    }

    #[test]
    fn test_unmapped_type_helper() {
        let err = MappingError::unmapped_type("Book", "Author");
        assert!(!err.is_unknown_field());
        assert!(err.to_string().contains("has not been mapped"));
    }
}
