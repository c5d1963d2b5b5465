//! Mapper configuration: discriminators, path validation, naming, nulls, ids.

use serde::{Deserialize, Serialize};

use crate::field::TypeName;

/// How a class's discriminator value is derived when not set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiscriminatorStrategy {
    /// Use the fully-qualified type name (the default).
    #[default]
    TypeName,
    /// Use the last segment of the type name.
    SimpleName,
    /// Use the last segment of the type name, lowercased.
    Lowercase,
}

impl DiscriminatorStrategy {
    /// Derive a discriminator value for a type name.
    pub fn derive(&self, type_name: &TypeName) -> String {
        match self {
            Self::TypeName => type_name.as_str().to_string(),
            Self::SimpleName => type_name.simple_name().to_string(),
            Self::Lowercase => type_name.simple_name().to_lowercase(),
        }
    }
}

/// Whether unknown field paths in queries are rejected or passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathValidation {
    /// Reject paths that do not resolve against the mapped schema.
    #[default]
    Strict,
    /// Pass unresolved paths through verbatim (escape hatch for dynamic fields).
    Permissive,
}

/// How a collection name is derived for a persisted class without an
/// explicit collection override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionNaming {
    /// Use the simple type name as-is.
    SimpleName,
    /// Use the simple type name, lowercased (the default).
    #[default]
    Lowercase,
}

impl CollectionNaming {
    /// Derive a collection name for a type name.
    pub fn derive(&self, type_name: &TypeName) -> String {
        match self {
            Self::SimpleName => type_name.simple_name().to_string(),
            Self::Lowercase => type_name.simple_name().to_lowercase(),
        }
    }
}

/// How null values on optional fields are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NullHandling {
    /// Omit the key entirely (the default).
    #[default]
    Omit,
    /// Store an explicit BSON null.
    StoreNull,
}

/// How missing id values are filled in on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdStrategy {
    /// Generate a fresh ObjectId when the id field is absent (the default).
    #[default]
    GenerateObjectId,
    /// Leave missing ids missing; the server assigns one.
    None,
}

/// Configuration consumed by the registry, codecs, and query builders.
///
/// # Example
///
/// ```rust
/// use remora_schema::MapperOptions;
/// use remora_schema::options::PathValidation;
///
/// let options = MapperOptions::builder()
///     .discriminator_key("_type")
///     .path_validation(PathValidation::Permissive)
///     .build();
/// assert_eq!(options.discriminator_key, "_type");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapperOptions {
    /// Document key the discriminator value is stored under.
    pub discriminator_key: String,
    /// Default discriminator derivation strategy.
    pub discriminator: DiscriminatorStrategy,
    /// Strict or permissive field-path validation.
    pub path_validation: PathValidation,
    /// Collection-naming strategy for persisted classes.
    pub collection_naming: CollectionNaming,
    /// Null-handling policy for optional fields.
    pub null_handling: NullHandling,
    /// Id-generation strategy.
    pub id_strategy: IdStrategy,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            discriminator_key: "_t".to_string(),
            discriminator: DiscriminatorStrategy::default(),
            path_validation: PathValidation::default(),
            collection_naming: CollectionNaming::default(),
            null_handling: NullHandling::default(),
            id_strategy: IdStrategy::default(),
        }
    }
}

impl MapperOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder.
    pub fn builder() -> MapperOptionsBuilder {
        MapperOptionsBuilder::default()
    }

    /// Check if path validation is strict.
    pub fn is_strict(&self) -> bool {
        self.path_validation == PathValidation::Strict
    }
}

/// Builder for [`MapperOptions`].
#[derive(Debug, Default)]
pub struct MapperOptionsBuilder {
    options: MapperOptions,
}

impl MapperOptionsBuilder {
    /// Set the discriminator key (default `_t`).
    pub fn discriminator_key(mut self, key: impl Into<String>) -> Self {
        self.options.discriminator_key = key.into();
        self
    }

    /// Set the discriminator derivation strategy.
    pub fn discriminator(mut self, strategy: DiscriminatorStrategy) -> Self {
        self.options.discriminator = strategy;
        self
    }

    /// Set strict or permissive path validation.
    pub fn path_validation(mut self, mode: PathValidation) -> Self {
        self.options.path_validation = mode;
        self
    }

    /// Set the collection-naming strategy.
    pub fn collection_naming(mut self, naming: CollectionNaming) -> Self {
        self.options.collection_naming = naming;
        self
    }

    /// Set the null-handling policy.
    pub fn null_handling(mut self, policy: NullHandling) -> Self {
        self.options.null_handling = policy;
        self
    }

    /// Set the id-generation strategy.
    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.options.id_strategy = strategy;
        self
    }

    /// Build the options.
    pub fn build(self) -> MapperOptions {
        self.options
    }
}
