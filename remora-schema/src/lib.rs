//! # remora-schema
//!
//! Mapped-class model and type registry for the Remora ODM.
//!
//! This crate provides:
//! - Descriptor types for mapped domain classes and their fields
//! - An explicit, injectable type registry with map-once semantics
//! - Polymorphic discriminator dispatch tables
//! - Logical-to-storage dotted-path resolution
//! - The mapper configuration surface (discriminators, naming, nulls, ids)
//!
//! ## Example
//!
//! ```rust
//! use remora_schema::{FieldShape, MappedClass, MappedField, MapperOptions, Registry, ScalarKind};
//!
//! let registry = Registry::new(MapperOptions::default());
//! let author = registry.register(
//!     MappedClass::builder("blog.Author")
//!         .id(MappedField::new("id", FieldShape::scalar(ScalarKind::ObjectId)))
//!         .field(MappedField::new("name", FieldShape::scalar(ScalarKind::String)))
//!         .build()?,
//! )?;
//! assert_eq!(registry.resolve_path(&author, "id")?, "_id");
//! # Ok::<(), remora_schema::MappingError>(())
//! ```

pub mod error;
pub mod field;
pub mod model;
pub mod options;
pub mod registry;

pub use error::{MappingError, MappingResult};
pub use field::{EnumDef, EnumRepr, FieldShape, MappedField, ScalarKind, TypeName};
pub use model::{MappedClass, MappedClassBuilder, object_id_field};
pub use options::{
    CollectionNaming, DiscriminatorStrategy, IdStrategy, MapperOptions, MapperOptionsBuilder,
    NullHandling, PathValidation,
};
pub use registry::Registry;
