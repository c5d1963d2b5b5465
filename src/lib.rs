//! # Remora
//!
//! An object-document mapper for MongoDB.
//!
//! Remora provides:
//! - Explicit, registry-backed mapping from domain types to collections
//! - A descriptor-driven codec between native value trees and BSON documents
//! - Structured filter, update, and aggregation builders over logical paths
//! - An async driver seam so transports and tests plug in behind one trait
//!
//! ## Quick Start
//!
//! ```rust
//! use remora::prelude::*;
//!
//! let registry = Registry::with_defaults();
//! registry
//!     .register(
//!         MappedClass::builder("blog.Author")
//!             .id(MappedField::new("id", FieldShape::scalar(ScalarKind::ObjectId)))
//!             .field(
//!                 MappedField::new("name", FieldShape::scalar(ScalarKind::String))
//!                     .stored_as("n"),
//!             )
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let author = Value::Object(ObjectValue::new("blog.Author").with("name", "Ada"));
//! let doc = Codec::new(&registry).encode(&author).unwrap();
//! assert_eq!(doc.get_str("n").unwrap(), "Ada");
//!
//! let filter = FindQuery::new("blog.Author")
//!     .filter(Filter::eq("name", "Ada"))
//!     .compile(&registry)
//!     .unwrap();
//! assert_eq!(filter.filter, bson::doc! { "n": "Ada" });
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Mapped-class descriptors, options, and the registry.
pub mod schema {
    pub use remora_schema::*;
}

/// Value trees and the descriptor-driven codec.
pub mod codec {
    pub use remora_codec::*;
}

/// Filters, queries, updates, pipelines, and the datastore.
pub mod query {
    pub use remora_query::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::codec::{Codec, EnumValue, Locale, ObjectValue, Reference, Value};
    pub use crate::query::{
        Accumulator, Datastore, Direction, Driver, Filter, FindQuery, GeoNear, ModifyOptions,
        Pipeline, PushOptions, Stage, UpdateBuilder, WriteOptions,
    };
    pub use crate::schema::{
        EnumDef, EnumRepr, FieldShape, MappedClass, MappedField, MapperOptions, MappingError,
        Registry, ScalarKind, TypeName,
    };
}

// Re-export key types at the crate root
pub use codec::{Codec, Value};
pub use query::{Datastore, Filter, FindQuery, Pipeline, QueryError, UpdateBuilder};
pub use schema::{MappedClass, MappingError, Registry};
