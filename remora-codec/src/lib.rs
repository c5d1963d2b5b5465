//! Remora codec layer.
//!
//! Bidirectional conversion between native value trees and BSON documents,
//! driven entirely by the mapped-class descriptors in a
//! [`remora_schema::Registry`]. There is no per-type generated code: one
//! [`Codec`] handles every registered type by recursive descent over the
//! declared field shapes.
//!
//! # Example
//!
//! ```rust
//! use remora_codec::{Codec, ObjectValue, Value};
//! use remora_schema::{FieldShape, MappedClass, MappedField, Registry, ScalarKind};
//!
//! let registry = Registry::with_defaults();
//! registry
//!     .register(
//!         MappedClass::builder("blog.Author")
//!             .id(MappedField::new("id", FieldShape::scalar(ScalarKind::ObjectId)))
//!             .field(MappedField::new("name", FieldShape::scalar(ScalarKind::String)))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let codec = Codec::new(&registry);
//! let author = Value::Object(ObjectValue::new("blog.Author").with("name", "Ada"));
//! let doc = codec.encode(&author).unwrap();
//! assert_eq!(doc.get_str("name").unwrap(), "Ada");
//! ```

pub mod codec;
pub mod error;
pub mod locale;
pub mod value;

pub use codec::Codec;
pub use error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
pub use locale::Locale;
pub use value::{EnumValue, ObjectValue, Reference, Value};
