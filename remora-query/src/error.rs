//! Error types for query, update, and pipeline compilation.

use remora_codec::{DecodeError, EncodeError};
use remora_schema::MappingError;
use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while compiling or executing queries.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A filter or sort path does not resolve against the mapped class.
    #[error("unknown path `{path}` on `{type_name}`")]
    UnknownPath { type_name: String, path: String },

    /// A projection mixes inclusion and exclusion.
    #[error("projection on `{type_name}` mixes inclusion and exclusion (`{path}`)")]
    MixedProjection { type_name: String, path: String },

    /// An update document would contain no operators.
    #[error("update for `{type_name}` contains no operations")]
    EmptyUpdate { type_name: String },

    /// A geo stage was given zero or both point encodings.
    #[error("$geoNear requires exactly one of a legacy coordinate pair or a GeoJSON point")]
    AmbiguousGeoPoint,

    /// The target type has no registered descriptor or no collection.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// A literal value embedded in the query failed to encode.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// A result document failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The driver reported a failure.
    #[error("driver error: {0}")]
    Driver(String),

    /// The target class is embeddable-only and has no collection.
    #[error("`{type_name}` has no collection; embeddable classes cannot be queried directly")]
    NoCollection { type_name: String },
}

impl QueryError {
    /// Create an unknown-path error.
    pub fn unknown_path(type_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnknownPath {
            type_name: type_name.into(),
            path: path.into(),
        }
    }

    /// Create a driver error from any displayable failure.
    pub fn driver(err: impl std::fmt::Display) -> Self {
        Self::Driver(err.to_string())
    }
}
