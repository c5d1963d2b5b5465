//! Remora query layer.
//!
//! Structured filter, update, and aggregation builders that compile logical
//! field paths into driver-ready BSON documents, plus the [`Datastore`]
//! facade and the async [`Driver`] seam a transport plugs into.
//!
//! # Example
//!
//! ```rust,ignore
//! use remora_query::{Datastore, Direction, Filter, FindQuery};
//!
//! let query = FindQuery::new("blog.Author")
//!     .filter(Filter::gte("age", 18))
//!     .sort("name", Direction::Asc)
//!     .limit(10);
//! let authors = store.find(&query).await?;
//! ```

pub mod datastore;
pub mod error;
pub mod filter;
pub mod logging;
pub mod pipeline;
pub mod query;
pub mod update;

pub use datastore::{Datastore, Driver, WriteOptions};
pub use error::{QueryError, QueryResult};
pub use filter::{Filter, FilterCompiler, filters_equivalent};
pub use pipeline::{Accumulator, GeoNear, Pipeline, Stage, StageContext};
pub use query::{CompiledQuery, Direction, FindQuery};
pub use update::{ModifyOptions, PushOptions, ReturnDocument, UpdateBuilder};
