//! Find queries: filters plus sort, projection, and paging options.

use bson::{Bson, Document};
use remora_schema::{Registry, TypeName};
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::filter::{Filter, FilterCompiler};

/// Sort direction for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending, encoded as `1`.
    Asc,
    /// Descending, encoded as `-1`.
    Desc,
}

impl Direction {
    /// The wire encoding of this direction.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

/// A find query under construction.
///
/// Paths are logical; compilation resolves them to storage names and builds
/// the filter, sort, and projection documents the driver sends.
///
/// # Example
///
/// ```rust,ignore
/// let query = FindQuery::new("blog.Author")
///     .filter(Filter::gte("age", 18))
///     .sort("name", Direction::Asc)
///     .limit(10);
/// let compiled = query.compile(&registry)?;
/// ```
#[derive(Debug, Clone)]
pub struct FindQuery {
    type_name: TypeName,
    filters: Vec<Filter>,
    sort: Vec<(String, Direction)>,
    include: Vec<String>,
    exclude: Vec<String>,
    skip: Option<u64>,
    limit: Option<i64>,
    collation: Option<Document>,
    options: Document,
}

impl FindQuery {
    /// Start a query against the given mapped type.
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            filters: Vec::new(),
            sort: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            skip: None,
            limit: None,
            collation: None,
            options: Document::new(),
        }
    }

    /// The mapped type this query targets.
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Add a filter condition. Sibling conditions combine as an implicit AND.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a sort key. Keys apply in the order they were added.
    pub fn sort(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.sort.push((path.into(), direction));
        self
    }

    /// Include a path in the projection.
    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.include.push(path.into());
        self
    }

    /// Exclude a path from the projection.
    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.exclude.push(path.into());
        self
    }

    /// Skip the first `n` results.
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    /// Cap the number of results.
    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Attach a collation document, passed through verbatim.
    pub fn collation(mut self, collation: Document) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Attach an opaque execution option (e.g. `maxTimeMS`), forwarded to
    /// the driver and never interpreted here.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Resolve paths and build the driver-ready query.
    ///
    /// A projection may include or exclude, not both; excluding the id field
    /// alongside inclusions is the one permitted mix.
    pub fn compile(&self, registry: &Registry) -> QueryResult<CompiledQuery> {
        let class = registry.get(&self.type_name).ok_or_else(|| {
            remora_schema::MappingError::unmapped_type(self.type_name.as_str(), "query")
        })?;
        let collection = class.collection().ok_or_else(|| QueryError::NoCollection {
            type_name: self.type_name.as_str().to_string(),
        })?;

        let compiler = FilterCompiler::for_class(registry, class.clone());
        let filter = compiler.compile(&self.filters)?;

        let sort = if self.sort.is_empty() {
            None
        } else {
            let mut doc = Document::new();
            for (path, direction) in &self.sort {
                doc.insert(compiler.resolve(path)?, direction.as_i32());
            }
            Some(doc)
        };

        let projection = self.compile_projection(&compiler)?;

        debug!(
            type_name = %self.type_name,
            collection = %collection,
            "compiled find query"
        );
        Ok(CompiledQuery {
            collection: collection.to_string(),
            filter,
            sort,
            projection,
            skip: self.skip,
            limit: self.limit,
            collation: self.collation.clone(),
            options: self.options.clone(),
        })
    }

    fn compile_projection(&self, compiler: &FilterCompiler<'_>) -> QueryResult<Option<Document>> {
        if self.include.is_empty() && self.exclude.is_empty() {
            return Ok(None);
        }
        let mut doc = Document::new();
        if !self.include.is_empty() {
            for path in &self.exclude {
                // Excluding the id among inclusions is the one legal mix.
                let resolved = compiler.resolve(path)?;
                if resolved != "_id" {
                    return Err(QueryError::MixedProjection {
                        type_name: self.type_name.as_str().to_string(),
                        path: path.clone(),
                    });
                }
                doc.insert(resolved, 0);
            }
            for path in &self.include {
                doc.insert(compiler.resolve(path)?, 1);
            }
        } else {
            for path in &self.exclude {
                doc.insert(compiler.resolve(path)?, 0);
            }
        }
        Ok(Some(doc))
    }
}

/// A fully resolved query, ready for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Target collection name.
    pub collection: String,
    /// Filter document.
    pub filter: Document,
    /// Sort document, in key-declaration order.
    pub sort: Option<Document>,
    /// Projection document.
    pub projection: Option<Document>,
    /// Results to skip.
    pub skip: Option<u64>,
    /// Result cap.
    pub limit: Option<i64>,
    /// Collation, passed through verbatim.
    pub collation: Option<Document>,
    /// Uninterpreted execution options, forwarded to the driver.
    pub options: Document,
}
