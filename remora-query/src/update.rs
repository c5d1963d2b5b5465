//! Update builders: structured operations compiled into update documents.

use bson::{Bson, Document};
use indexmap::IndexMap;
use remora_codec::{Codec, Value};
use remora_schema::{Registry, TypeName};
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::filter::{Filter, FilterCompiler};

/// Options for array `$push` operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOptions {
    /// Insert position; appended when absent.
    pub position: Option<i32>,
    /// Trim the array to this length after pushing.
    pub slice: Option<i32>,
    /// Sort the array after pushing (`1`, `-1`, or a field-sort document).
    pub sort: Option<Bson>,
}

impl PushOptions {
    fn is_default(&self) -> bool {
        self.position.is_none() && self.slice.is_none() && self.sort.is_none()
    }
}

/// Which side of a modify-and-return the driver should hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    /// The document as it was before the update.
    #[default]
    Before,
    /// The document after the update applied.
    After,
}

/// Options for find-and-modify operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifyOptions {
    /// Which version of the document to return.
    pub return_document: ReturnDocument,
    /// Insert when no document matches.
    pub upsert: bool,
    /// Server-side validation bypass, passed through opaquely.
    pub bypass_document_validation: Option<bool>,
    /// Additional driver flags, forwarded verbatim and never interpreted.
    pub extra: Document,
}

impl ModifyOptions {
    /// Return the post-update document.
    pub fn returning_new(mut self) -> Self {
        self.return_document = ReturnDocument::After;
        self
    }

    /// Insert when nothing matches.
    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    /// Attach an opaque driver flag.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
enum Op {
    Set(String, Value),
    Unset(String),
    Inc(String, Value),
    Mul(String, Value),
    Min(String, Value),
    Max(String, Value),
    Rename(String, String),
    CurrentDate(String),
    Push {
        path: String,
        values: Vec<Value>,
        options: PushOptions,
    },
    Pull(String, Value),
    PullMatching(String, Vec<Filter>),
    PullAll(String, Vec<Value>),
    AddToSet(String, Vec<Value>),
}

impl Op {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Set(..) => "$set",
            Self::Unset(..) => "$unset",
            Self::Inc(..) => "$inc",
            Self::Mul(..) => "$mul",
            Self::Min(..) => "$min",
            Self::Max(..) => "$max",
            Self::Rename(..) => "$rename",
            Self::CurrentDate(..) => "$currentDate",
            Self::Push { .. } => "$push",
            Self::Pull(..) | Self::PullMatching(..) => "$pull",
            Self::PullAll(..) => "$pullAll",
            Self::AddToSet(..) => "$addToSet",
        }
    }
}

/// An update under construction.
///
/// Operations on the same operator keyword group into one clause; paths
/// resolve to storage names at compile time.
///
/// # Example
///
/// ```rust,ignore
/// let update = UpdateBuilder::new("blog.Author")
///     .set("name", "Ada Lovelace")
///     .inc("age", 1)
///     .compile(&registry)?;
/// ```
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    type_name: TypeName,
    ops: Vec<Op>,
}

impl UpdateBuilder {
    /// Start an update against the given mapped type.
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            ops: Vec::new(),
        }
    }

    /// Set a field.
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(Op::Set(path.into(), value.into()));
        self
    }

    /// Remove a field.
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(Op::Unset(path.into()));
        self
    }

    /// Increment a numeric field.
    pub fn inc(mut self, path: impl Into<String>, by: impl Into<Value>) -> Self {
        self.ops.push(Op::Inc(path.into(), by.into()));
        self
    }

    /// Multiply a numeric field.
    pub fn mul(mut self, path: impl Into<String>, by: impl Into<Value>) -> Self {
        self.ops.push(Op::Mul(path.into(), by.into()));
        self
    }

    /// Keep the smaller of the stored and given values.
    pub fn min(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(Op::Min(path.into(), value.into()));
        self
    }

    /// Keep the larger of the stored and given values.
    pub fn max(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(Op::Max(path.into(), value.into()));
        self
    }

    /// Rename a field's document key. The source resolves through the
    /// mapping; the target is a literal new key.
    pub fn rename(mut self, path: impl Into<String>, new_key: impl Into<String>) -> Self {
        self.ops.push(Op::Rename(path.into(), new_key.into()));
        self
    }

    /// Set a field to the server's current date.
    pub fn current_date(mut self, path: impl Into<String>) -> Self {
        self.ops.push(Op::CurrentDate(path.into()));
        self
    }

    /// Append one value to an array field.
    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(Op::Push {
            path: path.into(),
            values: vec![value.into()],
            options: PushOptions::default(),
        });
        self
    }

    /// Append several values to an array field, with push options.
    pub fn push_each(
        mut self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
        options: PushOptions,
    ) -> Self {
        self.ops.push(Op::Push {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
            options,
        });
        self
    }

    /// Remove array elements equal to the given value.
    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(Op::Pull(path.into(), value.into()));
        self
    }

    /// Remove array elements matching the given conditions. Conditions are
    /// resolved against the element's mapped class when it has one.
    pub fn pull_matching(
        mut self,
        path: impl Into<String>,
        filters: impl IntoIterator<Item = Filter>,
    ) -> Self {
        self.ops
            .push(Op::PullMatching(path.into(), filters.into_iter().collect()));
        self
    }

    /// Remove all listed values from an array field.
    pub fn pull_all(
        mut self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        self.ops.push(Op::PullAll(
            path.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Add values to an array field, skipping ones already present.
    pub fn add_to_set(
        mut self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        self.ops.push(Op::AddToSet(
            path.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Check whether any operations were recorded.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Resolve paths and build the update document.
    ///
    /// Fails with [`QueryError::EmptyUpdate`] when no operations were added;
    /// an empty update document would replace the whole target document.
    pub fn compile(&self, registry: &Registry) -> QueryResult<Document> {
        if self.ops.is_empty() {
            return Err(QueryError::EmptyUpdate {
                type_name: self.type_name.as_str().to_string(),
            });
        }
        let class = registry.get(&self.type_name).ok_or_else(|| {
            remora_schema::MappingError::unmapped_type(self.type_name.as_str(), "update")
        })?;
        let compiler = FilterCompiler::for_class(registry, class.clone());
        let codec = Codec::new(registry);

        // Operators group in first-use order; paths keep insertion order
        // within each group.
        let mut groups: IndexMap<&'static str, Document> = IndexMap::new();
        for op in &self.ops {
            let clause = groups.entry(op.keyword()).or_default();
            match op {
                Op::Set(path, value)
                | Op::Inc(path, value)
                | Op::Mul(path, value)
                | Op::Min(path, value)
                | Op::Max(path, value)
                | Op::Pull(path, value) => {
                    clause.insert(compiler.resolve(path)?, codec.encode_plain(value)?);
                }
                Op::Unset(path) => {
                    clause.insert(compiler.resolve(path)?, "");
                }
                Op::Rename(path, new_key) => {
                    clause.insert(compiler.resolve(path)?, new_key.clone());
                }
                Op::CurrentDate(path) => {
                    clause.insert(compiler.resolve(path)?, true);
                }
                Op::Push {
                    path,
                    values,
                    options,
                } => {
                    let resolved = compiler.resolve(path)?;
                    if values.len() == 1 && options.is_default() {
                        clause.insert(resolved, codec.encode_plain(&values[0])?);
                    } else {
                        let mut body = Document::new();
                        body.insert("$each", encode_values(&codec, values)?);
                        if let Some(position) = options.position {
                            body.insert("$position", position);
                        }
                        if let Some(slice) = options.slice {
                            body.insert("$slice", slice);
                        }
                        if let Some(sort) = &options.sort {
                            body.insert("$sort", sort.clone());
                        }
                        clause.insert(resolved, body);
                    }
                }
                Op::PullMatching(path, filters) => {
                    let resolved = compiler.resolve(path)?;
                    let element = registry.element_class(&class, path);
                    let inner = match element {
                        Some(element) => FilterCompiler::for_class(registry, element),
                        None => FilterCompiler::reshaped(registry),
                    };
                    clause.insert(resolved, inner.compile(filters)?);
                }
                Op::PullAll(path, values) | Op::AddToSet(path, values) => {
                    let resolved = compiler.resolve(path)?;
                    if matches!(op, Op::AddToSet(..)) && values.len() == 1 {
                        clause.insert(resolved, codec.encode_plain(&values[0])?);
                    } else if matches!(op, Op::AddToSet(..)) {
                        clause.insert(resolved, bson::doc! { "$each": encode_values(&codec, values)? });
                    } else {
                        clause.insert(resolved, encode_values(&codec, values)?);
                    }
                }
            }
        }

        let mut update = Document::new();
        for (keyword, clause) in groups {
            update.insert(keyword, clause);
        }
        debug!(type_name = %self.type_name, operators = update.len(), "compiled update");
        Ok(update)
    }
}

fn encode_values(codec: &Codec<'_>, values: &[Value]) -> QueryResult<Bson> {
    let encoded: Vec<Bson> = values
        .iter()
        .map(|v| codec.encode_plain(v))
        .collect::<Result<_, _>>()?;
    Ok(Bson::Array(encoded))
}
