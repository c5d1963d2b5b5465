//! Filter types and their compilation into filter documents.
//!
//! A [`Filter`] is a structured condition on logical field paths. Compilation
//! resolves each path against the mapped class (applying storage renames),
//! encodes literal values through the codec layer, and merges sibling
//! conditions into one implicit-AND document, escalating to an explicit
//! `$and` when two conditions target the same key.

use bson::{Bson, Document};
use remora_codec::{Codec, Value};
use remora_schema::{MappedClass, Registry};
use std::sync::Arc;
use tracing::trace;

use crate::error::{QueryError, QueryResult};

/// A single structured filter condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Equality on a path.
    Eq(String, Value),
    /// Inequality on a path.
    Ne(String, Value),
    /// Greater-than.
    Gt(String, Value),
    /// Greater-than-or-equal.
    Gte(String, Value),
    /// Less-than.
    Lt(String, Value),
    /// Less-than-or-equal.
    Lte(String, Value),
    /// Membership in a literal list.
    In(String, Vec<Value>),
    /// Non-membership in a literal list.
    Nin(String, Vec<Value>),
    /// Key presence or absence.
    Exists(String, bool),
    /// BSON type check, by type alias.
    Type(String, String),
    /// Regular-expression match.
    Regex {
        /// Logical field path.
        path: String,
        /// The pattern source.
        pattern: String,
        /// Option flags, e.g. `i`.
        options: String,
    },
    /// Array length check.
    Size(String, i32),
    /// Array contains all of the given values.
    All(String, Vec<Value>),
    /// At least one array element matches all inner conditions. Inner paths
    /// are resolved against the element's mapped class when the path leads
    /// to an embedded element type.
    ElemMatch(String, Vec<Filter>),
    /// Negation of a single path condition. The inner filter must itself be
    /// a path condition; use [`Filter::Nor`] to negate logical combinations.
    Not(Box<Filter>),
    /// All inner filters hold.
    And(Vec<Filter>),
    /// At least one inner filter holds.
    Or(Vec<Filter>),
    /// No inner filter holds.
    Nor(Vec<Filter>),
    /// Full-text search over the collection's text index.
    Text {
        /// The search string.
        search: String,
        /// Optional language override.
        language: Option<String>,
    },
    /// A raw filter document passed through without path resolution.
    Raw(Document),
}

impl Filter {
    /// Equality shorthand.
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(path.into(), value.into())
    }

    /// Inequality shorthand.
    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(path.into(), value.into())
    }

    /// Greater-than shorthand.
    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(path.into(), value.into())
    }

    /// Greater-than-or-equal shorthand.
    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(path.into(), value.into())
    }

    /// Less-than shorthand.
    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(path.into(), value.into())
    }

    /// Less-than-or-equal shorthand.
    pub fn lte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(path.into(), value.into())
    }

    /// Membership shorthand.
    pub fn in_list(
        path: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        Self::In(path.into(), values.into_iter().map(Into::into).collect())
    }

    /// Non-membership shorthand.
    pub fn nin(
        path: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        Self::Nin(path.into(), values.into_iter().map(Into::into).collect())
    }

    /// Key-presence shorthand.
    pub fn exists(path: impl Into<String>, exists: bool) -> Self {
        Self::Exists(path.into(), exists)
    }

    /// Regex shorthand without option flags.
    pub fn regex(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Regex {
            path: path.into(),
            pattern: pattern.into(),
            options: String::new(),
        }
    }

    /// Array-contains-all shorthand.
    pub fn all(
        path: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        Self::All(path.into(), values.into_iter().map(Into::into).collect())
    }

    /// Element-match shorthand.
    pub fn elem_match(path: impl Into<String>, filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::ElemMatch(path.into(), filters.into_iter().collect())
    }

    /// Text-search shorthand.
    pub fn text(search: impl Into<String>) -> Self {
        Self::Text {
            search: search.into(),
            language: None,
        }
    }

    /// The path this condition targets, when it targets exactly one.
    fn path(&self) -> Option<&str> {
        match self {
            Self::Eq(p, _)
            | Self::Ne(p, _)
            | Self::Gt(p, _)
            | Self::Gte(p, _)
            | Self::Lt(p, _)
            | Self::Lte(p, _)
            | Self::In(p, _)
            | Self::Nin(p, _)
            | Self::Exists(p, _)
            | Self::Type(p, _)
            | Self::Size(p, _)
            | Self::All(p, _)
            | Self::ElemMatch(p, _) => Some(p),
            Self::Regex { path, .. } => Some(path),
            Self::Not(inner) => inner.path(),
            _ => None,
        }
    }
}

/// Compiles filters against one mapped class, or permissively against a
/// reshaped document stream with no class at all.
#[derive(Clone)]
pub struct FilterCompiler<'a> {
    registry: &'a Registry,
    class: Option<Arc<MappedClass>>,
    strict: bool,
}

impl<'a> FilterCompiler<'a> {
    /// A compiler for the given class, honoring the registry's configured
    /// path-validation mode.
    pub fn for_class(registry: &'a Registry, class: Arc<MappedClass>) -> Self {
        let strict = registry.options().is_strict();
        Self {
            registry,
            class: Some(class),
            strict,
        }
    }

    /// A permissive compiler with no class: every path passes through
    /// verbatim. Used after a pipeline stage reshapes the document stream.
    pub fn reshaped(registry: &'a Registry) -> Self {
        Self {
            registry,
            class: None,
            strict: false,
        }
    }

    /// Compile a filter list into one filter document.
    ///
    /// Sibling conditions merge into an implicit AND; when two conditions
    /// compile to the same top-level key, the whole list escalates to an
    /// explicit `$and` array instead of silently dropping one side.
    pub fn compile(&self, filters: &[Filter]) -> QueryResult<Document> {
        let compiled: Vec<Document> = filters
            .iter()
            .map(|f| self.compile_one(f))
            .collect::<QueryResult<_>>()?;

        let mut merged = Document::new();
        let mut collision = false;
        'merge: for doc in &compiled {
            for key in doc.keys() {
                if merged.contains_key(key) {
                    trace!(key = %key, "filter key collision, escalating to $and");
                    collision = true;
                    break 'merge;
                }
            }
            for (key, value) in doc {
                merged.insert(key.clone(), value.clone());
            }
        }
        if collision {
            let parts: Vec<Bson> = compiled.into_iter().map(Bson::Document).collect();
            return Ok(bson::doc! { "$and": parts });
        }
        Ok(merged)
    }

    fn compile_one(&self, filter: &Filter) -> QueryResult<Document> {
        let codec = Codec::new(self.registry);
        let path_op = |path: &str, op: &str, value: Bson| -> QueryResult<Document> {
            let resolved = self.resolve(path)?;
            Ok(bson::doc! { resolved: { op: value } })
        };

        match filter {
            Filter::Eq(path, value) => {
                let resolved = self.resolve(path)?;
                Ok(bson::doc! { resolved: codec.encode_plain(value)? })
            }
            Filter::Ne(path, value) => path_op(path, "$ne", codec.encode_plain(value)?),
            Filter::Gt(path, value) => path_op(path, "$gt", codec.encode_plain(value)?),
            Filter::Gte(path, value) => path_op(path, "$gte", codec.encode_plain(value)?),
            Filter::Lt(path, value) => path_op(path, "$lt", codec.encode_plain(value)?),
            Filter::Lte(path, value) => path_op(path, "$lte", codec.encode_plain(value)?),
            Filter::In(path, values) => path_op(path, "$in", self.encode_list(values)?),
            Filter::Nin(path, values) => path_op(path, "$nin", self.encode_list(values)?),
            Filter::Exists(path, exists) => path_op(path, "$exists", Bson::Boolean(*exists)),
            Filter::Type(path, alias) => path_op(path, "$type", Bson::String(alias.clone())),
            Filter::Regex {
                path,
                pattern,
                options,
            } => {
                let resolved = self.resolve(path)?;
                Ok(bson::doc! {
                    resolved: Bson::RegularExpression(bson::Regex {
                        pattern: pattern.clone(),
                        options: options.clone(),
                    })
                })
            }
            Filter::Size(path, size) => path_op(path, "$size", Bson::Int32(*size)),
            Filter::All(path, values) => path_op(path, "$all", self.encode_list(values)?),
            Filter::ElemMatch(path, inner) => {
                let resolved = self.resolve(path)?;
                // Inner paths are relative to the element type, when it has
                // a mapped class of its own.
                let element = self
                    .class
                    .as_deref()
                    .and_then(|class| self.registry.element_class(class, path));
                let inner_compiler = match element {
                    Some(class) => Self {
                        registry: self.registry,
                        class: Some(class),
                        strict: self.strict,
                    },
                    None => Self::reshaped(self.registry),
                };
                let body = inner_compiler.compile(inner)?;
                Ok(bson::doc! { resolved: { "$elemMatch": body } })
            }
            Filter::Not(inner) => {
                let path = inner.path().ok_or_else(|| {
                    QueryError::unknown_path(self.type_name(), "$not requires a path condition")
                })?;
                let resolved = self.resolve(path)?;
                let compiled = self.compile_one(inner)?;
                let body = match compiled.get(&resolved) {
                    Some(Bson::Document(ops)) => ops.clone(),
                    Some(other) => bson::doc! { "$eq": other.clone() },
                    None => Document::new(),
                };
                Ok(bson::doc! { resolved: { "$not": body } })
            }
            Filter::And(inner) => self.logical("$and", inner),
            Filter::Or(inner) => self.logical("$or", inner),
            Filter::Nor(inner) => self.logical("$nor", inner),
            Filter::Text { search, language } => {
                let mut text = bson::doc! { "$search": search.clone() };
                if let Some(language) = language {
                    text.insert("$language", language.clone());
                }
                Ok(bson::doc! { "$text": text })
            }
            Filter::Raw(doc) => Ok(doc.clone()),
        }
    }

    fn logical(&self, op: &str, inner: &[Filter]) -> QueryResult<Document> {
        let parts: Vec<Bson> = inner
            .iter()
            .map(|f| self.compile_one(f).map(Bson::Document))
            .collect::<QueryResult<_>>()?;
        Ok(bson::doc! { op: parts })
    }

    fn encode_list(&self, values: &[Value]) -> QueryResult<Bson> {
        let codec = Codec::new(self.registry);
        let encoded: Vec<Bson> = values
            .iter()
            .map(|v| codec.encode_plain(v))
            .collect::<Result<_, _>>()?;
        Ok(Bson::Array(encoded))
    }

    pub(crate) fn resolve(&self, path: &str) -> QueryResult<String> {
        let Some(class) = self.class.as_deref() else {
            return Ok(path.to_string());
        };
        match self.registry.resolve_path(class, path) {
            Ok(resolved) => Ok(resolved),
            Err(err) if err.is_unknown_field() && !self.strict => Ok(path.to_string()),
            Err(err) if err.is_unknown_field() => {
                Err(QueryError::unknown_path(self.type_name(), path))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn type_name(&self) -> String {
        self.class
            .as_deref()
            .map(|c| c.type_name.as_str().to_string())
            .unwrap_or_default()
    }
}

/// Compare two filter documents for logical equivalence.
///
/// Document key order is ignored at every level, and the arrays under
/// logical operators (`$and`, `$or`, `$nor`, `$in`, `$nin`, `$all`) compare
/// as unordered multisets. All other arrays stay order-sensitive, which is
/// what keeps pipelines out of this helper's reach.
pub fn filters_equivalent(a: &Document, b: &Document) -> bool {
    docs_equivalent(a, b)
}

fn docs_equivalent(a: &Document, b: &Document) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(key, va)| {
        b.get(key)
            .is_some_and(|vb| values_equivalent(key, va, vb))
    })
}

fn values_equivalent(key: &str, a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Document(da), Bson::Document(db)) => docs_equivalent(da, db),
        (Bson::Array(xa), Bson::Array(xb)) => {
            if xa.len() != xb.len() {
                return false;
            }
            if matches!(key, "$and" | "$or" | "$nor" | "$in" | "$nin" | "$all") {
                unordered_equivalent(xa, xb)
            } else {
                xa.iter()
                    .zip(xb)
                    .all(|(va, vb)| values_equivalent("", va, vb))
            }
        }
        _ => a == b,
    }
}

fn unordered_equivalent(a: &[Bson], b: &[Bson]) -> bool {
    let mut remaining: Vec<&Bson> = b.iter().collect();
    for va in a {
        let Some(pos) = remaining.iter().position(|vb| values_equivalent("", va, vb)) else {
            return false;
        };
        remaining.swap_remove(pos);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use remora_schema::{
        FieldShape, MappedClass, MappedField, MapperOptions, PathValidation, ScalarKind,
        object_id_field,
    };

    fn registry() -> Registry {
        let registry = Registry::with_defaults();
        map_author(&registry);
        registry
    }

    fn map_author(registry: &Registry) {
        registry
            .register(
                MappedClass::builder("blog.Address")
                    .embeddable()
                    .field(
                        MappedField::new("street", FieldShape::scalar(ScalarKind::String))
                            .stored_as("st"),
                    )
                    .field(MappedField::new("city", FieldShape::scalar(ScalarKind::String)))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                MappedClass::builder("blog.Author")
                    .id(object_id_field())
                    .field(
                        MappedField::new("name", FieldShape::scalar(ScalarKind::String))
                            .stored_as("n"),
                    )
                    .field(MappedField::new("age", FieldShape::scalar(ScalarKind::Int32)))
                    .field(MappedField::new(
                        "addresses",
                        FieldShape::list(FieldShape::embedded("blog.Address")),
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }

    fn compiler(registry: &Registry) -> FilterCompiler<'_> {
        let class = registry.get(&"blog.Author".into()).unwrap();
        FilterCompiler::for_class(registry, class)
    }

    // ==================== Compilation Tests ====================

    #[test]
    fn test_eq_resolves_storage_name() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::eq("name", "Ada")])
            .unwrap();
        assert_eq!(doc, doc! { "n": "Ada" });
    }

    #[test]
    fn test_nested_path_renamed_each_level() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::eq("addresses.street", "Main St")])
            .unwrap();
        assert_eq!(doc, doc! { "addresses.st": "Main St" });
    }

    #[test]
    fn test_comparison_operators() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::gte("age", 18i32), Filter::lt("name", "M")])
            .unwrap();
        assert_eq!(doc, doc! { "age": { "$gte": 18 }, "n": { "$lt": "M" } });
    }

    #[test]
    fn test_implicit_and_escalates_on_collision() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::gte("age", 18i32), Filter::lt("age", 65i32)])
            .unwrap();
        assert_eq!(
            doc,
            doc! { "$and": [ { "age": { "$gte": 18 } }, { "age": { "$lt": 65 } } ] }
        );
    }

    #[test]
    fn test_in_and_exists() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[
                Filter::in_list("name", ["Ada", "Grace"]),
                Filter::exists("age", true),
            ])
            .unwrap();
        assert_eq!(
            doc,
            doc! { "n": { "$in": ["Ada", "Grace"] }, "age": { "$exists": true } }
        );
    }

    #[test]
    fn test_or_resolves_paths_inside() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::Or(vec![
                Filter::eq("name", "Ada"),
                Filter::gt("age", 99i32),
            ])])
            .unwrap();
        assert_eq!(
            doc,
            doc! { "$or": [ { "n": "Ada" }, { "age": { "$gt": 99 } } ] }
        );
    }

    #[test]
    fn test_not_wraps_operator_body() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::Not(Box::new(Filter::gt("age", 40i32)))])
            .unwrap();
        assert_eq!(doc, doc! { "age": { "$not": { "$gt": 40 } } });
    }

    #[test]
    fn test_not_on_equality() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::Not(Box::new(Filter::eq("name", "Ada")))])
            .unwrap();
        assert_eq!(doc, doc! { "n": { "$not": { "$eq": "Ada" } } });
    }

    #[test]
    fn test_elem_match_resolves_against_element_class() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::elem_match(
                "addresses",
                [Filter::eq("street", "Main St"), Filter::eq("city", "Paris")],
            )])
            .unwrap();
        assert_eq!(
            doc,
            doc! { "addresses": { "$elemMatch": { "st": "Main St", "city": "Paris" } } }
        );
    }

    #[test]
    fn test_regex_compiles_to_bson_regex() {
        let registry = registry();
        let doc = compiler(&registry)
            .compile(&[Filter::Regex {
                path: "name".into(),
                pattern: "^A".into(),
                options: "i".into(),
            }])
            .unwrap();
        let Some(Bson::RegularExpression(regex)) = doc.get("n") else {
            panic!("expected a regex under the storage name");
        };
        assert_eq!(regex.pattern, "^A");
        assert_eq!(regex.options, "i");
    }

    #[test]
    fn test_text_search() {
        let registry = registry();
        let doc = compiler(&registry).compile(&[Filter::text("wizard")]).unwrap();
        assert_eq!(doc, doc! { "$text": { "$search": "wizard" } });
    }

    // ==================== Path Validation Tests ====================

    #[test]
    fn test_strict_rejects_unknown_path() {
        let registry = registry();
        let err = compiler(&registry)
            .compile(&[Filter::eq("namr", "typo")])
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownPath { .. }));
    }

    #[test]
    fn test_permissive_passes_unknown_path() {
        let registry = Registry::new(
            MapperOptions::builder()
                .path_validation(PathValidation::Permissive)
                .build(),
        );
        map_author(&registry);
        let doc = compiler(&registry)
            .compile(&[Filter::eq("namr", "typo"), Filter::eq("name", "Ada")])
            .unwrap();
        // The unknown path goes through verbatim; the known one still renames.
        assert_eq!(doc, doc! { "namr": "typo", "n": "Ada" });
    }

    #[test]
    fn test_reshaped_compiler_never_renames() {
        let registry = registry();
        let doc = FilterCompiler::reshaped(&registry)
            .compile(&[Filter::eq("name", "Ada")])
            .unwrap();
        assert_eq!(doc, doc! { "name": "Ada" });
    }

    // ==================== Equivalence Tests ====================

    #[test]
    fn test_equivalence_ignores_key_order() {
        let a = doc! { "n": "Ada", "age": { "$gte": 18 } };
        let b = doc! { "age": { "$gte": 18 }, "n": "Ada" };
        assert!(filters_equivalent(&a, &b));
    }

    #[test]
    fn test_equivalence_ignores_logical_array_order() {
        let a = doc! { "$or": [ { "n": "Ada" }, { "age": 1 } ] };
        let b = doc! { "$or": [ { "age": 1 }, { "n": "Ada" } ] };
        assert!(filters_equivalent(&a, &b));
    }

    #[test]
    fn test_equivalence_detects_difference() {
        let a = doc! { "n": "Ada" };
        let b = doc! { "n": "Grace" };
        assert!(!filters_equivalent(&a, &b));
        assert!(!filters_equivalent(&a, &doc! { "n": "Ada", "age": 1 }));
    }

    #[test]
    fn test_equivalence_keeps_plain_arrays_ordered() {
        let a = doc! { "tags": [1, 2] };
        let b = doc! { "tags": [2, 1] };
        assert!(!filters_equivalent(&a, &b));
    }
}
