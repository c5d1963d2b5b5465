//! Aggregation pipelines: ordered stages compiled into stage documents.
//!
//! Stage order is meaningful and preserved exactly. Path resolution applies
//! while the document stream still has the mapped class's shape; once a
//! reshaping stage runs (`$group`, `$project`, `$addFields`, `$lookup`,
//! `$count`), later stages compile permissively against the reshaped stream.

use bson::{Bson, Document};
use remora_schema::{Registry, TypeName};
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::filter::{Filter, FilterCompiler};
use crate::query::Direction;

/// Whether the document stream still has the mapped class's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageContext {
    /// Paths resolve against the mapped class.
    Mapped,
    /// A reshaping stage ran; paths pass through verbatim.
    Reshaped,
}

/// An accumulator expression for `$group`.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// `$sum` of an expression.
    Sum(Bson),
    /// `$avg` of an expression.
    Avg(Bson),
    /// `$min` of an expression.
    Min(Bson),
    /// `$max` of an expression.
    Max(Bson),
    /// `$first` expression in group order.
    First(Bson),
    /// `$last` expression in group order.
    Last(Bson),
    /// `$push` every expression value into an array.
    Push(Bson),
    /// `$addToSet` of distinct expression values.
    AddToSet(Bson),
    /// Shorthand for `$sum: 1`.
    Count,
}

impl Accumulator {
    fn compile(&self, exprs: &ExprResolver<'_, '_>) -> QueryResult<Document> {
        Ok(match self {
            Self::Sum(e) => bson::doc! { "$sum": exprs.resolve(e)? },
            Self::Avg(e) => bson::doc! { "$avg": exprs.resolve(e)? },
            Self::Min(e) => bson::doc! { "$min": exprs.resolve(e)? },
            Self::Max(e) => bson::doc! { "$max": exprs.resolve(e)? },
            Self::First(e) => bson::doc! { "$first": exprs.resolve(e)? },
            Self::Last(e) => bson::doc! { "$last": exprs.resolve(e)? },
            Self::Push(e) => bson::doc! { "$push": exprs.resolve(e)? },
            Self::AddToSet(e) => bson::doc! { "$addToSet": exprs.resolve(e)? },
            Self::Count => bson::doc! { "$sum": 1 },
        })
    }
}

/// A `$geoNear` stage under construction.
///
/// Exactly one point encoding must be set: a legacy coordinate pair or a
/// GeoJSON point. Unset options are omitted from the stage document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoNear {
    /// Legacy coordinate pair.
    pub legacy: Option<[f64; 2]>,
    /// GeoJSON point, as (longitude, latitude).
    pub point: Option<(f64, f64)>,
    /// Output field for the computed distance.
    pub distance_field: String,
    /// Indexed geo field to search, when more than one exists.
    pub key: Option<String>,
    /// Spherical geometry.
    pub spherical: Option<bool>,
    /// Maximum distance, in meters for GeoJSON points.
    pub max_distance: Option<f64>,
    /// Minimum distance.
    pub min_distance: Option<f64>,
    /// Extra filter applied to candidate documents.
    pub query: Vec<Filter>,
    /// Factor applied to every computed distance.
    pub distance_multiplier: Option<f64>,
    /// Output field for the matched point's location.
    pub include_locs: Option<String>,
}

impl GeoNear {
    /// Start a `$geoNear` with the given distance output field.
    pub fn new(distance_field: impl Into<String>) -> Self {
        Self {
            distance_field: distance_field.into(),
            ..Self::default()
        }
    }

    /// Search near a GeoJSON point.
    pub fn near(mut self, longitude: f64, latitude: f64) -> Self {
        self.point = Some((longitude, latitude));
        self
    }

    /// Search near a legacy coordinate pair.
    pub fn near_legacy(mut self, x: f64, y: f64) -> Self {
        self.legacy = Some([x, y]);
        self
    }

    /// Use spherical geometry.
    pub fn spherical(mut self) -> Self {
        self.spherical = Some(true);
        self
    }

    /// Cap the search distance.
    pub fn max_distance(mut self, meters: f64) -> Self {
        self.max_distance = Some(meters);
        self
    }

    fn compile(&self, compiler: &FilterCompiler<'_>) -> QueryResult<Document> {
        let near = match (&self.legacy, &self.point) {
            (Some(pair), None) => Bson::Array(vec![Bson::Double(pair[0]), Bson::Double(pair[1])]),
            (None, Some((lon, lat))) => Bson::Document(bson::doc! {
                "type": "Point",
                "coordinates": [*lon, *lat],
            }),
            _ => return Err(QueryError::AmbiguousGeoPoint),
        };

        let mut stage = bson::doc! {
            "near": near,
            "distanceField": self.distance_field.clone(),
        };
        if let Some(key) = &self.key {
            stage.insert("key", compiler.resolve(key)?);
        }
        if let Some(spherical) = self.spherical {
            stage.insert("spherical", spherical);
        }
        if let Some(max) = self.max_distance {
            stage.insert("maxDistance", max);
        }
        if let Some(min) = self.min_distance {
            stage.insert("minDistance", min);
        }
        if !self.query.is_empty() {
            stage.insert("query", compiler.compile(&self.query)?);
        }
        if let Some(multiplier) = self.distance_multiplier {
            stage.insert("distanceMultiplier", multiplier);
        }
        if let Some(locs) = &self.include_locs {
            stage.insert("includeLocs", locs.clone());
        }
        Ok(stage)
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Filter the stream.
    Match(Vec<Filter>),
    /// Group by an id expression with accumulators. Reshapes the stream.
    Group {
        /// Group key expression; `None` groups the whole stream.
        id: Option<Bson>,
        /// Output fields, in declaration order.
        fields: Vec<(String, Accumulator)>,
    },
    /// Proximity search with computed distances.
    GeoNear(GeoNear),
    /// Left outer join against another mapped type. Reshapes the stream.
    Lookup {
        /// The joined mapped type; its collection name is looked up.
        from: TypeName,
        /// Path in the current stream.
        local_field: String,
        /// Path in the joined type.
        foreign_field: String,
        /// Output array field.
        as_field: String,
    },
    /// Flatten an array field into one document per element.
    Unwind {
        /// The array path.
        path: String,
        /// Keep documents whose array is null, absent, or empty.
        preserve_null_and_empty: bool,
    },
    /// Sort the stream.
    Sort(Vec<(String, Direction)>),
    /// Cap the stream.
    Limit(i64),
    /// Drop leading documents.
    Skip(i64),
    /// Shape output fields. Reshapes the stream.
    Project(Vec<(String, Bson)>),
    /// Replace the stream with a single count document. Reshapes the stream.
    Count(String),
    /// Add computed fields. Reshapes the stream.
    AddFields(Vec<(String, Bson)>),
}

impl Stage {
    /// Whether this stage leaves the stream with a shape other than the
    /// mapped class's.
    pub fn reshapes(&self) -> bool {
        matches!(
            self,
            Self::Group { .. }
                | Self::Lookup { .. }
                | Self::Project(_)
                | Self::Count(_)
                | Self::AddFields(_)
        )
    }
}

/// Resolves `$path` expression references through the current stage context.
struct ExprResolver<'a, 'c> {
    compiler: &'c FilterCompiler<'a>,
}

impl ExprResolver<'_, '_> {
    fn resolve(&self, expr: &Bson) -> QueryResult<Bson> {
        Ok(match expr {
            Bson::String(s) if s.starts_with('$') && !s.starts_with("$$") => {
                Bson::String(format!("${}", self.compiler.resolve(&s[1..])?))
            }
            Bson::Array(items) => Bson::Array(
                items
                    .iter()
                    .map(|item| self.resolve(item))
                    .collect::<QueryResult<_>>()?,
            ),
            Bson::Document(doc) => {
                let mut out = Document::new();
                for (key, value) in doc {
                    out.insert(key.clone(), self.resolve(value)?);
                }
                Bson::Document(out)
            }
            other => other.clone(),
        })
    }
}

/// An aggregation pipeline under construction.
///
/// # Example
///
/// ```rust,ignore
/// let stages = Pipeline::new("blog.Author")
///     .stage(Stage::Match(vec![Filter::gte("age", 18)]))
///     .stage(Stage::Group {
///         id: Some("$name".into()),
///         fields: vec![("total".into(), Accumulator::Count)],
///     })
///     .compile(&registry)?;
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    type_name: TypeName,
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Start a pipeline over the given mapped type's collection.
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage. Stages run in the order they were appended.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// The mapped type this pipeline starts from.
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Compile every stage into its single-key stage document.
    pub fn compile(&self, registry: &Registry) -> QueryResult<Vec<Document>> {
        let class = registry.get(&self.type_name).ok_or_else(|| {
            remora_schema::MappingError::unmapped_type(self.type_name.as_str(), "aggregation")
        })?;

        let mut context = StageContext::Mapped;
        let mut compiled = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let compiler = match context {
                StageContext::Mapped => FilterCompiler::for_class(registry, class.clone()),
                StageContext::Reshaped => FilterCompiler::reshaped(registry),
            };
            compiled.push(self.compile_stage(stage, &compiler, registry)?);
            if stage.reshapes() {
                context = StageContext::Reshaped;
            }
        }
        debug!(type_name = %self.type_name, stages = compiled.len(), "compiled pipeline");
        Ok(compiled)
    }

    fn compile_stage(
        &self,
        stage: &Stage,
        compiler: &FilterCompiler<'_>,
        registry: &Registry,
    ) -> QueryResult<Document> {
        let exprs = ExprResolver { compiler };
        Ok(match stage {
            Stage::Match(filters) => bson::doc! { "$match": compiler.compile(filters)? },
            Stage::Group { id, fields } => {
                let mut body = Document::new();
                body.insert(
                    "_id",
                    match id {
                        Some(expr) => exprs.resolve(expr)?,
                        None => Bson::Null,
                    },
                );
                for (name, accumulator) in fields {
                    body.insert(name.clone(), accumulator.compile(&exprs)?);
                }
                bson::doc! { "$group": body }
            }
            Stage::GeoNear(geo) => bson::doc! { "$geoNear": geo.compile(compiler)? },
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => {
                let target = registry.get(from).ok_or_else(|| {
                    remora_schema::MappingError::unmapped_type(from.as_str(), "lookup")
                })?;
                let collection = target.collection().ok_or_else(|| QueryError::NoCollection {
                    type_name: from.as_str().to_string(),
                })?;
                let foreign_compiler = FilterCompiler::for_class(registry, target.clone());
                bson::doc! {
                    "$lookup": {
                        "from": collection,
                        "localField": compiler.resolve(local_field)?,
                        "foreignField": foreign_compiler.resolve(foreign_field)?,
                        "as": as_field.clone(),
                    }
                }
            }
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => {
                let resolved = format!("${}", compiler.resolve(path)?);
                if *preserve_null_and_empty {
                    bson::doc! {
                        "$unwind": { "path": resolved, "preserveNullAndEmptyArrays": true }
                    }
                } else {
                    bson::doc! { "$unwind": resolved }
                }
            }
            Stage::Sort(keys) => {
                let mut body = Document::new();
                for (path, direction) in keys {
                    body.insert(compiler.resolve(path)?, direction.as_i32());
                }
                bson::doc! { "$sort": body }
            }
            Stage::Limit(n) => bson::doc! { "$limit": *n },
            Stage::Skip(n) => bson::doc! { "$skip": *n },
            Stage::Project(fields) => {
                let mut body = Document::new();
                for (path, spec) in fields {
                    body.insert(compiler.resolve(path)?, exprs.resolve(spec)?);
                }
                bson::doc! { "$project": body }
            }
            Stage::Count(field) => bson::doc! { "$count": field.clone() },
            Stage::AddFields(fields) => {
                let mut body = Document::new();
                for (name, expr) in fields {
                    body.insert(name.clone(), exprs.resolve(expr)?);
                }
                bson::doc! { "$addFields": body }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use remora_schema::{FieldShape, MappedClass, MappedField, ScalarKind, object_id_field};

    fn registry() -> Registry {
        let registry = Registry::with_defaults();
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
                        "tags",
                        FieldShape::list(FieldShape::scalar(ScalarKind::String)),
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                MappedClass::builder("blog.Post")
                    .id(object_id_field())
                    .field(MappedField::new("author", FieldShape::reference("blog.Author")))
                    .field(MappedField::new("title", FieldShape::scalar(ScalarKind::String)))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_stage_order_preserved() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::Match(vec![Filter::gte("age", 18i32)]))
            .stage(Stage::Sort(vec![("name".into(), Direction::Asc)]))
            .stage(Stage::Limit(5))
            .compile(&registry)
            .unwrap();
        assert_eq!(
            stages,
            vec![
                doc! { "$match": { "age": { "$gte": 18 } } },
                doc! { "$sort": { "n": 1 } },
                doc! { "$limit": 5i64 },
            ]
        );
    }

    #[test]
    fn test_each_stage_has_single_key() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::Match(vec![Filter::eq("name", "Ada")]))
            .stage(Stage::Count("total".into()))
            .compile(&registry)
            .unwrap();
        for stage in &stages {
            assert_eq!(stage.len(), 1);
        }
    }

    #[test]
    fn test_group_resolves_field_refs() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::Group {
                id: Some(Bson::String("$name".into())),
                fields: vec![
                    ("total".into(), Accumulator::Count),
                    ("oldest".into(), Accumulator::Max(Bson::String("$age".into()))),
                ],
            })
            .compile(&registry)
            .unwrap();
        assert_eq!(
            stages,
            vec![doc! {
                "$group": { "_id": "$n", "total": { "$sum": 1 }, "oldest": { "$max": "$age" } }
            }]
        );
    }

    #[test]
    fn test_match_after_group_is_reshaped() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::Group {
                id: Some(Bson::String("$name".into())),
                fields: vec![("total".into(), Accumulator::Count)],
            })
            // After $group the stream no longer has author fields; `name`
            // must pass through without renaming.
            .stage(Stage::Match(vec![Filter::gt("total", 1i32)]))
            .compile(&registry)
            .unwrap();
        assert_eq!(stages[1], doc! { "$match": { "total": { "$gt": 1 } } });
    }

    #[test]
    fn test_unwind_forms() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::Unwind {
                path: "tags".into(),
                preserve_null_and_empty: false,
            })
            .stage(Stage::Unwind {
                path: "tags".into(),
                preserve_null_and_empty: true,
            })
            .compile(&registry)
            .unwrap();
        assert_eq!(stages[0], doc! { "$unwind": "$tags" });
        assert_eq!(
            stages[1],
            doc! { "$unwind": { "path": "$tags", "preserveNullAndEmptyArrays": true } }
        );
    }

    #[test]
    fn test_lookup_resolves_both_sides() {
        let registry = registry();
        let stages = Pipeline::new("blog.Post")
            .stage(Stage::Lookup {
                from: "blog.Author".into(),
                local_field: "author".into(),
                foreign_field: "id".into(),
                as_field: "authors".into(),
            })
            .compile(&registry)
            .unwrap();
        assert_eq!(
            stages,
            vec![doc! {
                "$lookup": {
                    "from": "author",
                    "localField": "author",
                    "foreignField": "_id",
                    "as": "authors",
                }
            }]
        );
    }

    #[test]
    fn test_project_switches_context() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::Project(vec![
                ("name".into(), Bson::Int32(1)),
                ("age".into(), Bson::Int32(1)),
            ]))
            .stage(Stage::Match(vec![Filter::eq("name", "Ada")]))
            .compile(&registry)
            .unwrap();
        assert_eq!(stages[0], doc! { "$project": { "n": 1, "age": 1 } });
        // The projected stream keeps the storage keys it was given.
        assert_eq!(stages[1], doc! { "$match": { "name": "Ada" } });
    }

    // ==================== GeoNear Tests ====================

    #[test]
    fn test_geo_near_omits_unset_options() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::GeoNear(
                GeoNear::new("distance").near(2.29, 48.85).spherical(),
            ))
            .compile(&registry)
            .unwrap();
        assert_eq!(
            stages,
            vec![doc! {
                "$geoNear": {
                    "near": { "type": "Point", "coordinates": [2.29, 48.85] },
                    "distanceField": "distance",
                    "spherical": true,
                }
            }]
        );
    }

    #[test]
    fn test_geo_near_legacy_pair() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::GeoNear(
                GeoNear::new("distance").near_legacy(2.29, 48.85).max_distance(1000.0),
            ))
            .compile(&registry)
            .unwrap();
        assert_eq!(
            stages,
            vec![doc! {
                "$geoNear": {
                    "near": [2.29, 48.85],
                    "distanceField": "distance",
                    "maxDistance": 1000.0,
                }
            }]
        );
    }

    #[test]
    fn test_geo_near_requires_exactly_one_point() {
        let registry = registry();
        let none = Pipeline::new("blog.Author")
            .stage(Stage::GeoNear(GeoNear::new("distance")))
            .compile(&registry)
            .unwrap_err();
        assert!(matches!(none, QueryError::AmbiguousGeoPoint));

        let both = Pipeline::new("blog.Author")
            .stage(Stage::GeoNear(
                GeoNear::new("distance").near(1.0, 2.0).near_legacy(1.0, 2.0),
            ))
            .compile(&registry)
            .unwrap_err();
        assert!(matches!(both, QueryError::AmbiguousGeoPoint));
    }

    #[test]
    fn test_geo_near_query_resolves_paths() {
        let registry = registry();
        let stages = Pipeline::new("blog.Author")
            .stage(Stage::GeoNear({
                let mut geo = GeoNear::new("distance").near(0.0, 0.0);
                geo.query = vec![Filter::eq("name", "Ada")];
                geo
            }))
            .compile(&registry)
            .unwrap();
        let geo = stages[0].get_document("$geoNear").unwrap();
        assert_eq!(geo.get_document("query").unwrap(), &doc! { "n": "Ada" });
    }
}
