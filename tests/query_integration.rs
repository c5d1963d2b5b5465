//! Integration tests for the query layer.
//!
//! Covers filter compilation against renamed fields, pipeline ordering,
//! strict and permissive path validation, and the datastore facade over a
//! recording driver.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use remora::prelude::*;
use remora::query::{CompiledQuery, QueryError, QueryResult, filters_equivalent};
use remora::schema::{PathValidation, object_id_field};
use std::sync::Arc;

fn registry() -> Arc<Registry> {
    let registry = Registry::with_defaults();
    map_types(&registry);
    Arc::new(registry)
}

fn map_types(registry: &Registry) {
    registry
        .register(
            MappedClass::builder("blog.Comment")
                .embeddable()
                .field(
                    MappedField::new("author_name", FieldShape::scalar(ScalarKind::String))
                        .stored_as("an"),
                )
                .field(MappedField::new("stars", FieldShape::scalar(ScalarKind::Int32)))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            MappedClass::builder("blog.Post")
                .id(object_id_field())
                .field(
                    MappedField::new("title", FieldShape::scalar(ScalarKind::String))
                        .stored_as("t"),
                )
                .field(MappedField::new("views", FieldShape::scalar(ScalarKind::Int64)))
                .field(MappedField::new(
                    "comments",
                    FieldShape::list(FieldShape::embedded("blog.Comment")),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
}

#[test]
fn test_filters_compile_to_storage_names() {
    let registry = registry();
    let compiled = FindQuery::new("blog.Post")
        .filter(Filter::eq("title", "Hello"))
        .filter(Filter::gte("views", 100i64))
        .compile(&registry)
        .unwrap();
    assert_eq!(compiled.collection, "post");
    assert_eq!(compiled.filter, doc! { "t": "Hello", "views": { "$gte": 100i64 } });
}

#[test]
fn test_embedded_path_renames_each_level() {
    let registry = registry();
    let compiled = FindQuery::new("blog.Post")
        .filter(Filter::eq("comments.author_name", "Ada"))
        .compile(&registry)
        .unwrap();
    assert_eq!(compiled.filter, doc! { "comments.an": "Ada" });
}

#[test]
fn test_filter_order_insensitive_pipeline_order_sensitive() {
    let registry = registry();
    let a = FindQuery::new("blog.Post")
        .filter(Filter::eq("title", "Hello"))
        .filter(Filter::gte("views", 100i64))
        .compile(&registry)
        .unwrap();
    let b = FindQuery::new("blog.Post")
        .filter(Filter::gte("views", 100i64))
        .filter(Filter::eq("title", "Hello"))
        .compile(&registry)
        .unwrap();
    // The two filter documents differ only in key order.
    assert!(filters_equivalent(&a.filter, &b.filter));

    let p1 = Pipeline::new("blog.Post")
        .stage(Stage::Match(vec![Filter::gte("views", 100i64)]))
        .stage(Stage::Limit(5))
        .compile(&registry)
        .unwrap();
    let p2 = Pipeline::new("blog.Post")
        .stage(Stage::Limit(5))
        .stage(Stage::Match(vec![Filter::gte("views", 100i64)]))
        .compile(&registry)
        .unwrap();
    // Same stages, different order, different pipelines.
    assert_ne!(p1, p2);
}

#[test]
fn test_strict_vs_permissive_paths() {
    let strict = registry();
    let err = FindQuery::new("blog.Post")
        .filter(Filter::eq("tittle", "typo"))
        .compile(&strict)
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownPath { .. }));

    let permissive = Registry::new(
        MapperOptions::builder()
            .path_validation(PathValidation::Permissive)
            .build(),
    );
    map_types(&permissive);
    let compiled = FindQuery::new("blog.Post")
        .filter(Filter::eq("tittle", "typo"))
        .filter(Filter::eq("title", "Hello"))
        .compile(&permissive)
        .unwrap();
    assert_eq!(compiled.filter, doc! { "tittle": "typo", "t": "Hello" });
}

#[test]
fn test_update_groups_operators() {
    let registry = registry();
    let update = UpdateBuilder::new("blog.Post")
        .set("title", "Hello again")
        .inc("views", 1i64)
        .compile(&registry)
        .unwrap();
    assert_eq!(
        update,
        doc! { "$set": { "t": "Hello again" }, "$inc": { "views": 1i64 } }
    );
}

#[test]
fn test_geo_near_stage_shape() {
    let registry = registry();
    let stages = Pipeline::new("blog.Post")
        .stage(Stage::GeoNear(
            GeoNear::new("distance").near(2.3522, 48.8566).spherical(),
        ))
        .stage(Stage::Limit(3))
        .compile(&registry)
        .unwrap();

    // One key per stage document.
    assert!(stages.iter().all(|s| s.len() == 1));
    assert_eq!(
        stages[0],
        doc! {
            "$geoNear": {
                "near": { "type": "Point", "coordinates": [2.3522, 48.8566] },
                "distanceField": "distance",
                "spherical": true,
            }
        }
    );
}

#[test]
fn test_group_then_match_uses_reshaped_paths() {
    let registry = registry();
    let stages = Pipeline::new("blog.Post")
        .stage(Stage::Group {
            id: Some(Bson::String("$title".into())),
            fields: vec![("total".into(), Accumulator::Count)],
        })
        .stage(Stage::Match(vec![Filter::gt("total", 1i32)]))
        .compile(&registry)
        .unwrap();
    assert_eq!(stages[0], doc! { "$group": { "_id": "$t", "total": { "$sum": 1 } } });
    assert_eq!(stages[1], doc! { "$match": { "total": { "$gt": 1 } } });
}

// ==================== Datastore Tests ====================

#[derive(Default)]
struct RecordingDriver {
    inserted: Mutex<Vec<(String, Document)>>,
    find_results: Mutex<Vec<Document>>,
    last_find: Mutex<Option<CompiledQuery>>,
    last_update: Mutex<Option<(String, Document, Document)>>,
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn insert_one(
        &self,
        collection: &str,
        doc: Document,
        _options: Document,
    ) -> QueryResult<Bson> {
        let id = doc.get("_id").cloned().unwrap_or(Bson::ObjectId(ObjectId::new()));
        self.inserted.lock().push((collection.to_string(), doc));
        Ok(id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
        options: Document,
    ) -> QueryResult<Vec<Bson>> {
        let mut ids = Vec::new();
        for doc in docs {
            ids.push(self.insert_one(collection, doc, options.clone()).await?);
        }
        Ok(ids)
    }

    async fn find(&self, query: &CompiledQuery) -> QueryResult<Vec<Document>> {
        *self.last_find.lock() = Some(query.clone());
        Ok(self.find_results.lock().clone())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        _options: Document,
    ) -> QueryResult<u64> {
        *self.last_update.lock() = Some((collection.to_string(), filter, update));
        Ok(1)
    }

    async fn aggregate(&self, _collection: &str, _stages: Vec<Document>) -> QueryResult<Vec<Document>> {
        Ok(vec![doc! { "_id": "Hello", "total": 2 }])
    }

    async fn find_and_modify(
        &self,
        _collection: &str,
        _filter: Document,
        _update: Document,
        _options: &ModifyOptions,
    ) -> QueryResult<Option<Document>> {
        Ok(self.find_results.lock().first().cloned())
    }

    async fn create_collection(&self, _name: &str, _options: Document) -> QueryResult<()> {
        Ok(())
    }

    async fn run_command(&self, _command: Document) -> QueryResult<Document> {
        Ok(doc! { "ok": 1 })
    }
}

#[tokio::test]
async fn test_save_and_find_roundtrip_through_driver() {
    let registry = registry();
    let store = Datastore::new(registry.clone(), RecordingDriver::default());

    let id = ObjectId::new();
    let post = Value::Object(
        ObjectValue::new("blog.Post")
            .with("id", id)
            .with("title", "Hello")
            .with("views", 7i64),
    );
    let saved_id = store.save(&post).await.unwrap();
    assert_eq!(saved_id, Value::ObjectId(id));

    {
        let inserted = store.driver().inserted.lock();
        let (collection, doc) = &inserted[0];
        assert_eq!(collection, "post");
        assert_eq!(doc.get_str("t").unwrap(), "Hello");
        // Hand the stored document back for the find below.
        *store.driver().find_results.lock() = vec![doc.clone()];
    }

    let found = store
        .find(&FindQuery::new("blog.Post").filter(Filter::eq("title", "Hello")))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let obj = found[0].as_object().unwrap();
    assert_eq!(obj.get("title"), Some(&Value::String("Hello".into())));
    assert_eq!(obj.get("views"), Some(&Value::Int64(7)));

    let query = store.driver().last_find.lock().clone().unwrap();
    assert_eq!(query.filter, doc! { "t": "Hello" });
}

#[tokio::test]
async fn test_update_through_datastore() {
    let registry = registry();
    let store = Datastore::new(registry, RecordingDriver::default());
    let modified = store
        .update(
            &"blog.Post".into(),
            &[Filter::lt("views", 10i64)],
            &UpdateBuilder::new("blog.Post").inc("views", 1i64),
        )
        .await
        .unwrap();
    assert_eq!(modified, 1);

    let (collection, filter, update) = store.driver().last_update.lock().clone().unwrap();
    assert_eq!(collection, "post");
    assert_eq!(filter, doc! { "views": { "$lt": 10i64 } });
    assert_eq!(update, doc! { "$inc": { "views": 1i64 } });
}

#[tokio::test]
async fn test_aggregate_returns_reshaped_documents() {
    let registry = registry();
    let store = Datastore::new(registry, RecordingDriver::default());
    let results = store
        .aggregate(
            &Pipeline::new("blog.Post").stage(Stage::Group {
                id: Some(Bson::String("$title".into())),
                fields: vec![("total".into(), Accumulator::Count)],
            }),
        )
        .await
        .unwrap();
    assert_eq!(results, vec![doc! { "_id": "Hello", "total": 2 }]);
}

#[tokio::test]
async fn test_fetch_reference_two_phase() {
    let registry = Registry::with_defaults();
    registry
        .register(
            MappedClass::builder("blog.Author")
                .id(object_id_field())
                .field(MappedField::new("name", FieldShape::scalar(ScalarKind::String)))
                .build()
                .unwrap(),
        )
        .unwrap();
    let id = ObjectId::new();
    let driver = RecordingDriver::default();
    *driver.find_results.lock() = vec![doc! { "_id": id, "name": "Ada" }];
    let store = Datastore::new(Arc::new(registry), driver);

    let fetched = store
        .fetch_reference(&Reference::new("blog.Author", id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        fetched.as_object().unwrap().get("name"),
        Some(&Value::String("Ada".into()))
    );
    let query = store.driver().last_find.lock().clone().unwrap();
    assert_eq!(query.filter, doc! { "_id": id });
}
