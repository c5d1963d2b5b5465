//! The datastore facade and the async driver boundary beneath it.
//!
//! [`Datastore`] owns a registry and a [`Driver`] and exposes the typed
//! operations: save, find, update, aggregate, find-and-modify, and explicit
//! reference fetches. The driver trait is the seam a real transport plugs
//! into; tests substitute an in-memory recording driver.

use async_trait::async_trait;
use bson::{Bson, Document};
use indexmap::IndexMap;
use remora_codec::{Codec, Reference, Value};
use remora_schema::{MappedClass, Registry, TypeName};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{QueryError, QueryResult};
use crate::filter::{Filter, FilterCompiler};
use crate::pipeline::Pipeline;
use crate::query::{CompiledQuery, FindQuery};
use crate::update::{ModifyOptions, UpdateBuilder};

/// Options for plain write operations, forwarded to the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Server-side validation bypass, passed through opaquely.
    pub bypass_document_validation: Option<bool>,
    /// Additional driver flags, forwarded verbatim and never interpreted.
    pub extra: Document,
}

impl WriteOptions {
    /// Skip server-side validation for this write.
    pub fn bypass_validation(mut self) -> Self {
        self.bypass_document_validation = Some(true);
        self
    }

    /// Attach an opaque driver flag.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The driver-ready options document.
    pub fn compile(&self) -> Document {
        let mut doc = self.extra.clone();
        if let Some(bypass) = self.bypass_document_validation {
            doc.insert("bypassDocumentValidation", bypass);
        }
        doc
    }
}

/// The transport seam: everything the datastore needs from a server
/// connection.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Insert one document, returning its id.
    async fn insert_one(
        &self,
        collection: &str,
        doc: Document,
        options: Document,
    ) -> QueryResult<Bson>;

    /// Insert a batch of documents, returning their ids in order.
    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
        options: Document,
    ) -> QueryResult<Vec<Bson>>;

    /// Run a compiled find and return the matching documents.
    async fn find(&self, query: &CompiledQuery) -> QueryResult<Vec<Document>>;

    /// Apply an update to every matching document, returning the count.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: Document,
    ) -> QueryResult<u64>;

    /// Run an aggregation pipeline and return the raw result documents.
    async fn aggregate(&self, collection: &str, stages: Vec<Document>) -> QueryResult<Vec<Document>>;

    /// Atomically update one matching document and return it.
    async fn find_and_modify(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &ModifyOptions,
    ) -> QueryResult<Option<Document>>;

    /// Create a collection with the given creation options.
    async fn create_collection(&self, name: &str, options: Document) -> QueryResult<()>;

    /// Run an arbitrary database command.
    async fn run_command(&self, command: Document) -> QueryResult<Document>;
}

/// The typed entry point: registry plus driver.
pub struct Datastore<D> {
    registry: Arc<Registry>,
    driver: D,
}

impl<D: Driver> Datastore<D> {
    /// Create a datastore over a registry and a driver.
    pub fn new(registry: Arc<Registry>, driver: D) -> Self {
        Self { registry, driver }
    }

    /// The registry backing this datastore.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Borrow the underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Encode and insert one object, returning its stored id.
    ///
    /// A missing id is filled in by the codec per the configured id
    /// strategy, so the returned id is always the one actually stored.
    pub async fn save(&self, value: &Value) -> QueryResult<Value> {
        self.save_with(value, &WriteOptions::default()).await
    }

    /// [`save`](Self::save) with explicit write options.
    pub async fn save_with(&self, value: &Value, options: &WriteOptions) -> QueryResult<Value> {
        let (class, collection) = self.collection_for_value(value)?;
        let doc = Codec::new(&self.registry).encode(value)?;
        let id = match doc.get("_id").cloned() {
            Some(id) => {
                self.driver
                    .insert_one(&collection, doc, options.compile())
                    .await?;
                id
            }
            None => {
                self.driver
                    .insert_one(&collection, doc, options.compile())
                    .await?
            }
        };
        info!(type_name = %class.type_name, collection = %collection, "saved object");
        Ok(bson_to_value(id))
    }

    /// Encode and insert a batch of objects, returning ids in input order.
    ///
    /// The batch may mix mapped types: documents group by target collection
    /// and go out as one insert per collection, in first-use order.
    pub async fn save_all(&self, values: &[Value]) -> QueryResult<Vec<Value>> {
        self.save_all_with(values, &WriteOptions::default()).await
    }

    /// [`save_all`](Self::save_all) with explicit write options.
    pub async fn save_all_with(
        &self,
        values: &[Value],
        options: &WriteOptions,
    ) -> QueryResult<Vec<Value>> {
        let codec = Codec::new(&self.registry);
        let mut groups: IndexMap<String, Vec<Document>> = IndexMap::new();
        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            let (_, collection) = self.collection_for_value(value)?;
            let doc = codec.encode(value)?;
            if let Some(id) = doc.get("_id").cloned() {
                ids.push(bson_to_value(id));
            }
            groups.entry(collection).or_default().push(doc);
        }
        for (collection, docs) in groups {
            self.driver
                .insert_many(&collection, docs, options.compile())
                .await?;
        }
        Ok(ids)
    }

    /// Run a find query and decode every result.
    pub async fn find(&self, query: &FindQuery) -> QueryResult<Vec<Value>> {
        let compiled = query.compile(&self.registry)?;
        let docs = self.driver.find(&compiled).await?;
        let codec = Codec::new(&self.registry);
        docs.iter()
            .map(|doc| {
                codec
                    .decode(query.type_name(), doc)
                    .map_err(QueryError::from)
            })
            .collect()
    }

    /// Apply an update to every document matching the filters.
    pub async fn update(
        &self,
        type_name: &TypeName,
        filters: &[Filter],
        update: &UpdateBuilder,
    ) -> QueryResult<u64> {
        self.update_with(type_name, filters, update, &WriteOptions::default())
            .await
    }

    /// [`update`](Self::update) with explicit write options.
    pub async fn update_with(
        &self,
        type_name: &TypeName,
        filters: &[Filter],
        update: &UpdateBuilder,
        options: &WriteOptions,
    ) -> QueryResult<u64> {
        let (class, collection) = self.collection_of(type_name)?;
        let filter = FilterCompiler::for_class(&self.registry, class).compile(filters)?;
        let update = update.compile(&self.registry)?;
        let modified = self
            .driver
            .update_many(&collection, filter, update, options.compile())
            .await?;
        debug!(type_name = %type_name, modified, "applied update");
        Ok(modified)
    }

    /// Run an aggregation pipeline, returning the reshaped result documents.
    pub async fn aggregate(&self, pipeline: &Pipeline) -> QueryResult<Vec<Document>> {
        let (_, collection) = self.collection_of(pipeline.type_name())?;
        let stages = pipeline.compile(&self.registry)?;
        self.driver.aggregate(&collection, stages).await
    }

    /// Atomically update one matching document and decode the returned side.
    pub async fn find_and_modify(
        &self,
        type_name: &TypeName,
        filters: &[Filter],
        update: &UpdateBuilder,
        options: ModifyOptions,
    ) -> QueryResult<Option<Value>> {
        let (class, collection) = self.collection_of(type_name)?;
        let filter = FilterCompiler::for_class(&self.registry, class).compile(filters)?;
        let update = update.compile(&self.registry)?;
        let doc = self
            .driver
            .find_and_modify(&collection, filter, update, &options)
            .await?;
        doc.map(|doc| {
            Codec::new(&self.registry)
                .decode(type_name, &doc)
                .map_err(QueryError::from)
        })
        .transpose()
    }

    /// Create the type's collection, carrying its declared validation filter
    /// through as creation options.
    pub async fn ensure_collection(&self, type_name: &TypeName) -> QueryResult<()> {
        let (class, collection) = self.collection_of(type_name)?;
        let mut options = Document::new();
        if let Some(validation) = &class.validation {
            options.insert("validator", validation.clone());
        }
        self.driver.create_collection(&collection, options).await
    }

    /// Resolve a reference to its full object, if the target still exists.
    ///
    /// References store only the id; this is the explicit second phase.
    pub async fn fetch_reference(&self, reference: &Reference) -> QueryResult<Option<Value>> {
        let (_, collection) = self.collection_of(&reference.target)?;
        let codec = Codec::new(&self.registry);
        let id = codec.encode_plain(&reference.id)?;
        let compiled = CompiledQuery {
            collection,
            filter: bson::doc! { "_id": id },
            sort: None,
            projection: None,
            skip: None,
            limit: Some(1),
            collation: None,
            options: Document::new(),
        };
        let docs = self.driver.find(&compiled).await?;
        docs.first()
            .map(|doc| {
                codec
                    .decode(&reference.target, doc)
                    .map_err(QueryError::from)
            })
            .transpose()
    }

    fn collection_of(&self, type_name: &TypeName) -> QueryResult<(Arc<MappedClass>, String)> {
        let class = self.registry.get(type_name).ok_or_else(|| {
            remora_schema::MappingError::unmapped_type(type_name.as_str(), "datastore")
        })?;
        let collection = class
            .collection()
            .ok_or_else(|| QueryError::NoCollection {
                type_name: type_name.as_str().to_string(),
            })?
            .to_string();
        Ok((class, collection))
    }

    fn collection_for_value(&self, value: &Value) -> QueryResult<(Arc<MappedClass>, String)> {
        let obj = value.as_object().ok_or_else(|| {
            QueryError::driver("only object values can be saved")
        })?;
        self.collection_of(&obj.type_name)
    }
}

fn bson_to_value(bson: Bson) -> Value {
    match bson {
        Bson::ObjectId(oid) => Value::ObjectId(oid),
        Bson::String(s) => Value::String(s),
        Bson::Int32(i) => Value::Int32(i),
        Bson::Int64(i) => Value::Int64(i),
        Bson::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}
