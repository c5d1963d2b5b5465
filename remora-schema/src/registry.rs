//! The type registry: map-once-per-type descriptor cache, discriminator
//! dispatch, and logical-to-storage path resolution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{MappingError, MappingResult};
use crate::field::{FieldShape, TypeName};
use crate::model::MappedClass;
use crate::options::MapperOptions;

/// Discriminator dispatch table for one hierarchy root.
#[derive(Debug, Default)]
struct Hierarchy {
    /// Discriminator value to concrete type, including the base itself.
    dispatch: HashMap<String, TypeName>,
    /// Subtypes in registration order.
    subtypes: Vec<TypeName>,
}

/// The mapped-type registry.
///
/// A single explicit registry object is passed by reference to every
/// component that needs it; there is no hidden global. Registration is
/// idempotent and at-most-once per type: concurrent first registration from
/// multiple threads produces exactly one cached [`MappedClass`], via a
/// read-then-write double check. Lookup is read-mostly and lock-cheap.
///
/// # Example
///
/// ```rust
/// use remora_schema::{FieldShape, MappedClass, MappedField, MapperOptions, Registry, ScalarKind};
///
/// let registry = Registry::new(MapperOptions::default());
/// let class = MappedClass::builder("blog.Author")
///     .id(MappedField::new("id", FieldShape::scalar(ScalarKind::ObjectId)))
///     .field(MappedField::new("name", FieldShape::scalar(ScalarKind::String)).stored_as("n"))
///     .build()
///     .unwrap();
///
/// let mapped = registry.register(class).unwrap();
/// assert_eq!(registry.resolve_path(&mapped, "name").unwrap(), "n");
/// ```
#[derive(Debug)]
pub struct Registry {
    options: MapperOptions,
    classes: RwLock<HashMap<TypeName, Arc<MappedClass>>>,
    hierarchies: RwLock<HashMap<TypeName, Hierarchy>>,
}

impl Registry {
    /// Create a registry with the given options.
    pub fn new(options: MapperOptions) -> Self {
        Self {
            options,
            classes: RwLock::new(HashMap::new()),
            hierarchies: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with default options.
    pub fn with_defaults() -> Self {
        Self::new(MapperOptions::default())
    }

    /// The options this registry was built with.
    pub fn options(&self) -> &MapperOptions {
        &self.options
    }

    /// Register a mapped class, returning the cached descriptor.
    ///
    /// Missing discriminator and collection values are filled in from the
    /// configured strategies before caching. Registering the same definition
    /// twice returns the identical `Arc`; registering a different definition
    /// under an existing name fails with
    /// [`MappingError::ConflictingDefinition`].
    ///
    /// Embedded target types must already be registered; referenced targets
    /// are checked lazily at encode time so that reference cycles between
    /// entities remain expressible.
    pub fn register(&self, mut class: MappedClass) -> MappingResult<Arc<MappedClass>> {
        if class.discriminator.is_none() {
            class.discriminator = Some(self.options.discriminator.derive(&class.type_name));
        }
        if class.collection.is_none() && !class.embeddable {
            class.collection = Some(self.options.collection_naming.derive(&class.type_name));
        }

        self.check_embedded_targets(&class)?;

        {
            let classes = self.classes.read();
            if let Some(existing) = classes.get(&class.type_name) {
                return Self::reconcile(existing, &class);
            }
        }

        let mut classes = self.classes.write();
        if let Some(existing) = classes.get(&class.type_name) {
            // Lost the race; someone else mapped it first.
            return Self::reconcile(existing, &class);
        }

        debug!(type_name = %class.type_name, collection = ?class.collection, "registering mapped class");
        let arc = Arc::new(class);
        classes.insert(arc.type_name.clone(), Arc::clone(&arc));
        Ok(arc)
    }

    fn reconcile(existing: &Arc<MappedClass>, incoming: &MappedClass) -> MappingResult<Arc<MappedClass>> {
        if **existing == *incoming {
            Ok(Arc::clone(existing))
        } else {
            Err(MappingError::ConflictingDefinition {
                type_name: incoming.type_name.as_str().to_string(),
            })
        }
    }

    fn check_embedded_targets(&self, class: &MappedClass) -> MappingResult<()> {
        for field in class.fields.values() {
            let mut shape = &field.shape;
            loop {
                match shape {
                    FieldShape::List(e) | FieldShape::Set(e) | FieldShape::Array(e) | FieldShape::Map(e) => {
                        shape = e;
                    }
                    FieldShape::Embedded(target) => {
                        if target != &class.type_name && !self.is_mapped(target) {
                            return Err(MappingError::unmapped_type(
                                class.type_name.as_str(),
                                target.as_str(),
                            ));
                        }
                        break;
                    }
                    _ => break,
                }
            }
        }
        Ok(())
    }

    /// Look up a mapped class by type name.
    pub fn get(&self, type_name: &TypeName) -> Option<Arc<MappedClass>> {
        self.classes.read().get(type_name).cloned()
    }

    /// Check whether a type has been mapped.
    pub fn is_mapped(&self, type_name: &TypeName) -> bool {
        self.classes.read().contains_key(type_name)
    }

    /// Number of mapped classes.
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }

    /// Record `subtype` as a polymorphic subtype of `base`.
    ///
    /// Both classes must already be registered. The subtype's discriminator
    /// value joins the hierarchy's dispatch table; a value already taken
    /// within the hierarchy is rejected.
    pub fn register_subtype(&self, base: &TypeName, subtype: &TypeName) -> MappingResult<()> {
        let base_class = self.get(base).ok_or_else(|| MappingError::UnmappedBase {
            base: base.as_str().to_string(),
            subtype: subtype.as_str().to_string(),
        })?;
        let sub_class = self.get(subtype).ok_or_else(|| MappingError::UnmappedBase {
            base: base.as_str().to_string(),
            subtype: subtype.as_str().to_string(),
        })?;

        let mut hierarchies = self.hierarchies.write();
        let entry = hierarchies.entry(base.clone()).or_insert_with(|| {
            let mut h = Hierarchy::default();
            if let Some(value) = base_class.discriminator() {
                h.dispatch.insert(value.to_string(), base.clone());
            }
            h
        });

        let value = match sub_class.discriminator() {
            Some(value) => value.to_string(),
            None => self.options.discriminator.derive(subtype),
        };
        if let Some(taken) = entry.dispatch.get(&value) {
            if taken != subtype {
                return Err(MappingError::DuplicateDiscriminator {
                    base: base.as_str().to_string(),
                    value,
                    existing: taken.as_str().to_string(),
                });
            }
            return Ok(());
        }
        debug!(base = %base, subtype = %subtype, discriminator = %value, "registering subtype");
        entry.dispatch.insert(value, subtype.clone());
        entry.subtypes.push(subtype.clone());
        Ok(())
    }

    /// Resolve a discriminator value within the hierarchy rooted at `base`.
    ///
    /// The base's own discriminator resolves to the base itself even when no
    /// subtypes were ever registered.
    pub fn resolve_discriminator(&self, base: &TypeName, value: &str) -> Option<Arc<MappedClass>> {
        if let Some(hierarchy) = self.hierarchies.read().get(base) {
            if let Some(concrete) = hierarchy.dispatch.get(value) {
                return self.get(concrete);
            }
        }
        let base_class = self.get(base)?;
        (base_class.discriminator() == Some(value)).then_some(base_class)
    }

    /// The registered subtypes of `base`, in registration order.
    pub fn subtypes_of(&self, base: &TypeName) -> Vec<TypeName> {
        self.hierarchies
            .read()
            .get(base)
            .map(|h| h.subtypes.clone())
            .unwrap_or_default()
    }

    /// Translate a dotted logical path into its storage form.
    ///
    /// Walks nested field chains, renaming at every level. Numeric segments
    /// (positional array indices) and `$`-prefixed operator segments pass
    /// through untouched; map keys after a map-shaped field pass through as
    /// literal keys. Fails with [`MappingError::UnknownField`] when a named
    /// segment does not resolve.
    pub fn resolve_path(&self, class: &MappedClass, path: &str) -> MappingResult<String> {
        let mut out: Vec<String> = Vec::with_capacity(4);
        let mut current: Option<Arc<MappedClass>> = None;
        let mut shape: Option<FieldShape> = None;
        let mut first = true;

        let unknown = || MappingError::unknown_field(class.type_name.as_str(), path);

        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(unknown());
            }
            if segment.starts_with('$') || segment.chars().all(|c| c.is_ascii_digit()) {
                out.push(segment.to_string());
                continue;
            }

            // Containers are transparent to dotted paths except maps, whose
            // next segment is a literal key.
            let mut consumed = false;
            while let Some(s) = shape.take() {
                match s {
                    FieldShape::List(e) | FieldShape::Set(e) | FieldShape::Array(e) => {
                        shape = Some(*e);
                    }
                    FieldShape::Map(e) => {
                        out.push(segment.to_string());
                        shape = Some(*e);
                        consumed = true;
                        break;
                    }
                    FieldShape::Embedded(target) => {
                        current = Some(
                            self.get(&target)
                                .ok_or_else(|| MappingError::unmapped_type(
                                    class.type_name.as_str(),
                                    target.as_str(),
                                ))?,
                        );
                        break;
                    }
                    // Scalars and references have no addressable members.
                    _ => return Err(unknown()),
                }
            }
            if consumed {
                continue;
            }

            let owner: &MappedClass = if first {
                first = false;
                class
            } else {
                match current.as_deref() {
                    Some(c) => c,
                    None => return Err(unknown()),
                }
            };
            let field = owner.field(segment).ok_or_else(unknown)?;
            out.push(field.storage_name.to_string());
            shape = Some(field.shape.clone());
            current = None;
        }

        trace!(type_name = %class.type_name, logical = path, storage = %out.join("."), "resolved path");
        Ok(out.join("."))
    }

    /// The embedded class a dotted path's elements decode as, if any.
    ///
    /// Used by `$elemMatch`-style builders to validate inner predicates
    /// against the element type of an embedded collection.
    pub fn element_class(&self, class: &MappedClass, path: &str) -> Option<Arc<MappedClass>> {
        let mut owner: Option<Arc<MappedClass>> = None;
        let mut shape: Option<FieldShape> = None;
        let mut first = true;

        for segment in path.split('.') {
            if segment.starts_with('$') || segment.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let mut consumed = false;
            while let Some(s) = shape.take() {
                match s {
                    FieldShape::List(e) | FieldShape::Set(e) | FieldShape::Array(e) => shape = Some(*e),
                    FieldShape::Map(e) => {
                        shape = Some(*e);
                        consumed = true;
                        break;
                    }
                    FieldShape::Embedded(target) => {
                        owner = self.get(&target);
                        break;
                    }
                    _ => return None,
                }
            }
            if consumed {
                continue;
            }
            let field = if first {
                first = false;
                class.field(segment)?
            } else {
                owner.as_deref()?.field(segment)?
            };
            shape = Some(field.shape.clone());
            owner = None;
        }

        match shape {
            Some(s) => match Self::terminal_embedded(&s) {
                Terminal::Embedded(t) => self.get(&t),
                Terminal::Opaque => None,
            },
            None => owner,
        }
    }

    fn terminal_embedded(shape: &FieldShape) -> Terminal {
        match shape {
            FieldShape::List(e) | FieldShape::Set(e) | FieldShape::Array(e) | FieldShape::Map(e) => {
                Self::terminal_embedded(e)
            }
            FieldShape::Embedded(t) => Terminal::Embedded(t.clone()),
            _ => Terminal::Opaque,
        }
    }
}

enum Terminal {
    Embedded(TypeName),
    Opaque,
}
