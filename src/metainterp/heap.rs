//! Object model for the harness
//!
//! Objects hold integer fields. A class's immutable-field declarations
//! decide which writes must invalidate a field version.

use crate::error::{Error, Result};
use crate::quasi_immut::{ImmutableFields, Invalidation, ObjectId, VersionTable};
use std::sync::Arc;
use tracing::trace;

/// A class: its field names and immutable-field declarations
#[derive(Debug)]
pub struct ClassDescr {
    name: String,
    fields: Vec<String>,
    immutable: ImmutableFields,
}

impl ClassDescr {
    /// Declare a class. Every declared immutable field must be one of `fields`.
    pub fn new(name: &str, fields: &[&str], immutable_fields: &[&str]) -> Result<Arc<Self>> {
        let immutable = ImmutableFields::parse(immutable_fields)?;
        if let Some(missing) = immutable.names().find(|n| !fields.contains(n)) {
            return Err(Error::unknown_field(name, missing));
        }
        Ok(Arc::new(Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            immutable,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn immutable_fields(&self) -> &ImmutableFields {
        &self.immutable
    }

    fn index_of(&self, field: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f == field)
            .ok_or_else(|| Error::unknown_field(&self.name, field))
    }
}

#[derive(Debug)]
struct Object {
    class: Arc<ClassDescr>,
    values: Vec<i64>,
}

/// All objects of one harness run
#[derive(Debug)]
pub struct Heap {
    objects: Vec<Object>,
    versions: Arc<VersionTable>,
}

impl Heap {
    pub fn new(versions: Arc<VersionTable>) -> Self {
        Self {
            objects: Vec::new(),
            versions,
        }
    }

    pub fn versions(&self) -> &Arc<VersionTable> {
        &self.versions
    }

    /// Allocate an instance; fields not listed start at 0
    pub fn alloc(&mut self, class: &Arc<ClassDescr>, init: &[(&str, i64)]) -> Result<ObjectId> {
        let mut values = vec![0; class.fields.len()];
        for (field, value) in init {
            values[class.index_of(field)?] = *value;
        }
        let id = ObjectId(self.objects.len() as u64);
        self.objects.push(Object {
            class: class.clone(),
            values,
        });
        Ok(id)
    }

    fn object(&self, id: ObjectId) -> Result<&Object> {
        self.objects.get(id.0 as usize).ok_or(Error::UnknownObject(id.0))
    }

    pub fn class_of(&self, id: ObjectId) -> Result<&Arc<ClassDescr>> {
        Ok(&self.object(id)?.class)
    }

    pub fn get(&self, id: ObjectId, field: &str) -> Result<i64> {
        let object = self.object(id)?;
        Ok(object.values[object.class.index_of(field)?])
    }

    pub fn is_quasi_immutable(&self, id: ObjectId, field: &str) -> Result<bool> {
        Ok(self.object(id)?.class.immutable.is_quasi_immutable(field))
    }

    /// Write a field. Quasi-immutable fields are invalidated before the
    /// new value is stored.
    pub fn set(&mut self, id: ObjectId, field: &str, value: i64) -> Result<Option<Invalidation>> {
        let object = self
            .objects
            .get_mut(id.0 as usize)
            .ok_or(Error::UnknownObject(id.0))?;
        let index = object.class.index_of(field)?;
        let invalidation = if object.class.immutable.is_quasi_immutable(field) {
            self.versions.invalidate(id, field)
        } else {
            None
        };
        object.values[index] = value;
        trace!(target: "jitportal::metainterp", object = %id, field, value, invalidated = invalidation.is_some(), "setfield");
        Ok(invalidation)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
