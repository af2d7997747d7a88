//! Models: fixed sets of typed tag cells persisted as one record.
//!
//! Mutation-intent operations go through [`Model::persisting`], which saves
//! the model after the operation succeeds. That save is best effort: its
//! failure is logged and the operation's own result is returned unchanged.

use crate::cell::TagCell;
use crate::fanout::{FanoutReport, Observation, SyncFanout};
use crate::schema::Schema;
use crate::store::{StoreError, TagStore};
use crate::value::{Snapshot, TagValue, TypeMismatch};
use log::debug;
use std::sync::Arc;
use thiserror::Error;

/// Attribute whose string value names the model in broadcasts.
pub const DISPLAY_NAME_ATTRIBUTE: &str = "name";

/// A concrete model type with its schema registered once.
///
/// ```ignore
/// struct Tank;
///
/// impl ModelKind for Tank {
///     const TYPE_NAME: &'static str = "Tank";
///
///     fn schema() -> &'static Schema {
///         static SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
///             Schema::builder()
///                 .field(FieldSpec::string("name").default_value("Tank"))
///                 .field(FieldSpec::float("level").unit("%").logged().tag("Tank.level"))
///                 .build()
///         });
///         &SCHEMA
///     }
/// }
/// ```
pub trait ModelKind {
    const TYPE_NAME: &'static str;

    fn schema() -> &'static Schema;
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown attribute {0}")]
    UnknownAttribute(String),

    #[error("attribute {attribute}: {source}")]
    TypeMismatch {
        attribute: String,
        #[source]
        source: TypeMismatch,
    },

    #[error("model has no persistence tag")]
    Untagged,

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

fn display_name(name: Option<&TagValue>, type_name: &str) -> String {
    name.and_then(TagValue::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(type_name)
        .to_string()
}

/// Clones share the store and the attached fan-out.
#[derive(Clone)]
pub struct Model {
    type_name: &'static str,
    schema: &'static Schema,
    cells: Vec<TagCell>,
    tag: Option<String>,
    store: Arc<dyn TagStore>,
    fanout: Option<Arc<SyncFanout>>,
}

impl Model {
    pub fn new<K: ModelKind>(store: Arc<dyn TagStore>, overrides: &Snapshot) -> Result<Self, ModelError> {
        Self::from_schema(K::TYPE_NAME, K::schema(), store, overrides)
    }

    pub fn with_defaults<K: ModelKind>(store: Arc<dyn TagStore>) -> Self {
        let cells = K::schema()
            .iter()
            .filter_map(|spec| TagCell::from_spec(spec, spec.initial_value(None)).ok())
            .collect();
        Self {
            type_name: K::TYPE_NAME,
            schema: K::schema(),
            cells,
            tag: None,
            store,
            fanout: None,
        }
    }

    pub fn from_schema(
        type_name: &'static str,
        schema: &'static Schema,
        store: Arc<dyn TagStore>,
        overrides: &Snapshot,
    ) -> Result<Self, ModelError> {
        for key in overrides.keys() {
            if schema.get(key).is_none() {
                debug!("{type_name}: ignoring override for unknown attribute {key}");
            }
        }

        let mut cells = Vec::with_capacity(schema.len());
        for spec in schema.iter() {
            let value = spec.initial_value(overrides.get(&spec.name));
            let cell = TagCell::from_spec(spec, value).map_err(|source| {
                ModelError::TypeMismatch {
                    attribute: spec.name.clone(),
                    source,
                }
            })?;
            cells.push(cell);
        }

        Ok(Self {
            type_name,
            schema,
            cells,
            tag: None,
            store,
            fanout: None,
        })
    }

    /// Stored record of the model persisted under `tag`.
    pub fn get(store: &dyn TagStore, tag: &str) -> Result<Snapshot, ModelError> {
        Ok(store.read_record(tag)?)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn get_attributes(&self) -> &'static Schema {
        self.schema
    }

    pub fn display_name(&self) -> String {
        display_name(self.value(DISPLAY_NAME_ATTRIBUTE), self.type_name)
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = Some(tag.into());
    }

    pub fn attach_fanout(&mut self, fanout: Arc<SyncFanout>) {
        self.fanout = Some(fanout);
    }

    pub fn detach_fanout(&mut self) -> Option<Arc<SyncFanout>> {
        self.fanout.take()
    }

    pub fn cell(&self, name: &str) -> Option<&TagCell> {
        self.schema.position(name).map(|i| &self.cells[i])
    }

    pub fn cell_mut(&mut self, name: &str) -> Option<&mut TagCell> {
        self.schema.position(name).map(|i| &mut self.cells[i])
    }

    pub fn value(&self, name: &str) -> Option<&TagValue> {
        self.cell(name).map(TagCell::value)
    }

    pub fn get_attr(&self, name: &str) -> Result<&TagValue, ModelError> {
        self.value(name)
            .ok_or_else(|| ModelError::UnknownAttribute(name.to_string()))
    }

    /// Sets one attribute through its cell, feeding the attached fan-out.
    /// Does not persist the model.
    pub fn write_value(
        &mut self,
        name: &str,
        value: TagValue,
    ) -> Result<Option<FanoutReport>, ModelError> {
        let index = self
            .schema
            .position(name)
            .ok_or_else(|| ModelError::UnknownAttribute(name.to_string()))?;
        let fanout = self.fanout.clone();
        let base = fanout.as_ref().map(|_| self.serialize());
        let type_name = self.type_name;

        self.cells[index]
            .set(value, fanout.as_deref(), |value| {
                let mut snapshot = base.unwrap_or_default();
                snapshot.insert(name.to_string(), value.clone());
                let display_name = display_name(snapshot.get(DISPLAY_NAME_ATTRIBUTE), type_name);
                Observation {
                    attribute: name.to_string(),
                    display_name,
                    snapshot,
                }
            })
            .map_err(|source| ModelError::TypeMismatch {
                attribute: name.to_string(),
                source,
            })
    }

    /// Runs a mutation, then saves the model if it succeeded.
    pub fn persisting<T, E>(&mut self, op: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E> {
        let result = op(self)?;
        if let Err(e) = self.save() {
            debug!("{}: implicit save failed: {}", self.type_name, e);
        }
        Ok(result)
    }

    pub fn set_attr(
        &mut self,
        name: &str,
        value: TagValue,
    ) -> Result<Option<FanoutReport>, ModelError> {
        self.persisting(|model| model.write_value(name, value))
    }

    /// Assigns known attributes straight to their cells, without fan-out.
    /// Nothing is assigned unless every known attribute has the right kind.
    pub fn load(&mut self, values: &Snapshot) -> Result<(), ModelError> {
        self.persisting(|model| {
            let mut staged = Vec::with_capacity(values.len());
            for (name, value) in values {
                let Some(index) = model.schema.position(name) else {
                    debug!("ignoring unknown attribute {name} on load");
                    continue;
                };
                value
                    .expect_kind(model.cells[index].kind())
                    .map_err(|source| ModelError::TypeMismatch {
                        attribute: name.clone(),
                        source,
                    })?;
                staged.push((index, name, value));
            }
            for (index, name, value) in staged {
                model.cells[index]
                    .assign(value.clone())
                    .map_err(|source| ModelError::TypeMismatch {
                        attribute: name.clone(),
                        source,
                    })?;
            }
            Ok(())
        })
    }

    pub fn serialize(&self) -> Snapshot {
        self.schema
            .iter()
            .zip(&self.cells)
            .map(|(spec, cell)| (spec.name.clone(), cell.value().clone()))
            .collect()
    }

    pub fn save(&self) -> Result<(), ModelError> {
        let tag = self.tag.as_deref().ok_or(ModelError::Untagged)?;
        self.store.write_record(tag, &self.serialize())?;
        Ok(())
    }

    pub fn commit(&self) -> bool {
        self.save().is_ok()
    }
}
