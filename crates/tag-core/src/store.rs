use crate::value::{Snapshot, TagValue, TypeMismatch};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("unknown tag {0}")]
    UnknownTag(String),

    #[error("unknown group {0}")]
    UnknownGroup(String),

    #[error("no record stored under {0}")]
    UnknownRecord(String),

    #[error("tag {tag}: {source}")]
    Type {
        tag: String,
        #[source]
        source: TypeMismatch,
    },

    #[error("tag store unavailable: {0}")]
    Unavailable(String),
}

/// Current Value Table contract. Shared by models and bindings, which may
/// call it concurrently.
pub trait TagStore: Send + Sync {
    fn read_tag(&self, name: &str) -> Result<TagValue, StoreError>;
    fn write_tag(&self, name: &str, value: TagValue) -> Result<(), StoreError>;
    /// Member tags of `group`, in the group's declared order.
    fn get_group(&self, group: &str) -> Result<Vec<String>, StoreError>;
    fn write_record(&self, tag: &str, record: &Snapshot) -> Result<(), StoreError>;
    fn read_record(&self, tag: &str) -> Result<Snapshot, StoreError>;
}

#[derive(Default)]
struct Tables {
    tags: HashMap<String, TagValue>,
    groups: HashMap<String, Vec<String>>,
    records: HashMap<String, Snapshot>,
}

/// In-process tag table. Tags are typed by their first definition.
#[derive(Default)]
pub struct MemoryTagStore {
    tables: RwLock<Tables>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines `name` with an initial value; redefining replaces value and type.
    pub fn define_tag(&self, name: &str, initial: impl Into<TagValue>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables.tags.insert(name.to_string(), initial.into());
        Ok(())
    }

    pub fn define_group<S: AsRef<str>>(&self, group: &str, members: &[S]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let mut resolved = Vec::with_capacity(members.len());
        for member in members {
            let member = member.as_ref();
            if !tables.tags.contains_key(member) {
                return Err(StoreError::UnknownTag(member.to_string()));
            }
            resolved.push(member.to_string());
        }
        tables.groups.insert(group.to_string(), resolved);
        Ok(())
    }

    pub fn tag_names(&self) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut names: Vec<String> = tables.tags.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl TagStore for MemoryTagStore {
    fn read_tag(&self, name: &str) -> Result<TagValue, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        tables
            .tags
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownTag(name.to_string()))
    }

    fn write_tag(&self, name: &str, value: TagValue) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let slot = tables
            .tags
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTag(name.to_string()))?;
        value.expect_kind(slot.kind()).map_err(|source| StoreError::Type {
            tag: name.to_string(),
            source,
        })?;
        *slot = value;
        Ok(())
    }

    fn get_group(&self, group: &str) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        tables
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| StoreError::UnknownGroup(group.to_string()))
    }

    fn write_record(&self, tag: &str, record: &Snapshot) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables.records.insert(tag.to_string(), record.clone());
        Ok(())
    }

    fn read_record(&self, tag: &str) -> Result<Snapshot, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        tables
            .records
            .get(tag)
            .cloned()
            .ok_or_else(|| StoreError::UnknownRecord(tag.to_string()))
    }
}
