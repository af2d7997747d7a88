//! Directional links between a local cache and the tag store.
//!
//! A scheduler calls `update()` on read bindings before running a cycle and
//! on write bindings after it. Read bindings take the store's value, write
//! bindings push the cached value. Neither does both.

use crate::store::{StoreError, TagStore};
use crate::value::TagValue;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Read,
    Write,
}

impl FromStr for Direction {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Direction::Read),
            "write" => Ok(Direction::Write),
            other => Err(BindingError::InvalidDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum BindingError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{tag} is not a member of group {group}")]
    UnknownMember { group: String, tag: String },

    #[error("unknown binding direction {0:?}")]
    InvalidDirection(String),
}

pub struct TagBinding {
    tag: String,
    direction: Direction,
    value: Option<TagValue>,
    store: Arc<dyn TagStore>,
}

impl TagBinding {
    pub fn new(tag: impl Into<String>, direction: Direction, store: Arc<dyn TagStore>) -> Self {
        Self {
            tag: tag.into(),
            direction,
            value: None,
            store,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn value(&self) -> Option<&TagValue> {
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: impl Into<TagValue>) {
        self.value = Some(value.into());
    }

    pub fn update(&mut self) -> Result<(), BindingError> {
        match self.direction {
            Direction::Write => match &self.value {
                Some(value) => self.store.write_tag(&self.tag, value.clone())?,
                None => debug!("write binding {} has nothing to push yet", self.tag),
            },
            Direction::Read => {
                self.value = Some(self.store.read_tag(&self.tag)?);
            }
        }
        Ok(())
    }
}

pub struct GroupBinding {
    group: String,
    direction: Direction,
    tags: Vec<String>,
    values: HashMap<String, TagValue>,
    store: Arc<dyn TagStore>,
}

impl GroupBinding {
    /// Resolves the group's members and reads each one into the cache.
    pub fn new(
        group: impl Into<String>,
        direction: Direction,
        store: Arc<dyn TagStore>,
    ) -> Result<Self, BindingError> {
        let group = group.into();
        let tags = store.get_group(&group)?;
        let mut values = HashMap::with_capacity(tags.len());
        for tag in &tags {
            values.insert(tag.clone(), store.read_tag(tag)?);
        }
        Ok(Self {
            group,
            direction,
            tags,
            values,
            store,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn value(&self, tag: &str) -> Option<&TagValue> {
        self.values.get(tag)
    }

    pub fn set_value(&mut self, tag: &str, value: impl Into<TagValue>) -> Result<(), BindingError> {
        match self.values.get_mut(tag) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(BindingError::UnknownMember {
                group: self.group.clone(),
                tag: tag.to_string(),
            }),
        }
    }

    /// Member values in the group's resolved order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.tags
            .iter()
            .filter_map(|tag| self.values.get(tag).map(|v| (tag.as_str(), v)))
    }

    /// Stops at the first failing member; earlier members stay synchronized.
    pub fn update(&mut self) -> Result<(), BindingError> {
        for tag in &self.tags {
            match self.direction {
                Direction::Write => {
                    if let Some(value) = self.values.get(tag) {
                        self.store.write_tag(tag, value.clone())?;
                    }
                }
                Direction::Read => {
                    let value = self.store.read_tag(tag)?;
                    self.values.insert(tag.clone(), value);
                }
            }
        }
        Ok(())
    }
}

/// Either kind of binding, as held by a scan task.
pub enum Binding {
    Tag(TagBinding),
    Group(GroupBinding),
}

impl Binding {
    pub fn direction(&self) -> Direction {
        match self {
            Binding::Tag(b) => b.direction(),
            Binding::Group(b) => b.direction(),
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Binding::Tag(b) => b.tag(),
            Binding::Group(b) => b.group(),
        }
    }

    pub fn update(&mut self) -> Result<(), BindingError> {
        match self {
            Binding::Tag(b) => b.update(),
            Binding::Group(b) => b.update(),
        }
    }

    pub fn as_tag(&self) -> Option<&TagBinding> {
        match self {
            Binding::Tag(b) => Some(b),
            Binding::Group(_) => None,
        }
    }

    pub fn as_tag_mut(&mut self) -> Option<&mut TagBinding> {
        match self {
            Binding::Tag(b) => Some(b),
            Binding::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupBinding> {
        match self {
            Binding::Group(b) => Some(b),
            Binding::Tag(_) => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupBinding> {
        match self {
            Binding::Group(b) => Some(b),
            Binding::Tag(_) => None,
        }
    }
}

impl From<TagBinding> for Binding {
    fn from(binding: TagBinding) -> Self {
        Binding::Tag(binding)
    }
}

impl From<GroupBinding> for Binding {
    fn from(binding: GroupBinding) -> Self {
        Binding::Group(binding)
    }
}
