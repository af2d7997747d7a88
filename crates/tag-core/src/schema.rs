use crate::value::{TagKind, TagValue};
use log::{debug, warn};

/// Attribute names containing this marker are internal and never part of a schema.
pub const RESERVED_MARKER: &str = "__";

/// Declaration of one typed attribute of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: TagKind,
    pub default: Option<TagValue>,
    pub unit: Option<String>,
    pub logged: bool,
    /// Qualified tag identifier, `"<folder>.<attr>"` or a bare attribute name.
    pub tag_name: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: TagKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            unit: None,
            logged: false,
            tag_name: None,
        }
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, TagKind::Float)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, TagKind::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, TagKind::Boolean)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, TagKind::String)
    }

    pub fn default_value(mut self, value: impl Into<TagValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn logged(mut self) -> Self {
        self.logged = true;
        self
    }

    pub fn tag(mut self, tag_name: impl Into<String>) -> Self {
        self.tag_name = Some(tag_name.into());
        self
    }

    /// Override, else declared default, else the kind's zero value.
    pub fn initial_value(&self, override_value: Option<&TagValue>) -> TagValue {
        override_value
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_else(|| self.kind.zero())
    }
}

/// Ordered attribute list of a model type. Built once per type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder { fields: Vec::new() }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

pub struct SchemaBuilder {
    fields: Vec<FieldSpec>,
}

impl SchemaBuilder {
    pub fn field(mut self, mut spec: FieldSpec) -> Self {
        if spec.name.contains(RESERVED_MARKER) {
            debug!("skipping reserved attribute {}", spec.name);
            return self;
        }
        if self.fields.iter().any(|f| f.name == spec.name) {
            warn!("duplicate attribute {} ignored", spec.name);
            return self;
        }
        if let Some(default) = &spec.default {
            if default.kind() != spec.kind {
                warn!(
                    "default for {} is {}, declared {}; using zero value",
                    spec.name,
                    default.kind(),
                    spec.kind
                );
                spec.default = None;
            }
        }
        self.fields.push(spec);
        self
    }

    pub fn build(self) -> Schema {
        Schema {
            fields: self.fields,
        }
    }
}
