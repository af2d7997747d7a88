use crate::fanout::{FanoutReport, Observation, SyncFanout, TagChange};
use crate::schema::FieldSpec;
use crate::value::{TagKind, TagValue, TypeMismatch};

/// A single typed value holder mirrored into the tag store.
#[derive(Debug, Clone, PartialEq)]
pub struct TagCell {
    kind: TagKind,
    value: TagValue,
    default: Option<TagValue>,
    unit: Option<String>,
    logged: bool,
    tag_name: Option<String>,
}

impl TagCell {
    pub fn new(kind: TagKind) -> Self {
        Self {
            kind,
            value: kind.zero(),
            default: None,
            unit: None,
            logged: false,
            tag_name: None,
        }
    }

    pub fn from_spec(spec: &FieldSpec, value: TagValue) -> Result<Self, TypeMismatch> {
        value.expect_kind(spec.kind)?;
        Ok(Self {
            kind: spec.kind,
            value,
            default: spec.default.clone(),
            unit: spec.unit.clone(),
            logged: spec.logged,
            tag_name: spec.tag_name.clone(),
        })
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    pub fn value(&self) -> &TagValue {
        &self.value
    }

    pub fn default_value(&self) -> Option<&TagValue> {
        self.default.as_ref()
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn is_logged(&self) -> bool {
        self.logged
    }

    pub fn set_log(&mut self) {
        self.logged = true;
    }

    pub fn drop_log(&mut self) {
        self.logged = false;
    }

    pub fn tag_name(&self) -> Option<&str> {
        self.tag_name.as_deref()
    }

    pub fn set_tag_name(&mut self, tag_name: impl Into<String>) {
        self.tag_name = Some(tag_name.into());
    }

    /// Replaces the cached value without notifying anyone.
    pub fn assign(&mut self, value: TagValue) -> Result<(), TypeMismatch> {
        value.expect_kind(self.kind)?;
        self.value = value;
        Ok(())
    }

    /// Sets the value, running the fan-out first when one is attached.
    ///
    /// `observe` is only called when there is a fan-out to feed. The cache is
    /// updated after every sink has been tried, whatever their outcome.
    pub fn set(
        &mut self,
        value: TagValue,
        fanout: Option<&SyncFanout>,
        observe: impl FnOnce(&TagValue) -> Observation,
    ) -> Result<Option<FanoutReport>, TypeMismatch> {
        value.expect_kind(self.kind)?;

        let report = fanout.map(|fanout| {
            let observation = observe(&value);
            fanout.dispatch(&TagChange {
                value: &value,
                logged: self.logged,
                tag_name: self.tag_name.as_deref(),
                observation: &observation,
            })
        });

        self.value = value;
        Ok(report)
    }
}
