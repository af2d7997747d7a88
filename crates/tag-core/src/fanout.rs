//! Ordered side effects of a tag value change.
//!
//! A change is delivered to the persistence sink (logged tags only), the
//! notifier (machine snapshot, then attribute delta) and the supervisory
//! gateway, in that order. Each sink failure is logged and recorded in the
//! returned [`FanoutReport`]; none of them stops the remaining steps.

use crate::value::{Snapshot, TagValue};
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Middle element of every `folder_struct`.
pub const ENGINES_FOLDER: &str = "Engines";

/// Broadcast channel carrying the full machine snapshot.
pub const MACHINE_CHANGED: &str = "notify_machine_attr";

/// Broadcast channel carrying a single attribute delta.
pub const ATTRIBUTE_CHANGED: &str = "notify_attr";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("sink responded with status {status}")]
    Status { status: u16 },

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("could not encode payload: {0}")]
    Encode(String),
}

/// Payload of a persistence write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagWrite {
    pub name: String,
    pub value: TagValue,
}

/// Engine state addressed by `[folder, "Engines", display_name]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineUpdate {
    pub folder_struct: [String; 3],
    pub engine: Snapshot,
}

impl EngineUpdate {
    pub fn new(folder: &str, display_name: &str, engine: Snapshot) -> Self {
        Self {
            folder_struct: [
                folder.to_string(),
                ENGINES_FOLDER.to_string(),
                display_name.to_string(),
            ],
            engine,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Notification {
    MachineChanged(Snapshot),
    AttributeChanged(EngineUpdate),
}

impl Notification {
    pub fn event(&self) -> &'static str {
        match self {
            Notification::MachineChanged(_) => MACHINE_CHANGED,
            Notification::AttributeChanged(_) => ATTRIBUTE_CHANGED,
        }
    }
}

pub trait PersistenceSink: Send + Sync {
    fn write_tag(&self, write: &TagWrite) -> Result<(), SinkError>;
    fn write_string_tag(&self, write: &TagWrite) -> Result<(), SinkError>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), SinkError>;
}

pub trait GatewaySink: Send + Sync {
    fn update_engine(&self, update: &EngineUpdate) -> Result<(), SinkError>;
}

/// Whether the gateway push follows the `logged` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayPolicy {
    #[default]
    Always,
    LoggedOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Persistence,
    MachineBroadcast,
    AttributeBroadcast,
    Gateway,
}

impl Sink {
    pub fn as_str(self) -> &'static str {
        match self {
            Sink::Persistence => "persistence",
            Sink::MachineBroadcast => "machine_broadcast",
            Sink::AttributeBroadcast => "attribute_broadcast",
            Sink::Gateway => "gateway",
        }
    }
}

/// Owning model's state at the time of a change, with the new value applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub attribute: String,
    pub display_name: String,
    pub snapshot: Snapshot,
}

/// One value change as seen by the sinks.
#[derive(Debug, Clone, Copy)]
pub struct TagChange<'a> {
    pub value: &'a TagValue,
    pub logged: bool,
    pub tag_name: Option<&'a str>,
    pub observation: &'a Observation,
}

#[derive(Debug, Default)]
pub struct FanoutReport {
    pub attempted: Vec<Sink>,
    pub failures: Vec<(Sink, SinkError)>,
}

impl FanoutReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, sink: Sink, result: Result<(), SinkError>) {
        self.attempted.push(sink);
        if let Err(e) = result {
            warn!("{} sink failed: {}", sink.as_str(), e);
            self.failures.push((sink, e));
        }
    }
}

/// Splits a qualified tag name on its first `.` into `(folder, attribute)`.
pub fn split_tag_name(tag_name: &str) -> (&str, &str) {
    tag_name.split_once('.').unwrap_or(("", tag_name))
}

pub struct SyncFanout {
    persistence: Arc<dyn PersistenceSink>,
    notifier: Arc<dyn Notifier>,
    gateway: Arc<dyn GatewaySink>,
    policy: GatewayPolicy,
}

impl SyncFanout {
    pub fn new(
        persistence: Arc<dyn PersistenceSink>,
        notifier: Arc<dyn Notifier>,
        gateway: Arc<dyn GatewaySink>,
    ) -> Self {
        Self {
            persistence,
            notifier,
            gateway,
            policy: GatewayPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: GatewayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> GatewayPolicy {
        self.policy
    }

    pub fn dispatch(&self, change: &TagChange<'_>) -> FanoutReport {
        let mut report = FanoutReport::default();
        let observation = change.observation;

        if change.logged {
            let write = TagWrite {
                name: change
                    .tag_name
                    .unwrap_or(observation.attribute.as_str())
                    .to_string(),
                value: change.value.clone(),
            };
            let result = if change.value.is_textual() {
                self.persistence.write_string_tag(&write)
            } else {
                self.persistence.write_tag(&write)
            };
            report.record(Sink::Persistence, result);
        }

        let machine = Notification::MachineChanged(observation.snapshot.clone());
        report.record(Sink::MachineBroadcast, self.notifier.notify(&machine));

        let (folder, attribute) = match change.tag_name {
            Some(name) => split_tag_name(name),
            None => ("", observation.attribute.as_str()),
        };

        if change.tag_name.is_some() {
            let value = observation
                .snapshot
                .get(attribute)
                .cloned()
                .unwrap_or_else(|| change.value.clone());
            let mut delta = Snapshot::new();
            delta.insert(attribute.to_string(), value);
            let update = EngineUpdate::new(folder, &observation.display_name, delta);
            report.record(
                Sink::AttributeBroadcast,
                self.notifier.notify(&Notification::AttributeChanged(update)),
            );
        }

        if change.logged || self.policy == GatewayPolicy::Always {
            let update =
                EngineUpdate::new(folder, &observation.display_name, observation.snapshot.clone());
            report.record(Sink::Gateway, self.gateway.update_engine(&update));
        } else {
            debug!("gateway push skipped for unlogged {}", observation.attribute);
        }

        report
    }
}


#[cfg(test)]
mod tests {
    use super::recording::{fanout, Call, Recorder};
    use super::*;

    fn observation(attribute: &str, value: TagValue) -> Observation {
        let mut snapshot = Snapshot::new();
        snapshot.insert("name".into(), TagValue::from("Pump1"));
        snapshot.insert(attribute.into(), value);
        Observation {
            attribute: attribute.into(),
            display_name: "Pump1".into(),
            snapshot,
        }
    }

    #[test]
    fn splits_on_first_dot_only() {
        assert_eq!(split_tag_name("Area.speed"), ("Area", "speed"));
        assert_eq!(split_tag_name("speed"), ("", "speed"));
        assert_eq!(split_tag_name("A.b.c"), ("A", "b.c"));
    }

    #[test]
    fn logged_numeric_change_hits_every_sink_in_order() {
        let recorder = Arc::new(Recorder::default());
        let value = TagValue::from(12.5);
        let obs = observation("speed", value.clone());
        let report = fanout(&recorder).dispatch(&TagChange {
            value: &value,
            logged: true,
            tag_name: Some("Area.speed"),
            observation: &obs,
        });

        assert!(report.is_clean());
        assert_eq!(
            report.attempted,
            [
                Sink::Persistence,
                Sink::MachineBroadcast,
                Sink::AttributeBroadcast,
                Sink::Gateway
            ]
        );

        let calls = recorder.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[0],
            Call::Numeric(TagWrite {
                name: "Area.speed".into(),
                value: value.clone()
            })
        );
        assert_eq!(calls[1], Call::Notify(Notification::MachineChanged(obs.snapshot.clone())));
        match &calls[2] {
            Call::Notify(Notification::AttributeChanged(update)) => {
                assert_eq!(update.folder_struct, ["Area", "Engines", "Pump1"]);
                assert_eq!(update.engine.len(), 1);
                assert_eq!(update.engine["speed"], value);
            }
            other => panic!("expected attribute delta, got {other:?}"),
        }
        match &calls[3] {
            Call::Gateway(update) => {
                assert_eq!(update.folder_struct, ["Area", "Engines", "Pump1"]);
                assert_eq!(update.engine, obs.snapshot);
            }
            other => panic!("expected gateway update, got {other:?}"),
        }
    }

    #[test]
    fn textual_values_use_string_endpoint() {
        let recorder = Arc::new(Recorder::default());
        let value = TagValue::from("running");
        let obs = observation("mode", value.clone());
        fanout(&recorder).dispatch(&TagChange {
            value: &value,
            logged: true,
            tag_name: None,
            observation: &obs,
        });
        assert_eq!(
            recorder.calls()[0],
            Call::Text(TagWrite {
                name: "mode".into(),
                value
            })
        );
    }

    #[test]
    fn unlogged_change_skips_persistence_but_reaches_gateway() {
        let recorder = Arc::new(Recorder::default());
        let value = TagValue::from(3);
        let obs = observation("count", value.clone());
        let report = fanout(&recorder).dispatch(&TagChange {
            value: &value,
            logged: false,
            tag_name: None,
            observation: &obs,
        });
        assert_eq!(report.attempted, [Sink::MachineBroadcast, Sink::Gateway]);
        match &recorder.calls()[1] {
            Call::Gateway(update) => assert_eq!(update.folder_struct[0], ""),
            other => panic!("expected gateway update, got {other:?}"),
        }
    }

    #[test]
    fn logged_only_policy_suppresses_gateway_for_unlogged_tags() {
        let recorder = Arc::new(Recorder::default());
        let value = TagValue::from(true);
        let obs = observation("running", value.clone());
        let report = fanout(&recorder)
            .with_policy(GatewayPolicy::LoggedOnly)
            .dispatch(&TagChange {
                value: &value,
                logged: false,
                tag_name: Some("running"),
                observation: &obs,
            });
        assert_eq!(
            report.attempted,
            [Sink::MachineBroadcast, Sink::AttributeBroadcast]
        );
    }

    #[test]
    fn failures_do_not_stop_later_sinks() {
        let recorder = Arc::new(Recorder {
            fail_persistence: true,
            fail_notify: true,
            ..Default::default()
        });
        let value = TagValue::from(1.0);
        let obs = observation("speed", value.clone());
        let report = fanout(&recorder).dispatch(&TagChange {
            value: &value,
            logged: true,
            tag_name: Some("speed"),
            observation: &obs,
        });
        assert_eq!(report.attempted.len(), 4);
        assert_eq!(report.failures.len(), 3);
        assert!(matches!(recorder.calls()[3], Call::Gateway(_)));
    }

    #[test]
    fn delta_falls_back_to_written_value_for_foreign_attribute() {
        let recorder = Arc::new(Recorder::default());
        let value = TagValue::from(4.0);
        let obs = observation("speed", value.clone());
        fanout(&recorder).dispatch(&TagChange {
            value: &value,
            logged: false,
            tag_name: Some("Line.rate"),
            observation: &obs,
        });
        match &recorder.calls()[1] {
            Call::Notify(Notification::AttributeChanged(update)) => {
                assert_eq!(update.engine["rate"], value);
            }
            other => panic!("expected attribute delta, got {other:?}"),
        }
    }
}
