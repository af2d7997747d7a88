//! Simulated storage tank run by the scan loop.
//!
//! The inflow setpoint is read from the store each cycle, the level is
//! integrated, and a two-point controller opens the outlet at the high mark
//! and closes it at the low mark. Level and outlet state are written back as
//! one output group. The tank's model only sees a level change once it
//! exceeds the deadband, which keeps the sinks from firing every cycle.

use std::sync::{Arc, LazyLock};
use tag_core::schema::FieldSpec;
use tag_core::{
    Binding, BindingError, CycleInfo, Direction, GroupBinding, MemoryTagStore, Model, ModelError,
    ModelKind, ScanTask, Schema, Snapshot, StoreError, SyncFanout, TagBinding, TagValue,
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SETPOINT_TAG: &str = "FIC01.setpoint";
pub const LEVEL_TAG: &str = "TK01.level";
pub const OUTLET_TAG: &str = "TK01.outlet";
pub const OUTPUT_GROUP: &str = "TK01.outputs";
/// Key the tank model's record is saved under.
pub const RECORD_TAG: &str = "tank-01";

pub const DEFAULT_INFLOW_PCT_S: f64 = 8.0;

pub struct TankEngine;

impl ModelKind for TankEngine {
    const TYPE_NAME: &'static str = "TankEngine";

    fn schema() -> &'static Schema {
        static SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
            Schema::builder()
                .field(FieldSpec::string("name").default_value("Tank-01"))
                .field(FieldSpec::float("level").unit("%").logged().tag("Plant.level"))
                .field(FieldSpec::float("inflow").unit("%/s").tag("Plant.inflow"))
                .field(FieldSpec::boolean("outlet_open").tag("Plant.outlet_open"))
                .field(FieldSpec::string("state").logged().default_value("filling"))
                .build()
        });
        &SCHEMA
    }
}

#[derive(Debug, Error)]
pub enum PlantError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Defines the tank's tags and output group.
pub fn provision(store: &MemoryTagStore) -> Result<(), StoreError> {
    store.define_tag(SETPOINT_TAG, DEFAULT_INFLOW_PCT_S)?;
    store.define_tag(LEVEL_TAG, 0.0)?;
    store.define_tag(OUTLET_TAG, false)?;
    store.define_group(OUTPUT_GROUP, &[LEVEL_TAG, OUTLET_TAG])
}

#[derive(Debug, Clone)]
pub struct TankParams {
    pub high_pct: f64,
    pub low_pct: f64,
    pub drain_pct_s: f64,
    pub deadband_pct: f64,
}

impl Default for TankParams {
    fn default() -> Self {
        Self {
            high_pct: 80.0,
            low_pct: 20.0,
            drain_pct_s: 12.0,
            deadband_pct: 1.0,
        }
    }
}

pub struct TankTask {
    model: Model,
    bindings: Vec<Binding>,
    level: f64,
    outlet_open: bool,
    params: TankParams,
}

impl TankTask {
    pub fn new(
        store: Arc<MemoryTagStore>,
        fanout: Option<Arc<SyncFanout>>,
        params: TankParams,
    ) -> Result<Self, PlantError> {
        let mut model = Model::new::<TankEngine>(store.clone(), &Snapshot::new())?;
        model.set_tag(RECORD_TAG);
        if let Some(fanout) = fanout {
            model.attach_fanout(fanout);
        }

        let bindings = vec![
            TagBinding::new(SETPOINT_TAG, Direction::Read, store.clone()).into(),
            GroupBinding::new(OUTPUT_GROUP, Direction::Write, store)?.into(),
        ];

        let level = model.value("level").and_then(TagValue::as_f64).unwrap_or_default();
        let outlet_open = model
            .value("outlet_open")
            .and_then(TagValue::as_bool)
            .unwrap_or_default();
        info!(display_name = %model.display_name(), level, "tank model ready");

        Ok(Self {
            model,
            bindings,
            level,
            outlet_open,
            params,
        })
    }

    #[cfg(test)]
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn publish(&mut self, attribute: &str, value: TagValue) {
        match self.model.set_attr(attribute, value) {
            Ok(Some(report)) if !report.is_clean() => {
                debug!(attribute, failures = report.failures.len(), "tag change partially delivered")
            }
            Ok(_) => {}
            Err(e) => warn!(attribute, error = %e, "tank attribute update rejected"),
        }
    }

    fn inflow(&self) -> f64 {
        self.bindings[0]
            .as_tag()
            .and_then(TagBinding::value)
            .and_then(TagValue::as_f64)
            .unwrap_or_default()
            .max(0.0)
    }
}

impl ScanTask for TankTask {
    fn name(&self) -> &str {
        "tank"
    }

    fn bindings_mut(&mut self) -> &mut [Binding] {
        &mut self.bindings
    }

    fn execute(&mut self, cycle: &CycleInfo) {
        let dt = cycle.cycle_time.as_secs_f64();
        let inflow = self.inflow();
        let outflow = if self.outlet_open {
            self.params.drain_pct_s
        } else {
            0.0
        };
        self.level = (self.level + (inflow - outflow) * dt).clamp(0.0, 100.0);

        let switch = if self.outlet_open {
            self.level <= self.params.low_pct
        } else {
            self.level >= self.params.high_pct
        };
        if switch {
            self.outlet_open = !self.outlet_open;
            info!(level = self.level, outlet_open = self.outlet_open, "tank outlet switched");
            self.publish("outlet_open", TagValue::from(self.outlet_open));
            let state = if self.outlet_open { "draining" } else { "filling" };
            self.publish("state", TagValue::from(state));
        }

        if self.model.value("inflow").and_then(TagValue::as_f64) != Some(inflow) {
            self.publish("inflow", TagValue::from(inflow));
        }

        let reported = self.model.value("level").and_then(TagValue::as_f64).unwrap_or_default();
        if (self.level - reported).abs() >= self.params.deadband_pct {
            self.publish("level", TagValue::from(self.level));
        }

        if let Some(outputs) = self.bindings[1].as_group_mut() {
            let level = TagValue::from(self.level);
            let outlet = TagValue::from(self.outlet_open);
            if let Err(e) = outputs
                .set_value(LEVEL_TAG, level)
                .and_then(|()| outputs.set_value(OUTLET_TAG, outlet))
            {
                warn!(error = %e, "tank outputs not staged");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tag_core::fanout::MACHINE_CHANGED;
    use tag_core::{
        EngineUpdate, GatewaySink, Notification, Notifier, PersistenceSink, ScanConfig, ScanLoop,
        SinkError, TagStore, TagWrite,
    };

    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<String>>,
    }

    impl Journal {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl PersistenceSink for Journal {
        fn write_tag(&self, write: &TagWrite) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(format!("tag {}", write.name));
            Ok(())
        }

        fn write_string_tag(&self, write: &TagWrite) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(format!("str {}={}", write.name, write.value));
            Ok(())
        }
    }

    impl Notifier for Journal {
        fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(notification.event().to_string());
            Ok(())
        }
    }

    impl GatewaySink for Journal {
        fn update_engine(&self, _update: &EngineUpdate) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn scan_with_tank(params: TankParams) -> (Arc<MemoryTagStore>, Arc<Journal>, ScanLoop) {
        let store = Arc::new(MemoryTagStore::new());
        provision(&store).unwrap();
        let journal = Arc::new(Journal::default());
        let fanout = Arc::new(SyncFanout::new(
            journal.clone(),
            journal.clone(),
            journal.clone(),
        ));
        let tank = TankTask::new(store.clone(), Some(fanout), params).unwrap();
        let mut scan = ScanLoop::new(ScanConfig {
            cycle_time: Duration::from_millis(100),
            ..Default::default()
        });
        scan.add_task(tank);
        (store, journal, scan)
    }

    #[test]
    fn level_rises_and_reaches_the_store() {
        let (store, journal, mut scan) = scan_with_tank(TankParams::default());
        for _ in 0..5 {
            scan.run_cycle();
        }
        let level = store.read_tag(LEVEL_TAG).unwrap().as_f64().unwrap();
        assert!((level - 4.0).abs() < 1e-9, "level was {level}");
        assert_eq!(store.read_tag(OUTLET_TAG).unwrap(), TagValue::Boolean(false));
        assert!(journal.events().iter().any(|e| e == "tag Plant.level"));
        assert!(journal.events().iter().any(|e| e == MACHINE_CHANGED));
        assert_eq!(scan.stats().binding_failures, 0);

        let record = store.read_record(RECORD_TAG).unwrap();
        assert!(record["level"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn outlet_opens_at_high_mark_and_closes_at_low_mark() {
        let params = TankParams {
            high_pct: 2.0,
            low_pct: 1.0,
            drain_pct_s: 20.0,
            deadband_pct: 0.1,
        };
        let (store, journal, mut scan) = scan_with_tank(params);

        for _ in 0..3 {
            scan.run_cycle();
        }
        assert_eq!(store.read_tag(OUTLET_TAG).unwrap(), TagValue::Boolean(true));
        assert!(journal.events().contains(&"str state=draining".to_string()));

        for _ in 0..2 {
            scan.run_cycle();
        }
        assert_eq!(store.read_tag(OUTLET_TAG).unwrap(), TagValue::Boolean(false));
        assert!(journal.events().contains(&"str state=filling".to_string()));
    }

    #[test]
    fn setpoint_changes_are_picked_up_next_cycle() {
        let store = Arc::new(MemoryTagStore::new());
        provision(&store).unwrap();
        let mut tank = TankTask::new(store.clone(), None, TankParams::default()).unwrap();
        let mut scan_stub = || {
            for binding in tank.bindings_mut() {
                if binding.direction() == Direction::Read {
                    binding.update().unwrap();
                }
            }
            tank.execute(&CycleInfo {
                cycle: 0,
                elapsed: Duration::ZERO,
                cycle_time: Duration::from_secs(1),
            });
        };
        scan_stub();
        store.write_tag(SETPOINT_TAG, TagValue::from(0.0)).unwrap();
        scan_stub();
        assert_eq!(tank.model().get_attr("inflow").unwrap(), &TagValue::Float(0.0));
        assert_eq!(tank.model().get_attr("level").unwrap(), &TagValue::Float(8.0));
    }

    #[test]
    fn model_defaults_come_from_schema() {
        let store = Arc::new(MemoryTagStore::new());
        provision(&store).unwrap();
        let tank = TankTask::new(store, None, TankParams::default()).unwrap();
        assert_eq!(tank.model().display_name(), "Tank-01");
        assert_eq!(tank.model().get_attr("state").unwrap(), &TagValue::from("filling"));
        assert_eq!(tank.model().get_attr("outlet_open").unwrap(), &TagValue::Boolean(false));
    }
}
