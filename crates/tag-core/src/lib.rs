pub mod binding;
pub mod cell;
pub mod fanout;
pub mod model;
pub mod scan;
pub mod schema;
pub mod store;
pub mod value;

pub use binding::{Binding, BindingError, Direction, GroupBinding, TagBinding};
pub use cell::TagCell;
pub use fanout::{
    EngineUpdate, FanoutReport, GatewayPolicy, GatewaySink, Notification, Notifier,
    PersistenceSink, Sink, SinkError, SyncFanout, TagWrite,
};
pub use model::{Model, ModelError, ModelKind};
pub use scan::{CycleInfo, ExecutionStats, ScanConfig, ScanLoop, ScanTask};
pub use schema::{FieldSpec, Schema};
pub use store::{MemoryTagStore, StoreError, TagStore};
pub use value::{Snapshot, TagKind, TagValue, TypeMismatch};
