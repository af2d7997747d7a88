pub mod auth;
pub mod bridge;
pub mod daq;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod services;

pub use auth::{AuthConfig, AuthError, AuthProvider, AuthServiceClient, TokenClaims, TokenValidator};
pub use bridge::{run_bridge, BridgeConfig};
pub use daq::DaqClient;
pub use hub::NotificationHub;
pub use metrics::{init_metrics, serve_metrics};
pub use protocol::{IncomingMessage, NotificationMsg, ProtocolVersion};
pub use services::ServiceEndpoints;
