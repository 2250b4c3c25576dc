//! 无线能力边界：网关 trait、数据快照、错误与内存模拟实现

pub mod error;
pub mod simulated;
pub mod traits;
pub mod types;

pub use error::{RadioError, RadioErrorKind};
pub use simulated::{SimulatedPermissions, SimulatedRadio, SIMULATED_LOCAL_ADDRESS};
pub use traits::{
    CapabilityGateway, ConnectionInfoHandler, PeersHandler, PermissionGateway, Subscription,
};
pub use types::{
    ConnectionInfo, GroupInfo, PeerDevice, Permission, PermissionStatus, SendReceipt,
};
