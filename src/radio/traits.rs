//! 能力网关抽象
//!
//! 底层无线栈（广播发现、组形成、套接字传输）由外部实现；编排层只通过 CapabilityGateway
//! 调用命令、通过订阅接收对端/连接变更事件。平台权限走 PermissionGateway。

use std::sync::Arc;

use async_trait::async_trait;

use crate::radio::{
    ConnectionInfo, GroupInfo, PeerDevice, Permission, PermissionStatus, RadioError, SendReceipt,
};

/// 对端列表变更回调
pub type PeersHandler = Arc<dyn Fn(Vec<PeerDevice>) + Send + Sync>;
/// 连接信息变更回调；`None` 表示网关未给出任何信息
pub type ConnectionInfoHandler = Arc<dyn Fn(Option<ConnectionInfo>) + Send + Sync>;

/// 事件订阅句柄；必须显式 `remove`，丢弃句柄不会退订
pub struct Subscription {
    remover: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(remover: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remover: Some(Box::new(remover)),
        }
    }

    pub fn remove(mut self) {
        if let Some(remover) = self.remover.take() {
            remover();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remover.is_some())
            .finish()
    }
}

/// 无线能力网关：所有命令均为异步，挂起调用方直到完成
#[async_trait]
pub trait CapabilityGateway: Send + Sync {
    /// 必须在其它任何操作之前调用一次
    async fn initialize(&self) -> Result<(), RadioError>;

    async fn start_discovery(&self) -> Result<String, RadioError>;

    async fn stop_discovery(&self) -> Result<String, RadioError>;

    /// 当前对端列表快照（重新查询，不会重新广播）
    async fn available_peers(&self) -> Result<Vec<PeerDevice>, RadioError>;

    async fn connect(&self, address: &str) -> Result<String, RadioError>;

    async fn disconnect(&self) -> Result<String, RadioError>;

    async fn create_group(&self) -> Result<String, RadioError>;

    async fn remove_group(&self) -> Result<String, RadioError>;

    async fn connection_info(&self) -> Result<Option<ConnectionInfo>, RadioError>;

    /// 组信息暂不可用时返回错误
    async fn group_info(&self) -> Result<GroupInfo, RadioError>;

    async fn send_message(&self, payload: &str) -> Result<SendReceipt, RadioError>;

    /// 挂起直到恰好收到一条消息；进行中的调用无法被取消
    async fn receive_message(&self) -> Result<String, RadioError>;

    fn subscribe_peers(&self, handler: PeersHandler) -> Subscription;

    fn subscribe_connection_info(&self, handler: ConnectionInfoHandler) -> Subscription;
}

/// 平台权限与系统设置入口
#[async_trait]
pub trait PermissionGateway: Send + Sync {
    async fn check(&self, permission: Permission) -> Result<bool, RadioError>;

    async fn request(&self, permission: Permission) -> Result<PermissionStatus, RadioError>;

    async fn request_multiple(
        &self,
        permissions: &[Permission],
    ) -> Result<Vec<(Permission, PermissionStatus)>, RadioError>;

    /// 打开系统无线设置页（用户手动开启 Wi-Fi）
    async fn open_settings(&self) -> Result<(), RadioError>;
}
