//! 连接管理：选择设备、有界重试连接、断开、创建组
//!
//! 连接最多尝试 3 次，非最后一次失败后等待 1.5 秒；每次尝试后拉取一次连接信息，
//! 只有 `group_formed` 才算成功。断开时依次尝试 disconnect 与 remove_group，
//! 等待 1 秒后与网关对账。

use std::time::Duration;

use tokio::time::sleep;

use crate::core::orchestrator::{FlagGuard, Notice};
use crate::core::{ConnectPhase, ErrorCategory, Orchestrator, ReceivePhase, SessionError};
use crate::radio::{PeerDevice, RadioError};

pub(crate) const MAX_CONNECT_ATTEMPTS: u32 = 3;
pub(crate) const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(1500);
pub(crate) const DISCONNECT_SETTLE_DELAY: Duration = Duration::from_secs(1);

impl Orchestrator {
    /// 按地址选中设备；地址必须出现在当前设备列表中
    pub fn select_device(&self, address: &str) -> Result<PeerDevice, SessionError> {
        let found = self.update(|s| {
            let device = s.devices.iter().find(|d| d.address == address).cloned();
            if let Some(d) = &device {
                s.selected = Some(d.clone());
            }
            device
        });
        match found {
            Some(device) => {
                self.log_info(format!("Selected device: {}", device.label()));
                Ok(device)
            }
            None => {
                self.log_warn(format!("Cannot select unknown device {address}"));
                Err(SessionError::UnknownDevice(address.to_string()))
            }
        }
    }

    /// 连接当前选中的设备
    pub async fn connect_selected(&self) -> Result<u32, SessionError> {
        match self.read(|s| s.selected.clone()) {
            Some(peer) => self.connect(&peer).await,
            None => Err(self.surface("Connect", SessionError::NoDeviceSelected)),
        }
    }

    /// 连接对端，返回成功时的尝试序号。
    /// 已有连接流程进行中时直接拒绝；`connecting` 标志在任何退出路径上都会复位。
    pub async fn connect(&self, peer: &PeerDevice) -> Result<u32, SessionError> {
        let busy = self.update(|s| {
            if s.connect == ConnectPhase::Connecting {
                true
            } else {
                s.connect = ConnectPhase::Connecting;
                false
            }
        });
        if busy {
            return Err(self.surface("Connect", SessionError::Busy("Connection")));
        }
        let guard = FlagGuard::new(self, |s| s.connect = ConnectPhase::Idle);

        self.log_info(format!("Connecting to device: {}", peer.label()));
        self.notify(Notice::Toast(format!("Connecting to {}...", peer.label())));

        let mut last_error: Option<SessionError> = None;
        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            if self.is_shut_down() {
                self.log_debug("Session shut down; abandoning connection attempts");
                return Err(SessionError::Shutdown);
            }
            if attempt > 1 {
                self.log_info(format!(
                    "Retrying connection (attempt {attempt}/{MAX_CONNECT_ATTEMPTS})"
                ));
            }
            match self.try_connect_once(&peer.address).await {
                Ok(true) => {
                    self.log_info(format!("Connection established on attempt {attempt}"));
                    self.notify(Notice::Toast("Connected successfully!".to_string()));
                    drop(guard);
                    self.start_role_messaging().await;
                    return Ok(attempt);
                }
                Ok(false) => self.log_info(format!(
                    "Attempt {attempt}: connect accepted but group not formed yet"
                )),
                Err(e) => {
                    self.log_warn(format!("Connection attempt {attempt} failed: {e}"));
                    last_error = Some(e.into());
                }
            }
            if attempt < MAX_CONNECT_ATTEMPTS {
                sleep(CONNECT_RETRY_DELAY).await;
            }
        }

        self.log_warn(format!(
            "Failed to connect after {MAX_CONNECT_ATTEMPTS} attempts"
        ));
        let err = match last_error {
            Some(e)
                if matches!(
                    e.category(),
                    Some(ErrorCategory::PeerUnreachable | ErrorCategory::RadioDisabled)
                ) =>
            {
                e
            }
            _ => SessionError::ConnectExhausted(MAX_CONNECT_ATTEMPTS),
        };
        Err(self.surface("Connect", err))
    }

    /// 单次尝试：发出连接命令，再拉取连接信息并记录（不触发分发器逻辑）
    async fn try_connect_once(&self, address: &str) -> Result<bool, RadioError> {
        let status = self.inner.gateway.connect(address).await?;
        self.log_debug(format!("Connect command result: {status}"));
        let info = self.inner.gateway.connection_info().await?;
        let formed = info.as_ref().is_some_and(|i| i.group_formed);
        self.update(|s| s.connection = info);
        Ok(formed)
    }

    /// 断开：停止接收，依次尝试 disconnect 与 remove_group（各自失败只记录），
    /// 立即清空本地连接状态，等待 1 秒后对账。
    pub async fn disconnect(&self) {
        self.log_info("Disconnecting from device...");
        self.stop_receiving();

        match self.inner.gateway.disconnect().await {
            Ok(status) => self.log_info(format!("Disconnect result: {status}")),
            Err(e) => self.log_warn(format!("Disconnect command failed: {e}")),
        }
        match self.inner.gateway.remove_group().await {
            Ok(status) => self.log_info(format!("Remove group result: {status}")),
            Err(e) => self.log_warn(format!("Error removing group: {e}")),
        }

        self.update(|s| {
            s.connection = None;
            s.group_info = None;
            s.connect = ConnectPhase::Idle;
            s.receive = ReceivePhase::Idle;
            if let Some(token) = s.receive_token.take() {
                token.cancel();
            }
        });

        sleep(DISCONNECT_SETTLE_DELAY).await;
        self.reconcile_connection_info().await;
        self.notify(Notice::Toast("Disconnected".to_string()));
    }

    /// 本机创建组（成为组主），随后对账连接信息
    pub async fn create_group(&self) -> Result<(), SessionError> {
        self.log_info("Creating group...");
        match self.inner.gateway.create_group().await {
            Ok(status) => {
                self.log_info(format!("Create group result: {status}"));
                self.reconcile_connection_info().await;
                Ok(())
            }
            Err(e) => Err(self.surface("Create group", e.into())),
        }
    }
}
