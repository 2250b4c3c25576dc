//! 会话错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ErrorCategory 决定弹出选择（AskUser）还是仅提示（Notify）。

use serde::Serialize;
use thiserror::Error;

/// 错误类别（分类器输出）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    RadioDisabled,
    Permission,
    Initialization,
    Discovery,
    Connection,
    /// 网关把对端 MAC 地址原样当作错误抛出
    PeerUnreachable,
    General,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::RadioDisabled => write!(f, "RADIO_DISABLED"),
            ErrorCategory::Permission => write!(f, "PERMISSION"),
            ErrorCategory::Initialization => write!(f, "INITIALIZATION"),
            ErrorCategory::Discovery => write!(f, "DISCOVERY"),
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::PeerUnreachable => write!(f, "PEER_UNREACHABLE"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}

/// 编排层可能出现的错误：前七种来自网关并已分类，其余为用法错误（不触达传输层）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Wi-Fi P2P is disabled or unsupported: {0}")]
    RadioDisabled(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Initialization failed: {0}")]
    InitializationFailure(String),

    #[error("Discovery failed: {0}")]
    DiscoveryFailure(String),

    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    #[error("Peer {0} is unreachable")]
    PeerUnreachable(String),

    #[error("{0}")]
    GeneralFailure(String),

    #[error("Not connected")]
    NotConnected,

    #[error("As group owner you receive messages; you cannot send")]
    OwnerCannotSend,

    #[error("Only the group owner may receive messages; clients only send")]
    ClientCannotReceive,

    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("{0} already in progress")]
    Busy(&'static str),

    #[error("Failed to connect after {0} attempts")]
    ConnectExhausted(u32),

    #[error("Session has shut down")]
    Shutdown,
}

impl SessionError {
    pub fn from_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        let message = message.into();
        match category {
            ErrorCategory::RadioDisabled => SessionError::RadioDisabled(message),
            ErrorCategory::Permission => SessionError::PermissionDenied(message),
            ErrorCategory::Initialization => SessionError::InitializationFailure(message),
            ErrorCategory::Discovery => SessionError::DiscoveryFailure(message),
            ErrorCategory::Connection => SessionError::ConnectionFailure(message),
            ErrorCategory::PeerUnreachable => SessionError::PeerUnreachable(message),
            ErrorCategory::General => SessionError::GeneralFailure(message),
        }
    }

    /// 错误类别；用法错误返回 None
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            SessionError::RadioDisabled(_) => Some(ErrorCategory::RadioDisabled),
            SessionError::PermissionDenied(_) => Some(ErrorCategory::Permission),
            SessionError::InitializationFailure(_) => Some(ErrorCategory::Initialization),
            SessionError::DiscoveryFailure(_) => Some(ErrorCategory::Discovery),
            SessionError::ConnectionFailure(_) | SessionError::ConnectExhausted(_) => {
                Some(ErrorCategory::Connection)
            }
            SessionError::PeerUnreachable(_) => Some(ErrorCategory::PeerUnreachable),
            SessionError::GeneralFailure(_) => Some(ErrorCategory::General),
            _ => None,
        }
    }
}

/// 恢复选项（由展示层回传给编排器执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryChoice {
    /// 打开系统无线设置
    OpenSettings,
    /// 延迟后重跑完整初始化流程
    RetryInitialization,
    RefreshPeers,
    DisconnectAndRediscover,
    RecheckConnection,
    /// 延迟后重试连接当前选中设备
    RetryConnect,
    Dismiss,
}

impl RecoveryChoice {
    pub fn label(&self) -> &'static str {
        match self {
            RecoveryChoice::OpenSettings => "Open settings",
            RecoveryChoice::RetryInitialization => "Retry",
            RecoveryChoice::RefreshPeers => "Refresh peers",
            RecoveryChoice::DisconnectAndRediscover => "Disconnect & rediscover",
            RecoveryChoice::RecheckConnection => "Check connection",
            RecoveryChoice::RetryConnect => "Retry",
            RecoveryChoice::Dismiss => "Dismiss",
        }
    }
}

/// 需要用户决策的阻塞式选择
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryPrompt {
    pub category: ErrorCategory,
    pub title: String,
    pub message: String,
    pub choices: Vec<RecoveryChoice>,
}

/// 恢复引擎根据错误类别给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 弹出选择，由用户决定
    AskUser(RecoveryPrompt),
    /// 仅记录并短暂提示，不自动重试
    Notify(String),
}
