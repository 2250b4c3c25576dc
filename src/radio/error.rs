//! 网关边界错误
//!
//! 能给出结构化错误种类的网关实现应填充 `kind`；只有原始文本的旧网关留空，
//! 由 `core::classifier` 按文本模式回退分类。

use thiserror::Error;

/// 网关可直接上报的结构化错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioErrorKind {
    RadioDisabled,
    PermissionDenied,
    NotInitialized,
    Discovery,
    Connection,
    PeerUnreachable,
}

/// 网关调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RadioError {
    pub kind: Option<RadioErrorKind>,
    pub message: String,
}

impl RadioError {
    pub fn new(kind: RadioErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            message: message.into(),
        }
    }

    /// 仅有描述文本的错误（旧网关）
    pub fn untyped(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
        }
    }
}
