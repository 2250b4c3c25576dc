//! 优雅关闭处理
//!
//! 监听 Ctrl+C / SIGTERM，收到信号或界面退出后执行会话拆除：
//! 取消发现定时器与接收循环、停止发现、退订网关事件。

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::SessionHandle;

/// 拆除会话的最长等待时间
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// 会话为何结束；只记录第一次触发的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 界面主循环自行退出（Ctrl+Q 等）
    AppExited,
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::AppExited => write!(f, "application exited"),
            ShutdownReason::Interrupt => write!(f, "Ctrl+C"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// 进程级关闭信号：一个取消令牌加上首个关闭原因
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 关闭时取消的令牌（模拟对端等后台任务监听它）
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            tracing::info!("Shutdown requested: {}", reason);
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 安装 Ctrl+C 与 SIGTERM 处理
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Terminate);
                }
            });
        }
    }
}

/// 拆除会话；超时只记录
pub async fn teardown_session(handle: SessionHandle) {
    tracing::info!("Tearing down P2P session...");
    match tokio::time::timeout(TEARDOWN_TIMEOUT, handle.shutdown()).await {
        Ok(()) => tracing::info!("P2P session closed"),
        Err(_) => tracing::warn!(
            "Session teardown timed out after {}s",
            TEARDOWN_TIMEOUT.as_secs()
        ),
    }
}

/// 运行主应用直到其结束或收到关闭信号，执行清理并返回关闭原因
pub async fn run_with_graceful_shutdown<F, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) -> ShutdownReason
where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();

    tokio::select! {
        _ = app => shutdown_manager.shutdown(ShutdownReason::AppExited),
        _ = shutdown_manager.token.cancelled() => {}
    }

    cleanup().await;
    shutdown_manager
        .reason()
        .unwrap_or(ShutdownReason::AppExited)
}
