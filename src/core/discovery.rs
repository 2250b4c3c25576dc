//! 发现循环：启动/停止对端发现，并在发现期间定时拉取对端列表
//!
//! 启动成功后：2 秒时提前刷新一次，随后每 10 秒刷新一次，直到停止或拆除。
//! 定时器由 CancellationToken 持有，任何时刻至多一个。

use std::time::Duration;

use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::orchestrator::Notice;
use crate::core::{DiscoveryPhase, Orchestrator, SessionError};

pub(crate) const DISCOVERY_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub(crate) const EARLY_REFRESH_DELAY: Duration = Duration::from_secs(2);

impl Orchestrator {
    /// 开始发现：先尝试停止上一轮（失败忽略），再启动并安装轮询定时器
    pub async fn start_discovery(&self) -> Result<(), SessionError> {
        if self.is_shut_down() {
            return Err(SessionError::Shutdown);
        }
        self.log_info("Starting peer discovery...");
        if let Err(e) = self.inner.gateway.stop_discovery().await {
            self.log_debug(format!("Ignoring stop before start: {e}"));
        }
        self.cancel_discovery_timer();

        match self.inner.gateway.start_discovery().await {
            Ok(status) => {
                self.log_info(format!("Peer discovery started: {status}"));
                let token = self.inner.shutdown.child_token();
                let shutdown = &self.inner.shutdown;
                let installed = self.update(|s| {
                    if shutdown.is_cancelled() {
                        return false;
                    }
                    s.discovery = DiscoveryPhase::Discovering;
                    // 并发启动时只保留最后安装的定时器
                    if let Some(old) = s.discovery_timer.replace(token.clone()) {
                        old.cancel();
                    }
                    true
                });
                if !installed {
                    self.log_debug("Session shut down; discovery timer not installed");
                    return Err(SessionError::Shutdown);
                }
                self.notify(Notice::Toast("Searching for nearby devices...".to_string()));
                self.spawn_discovery_timer(token);
                Ok(())
            }
            Err(e) => {
                self.update(|s| s.discovery = DiscoveryPhase::Idle);
                Err(self.surface("Start discovery", e.into()))
            }
        }
    }

    /// 停止发现。未在发现时只留一条日志。
    /// 停止命令失败时保留发现状态与定时器（反映最后已知结果），只记录不弹窗。
    pub async fn stop_discovery(&self) -> Result<(), SessionError> {
        if self.read(|s| s.discovery == DiscoveryPhase::Idle) {
            self.log_debug("Discovery not active; nothing to stop");
            return Ok(());
        }
        self.log_info("Stopping peer discovery...");
        match self.inner.gateway.stop_discovery().await {
            Ok(status) => {
                self.cancel_discovery_timer();
                self.update(|s| s.discovery = DiscoveryPhase::Idle);
                self.log_info(format!("Peer discovery stopped: {status}"));
                Ok(())
            }
            Err(e) => {
                let err: SessionError = e.into();
                let tag = err
                    .category()
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                self.log_warn(format!("[{tag}] Stop discovery failed: {err}"));
                Err(err)
            }
        }
    }

    /// 主动拉取一次对端列表；失败只记录
    pub async fn refresh_peer_list(&self) {
        match self.inner.gateway.available_peers().await {
            Ok(devices) => {
                self.log_debug(format!("Available peers refreshed: {} devices", devices.len()));
                self.apply_peers(devices);
            }
            Err(e) => self.log_warn(format!("Error refreshing peers: {e}")),
        }
    }

    pub(crate) fn cancel_discovery_timer(&self) {
        if let Some(token) = self.update(|s| s.discovery_timer.take()) {
            token.cancel();
        }
    }

    fn spawn_discovery_timer(&self, token: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            let first_periodic = Instant::now() + DISCOVERY_REFRESH_INTERVAL;
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(EARLY_REFRESH_DELAY) => {}
            }
            this.refresh_peer_list().await;

            let mut ticker = interval_at(first_periodic, DISCOVERY_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => this.refresh_peer_list().await,
                }
            }
            tracing::debug!("Discovery refresh timer stopped");
        });
    }
}
