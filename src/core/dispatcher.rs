//! 事件分发器：把网关回调转成有序的状态变更
//!
//! 回调只把事件推入 mpsc 队列；分发器任务按到达顺序逐个处理，
//! 因而一个事件的同步状态更新总是在下一个事件之前完成。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::core::orchestrator::{lock, GatewayEvent, Notice};
use crate::core::{DiscoveryPhase, Orchestrator, SenderRole};
use crate::radio::{ConnectionInfo, ConnectionInfoHandler, GroupInfo, PeerDevice, PeersHandler};

pub(crate) const GROUP_INFO_ATTEMPTS: u32 = 5;
pub(crate) const GROUP_INFO_RETRY_DELAY: Duration = Duration::from_secs(1);

fn describe(info: &Option<ConnectionInfo>) -> String {
    match info {
        Some(i) if i.group_formed => format!(
            "group formed, {} (owner {})",
            if i.is_group_owner { "local is owner" } else { "local is client" },
            i.group_owner_address.as_deref().unwrap_or("?")
        ),
        Some(_) => "no group".to_string(),
        None => "none".to_string(),
    }
}

impl Orchestrator {
    /// 订阅两类网关事件（只做一次）并启动分发器任务
    pub(crate) fn subscribe_events(&self) {
        {
            let mut subs = lock(&self.inner.subscriptions);
            if subs.peers.is_none() {
                let tx = self.inner.events_tx.clone();
                let handler: PeersHandler = Arc::new(move |devices| {
                    let _ = tx.send(GatewayEvent::Peers(devices));
                });
                subs.peers = Some(self.inner.gateway.subscribe_peers(handler));
            }
            if subs.connection.is_none() {
                subs.connection = Some(
                    self.inner
                        .gateway
                        .subscribe_connection_info(self.connection_handler()),
                );
            }
        }
        if let Some(rx) = lock(&self.inner.events_rx).take() {
            let this = self.clone();
            tokio::spawn(async move { this.run_dispatcher(rx).await });
            self.log_debug("Event listeners registered");
        }
    }

    fn connection_handler(&self) -> ConnectionInfoHandler {
        let tx = self.inner.events_tx.clone();
        Arc::new(move |info| {
            let _ = tx.send(GatewayEvent::Connection(info));
        })
    }

    /// 退订并重新订阅连接信息事件（停止接收时调用）
    pub(crate) fn reset_connection_subscription(&self) {
        let old = lock(&self.inner.subscriptions).connection.take();
        let Some(old) = old else {
            return;
        };
        old.remove();
        let fresh = self
            .inner
            .gateway
            .subscribe_connection_info(self.connection_handler());
        lock(&self.inner.subscriptions).connection = Some(fresh);
        self.log_debug("Reset connection info subscription");
    }

    async fn run_dispatcher(self, mut rx: mpsc::UnboundedReceiver<GatewayEvent>) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(GatewayEvent::Peers(devices)) => self.apply_peers(devices),
                    Some(GatewayEvent::Connection(info)) => self.apply_connection_info(info),
                    None => break,
                },
            }
        }
        tracing::debug!("Event dispatcher stopped");
    }

    /// 原样替换设备列表；由空变为非空时通知一次
    pub(crate) fn apply_peers(&self, devices: Vec<PeerDevice>) {
        let count = devices.len();
        let found = self.update(|s| {
            let was_empty = s.devices.is_empty();
            s.devices = devices;
            was_empty && count > 0
        });
        self.log_info(format!("Peers updated: {count} devices found"));
        if found {
            self.notify(Notice::DevicesFound(count));
        }
    }

    /// 处理连接信息变更。
    ///
    /// 组已形成：停止发现，客户端立即确保不在接收；随后拉取组信息，组主再启动接收。
    /// 组不存在：停止接收并清空组信息。
    pub(crate) fn apply_connection_info(&self, info: Option<ConnectionInfo>) {
        let formed = info.as_ref().is_some_and(|i| i.group_formed);
        let is_owner = formed && info.as_ref().is_some_and(|i| i.is_group_owner);
        self.log_info(format!("Connection info updated: {}", describe(&info)));

        let discovering = self.update(|s| {
            s.connection = info;
            if !formed {
                s.group_info = None;
            }
            s.discovery == DiscoveryPhase::Discovering
        });

        if !formed {
            self.stop_receiving();
            return;
        }
        if discovering {
            let this = self.clone();
            tokio::spawn(async move {
                let _ = this.stop_discovery().await;
            });
        }
        if !is_owner {
            self.stop_receiving();
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.fetch_group_info().await;
            if is_owner {
                let _ = this.start_receiving().await;
            }
        });
    }

    /// 主动拉取连接信息并按事件同样处理；失败只记录
    pub async fn reconcile_connection_info(&self) {
        match self.inner.gateway.connection_info().await {
            Ok(info) => self.apply_connection_info(info),
            Err(e) => self.log_warn(format!("Error getting connection info: {e}")),
        }
    }

    /// 拉取组信息，最多 5 次、间隔 1 秒。本机为组主时记下本机设备身份。
    pub async fn fetch_group_info(&self) -> Option<GroupInfo> {
        for attempt in 1..=GROUP_INFO_ATTEMPTS {
            if self.is_shut_down() {
                return None;
            }
            match self.inner.gateway.group_info().await {
                Ok(group) => {
                    self.log_info(format!(
                        "Group info: {} ({} clients)",
                        group.network_name,
                        group.clients.len()
                    ));
                    self.update(|s| {
                        if s.local_role() == SenderRole::GroupOwner {
                            s.this_device = Some(group.owner.clone());
                        }
                        s.group_info = Some(group.clone());
                    });
                    return Some(group);
                }
                Err(e) => {
                    self.log_debug(format!(
                        "Group info attempt {attempt}/{GROUP_INFO_ATTEMPTS} failed: {e}"
                    ));
                    if attempt < GROUP_INFO_ATTEMPTS {
                        sleep(GROUP_INFO_RETRY_DELAY).await;
                    }
                }
            }
        }
        self.log_warn(format!(
            "Could not get group info after {GROUP_INFO_ATTEMPTS} attempts"
        ));
        None
    }
}
