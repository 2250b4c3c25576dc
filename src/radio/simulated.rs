//! 内存模拟网关（无需真实无线硬件）
//!
//! 供 TUI 演示与测试使用：可预置对端、脚本化连接结果、注入入站消息与错误、
//! 手动触发网关事件，并统计每种调用的次数。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::radio::{
    CapabilityGateway, ConnectionInfo, ConnectionInfoHandler, GroupInfo, PeerDevice, PeersHandler,
    Permission, PermissionGateway, PermissionStatus, RadioError, SendReceipt, Subscription,
};

/// 模拟网关自身的设备地址
pub const SIMULATED_LOCAL_ADDRESS: &str = "02:00:00:00:00:01";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct Handlers {
    peers: HashMap<u64, PeersHandler>,
    connection: HashMap<u64, ConnectionInfoHandler>,
}

struct SimState {
    peers: Vec<PeerDevice>,
    local_is_owner: bool,
    connection: Option<ConnectionInfo>,
    group: Option<GroupInfo>,
    /// 组形成后 group_info 仍返回错误的次数
    group_info_lag: u32,
    /// 连接命令返回成功但组尚未形成的次数
    unformed_connects: u32,
    emit_events: bool,
    /// 指定操作在返回前挂起的时长
    latency: HashMap<&'static str, Duration>,
    failures: HashMap<&'static str, VecDeque<RadioError>>,
    calls: HashMap<&'static str, usize>,
    sent: Vec<String>,
}

/// 可脚本化的内存网关
pub struct SimulatedRadio {
    state: Mutex<SimState>,
    handlers: Arc<Mutex<Handlers>>,
    next_handler_id: AtomicU64,
    inbound_tx: mpsc::UnboundedSender<Result<String, RadioError>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String, RadioError>>>,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(SimState {
                peers: Vec::new(),
                local_is_owner: false,
                connection: None,
                group: None,
                group_info_lag: 0,
                unformed_connects: 0,
                emit_events: true,
                latency: HashMap::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                sent: Vec::new(),
            }),
            handlers: Arc::new(Mutex::new(Handlers::default())),
            next_handler_id: AtomicU64::new(0),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    /// 发现启动时可见的对端
    pub fn with_peers(self, peers: Vec<PeerDevice>) -> Self {
        lock(&self.state).peers = peers;
        self
    }

    /// 组形成后本机是否为组主
    pub fn as_group_owner(self, owner: bool) -> Self {
        lock(&self.state).local_is_owner = owner;
        self
    }

    /// 关闭后命令不再自动推送事件（仅测试手动 emit）
    pub fn without_events(self) -> Self {
        lock(&self.state).emit_events = false;
        self
    }

    pub fn with_group_info_lag(self, attempts: u32) -> Self {
        lock(&self.state).group_info_lag = attempts;
        self
    }

    /// 让指定操作每次调用都先挂起一段时间
    pub fn with_latency(self, op: &'static str, latency: Duration) -> Self {
        lock(&self.state).latency.insert(op, latency);
        self
    }

    /// 接下来 n 次连接命令成功返回但组不形成
    pub fn with_unformed_connects(self, n: u32) -> Self {
        lock(&self.state).unformed_connects = n;
        self
    }

    /// 让指定操作的下一次调用失败（可多次排队）
    pub fn fail_next(&self, op: &'static str, err: RadioError) {
        lock(&self.state)
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// 预置已形成的连接（不推送事件）
    pub fn set_connection(&self, info: Option<ConnectionInfo>) {
        let mut st = lock(&self.state);
        st.group = match &info {
            Some(i) if i.group_formed => Some(simulated_group(i.is_group_owner)),
            _ => None,
        };
        st.connection = info;
    }

    /// 注入一条入站消息，供 receive_message 返回
    pub fn inject_message(&self, payload: impl Into<String>) {
        let _ = self.inbound_tx.send(Ok(payload.into()));
    }

    pub fn inject_receive_error(&self, err: RadioError) {
        let _ = self.inbound_tx.send(Err(err));
    }

    /// 推送对端列表变更事件
    pub fn emit_peers(&self, peers: Vec<PeerDevice>) {
        lock(&self.state).peers = peers.clone();
        let handlers: Vec<PeersHandler> = lock(&self.handlers).peers.values().cloned().collect();
        for handler in handlers {
            handler(peers.clone());
        }
    }

    /// 推送连接信息变更事件
    pub fn emit_connection(&self, info: Option<ConnectionInfo>) {
        self.set_connection(info.clone());
        let handlers: Vec<ConnectionInfoHandler> =
            lock(&self.handlers).connection.values().cloned().collect();
        for handler in handlers {
            handler(info.clone());
        }
    }

    /// 某操作被调用的次数
    pub fn calls(&self, op: &str) -> usize {
        lock(&self.state).calls.get(op).copied().unwrap_or(0)
    }

    /// 已发送的原始载荷
    pub fn sent_payloads(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    pub fn peer_subscribers(&self) -> usize {
        lock(&self.handlers).peers.len()
    }

    pub fn connection_subscribers(&self) -> usize {
        lock(&self.handlers).connection.len()
    }

    /// 记录调用并弹出预置失败
    fn enter(&self, op: &'static str) -> Result<(), RadioError> {
        let mut st = lock(&self.state);
        *st.calls.entry(op).or_default() += 1;
        match st.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn call(&self, op: &'static str) -> Result<(), RadioError> {
        let latency = lock(&self.state).latency.get(op).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.enter(op)
    }

    fn emit_events_enabled(&self) -> bool {
        lock(&self.state).emit_events
    }

    fn next_id(&self) -> u64 {
        self.next_handler_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn simulated_group(local_is_owner: bool) -> GroupInfo {
    let owner_address = if local_is_owner {
        SIMULATED_LOCAL_ADDRESS
    } else {
        "02:00:00:00:00:aa"
    };
    GroupInfo {
        owner: PeerDevice::new(owner_address, Some("simulated-owner")),
        network_name: "DIRECT-pl-peerlink".to_string(),
        passphrase: "peerlink-sim".to_string(),
        clients: vec![PeerDevice::new("02:00:00:00:00:bb", Some("simulated-client"))],
    }
}

#[async_trait]
impl CapabilityGateway for SimulatedRadio {
    async fn initialize(&self) -> Result<(), RadioError> {
        self.call("initialize").await
    }

    async fn start_discovery(&self) -> Result<String, RadioError> {
        self.call("start_discovery").await?;
        if self.emit_events_enabled() {
            let peers = lock(&self.state).peers.clone();
            self.emit_peers(peers);
        }
        Ok("discovery started".to_string())
    }

    async fn stop_discovery(&self) -> Result<String, RadioError> {
        self.call("stop_discovery").await?;
        Ok("discovery stopped".to_string())
    }

    async fn available_peers(&self) -> Result<Vec<PeerDevice>, RadioError> {
        self.call("available_peers").await?;
        Ok(lock(&self.state).peers.clone())
    }

    async fn connect(&self, address: &str) -> Result<String, RadioError> {
        self.call("connect").await?;
        let info = {
            let mut st = lock(&self.state);
            if st.unformed_connects > 0 {
                st.unformed_connects -= 1;
                return Ok(format!("connection to {address} requested"));
            }
            let owner_address = if st.local_is_owner {
                SIMULATED_LOCAL_ADDRESS.to_string()
            } else {
                address.to_string()
            };
            ConnectionInfo::formed(st.local_is_owner, owner_address)
        };
        if self.emit_events_enabled() {
            self.emit_connection(Some(info));
        } else {
            self.set_connection(Some(info));
        }
        Ok(format!("connected to {address}"))
    }

    async fn disconnect(&self) -> Result<String, RadioError> {
        self.call("disconnect").await?;
        if self.emit_events_enabled() {
            self.emit_connection(Some(ConnectionInfo::default()));
        } else {
            self.set_connection(Some(ConnectionInfo::default()));
        }
        Ok("disconnected".to_string())
    }

    async fn create_group(&self) -> Result<String, RadioError> {
        self.call("create_group").await?;
        lock(&self.state).local_is_owner = true;
        let info = ConnectionInfo::formed(true, SIMULATED_LOCAL_ADDRESS);
        if self.emit_events_enabled() {
            self.emit_connection(Some(info));
        } else {
            self.set_connection(Some(info));
        }
        Ok("group created".to_string())
    }

    async fn remove_group(&self) -> Result<String, RadioError> {
        self.call("remove_group").await?;
        self.set_connection(Some(ConnectionInfo::default()));
        Ok("group removed".to_string())
    }

    async fn connection_info(&self) -> Result<Option<ConnectionInfo>, RadioError> {
        self.call("connection_info").await?;
        Ok(lock(&self.state).connection.clone())
    }

    async fn group_info(&self) -> Result<GroupInfo, RadioError> {
        self.call("group_info").await?;
        let mut st = lock(&self.state);
        if st.group_info_lag > 0 && st.group.is_some() {
            st.group_info_lag -= 1;
            return Err(RadioError::untyped("group info not yet available"));
        }
        st.group
            .clone()
            .ok_or_else(|| RadioError::untyped("no group formed"))
    }

    async fn send_message(&self, payload: &str) -> Result<SendReceipt, RadioError> {
        self.call("send_message").await?;
        lock(&self.state).sent.push(payload.to_string());
        Ok(SendReceipt {
            bytes: payload.len(),
        })
    }

    async fn receive_message(&self) -> Result<String, RadioError> {
        self.call("receive_message").await?;
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(result) => result,
            None => Err(RadioError::untyped("transport closed")),
        }
    }

    fn subscribe_peers(&self, handler: PeersHandler) -> Subscription {
        let id = self.next_id();
        lock(&self.handlers).peers.insert(id, handler);
        let handlers = Arc::clone(&self.handlers);
        Subscription::new(move || {
            lock(&handlers).peers.remove(&id);
        })
    }

    fn subscribe_connection_info(&self, handler: ConnectionInfoHandler) -> Subscription {
        let id = self.next_id();
        lock(&self.handlers).connection.insert(id, handler);
        let handlers = Arc::clone(&self.handlers);
        Subscription::new(move || {
            lock(&handlers).connection.remove(&id);
        })
    }
}

/// 模拟权限：默认全部未授予，申请时除 `deny` 集合外一律授予
#[derive(Default)]
pub struct SimulatedPermissions {
    granted: Mutex<HashSet<Permission>>,
    deny: HashSet<Permission>,
    settings_opened: AtomicU64,
}

impl SimulatedPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying(mut self, permission: Permission) -> Self {
        self.deny.insert(permission);
        self
    }

    pub fn granted(&self) -> HashSet<Permission> {
        lock(&self.granted).clone()
    }

    pub fn settings_opened(&self) -> u64 {
        self.settings_opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PermissionGateway for SimulatedPermissions {
    async fn check(&self, permission: Permission) -> Result<bool, RadioError> {
        Ok(lock(&self.granted).contains(&permission))
    }

    async fn request(&self, permission: Permission) -> Result<PermissionStatus, RadioError> {
        if self.deny.contains(&permission) {
            return Ok(PermissionStatus::Denied);
        }
        lock(&self.granted).insert(permission);
        Ok(PermissionStatus::Granted)
    }

    async fn request_multiple(
        &self,
        permissions: &[Permission],
    ) -> Result<Vec<(Permission, PermissionStatus)>, RadioError> {
        let mut results = Vec::with_capacity(permissions.len());
        for &permission in permissions {
            results.push((permission, self.request(permission).await?));
        }
        Ok(results)
    }

    async fn open_settings(&self) -> Result<(), RadioError> {
        self.settings_opened.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let radio = SimulatedRadio::new().without_events();
        radio.fail_next("connect", RadioError::untyped("first"));
        assert!(radio.connect("aa").await.is_err());
        assert!(radio.connect("aa").await.is_ok());
        assert_eq!(radio.calls("connect"), 2);
    }

    #[tokio::test]
    async fn test_subscription_remove_unregisters_handler() {
        let radio = SimulatedRadio::new();
        let sub = radio.subscribe_peers(Arc::new(|_| {}));
        assert_eq!(radio.peer_subscribers(), 1);
        sub.remove();
        assert_eq!(radio.peer_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_group_info_lags_after_formation() {
        let radio = SimulatedRadio::new().without_events().with_group_info_lag(2);
        radio.connect("aa").await.unwrap();
        assert!(radio.group_info().await.is_err());
        assert!(radio.group_info().await.is_err());
        assert!(radio.group_info().await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_messages_are_received_in_order() {
        let radio = SimulatedRadio::new();
        radio.inject_message("one");
        radio.inject_message("two");
        assert_eq!(radio.receive_message().await.unwrap(), "one");
        assert_eq!(radio.receive_message().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_permissions_deny_list() {
        let perms = SimulatedPermissions::new().denying(Permission::FineLocation);
        let results = perms
            .request_multiple(&[Permission::CoarseLocation, Permission::FineLocation])
            .await
            .unwrap();
        assert_eq!(results[0].1, PermissionStatus::Granted);
        assert_eq!(results[1].1, PermissionStatus::Denied);
        assert!(perms.check(Permission::CoarseLocation).await.unwrap());
    }
}
