//! 会话编排器：主控循环
//!
//! 负责：持有唯一的 SessionState、订阅网关事件、初始化/拆除会话，
//! 并建立 cmd/snapshot/notice 三通道：UI 只能发送 Command（意图），读取 SessionSnapshot，
//! 接收 Notice（短提示、发现设备、恢复选择）。其余修改路径不对外暴露。
//!
//! 状态锁从不跨 await 持有；各子系统（discovery / connection / messaging / dispatcher）
//! 以 `impl Orchestrator` 块分布在各自模块中。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{
    LogLevel, RecoveryAction, RecoveryChoice, RecoveryEngine, RecoveryPrompt, SessionError,
    SessionSnapshot, SessionState,
};
use crate::radio::{
    CapabilityGateway, ConnectionInfo, PeerDevice, Permission, PermissionGateway,
    PermissionStatus, Subscription,
};

/// 恢复选择中「延迟后重试」的等待时间
pub(crate) const RECOVERY_RETRY_DELAY: Duration = Duration::from_secs(2);

const NOTICE_CAPACITY: usize = 64;

/// 从 UI 发往编排器的意图
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartDiscovery,
    StopDiscovery,
    /// 按地址选中设备
    SelectDevice(String),
    Connect,
    Disconnect,
    CreateGroup,
    SendMessage(String),
    FetchMessages,
    ClearLog,
    /// 回应恢复选择
    Resolve(RecoveryChoice),
    Quit,
}

/// 编排器发往 UI 的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// 短暂提示
    Toast(String),
    /// 设备列表由空变为非空（每次跃迁一次）
    DevicesFound(usize),
    /// 需要用户决策
    Prompt(RecoveryPrompt),
}

/// 网关回调转入分发器的事件（按到达顺序处理）
#[derive(Debug)]
pub(crate) enum GatewayEvent {
    Peers(Vec<PeerDevice>),
    Connection(Option<ConnectionInfo>),
}

/// 会话参数（来自配置的 [session] / [permissions]）
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_log_entries: usize,
    pub recently_sent_capacity: usize,
    pub request_nearby_wifi: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_log_entries: 100,
            recently_sent_capacity: 50,
            request_nearby_wifi: true,
        }
    }
}

impl SessionSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_log_entries: cfg.session.max_log_entries,
            recently_sent_capacity: cfg.session.recently_sent_capacity,
            request_nearby_wifi: cfg.permissions.nearby_wifi_devices,
        }
    }
}

#[derive(Default)]
pub(crate) struct Subscriptions {
    pub(crate) peers: Option<Subscription>,
    pub(crate) connection: Option<Subscription>,
}

pub(crate) struct Inner {
    pub(crate) gateway: Arc<dyn CapabilityGateway>,
    pub(crate) permissions: Arc<dyn PermissionGateway>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notice_tx: broadcast::Sender<Notice>,
    recovery: RecoveryEngine,
    pub(crate) events_tx: mpsc::UnboundedSender<GatewayEvent>,
    pub(crate) events_rx: Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>,
    pub(crate) subscriptions: Mutex<Subscriptions>,
    /// 同一时刻至多一个进行中的 receive 调用
    pub(crate) receive_slot: tokio::sync::Mutex<()>,
    pub(crate) shutdown: CancellationToken,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 会话编排器；克隆共享同一份状态
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

/// 离开作用域时无条件复位某个标志（成功、失败、提前返回、任务被取消）
pub(crate) struct FlagGuard<'a> {
    orchestrator: &'a Orchestrator,
    reset: fn(&mut SessionState),
}

impl<'a> FlagGuard<'a> {
    pub(crate) fn new(orchestrator: &'a Orchestrator, reset: fn(&mut SessionState)) -> Self {
        Self {
            orchestrator,
            reset,
        }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.update(self.reset);
    }
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn CapabilityGateway>,
        permissions: Arc<dyn PermissionGateway>,
        settings: SessionSettings,
    ) -> Self {
        let state = SessionState::new(settings.max_log_entries, settings.recently_sent_capacity);
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                gateway,
                permissions,
                settings,
                state: Mutex::new(state),
                snapshot_tx,
                notice_tx,
                recovery: RecoveryEngine::new(),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                subscriptions: Mutex::new(Subscriptions::default()),
                receive_slot: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read(SessionState::snapshot)
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notice_tx.subscribe()
    }

    /// 唯一的写入口：修改后立即发布新快照
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = lock(&self.inner.state);
            let result = f(&mut state);
            (result, state.snapshot())
        };
        self.inner.snapshot_tx.send_replace(snapshot);
        result
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&lock(&self.inner.state))
    }

    /// 写诊断日志并镜像到 tracing
    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.update(|s| s.logs.push(level, message));
    }

    pub(crate) fn log_debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub(crate) fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub(crate) fn log_warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub(crate) fn notify(&self, notice: Notice) {
        let _ = self.inner.notice_tx.send(notice);
    }

    /// 记录带类别标签的错误，按恢复策略弹出选择或提示，并把错误交还调用方
    pub(crate) fn surface(&self, operation: &str, err: SessionError) -> SessionError {
        let tag = err
            .category()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "USAGE".to_string());
        self.log(LogLevel::Error, format!("[{tag}] {operation} failed: {err}"));
        match self.inner.recovery.handle(operation, &err) {
            RecoveryAction::AskUser(prompt) => self.notify(Notice::Prompt(prompt)),
            RecoveryAction::Notify(message) => self.notify(Notice::Toast(message)),
        }
        err
    }

    /// 初始化序列：网关初始化 → 权限 → 订阅事件 → 标记已初始化 → 对账连接信息。
    /// 已初始化时直接跳过。
    pub async fn initialize(&self) -> Result<(), SessionError> {
        if self.read(|s| s.initialized) {
            self.log_debug("Wi-Fi P2P already initialized; skipping");
            return Ok(());
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(SessionError::Shutdown);
        }
        self.log_info("Initializing Wi-Fi P2P...");
        if let Err(e) = self.inner.gateway.initialize().await {
            return Err(self.surface("Initialize", e.into()));
        }
        self.log_info("Wi-Fi P2P initialized successfully");

        self.request_permissions().await;
        self.subscribe_events();
        self.update(|s| s.initialized = true);
        self.reconcile_connection_info().await;
        Ok(())
    }

    /// 检查并申请权限；拒绝只提示，不中断初始化
    async fn request_permissions(&self) {
        self.log_info("Requesting required permissions...");
        let mut required = vec![Permission::CoarseLocation, Permission::FineLocation];
        if self.inner.settings.request_nearby_wifi {
            required.push(Permission::NearbyWifiDevices);
        }

        let mut missing = Vec::new();
        for permission in required {
            match self.inner.permissions.check(permission).await {
                Ok(true) => self.log_debug(format!("Already have permission: {permission}")),
                Ok(false) => missing.push(permission),
                Err(e) => {
                    self.log_warn(format!("Error checking permission {permission}: {e}"));
                    missing.push(permission);
                }
            }
        }
        self.log_info(format!("Missing {} permissions", missing.len()));
        if missing.is_empty() {
            return;
        }

        match self.inner.permissions.request_multiple(&missing).await {
            Ok(results) => {
                let mut denied = Vec::new();
                for (permission, status) in results {
                    self.log_info(format!("Permission {permission}: {status:?}"));
                    if status != PermissionStatus::Granted {
                        denied.push(permission.to_string());
                    }
                }
                if !denied.is_empty() {
                    self.surface(
                        "Permission request",
                        SessionError::PermissionDenied(denied.join(", ")),
                    );
                }
            }
            Err(e) => {
                self.surface("Permission request", SessionError::PermissionDenied(e.message));
            }
        }
    }

    /// 执行用户对恢复选择的回应
    pub async fn resolve(&self, choice: RecoveryChoice) {
        self.log_info(format!("Recovery choice: {}", choice.label()));
        match choice {
            RecoveryChoice::OpenSettings => {
                if let Err(e) = self.inner.permissions.open_settings().await {
                    self.log_warn(format!("Could not open settings: {e}"));
                }
            }
            RecoveryChoice::RetryInitialization => {
                tokio::time::sleep(RECOVERY_RETRY_DELAY).await;
                let _ = self.initialize().await;
            }
            RecoveryChoice::RefreshPeers => self.refresh_peer_list().await,
            RecoveryChoice::DisconnectAndRediscover => {
                self.disconnect().await;
                let _ = self.start_discovery().await;
            }
            RecoveryChoice::RecheckConnection => self.reconcile_connection_info().await,
            RecoveryChoice::RetryConnect => {
                tokio::time::sleep(RECOVERY_RETRY_DELAY).await;
                let _ = self.connect_selected().await;
            }
            RecoveryChoice::Dismiss => {}
        }
    }

    pub fn clear_log(&self) {
        self.update(|s| s.logs.clear());
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// 拆除会话：取消定时器与接收循环、停止发现、各退订一次、停止分发器
    pub async fn teardown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.log_info("Tearing down session...");
        // 先取消根令牌：此后后台任务不再激活接收或发现
        self.inner.shutdown.cancel();
        self.cancel_discovery_timer();
        let was_discovering = self.update(|s| {
            if let Some(token) = s.receive_token.take() {
                token.cancel();
            }
            s.receive = crate::core::ReceivePhase::Idle;
            let was = s.discovery == crate::core::DiscoveryPhase::Discovering;
            s.discovery = crate::core::DiscoveryPhase::Idle;
            was
        });
        if was_discovering {
            if let Err(e) = self.inner.gateway.stop_discovery().await {
                self.log_warn(format!("Error stopping peer discovery: {e}"));
            }
        }
        let (peers, connection) = {
            let mut subs = lock(&self.inner.subscriptions);
            (subs.peers.take(), subs.connection.take())
        };
        if let Some(sub) = peers {
            sub.remove();
        }
        if let Some(sub) = connection {
            sub.remove();
        }
        self.log_info("Session cleanup complete");
    }

    /// 命令循环：每条意图在独立任务中执行，像事件循环一样交错推进；
    /// 互斥只依赖各子系统的状态标志。
    async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let _ = self.initialize().await;
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Command::Quit) => break,
                    Some(cmd) => {
                        let this = self.clone();
                        tokio::spawn(async move { this.execute(cmd).await });
                    }
                },
            }
        }
        self.teardown().await;
    }

    async fn execute(&self, cmd: Command) {
        tracing::debug!("Executing command {:?}", cmd);
        match cmd {
            Command::StartDiscovery => {
                let _ = self.start_discovery().await;
            }
            Command::StopDiscovery => {
                let _ = self.stop_discovery().await;
            }
            Command::SelectDevice(address) => {
                let _ = self.select_device(&address);
            }
            Command::Connect => {
                let _ = self.connect_selected().await;
            }
            Command::Disconnect => self.disconnect().await,
            Command::CreateGroup => {
                let _ = self.create_group().await;
            }
            Command::SendMessage(text) => {
                let _ = self.send_message(&text).await;
            }
            Command::FetchMessages => {
                let _ = self.fetch_messages().await;
            }
            Command::ClearLog => self.clear_log(),
            Command::Resolve(choice) => self.resolve(choice).await,
            Command::Quit => {}
        }
    }
}

/// UI 侧句柄：只暴露意图、快照与通知
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    notice_tx: broadcast::Sender<Notice>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    fn send(&self, cmd: Command) -> Result<(), SessionError> {
        self.cmd_tx.send(cmd).map_err(|_| SessionError::Shutdown)
    }

    pub fn start_discovery(&self) -> Result<(), SessionError> {
        self.send(Command::StartDiscovery)
    }

    pub fn stop_discovery(&self) -> Result<(), SessionError> {
        self.send(Command::StopDiscovery)
    }

    pub fn select_device(&self, address: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::SelectDevice(address.into()))
    }

    pub fn connect(&self) -> Result<(), SessionError> {
        self.send(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(Command::Disconnect)
    }

    pub fn create_group(&self) -> Result<(), SessionError> {
        self.send(Command::CreateGroup)
    }

    pub fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::SendMessage(text.into()))
    }

    pub fn fetch_messages(&self) -> Result<(), SessionError> {
        self.send(Command::FetchMessages)
    }

    pub fn clear_log(&self) -> Result<(), SessionError> {
        self.send(Command::ClearLog)
    }

    pub fn resolve(&self, choice: RecoveryChoice) -> Result<(), SessionError> {
        self.send(Command::Resolve(choice))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    /// 发送 Quit 并等待拆除完成
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Quit);
        if let Err(e) = self.task.await {
            tracing::warn!("Session task ended abnormally: {}", e);
        }
    }
}

/// 创建会话：后台任务先执行初始化序列，再消费 UI 意图
pub fn create_session(
    gateway: Arc<dyn CapabilityGateway>,
    permissions: Arc<dyn PermissionGateway>,
    settings: SessionSettings,
) -> SessionHandle {
    let orchestrator = Orchestrator::new(gateway, permissions, settings);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let snapshot_rx = orchestrator.watch();
    let notice_tx = orchestrator.inner.notice_tx.clone();
    let task = tokio::spawn(orchestrator.run(cmd_rx));
    SessionHandle {
        cmd_tx,
        snapshot_rx,
        notice_tx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{RadioError, SimulatedPermissions, SimulatedRadio};

    fn orchestrator(radio: Arc<SimulatedRadio>, perms: Arc<SimulatedPermissions>) -> Orchestrator {
        Orchestrator::new(radio, perms, SessionSettings::default())
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let radio = Arc::new(SimulatedRadio::new());
        let perms = Arc::new(SimulatedPermissions::new());
        let orch = orchestrator(radio.clone(), perms.clone());

        orch.initialize().await.unwrap();
        orch.initialize().await.unwrap();

        assert_eq!(radio.calls("initialize"), 1);
        assert_eq!(radio.peer_subscribers(), 1);
        assert_eq!(radio.connection_subscribers(), 1);
        assert!(orch.snapshot().initialized);
        assert!(perms.granted().contains(&Permission::NearbyWifiDevices));
    }

    #[tokio::test]
    async fn test_initialize_failure_prompts_for_disabled_radio() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.fail_next("initialize", RadioError::untyped("Wi-Fi is disabled"));
        let orch = orchestrator(radio.clone(), Arc::new(SimulatedPermissions::new()));
        let mut notices = orch.notices();

        let err = orch.initialize().await.unwrap_err();
        assert!(matches!(err, SessionError::RadioDisabled(_)));
        assert!(!orch.snapshot().initialized);
        match notices.try_recv().unwrap() {
            Notice::Prompt(prompt) => {
                assert!(prompt.choices.contains(&RecoveryChoice::RetryInitialization))
            }
            other => panic!("Expected prompt, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_initialization_reruns_sequence() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.fail_next("initialize", RadioError::untyped("Wi-Fi is disabled"));
        let orch = orchestrator(radio.clone(), Arc::new(SimulatedPermissions::new()));

        assert!(orch.initialize().await.is_err());
        orch.resolve(RecoveryChoice::RetryInitialization).await;
        assert!(orch.snapshot().initialized);
        assert_eq!(radio.calls("initialize"), 2);

        orch.resolve(RecoveryChoice::RetryInitialization).await;
        assert_eq!(radio.calls("initialize"), 2);
    }

    #[tokio::test]
    async fn test_denied_permission_is_surfaced_but_not_fatal() {
        let radio = Arc::new(SimulatedRadio::new());
        let perms = Arc::new(SimulatedPermissions::new().denying(Permission::FineLocation));
        let orch = orchestrator(radio, perms);
        let mut notices = orch.notices();

        orch.initialize().await.unwrap();
        assert!(orch.snapshot().initialized);
        match notices.try_recv().unwrap() {
            Notice::Toast(msg) => assert!(msg.contains("ACCESS_FINE_LOCATION")),
            other => panic!("Expected toast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_teardown_unsubscribes_once() {
        let radio = Arc::new(SimulatedRadio::new());
        let orch = orchestrator(radio.clone(), Arc::new(SimulatedPermissions::new()));
        orch.initialize().await.unwrap();

        orch.teardown().await;
        orch.teardown().await;

        assert_eq!(radio.peer_subscribers(), 0);
        assert_eq!(radio.connection_subscribers(), 0);
        assert!(orch.is_shut_down());
        assert!(orch.initialize().await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_log() {
        let orch = orchestrator(
            Arc::new(SimulatedRadio::new()),
            Arc::new(SimulatedPermissions::new()),
        );
        orch.initialize().await.unwrap();
        assert!(!orch.snapshot().logs.is_empty());
        orch.clear_log();
        assert!(orch.snapshot().logs.is_empty());
    }

    #[tokio::test]
    async fn test_handle_quit_tears_down() {
        let radio = Arc::new(SimulatedRadio::new());
        let handle = create_session(
            radio.clone(),
            Arc::new(SimulatedPermissions::new()),
            SessionSettings::default(),
        );
        let mut rx = handle.watch();
        rx.wait_for(|s| s.initialized).await.unwrap();
        handle.shutdown().await;
        assert_eq!(radio.peer_subscribers(), 0);
    }
}
