//! 会话状态：SessionState 内部记录与 SessionSnapshot 投影
//!
//! SessionState 只由 Orchestrator 修改；展示层只拿到不可变的 SessionSnapshot。
//! 发现/连接/接收三个子系统各自用一个小状态机表示，快照里再投影为布尔标志。

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::radio::{ConnectionInfo, GroupInfo, PeerDevice};

/// 消息发送方角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SenderRole {
    GroupOwner,
    Client,
    /// 旧格式或无法解析的载荷
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderRole::GroupOwner => write!(f, "groupOwner"),
            SenderRole::Client => write!(f, "client"),
            SenderRole::Unknown => write!(f, "unknown"),
        }
    }
}

/// 消息日志中的一条
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// 本机发出为 true
    pub is_sent: bool,
    pub sender: SenderRole,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// 诊断日志条目，显示为 `HH:MM:SS [LEVEL] message`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// 有界诊断日志：超出上限时丢弃最旧条目
#[derive(Clone, Debug)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    cap: usize,
}

impl LogRing {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 最近发送的消息 id（自回显去重缓存，不是审计日志）
#[derive(Clone, Debug)]
pub struct RecentlySent {
    order: VecDeque<String>,
    ids: HashSet<String>,
    cap: usize,
}

impl RecentlySent {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            cap: cap.max(1),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DiscoveryPhase {
    #[default]
    Idle,
    Discovering,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectPhase {
    #[default]
    Idle,
    Connecting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReceivePhase {
    #[default]
    Idle,
    Listening,
}

/// 编排器独占的会话状态
#[derive(Debug)]
pub struct SessionState {
    pub(crate) initialized: bool,
    pub(crate) discovery: DiscoveryPhase,
    pub(crate) connect: ConnectPhase,
    pub(crate) receive: ReceivePhase,
    pub(crate) sending: bool,
    pub(crate) fetching: bool,
    pub(crate) devices: Vec<PeerDevice>,
    pub(crate) selected: Option<PeerDevice>,
    pub(crate) connection: Option<ConnectionInfo>,
    pub(crate) this_device: Option<PeerDevice>,
    pub(crate) group_info: Option<GroupInfo>,
    pub(crate) messages: Vec<Message>,
    pub(crate) logs: LogRing,
    pub(crate) recently_sent: RecentlySent,
    /// 发现轮询定时器；取消即停止后续刷新
    pub(crate) discovery_timer: Option<CancellationToken>,
    /// 当前接收循环的取消令牌
    pub(crate) receive_token: Option<CancellationToken>,
}

impl SessionState {
    pub fn new(max_log_entries: usize, recently_sent_capacity: usize) -> Self {
        Self {
            initialized: false,
            discovery: DiscoveryPhase::Idle,
            connect: ConnectPhase::Idle,
            receive: ReceivePhase::Idle,
            sending: false,
            fetching: false,
            devices: Vec::new(),
            selected: None,
            connection: None,
            this_device: None,
            group_info: None,
            messages: Vec::new(),
            logs: LogRing::new(max_log_entries),
            recently_sent: RecentlySent::new(recently_sent_capacity),
            discovery_timer: None,
            receive_token: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.group_formed)
    }

    /// 本机在当前连接中的角色；未连接时为 Unknown
    pub fn local_role(&self) -> SenderRole {
        match &self.connection {
            Some(c) if c.group_formed && c.is_group_owner => SenderRole::GroupOwner,
            Some(c) if c.group_formed => SenderRole::Client,
            _ => SenderRole::Unknown,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            initialized: self.initialized,
            discovering: self.discovery == DiscoveryPhase::Discovering,
            connecting: self.connect == ConnectPhase::Connecting,
            devices: self.devices.clone(),
            selected_device: self.selected.clone(),
            connection_info: self.connection.clone(),
            this_device: self.this_device.clone(),
            group_info: self.group_info.clone(),
            receiving_messages: self.receive == ReceivePhase::Listening,
            sending_message: self.sending,
            fetching_messages: self.fetching,
            messages: self.messages.clone(),
            logs: self.logs.entries().cloned().collect(),
        }
    }
}

/// 展示层看到的只读快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub initialized: bool,
    pub discovering: bool,
    pub connecting: bool,
    pub devices: Vec<PeerDevice>,
    pub selected_device: Option<PeerDevice>,
    pub connection_info: Option<ConnectionInfo>,
    pub this_device: Option<PeerDevice>,
    pub group_info: Option<GroupInfo>,
    pub receiving_messages: bool,
    pub sending_message: bool,
    pub fetching_messages: bool,
    pub messages: Vec<Message>,
    pub logs: Vec<LogEntry>,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection_info.as_ref().is_some_and(|c| c.group_formed)
    }

    pub fn is_group_owner(&self) -> bool {
        self.is_connected()
            && self
                .connection_info
                .as_ref()
                .is_some_and(|c| c.is_group_owner)
    }

    /// 展示用设备列表；开启过滤时只保留手机/平板
    pub fn visible_devices(&self, filter_handheld: bool) -> Vec<&PeerDevice> {
        self.devices
            .iter()
            .filter(|d| !filter_handheld || d.is_handheld())
            .collect()
    }
}
