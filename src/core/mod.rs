//! 核心编排层：会话状态、发现、连接、消息通道、错误分类与恢复、事件分发、主控循环

pub mod classifier;
pub mod connection;
pub mod discovery;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod messaging;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use classifier::{classify, classify_text, is_mac_address};
pub use envelope::{decode_incoming, Envelope};
pub use error::{
    ErrorCategory, RecoveryAction, RecoveryChoice, RecoveryPrompt, SessionError,
};
pub use orchestrator::{create_session, Command, Notice, Orchestrator, SessionHandle, SessionSettings};
pub use recovery::RecoveryEngine;
pub use shutdown::{run_with_graceful_shutdown, teardown_session, ShutdownManager, ShutdownReason};
pub use state::{
    ConnectPhase, DiscoveryPhase, LogEntry, LogLevel, LogRing, Message, ReceivePhase,
    RecentlySent, SenderRole, SessionSnapshot, SessionState,
};
