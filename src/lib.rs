//! PeerLink - Wi-Fi 直连点对点会话编排
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态、发现循环、连接管理、角色受限消息通道、错误分类与恢复、事件分发
//! - **observability**: tracing 日志初始化
//! - **radio**: 无线能力网关 trait、数据快照与内存模拟实现
//! - **ui**: Ratatui TUI 界面

pub mod config;
pub mod core;
pub mod observability;
pub mod radio;
pub mod ui;
