//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PEERLINK__*` 覆盖（双下划线表示嵌套，如 `PEERLINK__SIMULATOR__PEER_COUNT=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub permissions: PermissionsSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub simulator: SimulatorSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [session] 段：日志与去重缓存上限、设备过滤
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 诊断日志保留条数
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
    /// 最近发送 id 的缓存容量（自回显去重）
    #[serde(default = "default_recently_sent_capacity")]
    pub recently_sent_capacity: usize,
    /// 设备列表只显示手机/平板
    #[serde(default = "default_true")]
    pub filter_devices: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_log_entries: default_max_log_entries(),
            recently_sent_capacity: default_recently_sent_capacity(),
            filter_devices: true,
        }
    }
}

fn default_max_log_entries() -> usize {
    100
}

fn default_recently_sent_capacity() -> usize {
    50
}

fn default_true() -> bool {
    true
}

/// [permissions] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionsSection {
    /// 是否额外申请 NEARBY_WIFI_DEVICES（新平台版本需要）
    #[serde(default = "default_true")]
    pub nearby_wifi_devices: bool,
}

impl Default for PermissionsSection {
    fn default() -> Self {
        Self {
            nearby_wifi_devices: true,
        }
    }
}

/// [logging] 段：过滤表达式与可选日志文件（TUI 运行时终端被占用，建议写文件）
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_filter")]
    pub filter: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            file: None,
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

/// [simulator] 段：内存模拟网关的行为
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorSection {
    /// "client" 或 "owner"：组形成后本机的角色
    #[serde(default = "default_local_role")]
    pub local_role: String,
    #[serde(default = "default_peer_count")]
    pub peer_count: usize,
    /// 开头若干次连接命令失败，用于演示重试
    #[serde(default)]
    pub connect_failures: u32,
    /// 作为组主时，模拟客户端发来消息的间隔（秒）；0 表示不发
    #[serde(default = "default_chatter_interval_secs")]
    pub chatter_interval_secs: u64,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            local_role: default_local_role(),
            peer_count: default_peer_count(),
            connect_failures: 0,
            chatter_interval_secs: default_chatter_interval_secs(),
        }
    }
}

impl SimulatorSection {
    pub fn local_is_owner(&self) -> bool {
        self.local_role.eq_ignore_ascii_case("owner")
    }
}

fn default_local_role() -> String {
    "client".to_string()
}

fn default_peer_count() -> usize {
    3
}

fn default_chatter_interval_secs() -> u64 {
    8
}

/// 从 config 目录加载配置，环境变量 PEERLINK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PEERLINK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PEERLINK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
