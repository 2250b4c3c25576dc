//! 网关数据快照：对端设备、连接信息、组信息
//!
//! 所有类型均为不可变快照，每次事件/查询整体替换，不做逐字段合并。

use serde::{Deserialize, Serialize};

/// 已发现的无线对端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    /// 稳定且唯一的设备地址（MAC 形式）
    pub address: String,
    pub name: Option<String>,
    /// WPS 主设备类型，如 `10-0050F204-5`
    pub device_type: Option<String>,
}

/// 计算机类（手机、平板通常上报为此类）
const COMPUTER_TYPE_PREFIXES: &[&str] = &["10-0050F204", "1-0050F204"];
/// 显示设备类（电视等）
const DISPLAY_TYPE_PREFIX: &str = "7-0050F204";
const MOBILE_NAME_HINTS: &[&str] = &[
    "phone", "android", "galaxy", "pixel", "xiaomi", "redmi", "oneplus",
];

impl PeerDevice {
    pub fn new(address: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
            device_type: None,
        }
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    /// 展示名：优先设备名，否则地址
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// 是否为手机/平板类设备（展示层过滤用）
    ///
    /// 未上报类型的设备保留；计算机类保留；显示设备剔除；
    /// 其余按名称关键字判断，均不匹配时剔除。
    pub fn is_handheld(&self) -> bool {
        let Some(device_type) = self.device_type.as_deref() else {
            return true;
        };
        if COMPUTER_TYPE_PREFIXES
            .iter()
            .any(|prefix| device_type.starts_with(prefix))
        {
            return true;
        }
        if device_type.starts_with(DISPLAY_TYPE_PREFIX) {
            return false;
        }
        let name = self.name.as_deref().unwrap_or_default().to_lowercase();
        MOBILE_NAME_HINTS.iter().any(|hint| name.contains(hint))
    }
}

/// 当前链路状态（每次事件整体替换）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub group_formed: bool,
    pub is_group_owner: bool,
    /// 仅在组已形成时存在
    pub group_owner_address: Option<String>,
}

impl ConnectionInfo {
    pub fn formed(is_group_owner: bool, group_owner_address: impl Into<String>) -> Self {
        Self {
            group_formed: true,
            is_group_owner,
            group_owner_address: Some(group_owner_address.into()),
        }
    }
}

/// 已形成组的元数据；在组形成后可能要延迟一段时间才能查询到
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub owner: PeerDevice,
    pub network_name: String,
    pub passphrase: String,
    pub clients: Vec<PeerDevice>,
}

/// 网关发送成功后返回的传输元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub bytes: usize,
}

/// 平台权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    CoarseLocation,
    FineLocation,
    NearbyWifiDevices,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::CoarseLocation => write!(f, "ACCESS_COARSE_LOCATION"),
            Permission::FineLocation => write!(f, "ACCESS_FINE_LOCATION"),
            Permission::NearbyWifiDevices => write!(f, "NEARBY_WIFI_DEVICES"),
        }
    }
}

/// 权限申请结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    Denied,
    NeverAskAgain,
}
