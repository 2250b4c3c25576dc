//! 消息信封：`{id, content, timestamp, sender}` 的 JSON 线格式
//!
//! 无法解析为信封的载荷按旧格式纯文本处理：本地合成 id `received-<毫秒>`，发送方为 unknown。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Message, SenderRole};

/// 线上传输的信封
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub content: String,
    /// 发出时刻（Unix 毫秒）
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "unknown_sender")]
    pub sender: SenderRole,
}

fn unknown_sender() -> SenderRole {
    SenderRole::Unknown
}

/// 生成消息 id：毫秒时间戳 + 随机后缀
pub fn new_message_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.timestamp_millis(), &suffix[..9])
}

impl Envelope {
    pub fn new(content: impl Into<String>, sender: SenderRole) -> Self {
        let now = Utc::now();
        Self {
            id: new_message_id(now),
            content: content.into(),
            timestamp: now.timestamp_millis(),
            sender,
        }
    }

    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 尝试按信封解析；非 JSON 对象或缺少必需字段时返回 None
    pub fn parse(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now)
    }

    /// 作为本机已发送消息写入日志
    pub fn into_sent_message(self) -> Message {
        Message {
            timestamp: self.sent_at(),
            id: self.id,
            text: self.content,
            is_sent: true,
            sender: self.sender,
        }
    }
}

/// 把入站载荷解码为接收消息（is_sent = false）
pub fn decode_incoming(payload: &str, now: DateTime<Utc>) -> Message {
    match Envelope::parse(payload) {
        Some(envelope) => Message {
            timestamp: if envelope.timestamp > 0 {
                envelope.sent_at()
            } else {
                now
            },
            id: envelope.id,
            text: envelope.content,
            is_sent: false,
            sender: envelope.sender,
        },
        None => Message {
            id: format!("received-{}", now.timestamp_millis()),
            text: payload.to_string(),
            timestamp: now,
            is_sent: false,
            sender: SenderRole::Unknown,
        },
    }
}
