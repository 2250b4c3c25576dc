//! 错误分类
//!
//! 网关给出结构化 `RadioErrorKind` 时直接映射；否则退回到对描述文本的模式匹配。
//! 文本规则按优先级依次尝试，首个命中即返回：
//! MAC 地址（结构检查）→ 无线关闭/不支持 → 权限 → 初始化 → 发现/对端 → 连接 → 通用。

use std::sync::OnceLock;

use regex::Regex;

use crate::core::{ErrorCategory, SessionError};
use crate::radio::{RadioError, RadioErrorKind};

static MAC_RE: OnceLock<Regex> = OnceLock::new();
static RULES: OnceLock<Vec<(Regex, ErrorCategory)>> = OnceLock::new();

fn mac_re() -> &'static Regex {
    MAC_RE.get_or_init(|| Regex::new(r"^(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").unwrap())
}

fn rules() -> &'static [(Regex, ErrorCategory)] {
    RULES.get_or_init(|| {
        [
            (
                r"(?i)(?:wi-?fi|p2p|radio)(?:\s+direct)?[\s_-]*(?:is\s+)?(?:disabled|off\b|unsupported|not\s+supported)",
                ErrorCategory::RadioDisabled,
            ),
            (r"(?i)permission", ErrorCategory::Permission),
            (r"(?i)initiali[sz]", ErrorCategory::Initialization),
            (r"(?i)discover|peer", ErrorCategory::Discovery),
            (
                r"(?i)refused|time[sd]?\s*out|reset|unreachable|lost|abort",
                ErrorCategory::Connection,
            ),
        ]
        .into_iter()
        .map(|(pattern, category)| (Regex::new(pattern).unwrap(), category))
        .collect()
    })
}

/// 整段文本是否恰好是一个 MAC 地址
pub fn is_mac_address(text: &str) -> bool {
    mac_re().is_match(text.trim())
}

/// 仅凭描述文本分类（旧网关 / 无类型错误）
pub fn classify_text(text: &str) -> ErrorCategory {
    if is_mac_address(text) {
        return ErrorCategory::PeerUnreachable;
    }
    rules()
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, category)| *category)
        .unwrap_or(ErrorCategory::General)
}

/// 分类网关错误：结构化种类优先，文本模式回退
pub fn classify(err: &RadioError) -> ErrorCategory {
    match err.kind {
        Some(RadioErrorKind::RadioDisabled) => ErrorCategory::RadioDisabled,
        Some(RadioErrorKind::PermissionDenied) => ErrorCategory::Permission,
        Some(RadioErrorKind::NotInitialized) => ErrorCategory::Initialization,
        Some(RadioErrorKind::Discovery) => ErrorCategory::Discovery,
        Some(RadioErrorKind::Connection) => ErrorCategory::Connection,
        Some(RadioErrorKind::PeerUnreachable) => ErrorCategory::PeerUnreachable,
        None => classify_text(&err.message),
    }
}

impl From<RadioError> for SessionError {
    fn from(err: RadioError) -> Self {
        let category = classify(&err);
        SessionError::from_category(category, err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_shaped_text_is_peer_unreachable() {
        assert_eq!(classify_text("aa:bb:cc:dd:ee:ff"), ErrorCategory::PeerUnreachable);
        assert_eq!(classify_text(" 02:00:5E:10:00:01 "), ErrorCategory::PeerUnreachable);
    }

    #[test]
    fn test_mac_inside_sentence_is_not_structural() {
        // 含 "peer" 的句子落到发现类，而不是结构化的 MAC 检查
        assert_eq!(
            classify_text("peer aa:bb:cc:dd:ee:ff refused"),
            ErrorCategory::Discovery
        );
    }

    #[test]
    fn test_precedence_order() {
        assert_eq!(classify_text("Wi-Fi is disabled"), ErrorCategory::RadioDisabled);
        assert_eq!(classify_text("P2P_UNSUPPORTED"), ErrorCategory::RadioDisabled);
        assert_eq!(
            classify_text("Wi-Fi Direct is not supported"),
            ErrorCategory::RadioDisabled
        );
        assert_eq!(
            classify_text("location permission missing during initialize"),
            ErrorCategory::Permission
        );
        assert_eq!(classify_text("manager not initialized"), ErrorCategory::Initialization);
        assert_eq!(classify_text("discoverPeers failed"), ErrorCategory::Discovery);
        assert_eq!(classify_text("connection refused"), ErrorCategory::Connection);
        assert_eq!(classify_text("socket timed out"), ErrorCategory::Connection);
        assert_eq!(classify_text("link lost"), ErrorCategory::Connection);
        assert_eq!(classify_text("something odd"), ErrorCategory::General);
    }

    #[test]
    fn test_disabled_needs_radio_context() {
        assert_eq!(
            classify_text("location permission disabled"),
            ErrorCategory::Permission
        );
        assert_eq!(classify_text("feature unsupported"), ErrorCategory::General);
        assert_eq!(classify_text("wifi off"), ErrorCategory::RadioDisabled);
    }

    #[test]
    fn test_structured_kind_wins_over_text() {
        let err = RadioError::new(RadioErrorKind::Connection, "peer went away");
        assert_eq!(classify(&err), ErrorCategory::Connection);
    }

    #[test]
    fn test_radio_error_into_session_error() {
        let err: SessionError = RadioError::untyped("aa:bb:cc:dd:ee:ff").into();
        assert_eq!(err, SessionError::PeerUnreachable("aa:bb:cc:dd:ee:ff".to_string()));
    }
}
