//! 错误恢复引擎
//!
//! 根据 ErrorCategory 返回 RecoveryAction：无线关闭、对端不可达、连接类错误弹出选择，
//! 其余类别只记录并短暂提示，不做调用方之外的自动重试。

use crate::core::{ErrorCategory, RecoveryAction, RecoveryChoice, RecoveryPrompt, SessionError};

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 为已分类的错误给出恢复动作；`operation` 仅用于提示文案
    pub fn handle(&self, operation: &str, err: &SessionError) -> RecoveryAction {
        let Some(category) = err.category() else {
            return RecoveryAction::Notify(err.to_string());
        };
        match category {
            ErrorCategory::RadioDisabled => RecoveryAction::AskUser(RecoveryPrompt {
                category,
                title: "Wi-Fi Disabled".to_string(),
                message: format!(
                    "{operation} failed: Wi-Fi P2P is unavailable. Please enable Wi-Fi and try again. ({err})"
                ),
                choices: vec![
                    RecoveryChoice::OpenSettings,
                    RecoveryChoice::RetryInitialization,
                    RecoveryChoice::Dismiss,
                ],
            }),
            ErrorCategory::PeerUnreachable => RecoveryAction::AskUser(RecoveryPrompt {
                category,
                title: "Peer Unreachable".to_string(),
                message: format!(
                    "{operation} failed: {err}. The device may have left or changed state."
                ),
                choices: vec![
                    RecoveryChoice::RefreshPeers,
                    RecoveryChoice::DisconnectAndRediscover,
                    RecoveryChoice::Dismiss,
                ],
            }),
            ErrorCategory::Connection => RecoveryAction::AskUser(RecoveryPrompt {
                category,
                title: "Connection Problem".to_string(),
                message: format!("{operation} failed: {err}"),
                choices: vec![
                    RecoveryChoice::RecheckConnection,
                    RecoveryChoice::RetryConnect,
                    RecoveryChoice::Dismiss,
                ],
            }),
            ErrorCategory::Permission
            | ErrorCategory::Initialization
            | ErrorCategory::Discovery
            | ErrorCategory::General => {
                RecoveryAction::Notify(format!("[{category}] {operation} failed: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choices(action: RecoveryAction) -> Vec<RecoveryChoice> {
        match action {
            RecoveryAction::AskUser(prompt) => prompt.choices,
            RecoveryAction::Notify(msg) => panic!("Expected AskUser, got Notify({msg})"),
        }
    }

    #[test]
    fn test_radio_disabled_offers_settings_and_retry() {
        let engine = RecoveryEngine::new();
        let err = SessionError::RadioDisabled("wifi off".to_string());
        assert_eq!(
            choices(engine.handle("Initialize", &err)),
            vec![
                RecoveryChoice::OpenSettings,
                RecoveryChoice::RetryInitialization,
                RecoveryChoice::Dismiss
            ]
        );
    }

    #[test]
    fn test_peer_unreachable_offers_refresh() {
        let engine = RecoveryEngine::new();
        let err = SessionError::PeerUnreachable("aa:bb:cc:dd:ee:ff".to_string());
        let got = choices(engine.handle("Send", &err));
        assert_eq!(got[0], RecoveryChoice::RefreshPeers);
        assert_eq!(got[1], RecoveryChoice::DisconnectAndRediscover);
    }

    #[test]
    fn test_connection_offers_recheck() {
        let engine = RecoveryEngine::new();
        let got = choices(engine.handle("Connect", &SessionError::ConnectExhausted(3)));
        assert_eq!(got[0], RecoveryChoice::RecheckConnection);
        assert_eq!(got[1], RecoveryChoice::RetryConnect);
    }

    #[test]
    fn test_other_categories_only_notify() {
        let engine = RecoveryEngine::new();
        let err = SessionError::DiscoveryFailure("busy".to_string());
        match engine.handle("Start discovery", &err) {
            RecoveryAction::Notify(msg) => assert!(msg.starts_with("[DISCOVERY]")),
            _ => panic!("Expected Notify"),
        }
    }

    #[test]
    fn test_usage_error_notifies_plain_text() {
        let engine = RecoveryEngine::new();
        match engine.handle("Send", &SessionError::OwnerCannotSend) {
            RecoveryAction::Notify(msg) => assert!(msg.contains("cannot send")),
            _ => panic!("Expected Notify"),
        }
    }
}
