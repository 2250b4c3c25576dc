//! 角色受限的消息通道
//!
//! 客户端只发送，组主只接收。接收循环一次只挂起一个 receive 调用，
//! 每次返回后等待 300ms（出错后 1s）再发起下一次。
//! 最近发送的 id 用于丢弃自回显。

use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::core::envelope::{decode_incoming, Envelope};
use crate::core::orchestrator::{FlagGuard, Notice};
use crate::core::{Message, Orchestrator, ReceivePhase, SenderRole, SessionError};

pub(crate) const SEND_PRE_DELAY: Duration = Duration::from_millis(500);
pub(crate) const LISTEN_DELAY: Duration = Duration::from_millis(300);
pub(crate) const LISTEN_ERROR_DELAY: Duration = Duration::from_millis(1000);

enum Activation {
    Started,
    AlreadyActive,
    Disconnected,
    ShutDown,
}

impl Orchestrator {
    /// 客户端发送一条消息。
    ///
    /// 未连接、本机为组主、空文本都在触达传输层之前被拒绝。
    /// `sending` 标志供展示层禁用输入，并不在此处串行化并发调用。
    pub async fn send_message(&self, text: &str) -> Result<Message, SessionError> {
        let (connected, role) = self.read(|s| (s.is_connected(), s.local_role()));
        if !connected {
            return Err(self.surface("Send message", SessionError::NotConnected));
        }
        if role == SenderRole::GroupOwner {
            return Err(self.surface("Send message", SessionError::OwnerCannotSend));
        }
        if text.trim().is_empty() {
            return Err(self.surface("Send message", SessionError::EmptyMessage));
        }

        self.update(|s| s.sending = true);
        let _guard = FlagGuard::new(self, |s| s.sending = false);

        let envelope = Envelope::new(text, SenderRole::Client);
        let payload = envelope.to_wire().map_err(|e| {
            self.surface("Send message", SessionError::GeneralFailure(e.to_string()))
        })?;
        self.update(|s| s.recently_sent.insert(envelope.id.clone()));
        self.log_info(format!("Sending message: {text}"));

        sleep(SEND_PRE_DELAY).await;
        match self.inner.gateway.send_message(&payload).await {
            Ok(receipt) => {
                self.log_info(format!("Send successful ({} bytes)", receipt.bytes));
                let message = envelope.into_sent_message();
                self.update(|s| s.messages.push(message.clone()));
                self.notify(Notice::Toast("Message sent".to_string()));
                Ok(message)
            }
            Err(e) => Err(self.surface("Send message", e.into())),
        }
    }

    /// 组主开始接收。已在接收时什么也不做。
    pub async fn start_receiving(&self) -> Result<(), SessionError> {
        if self.is_shut_down() {
            return Err(SessionError::Shutdown);
        }
        let (receiving, connected, role, has_group) = self.read(|s| {
            (
                s.receive == ReceivePhase::Listening,
                s.is_connected(),
                s.local_role(),
                s.group_info.is_some(),
            )
        });
        if receiving {
            self.log_debug("Already receiving messages");
            return Ok(());
        }
        if !connected {
            return Err(self.surface("Start receiving", SessionError::NotConnected));
        }
        if role != SenderRole::GroupOwner {
            return Err(self.surface("Start receiving", SessionError::ClientCannotReceive));
        }
        if !has_group && self.fetch_group_info().await.is_none() {
            self.log_warn("Group info unavailable; listening without group details");
        }

        let token = self.inner.shutdown.child_token();
        let shutdown = &self.inner.shutdown;
        let activation = self.update(|s| {
            if shutdown.is_cancelled() {
                Activation::ShutDown
            } else if s.receive == ReceivePhase::Listening {
                Activation::AlreadyActive
            } else if !s.is_connected() {
                Activation::Disconnected
            } else {
                s.receive = ReceivePhase::Listening;
                s.receive_token = Some(token.clone());
                Activation::Started
            }
        });
        match activation {
            Activation::AlreadyActive => {
                self.log_debug("Already receiving messages");
                Ok(())
            }
            Activation::Disconnected => {
                Err(self.surface("Start receiving", SessionError::NotConnected))
            }
            Activation::ShutDown => {
                self.log_debug("Session shut down; receiver not activated");
                Err(SessionError::Shutdown)
            }
            Activation::Started => {
                self.log_info("Message receiver activated");
                let this = self.clone();
                tokio::spawn(async move { this.receive_loop(token).await });
                Ok(())
            }
        }
    }

    /// 停止接收：取消循环令牌并重建连接信息订阅。未在接收时为空操作。
    pub fn stop_receiving(&self) {
        let was_receiving = self.update(|s| {
            let was = s.receive == ReceivePhase::Listening;
            s.receive = ReceivePhase::Idle;
            if let Some(token) = s.receive_token.take() {
                token.cancel();
            }
            was
        });
        if !was_receiving {
            self.log_debug("Not receiving messages; nothing to stop");
            return;
        }
        self.reset_connection_subscription();
        self.log_info("Message receiving stopped");
    }

    /// 以网关的最新连接信息为准，重启接收
    pub async fn fetch_messages(&self) -> Result<(), SessionError> {
        self.log_info("Starting message fetch operation...");
        self.update(|s| s.fetching = true);
        let _guard = FlagGuard::new(self, |s| s.fetching = false);

        let info = match self.inner.gateway.connection_info().await {
            Ok(info) => info,
            Err(e) => return Err(self.surface("Fetch messages", e.into())),
        };
        let formed = info.as_ref().is_some_and(|i| i.group_formed);
        self.log_info(format!(
            "Connection status: {}",
            if formed { "connected" } else { "not connected" }
        ));
        if !formed {
            self.apply_connection_info(info);
            return Err(self.surface("Fetch messages", SessionError::NotConnected));
        }

        self.stop_receiving();
        self.start_receiving().await?;
        self.notify(Notice::Toast("Actively listening for messages".to_string()));
        Ok(())
    }

    /// 连接成功后按角色启动消息通道
    pub(crate) async fn start_role_messaging(&self) {
        match self.read(|s| s.local_role()) {
            SenderRole::GroupOwner => {
                let _ = self.start_receiving().await;
            }
            SenderRole::Client => {
                self.stop_receiving();
                self.log_info("Connected as client: ready to send messages");
            }
            SenderRole::Unknown => {}
        }
    }

    async fn receive_loop(self, token: CancellationToken) {
        loop {
            if token.is_cancelled() || !self.read(|s| s.receive == ReceivePhase::Listening) {
                break;
            }
            let result = {
                let _slot = self.inner.receive_slot.lock().await;
                if token.is_cancelled() {
                    break;
                }
                self.inner.gateway.receive_message().await
            };
            // 调用进行中被停止时，已到达的载荷仍照常处理
            let delay = match result {
                Ok(payload) => {
                    self.handle_incoming(&payload);
                    LISTEN_DELAY
                }
                Err(e) => {
                    self.log_warn(format!("Error receiving message: {e}"));
                    LISTEN_ERROR_DELAY
                }
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        tracing::debug!("Message listener stopped");
    }

    /// 解码并追加一条入站消息；自回显只记录
    pub(crate) fn handle_incoming(&self, payload: &str) {
        if payload.trim().is_empty() {
            self.log_warn("Received invalid message format: empty payload");
            return;
        }
        let message = decode_incoming(payload, Utc::now());
        let appended = self.update(|s| {
            if s.recently_sent.contains(&message.id) {
                false
            } else {
                s.messages.push(message.clone());
                true
            }
        });
        if appended {
            self.log_info(format!(
                "Received message from {}: {}",
                message.sender, message.text
            ));
            self.notify(Notice::Toast("New message received".to_string()));
        } else {
            self.log_debug(format!("Ignoring echo of own message {}", message.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::SessionSettings;
    use crate::radio::{ConnectionInfo, RadioError, SimulatedPermissions, SimulatedRadio};

    fn setup(radio: SimulatedRadio) -> (Arc<SimulatedRadio>, Orchestrator) {
        let radio = Arc::new(radio);
        let orch = Orchestrator::new(
            radio.clone(),
            Arc::new(SimulatedPermissions::new()),
            SessionSettings::default(),
        );
        (radio, orch)
    }

    async fn connected(owner: bool) -> (Arc<SimulatedRadio>, Orchestrator) {
        let (radio, orch) = setup(SimulatedRadio::new().without_events());
        radio.set_connection(Some(ConnectionInfo::formed(owner, "192.168.49.1")));
        orch.update(|s| s.connection = Some(ConnectionInfo::formed(owner, "192.168.49.1")));
        (radio, orch)
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (radio, orch) = setup(SimulatedRadio::new());
        assert_eq!(orch.send_message("hi").await, Err(SessionError::NotConnected));
        assert_eq!(radio.calls("send_message"), 0);
    }

    #[tokio::test]
    async fn test_owner_cannot_send() {
        let (radio, orch) = connected(true).await;
        let mut notices = orch.notices();
        assert_eq!(orch.send_message("hi").await, Err(SessionError::OwnerCannotSend));
        assert_eq!(radio.calls("send_message"), 0);
        match notices.try_recv().unwrap() {
            Notice::Toast(msg) => assert!(msg.contains("cannot send")),
            other => panic!("Expected toast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected() {
        let (radio, orch) = connected(false).await;
        assert_eq!(orch.send_message("   ").await, Err(SessionError::EmptyMessage));
        assert_eq!(radio.calls("send_message"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_send_appends_and_remembers_id() {
        let (radio, orch) = connected(false).await;
        let sent = orch.send_message("hello owner").await.unwrap();

        assert!(sent.is_sent);
        assert_eq!(sent.sender, SenderRole::Client);
        let payloads = radio.sent_payloads();
        assert_eq!(payloads.len(), 1);
        let envelope = Envelope::parse(&payloads[0]).unwrap();
        assert_eq!(envelope.id, sent.id);
        assert_eq!(envelope.content, "hello owner");

        let snap = orch.snapshot();
        assert_eq!(snap.messages, vec![sent.clone()]);
        assert!(!snap.sending_message);

        // 回显同一 id 不会再次追加
        orch.handle_incoming(&payloads[0]);
        assert_eq!(orch.snapshot().messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_resets_flag() {
        let (radio, orch) = connected(false).await;
        radio.fail_next("send_message", RadioError::untyped("socket timed out"));

        let err = orch.send_message("hi").await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectionFailure(_)));
        let snap = orch.snapshot();
        assert!(!snap.sending_message);
        assert!(snap.messages.is_empty());
    }

    #[tokio::test]
    async fn test_client_cannot_receive() {
        let (radio, orch) = connected(false).await;
        assert_eq!(
            orch.start_receiving().await,
            Err(SessionError::ClientCannotReceive)
        );
        assert_eq!(radio.calls("receive_message"), 0);
        assert!(!orch.snapshot().receiving_messages);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_receives_in_order() {
        let (radio, orch) = connected(true).await;
        radio.inject_message(r#"{"id":"1-a","content":"first","timestamp":1,"sender":"client"}"#);
        radio.inject_message("second (legacy)");

        orch.start_receiving().await.unwrap();
        assert!(orch.snapshot().group_info.is_some());
        let mut rx = orch.watch();
        let snap = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.messages.len() == 2),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        assert_eq!(snap.messages[0].text, "first");
        assert_eq!(snap.messages[0].sender, SenderRole::Client);
        assert_eq!(snap.messages[1].text, "second (legacy)");
        assert_eq!(snap.messages[1].sender, SenderRole::Unknown);
        assert!(snap.messages.iter().all(|m| !m.is_sent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_receiving_twice_spawns_one_loop() {
        let (radio, orch) = connected(true).await;
        orch.start_receiving().await.unwrap();
        orch.start_receiving().await.unwrap();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(radio.calls("receive_message"), 1);
        let activations = orch
            .snapshot()
            .logs
            .iter()
            .filter(|l| l.message == "Message receiver activated")
            .count();
        assert_eq!(activations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_waits_before_transport() {
        let (radio, orch) = connected(false).await;
        let pending = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.send_message("hi").await })
        };

        sleep(SEND_PRE_DELAY - Duration::from_millis(10)).await;
        assert!(radio.sent_payloads().is_empty());
        assert!(orch.snapshot().sending_message);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(radio.sent_payloads().len(), 1);
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relisten_delay_after_message() {
        let (radio, orch) = connected(true).await;
        radio.inject_message(r#"{"id":"1-a","content":"hi","timestamp":1,"sender":"client"}"#);
        orch.start_receiving().await.unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(orch.snapshot().messages.len(), 1);
        assert_eq!(radio.calls("receive_message"), 1);

        sleep(LISTEN_DELAY - Duration::from_millis(20)).await;
        assert_eq!(radio.calls("receive_message"), 1);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(radio.calls("receive_message"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_task_after_teardown_stays_idle() {
        let (radio, orch) = setup(SimulatedRadio::new().without_events().with_group_info_lag(3));
        radio.set_connection(Some(ConnectionInfo::formed(true, "192.168.49.1")));
        orch.reconcile_connection_info().await;
        orch.teardown().await;

        sleep(Duration::from_secs(10)).await;
        let snap = orch.snapshot();
        assert!(orch.is_shut_down());
        assert!(!snap.receiving_messages);
        assert_eq!(radio.calls("receive_message"), 0);
        assert!(!snap
            .logs
            .iter()
            .any(|l| l.message == "Message receiver activated"));
    }

    #[tokio::test]
    async fn test_start_receiving_after_teardown_is_refused() {
        let (radio, orch) = connected(true).await;
        orch.teardown().await;
        assert_eq!(orch.start_receiving().await, Err(SessionError::Shutdown));
        assert_eq!(radio.calls("group_info"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_error_backs_off() {
        let (radio, orch) = connected(true).await;
        radio.inject_receive_error(RadioError::untyped("read failed"));
        orch.start_receiving().await.unwrap();

        sleep(Duration::from_millis(500)).await;
        assert_eq!(radio.calls("receive_message"), 1);
        sleep(Duration::from_millis(600)).await;
        assert_eq!(radio.calls("receive_message"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_receiving_resets_subscription() {
        let (radio, orch) = connected(true).await;
        orch.initialize().await.unwrap();
        orch.start_receiving().await.unwrap();
        assert!(orch.snapshot().receiving_messages);

        orch.stop_receiving();
        assert!(!orch.snapshot().receiving_messages);
        assert_eq!(radio.connection_subscribers(), 1);
        assert!(orch
            .snapshot()
            .logs
            .iter()
            .any(|l| l.message == "Reset connection info subscription"));

        let before = orch.snapshot().logs.len();
        orch.stop_receiving();
        assert_eq!(orch.snapshot().logs.len(), before + 1);
    }

    #[tokio::test]
    async fn test_empty_payload_is_dropped() {
        let (_radio, orch) = connected(true).await;
        orch.handle_incoming("  ");
        assert!(orch.snapshot().messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_messages_restarts_listener() {
        let (radio, orch) = connected(true).await;
        orch.fetch_messages().await.unwrap();
        let snap = orch.snapshot();
        assert!(snap.receiving_messages);
        assert!(!snap.fetching_messages);

        radio.set_connection(Some(ConnectionInfo::default()));
        assert_eq!(orch.fetch_messages().await, Err(SessionError::NotConnected));
        assert!(!orch.snapshot().fetching_messages);
        assert!(!orch.snapshot().receiving_messages);
    }
}
