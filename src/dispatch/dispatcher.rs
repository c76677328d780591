//! Response dispatch with primary-credential failover
//!
//! Every outbound send resolves its client through the manager. If the
//! routed backend client fails, the call is retried exactly once through the
//! primary credential: backend tokens are less monitored than the main one
//! and can be revoked or throttled without anyone noticing, and one dead
//! token must not take down the replies of its whole user slice.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatch::manager::BotManager;
use crate::dispatch::transport::{MessageRef, OutboundPayload};

/// Send or edit failed through both the routed and the primary credential
#[derive(Debug, Error)]
#[error("dispatch failed: {reason}")]
pub struct DispatchError {
    /// Underlying transport failure, primary attempt last
    pub reason: String,
}

/// Routed outbound sender. Holds no session state.
pub struct ResponseDispatcher {
    manager: Arc<dyn BotManager>,
}

impl ResponseDispatcher {
    /// Dispatcher over a configured manager
    #[must_use]
    pub fn new(manager: Arc<dyn BotManager>) -> Self {
        Self { manager }
    }

    /// The manager backing this dispatcher
    #[must_use]
    pub fn manager(&self) -> &Arc<dyn BotManager> {
        &self.manager
    }

    /// Send a message to a user through their routed credential.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] only after the primary fallback also fails.
    pub async fn send(
        &self,
        user_id: i64,
        payload: &OutboundPayload,
    ) -> Result<MessageRef, DispatchError> {
        let client = self.manager.response_client(user_id);
        match client.send_message(user_id, payload).await {
            Ok(sent) => {
                debug!(
                    "message sent to {user_id} via backend {}",
                    self.manager.response_index(user_id)
                );
                Ok(sent)
            }
            Err(backend_err) => {
                warn!(
                    "backend {} send to {user_id} failed: {backend_err}, falling back to primary",
                    self.manager.response_index(user_id)
                );
                self.manager
                    .primary_client()
                    .send_message(user_id, payload)
                    .await
                    .map_err(|primary_err| DispatchError {
                        reason: format!("backend: {backend_err}; primary: {primary_err}"),
                    })
            }
        }
    }

    /// Edit a previously sent message through the user's routed credential.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] only after the primary fallback also fails.
    pub async fn edit(
        &self,
        user_id: i64,
        message: MessageRef,
        payload: &OutboundPayload,
    ) -> Result<(), DispatchError> {
        let client = self.manager.response_client(user_id);
        match client.edit_message(message, payload).await {
            Ok(()) => Ok(()),
            Err(backend_err) => {
                warn!(
                    "backend {} edit for {user_id} failed: {backend_err}, falling back to primary",
                    self.manager.response_index(user_id)
                );
                self.manager
                    .primary_client()
                    .edit_message(message, payload)
                    .await
                    .map_err(|primary_err| DispatchError {
                        reason: format!("backend: {backend_err}; primary: {primary_err}"),
                    })
            }
        }
    }

    /// Acknowledge a callback query. Always goes through the primary: the
    /// callback was delivered to the primary's ingress, so only the primary
    /// may answer it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the primary call fails.
    pub async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), DispatchError> {
        self.manager
            .primary_client()
            .answer_callback(callback_id, text, show_alert)
            .await
            .map_err(|e| DispatchError {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::manager::ManagerStats;
    use crate::dispatch::transport::{MockOutboundTransport, OutboundTransport, TransportError};
    use crate::config::BotMode;

    struct TwoClientManager {
        backend: Arc<dyn OutboundTransport>,
        primary: Arc<dyn OutboundTransport>,
    }

    impl BotManager for TwoClientManager {
        fn response_client(&self, _user_id: i64) -> Arc<dyn OutboundTransport> {
            self.backend.clone()
        }
        fn primary_client(&self) -> Arc<dyn OutboundTransport> {
            self.primary.clone()
        }
        fn response_index(&self, _user_id: i64) -> usize {
            1
        }
        fn stats(&self) -> ManagerStats {
            ManagerStats {
                mode: BotMode::SingleInterface,
                total_credentials: 2,
                ingress_credentials: 1,
                capacity_per_second: 60,
            }
        }
    }

    fn msg_ref() -> MessageRef {
        MessageRef {
            chat_id: 5,
            message_id: 10,
        }
    }

    #[tokio::test]
    async fn test_send_uses_backend_when_healthy() {
        let mut backend = MockOutboundTransport::new();
        backend
            .expect_send_message()
            .times(1)
            .returning(|_, _| Ok(msg_ref()));
        let mut primary = MockOutboundTransport::new();
        primary.expect_send_message().times(0);

        let dispatcher = ResponseDispatcher::new(Arc::new(TwoClientManager {
            backend: Arc::new(backend),
            primary: Arc::new(primary),
        }));

        let sent = dispatcher
            .send(5, &OutboundPayload::text("مرحبا"))
            .await
            .expect("send");
        assert_eq!(sent, msg_ref());
    }

    #[tokio::test]
    async fn test_send_falls_back_to_primary_once() {
        let mut backend = MockOutboundTransport::new();
        backend
            .expect_send_message()
            .times(1)
            .returning(|_, _| Err(TransportError("revoked".into())));
        let mut primary = MockOutboundTransport::new();
        primary
            .expect_send_message()
            .times(1)
            .returning(|_, _| Ok(msg_ref()));

        let dispatcher = ResponseDispatcher::new(Arc::new(TwoClientManager {
            backend: Arc::new(backend),
            primary: Arc::new(primary),
        }));

        assert!(dispatcher.send(5, &OutboundPayload::text("مرحبا")).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_fails_after_both_attempts() {
        let mut backend = MockOutboundTransport::new();
        backend
            .expect_send_message()
            .times(1)
            .returning(|_, _| Err(TransportError("revoked".into())));
        let mut primary = MockOutboundTransport::new();
        primary
            .expect_send_message()
            .times(1)
            .returning(|_, _| Err(TransportError("flood wait".into())));

        let dispatcher = ResponseDispatcher::new(Arc::new(TwoClientManager {
            backend: Arc::new(backend),
            primary: Arc::new(primary),
        }));

        let err = dispatcher
            .send(5, &OutboundPayload::text("مرحبا"))
            .await
            .expect_err("both failed");
        assert!(err.reason.contains("revoked"));
        assert!(err.reason.contains("flood wait"));
    }

    #[tokio::test]
    async fn test_edit_falls_back_to_primary() {
        let mut backend = MockOutboundTransport::new();
        backend
            .expect_edit_message()
            .times(1)
            .returning(|_, _| Err(TransportError("down".into())));
        let mut primary = MockOutboundTransport::new();
        primary
            .expect_edit_message()
            .times(1)
            .returning(|_, _| Ok(()));

        let dispatcher = ResponseDispatcher::new(Arc::new(TwoClientManager {
            backend: Arc::new(backend),
            primary: Arc::new(primary),
        }));

        assert!(dispatcher
            .edit(5, msg_ref(), &OutboundPayload::text("تعديل"))
            .await
            .is_ok());
    }
}
