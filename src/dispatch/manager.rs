//! Bot manager variants selected at startup
//!
//! A [`BotManager`] owns one long-lived transport client per credential and
//! answers "which client talks to this user". The variant is chosen once
//! from configuration — callers never probe what kind of manager they hold.

use std::sync::Arc;

use tracing::info;

use crate::config::{BotMode, Credential, TOKEN_CAPACITY_PER_SECOND};
use crate::dispatch::router::TokenRouter;
use crate::dispatch::transport::OutboundTransport;

/// Builds a transport client for one credential
pub type TransportFactory = dyn Fn(&Credential) -> Arc<dyn OutboundTransport> + Send + Sync;

/// Snapshot of a manager's shape, for the admin stats command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    /// Active traffic mode
    pub mode: BotMode,
    /// Total credentials available for responses
    pub total_credentials: usize,
    /// Credentials running an ingress loop
    pub ingress_credentials: usize,
    /// Aggregate outbound ceiling, messages/second
    pub capacity_per_second: usize,
}

/// Client ownership and user→client resolution
pub trait BotManager: Send + Sync {
    /// The client that answers this user
    fn response_client(&self, user_id: i64) -> Arc<dyn OutboundTransport>;
    /// The primary credential's client (ingress owner, failover target)
    fn primary_client(&self) -> Arc<dyn OutboundTransport>;
    /// Index of the credential answering this user, for logging
    fn response_index(&self, user_id: i64) -> usize;
    /// Shape snapshot
    fn stats(&self) -> ManagerStats;
}

/// Build the manager variant matching the configured mode
#[must_use]
pub fn build_manager(router: TokenRouter, factory: &TransportFactory) -> Arc<dyn BotManager> {
    match router.config().mode {
        BotMode::MultiBot => Arc::new(ShardedManager::new(router, factory)),
        BotMode::SingleInterface | BotMode::SingleToken => {
            Arc::new(SingleInterfaceManager::new(router, factory))
        }
    }
}

/// One bot face, many response tokens.
///
/// Users talk to the primary bot; responses go out through whichever token
/// the router picks, so the send capacity scales with the token count while
/// users only ever see a single bot identity.
pub struct SingleInterfaceManager {
    router: TokenRouter,
    clients: Vec<Arc<dyn OutboundTransport>>,
}

impl SingleInterfaceManager {
    /// Create clients for every credential in the router's list
    #[must_use]
    pub fn new(router: TokenRouter, factory: &TransportFactory) -> Self {
        let clients: Vec<_> = router
            .config()
            .credentials
            .iter()
            .map(|c| factory(c))
            .collect();

        info!(
            "single-interface manager: main bot {}, {} response tokens, {} msg/s capacity",
            router.config().credentials[0].preview(),
            clients.len(),
            clients.len() * TOKEN_CAPACITY_PER_SECOND
        );

        Self { router, clients }
    }
}

impl BotManager for SingleInterfaceManager {
    fn response_client(&self, user_id: i64) -> Arc<dyn OutboundTransport> {
        self.clients[self.router.response_index(user_id)].clone()
    }

    fn primary_client(&self) -> Arc<dyn OutboundTransport> {
        self.clients[0].clone()
    }

    fn response_index(&self, user_id: i64) -> usize {
        self.router.response_index(user_id)
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats {
            mode: self.router.config().mode,
            total_credentials: self.clients.len(),
            ingress_credentials: 1,
            capacity_per_second: self.clients.len() * TOKEN_CAPACITY_PER_SECOND,
        }
    }
}

/// Classic sharding: each credential ingresses and answers its own users.
pub struct ShardedManager {
    router: TokenRouter,
    clients: Vec<Arc<dyn OutboundTransport>>,
}

impl ShardedManager {
    /// Create clients for every shard credential
    #[must_use]
    pub fn new(router: TokenRouter, factory: &TransportFactory) -> Self {
        let clients: Vec<_> = router
            .config()
            .credentials
            .iter()
            .map(|c| factory(c))
            .collect();

        info!("sharded manager: {} shards", clients.len());

        Self { router, clients }
    }
}

impl BotManager for ShardedManager {
    fn response_client(&self, user_id: i64) -> Arc<dyn OutboundTransport> {
        self.clients[self.router.response_index(user_id)].clone()
    }

    fn primary_client(&self) -> Arc<dyn OutboundTransport> {
        self.clients[0].clone()
    }

    fn response_index(&self, user_id: i64) -> usize {
        self.router.response_index(user_id)
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats {
            mode: self.router.config().mode,
            total_credentials: self.clients.len(),
            ingress_credentials: self.clients.len(),
            capacity_per_second: self.clients.len() * TOKEN_CAPACITY_PER_SECOND,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotMode;
    use crate::dispatch::router::RouterConfig;
    use crate::dispatch::transport::MockOutboundTransport;

    fn router(n: usize, mode: BotMode) -> TokenRouter {
        let credentials = (0..n).map(|i| Credential::new(format!("token-{i}"))).collect();
        TokenRouter::new(RouterConfig::new(credentials, mode).expect("config"))
    }

    fn noop_factory(_c: &Credential) -> Arc<dyn OutboundTransport> {
        Arc::new(MockOutboundTransport::new())
    }

    #[test]
    fn test_build_selects_variant_by_mode() {
        let manager = build_manager(router(3, BotMode::SingleInterface), &noop_factory);
        assert_eq!(manager.stats().ingress_credentials, 1);

        let manager = build_manager(router(3, BotMode::MultiBot), &noop_factory);
        assert_eq!(manager.stats().ingress_credentials, 3);
    }

    #[test]
    fn test_stats_capacity() {
        let manager = build_manager(router(17, BotMode::SingleInterface), &noop_factory);
        let stats = manager.stats();
        assert_eq!(stats.total_credentials, 17);
        assert_eq!(stats.capacity_per_second, 17 * TOKEN_CAPACITY_PER_SECOND);
        assert_eq!(stats.mode, BotMode::SingleInterface);
    }

    #[test]
    fn test_response_index_matches_router() {
        let manager = build_manager(router(4, BotMode::SingleInterface), &noop_factory);
        assert_eq!(manager.response_index(6), 2);
        assert_eq!(manager.response_index(6), manager.response_index(6));
    }
}
