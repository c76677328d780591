//! Pure user→credential routing
//!
//! Deterministic, stateless assignment of users to bot tokens. The same user
//! always resolves to the same token for a fixed token list; resizing the
//! list reshuffles assignments, which is fine because only conversation
//! state is persisted, never the token a user last talked through.

use crate::config::{BotMode, Credential, SettingsError};

/// Explicit routing configuration, passed into constructors — no process
/// globals hold credentials.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Ordered token list; index 0 is the primary credential
    pub credentials: Vec<Credential>,
    /// Traffic distribution mode, fixed at process start
    pub mode: BotMode,
}

impl RouterConfig {
    /// Validate and build a routing configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::NoCredentialsConfigured`] for an empty list.
    pub fn new(credentials: Vec<Credential>, mode: BotMode) -> Result<Self, SettingsError> {
        if credentials.is_empty() {
            return Err(SettingsError::NoCredentialsConfigured);
        }
        Ok(Self { credentials, mode })
    }
}

/// Maps user IDs to credentials. Holds no state beyond the config.
#[derive(Debug, Clone)]
pub struct TokenRouter {
    config: RouterConfig,
}

impl TokenRouter {
    /// Router over a validated configuration
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// The credential that receives inbound webhook traffic.
    ///
    /// In single-interface (and single-token) mode every shard ingresses
    /// through the primary. In multi-bot mode each shard has its own token,
    /// with out-of-range shard IDs falling back to the primary.
    #[must_use]
    pub fn webhook_credential(&self, shard_id: usize) -> &Credential {
        match self.config.mode {
            BotMode::SingleInterface | BotMode::SingleToken => &self.config.credentials[0],
            BotMode::MultiBot => self
                .config
                .credentials
                .get(shard_id)
                .unwrap_or(&self.config.credentials[0]),
        }
    }

    /// The credential used to answer this user.
    #[must_use]
    pub fn response_credential(&self, user_id: i64) -> &Credential {
        match self.config.mode {
            BotMode::SingleToken => &self.config.credentials[0],
            BotMode::SingleInterface | BotMode::MultiBot => {
                let len = self.config.credentials.len() as i64;
                let index = user_id.rem_euclid(len) as usize;
                &self.config.credentials[index]
            }
        }
    }

    /// Index of the credential answering this user, for logs and stats
    #[must_use]
    pub fn response_index(&self, user_id: i64) -> usize {
        match self.config.mode {
            BotMode::SingleToken => 0,
            BotMode::SingleInterface | BotMode::MultiBot => {
                user_id.rem_euclid(self.config.credentials.len() as i64) as usize
            }
        }
    }

    /// The credentials that must run an ingress loop in this mode
    #[must_use]
    pub fn ingress_credentials(&self) -> &[Credential] {
        match self.config.mode {
            BotMode::SingleInterface | BotMode::SingleToken => &self.config.credentials[..1],
            BotMode::MultiBot => &self.config.credentials,
        }
    }

    /// The full routing configuration
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}
