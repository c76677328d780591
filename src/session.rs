//! Conversation state model and session store contract
//!
//! Each user has exactly one [`ConversationState`] at a time. The state is a
//! tagged union: a variant carries only the context that is valid while the
//! user is in that step, so a value stored during a previous step can never
//! be misread later. The backing store is a dumb persistence layer; all
//! transition rules live in the conversation module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by session persistence and the rate-limit cache
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached or rejected the call
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// The pending step of one user's dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    /// Idle at the main menu
    #[default]
    MainMenu,
    /// Picked "search by name", must choose a governorate next
    WaitingGovernorate,
    /// Governorate chosen, waiting for the name to search
    WaitingName {
        /// Governorate filter applied to the upcoming search
        governorate: String,
    },
    /// Waiting for a 15-digit exam number
    WaitingExamNo,
    /// Admin started a broadcast, waiting for the message body
    WaitingBroadcastBody,
    /// Broadcast body captured, waiting for confirm/cancel
    WaitingBroadcastConfirm {
        /// The message that will be fanned out on confirmation
        message: String,
    },
}

/// One user's persisted session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Telegram user ID, the session key
    pub user_id: i64,
    /// Current dialogue step
    #[serde(flatten)]
    pub state: ConversationState,
    /// When this record was last written
    pub last_updated: DateTime<Utc>,
}

impl SessionRecord {
    /// Fresh record for a user entering the given state now
    #[must_use]
    pub fn new(user_id: i64, state: ConversationState) -> Self {
        Self {
            user_id,
            state,
            last_updated: Utc::now(),
        }
    }
}

/// Persistence contract for per-user sessions.
///
/// A missing record is not an error: it reads as a user idling at the main
/// menu. `list_user_ids` enumerates every user that ever interacted, which
/// is the broadcast target set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a user's session, `None` if they never interacted
    async fn get(&self, user_id: i64) -> Result<Option<SessionRecord>, StoreError>;
    /// Create or overwrite a user's session
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;
    /// All known user IDs
    async fn list_user_ids(&self) -> Result<Vec<i64>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_main_menu() {
        assert_eq!(ConversationState::default(), ConversationState::MainMenu);
    }

    #[test]
    fn test_state_serde_round_trip() {
        let states = [
            ConversationState::MainMenu,
            ConversationState::WaitingGovernorate,
            ConversationState::WaitingName {
                governorate: "بغداد".to_string(),
            },
            ConversationState::WaitingExamNo,
            ConversationState::WaitingBroadcastBody,
            ConversationState::WaitingBroadcastConfirm {
                message: "hello".to_string(),
            },
        ];
        for state in states {
            let json = serde_json::to_string(&state).expect("serialize");
            let back: ConversationState = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(state, back);
        }
    }

    #[test]
    fn test_record_round_trip_keeps_variant_payload() {
        let record = SessionRecord::new(
            42,
            ConversationState::WaitingName {
                governorate: "نينوى".to_string(),
            },
        );
        let json = serde_json::to_string(&record).expect("serialize");
        let back: SessionRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.user_id, 42);
        assert_eq!(
            back.state,
            ConversationState::WaitingName {
                governorate: "نينوى".to_string()
            }
        );
    }
}
