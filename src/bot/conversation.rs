//! The conversation state machine
//!
//! `SearchConversation` is the single writer of session state. Given the
//! current state and one inbound event it decides the next state, the
//! collaborator calls to make, and the reply to render. Internal failures
//! never escape: they are logged and collapsed into the generic system-error
//! template with the persisted state left untouched, so a retry is safe.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::bot::{keyboards, messages};
use crate::broadcast::BroadcastEngine;
use crate::directory::StudentDirectory;
use crate::dispatch::{BotManager, MessageRef, OutboundPayload};
use crate::lookup::ResultLookup;
use crate::ratelimit::RateLimiter;
use crate::session::{ConversationState, SessionRecord, SessionStore};
use crate::validation;

/// A pressed inline button, decoded from its callback data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Back to the main menu
    MainMenu,
    /// Start a name search
    SearchByName,
    /// Start an exam-number search
    SearchByExamNo,
    /// A governorate was picked
    Governorate(String),
    /// A student was picked from a result list
    SelectStudent(String),
    /// Share a rendered result
    Share(String),
    /// Re-check the channel subscription
    CheckSubscription,
    /// Anything we did not produce
    Unknown(String),
}

impl CallbackAction {
    /// Decode raw callback data
    #[must_use]
    pub fn parse(data: &str) -> Self {
        match data {
            "main_menu" => Self::MainMenu,
            "search_name" => Self::SearchByName,
            "search_examno" => Self::SearchByExamNo,
            "check_subscription" => Self::CheckSubscription,
            _ => {
                if let Some(gov) = data.strip_prefix("gov_") {
                    Self::Governorate(gov.to_string())
                } else if let Some(examno) = data.strip_prefix("select_student_") {
                    Self::SelectStudent(examno.to_string())
                } else if let Some(examno) = data.strip_prefix("share_") {
                    Self::Share(examno.to_string())
                } else {
                    Self::Unknown(data.to_string())
                }
            }
        }
    }
}

/// One inbound update, already reduced to what the state machine needs
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// `/start`
    Start,
    /// `/broadcast` (admin)
    Broadcast,
    /// `/stats` (admin)
    Stats,
    /// Plain text message
    Text(String),
    /// Inline button press
    Callback {
        /// The message carrying the pressed keyboard, if still accessible
        message: Option<MessageRef>,
        /// Decoded button action
        action: CallbackAction,
    },
}

impl InboundEvent {
    fn message_ref(&self) -> Option<MessageRef> {
        match self {
            Self::Callback { message, .. } => *message,
            _ => None,
        }
    }
}

/// How a reply should reach the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    /// New message
    Send,
    /// Edit the referenced message in place
    Edit(MessageRef),
    /// Alert popup on the pressed button, no message
    Alert,
}

/// Render instruction handed back to the ingress layer
#[derive(Debug, Clone)]
pub struct Reply {
    /// Delivery mode
    pub kind: ReplyKind,
    /// Message text, HTML mode
    pub text: String,
    /// Optional inline keyboard (ignored for alerts)
    pub keyboard: Option<teloxide::types::InlineKeyboardMarkup>,
}

impl Reply {
    fn send(text: impl Into<String>, keyboard: teloxide::types::InlineKeyboardMarkup) -> Self {
        Self {
            kind: ReplyKind::Send,
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    fn edit_or_send(
        message: Option<MessageRef>,
        text: impl Into<String>,
        keyboard: teloxide::types::InlineKeyboardMarkup,
    ) -> Self {
        Self {
            kind: message.map_or(ReplyKind::Send, ReplyKind::Edit),
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    fn alert(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Alert,
            text: text.into(),
            keyboard: None,
        }
    }

    /// The reply as an outbound payload
    #[must_use]
    pub fn payload(&self) -> OutboundPayload {
        OutboundPayload {
            text: self.text.clone(),
            keyboard: self.keyboard.clone(),
        }
    }
}

/// Collaborators the conversation consumes
pub struct ConversationDeps {
    /// Session persistence
    pub sessions: Arc<dyn SessionStore>,
    /// Student/result records
    pub directory: Arc<dyn StudentDirectory>,
    /// External result fallback
    pub lookup: Arc<dyn ResultLookup>,
    /// Search admission gate
    pub limiter: RateLimiter,
    /// Admin broadcast runner
    pub broadcaster: Arc<BroadcastEngine>,
    /// Client ownership, for the subscription gate and stats
    pub manager: Arc<dyn BotManager>,
    /// Users allowed to broadcast
    pub admins: HashSet<i64>,
    /// Channel users must join, if enforced
    pub required_channel: Option<String>,
    /// Result page cap for name searches
    pub page_limit: usize,
}

/// The per-user multi-step search dialogue
pub struct SearchConversation {
    deps: ConversationDeps,
}

impl SearchConversation {
    /// Conversation over the given collaborators
    #[must_use]
    pub fn new(deps: ConversationDeps) -> Self {
        Self { deps }
    }

    /// Process one inbound event and produce the reply to render.
    ///
    /// Never fails: internal errors come back as the generic system-error
    /// template with the session state left as it was.
    pub async fn handle_inbound(&self, user_id: i64, event: InboundEvent) -> Reply {
        let message = event.message_ref();
        match self.dispatch_event(user_id, event).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("conversation error for user {user_id}: {e:#}");
                Reply::edit_or_send(message, messages::SYSTEM_ERROR, keyboards::error_retry())
            }
        }
    }

    /// Fan an admin message out to all users (exposed for the ingress layer)
    ///
    /// # Errors
    ///
    /// Returns an error if the audience cannot be listed.
    pub async fn run_broadcast(
        &self,
        message: &str,
    ) -> Result<crate::broadcast::BroadcastResult, crate::session::StoreError> {
        self.deps.broadcaster.run(message).await
    }

    async fn dispatch_event(&self, user_id: i64, event: InboundEvent) -> anyhow::Result<Reply> {
        match event {
            InboundEvent::Start => self.on_start(user_id).await,
            InboundEvent::Broadcast => self.on_broadcast_command(user_id).await,
            InboundEvent::Stats => Ok(self.on_stats_command(user_id)),
            InboundEvent::Text(text) => self.on_text(user_id, &text).await,
            InboundEvent::Callback { message, action } => {
                self.on_callback(user_id, message, action).await
            }
        }
    }

    async fn current_state(&self, user_id: i64) -> anyhow::Result<ConversationState> {
        Ok(self
            .deps
            .sessions
            .get(user_id)
            .await?
            .map(|record| record.state)
            .unwrap_or_default())
    }

    /// Persist a state transition. Failures are logged and swallowed: the
    /// session stays at the last successfully persisted state.
    async fn save_state(&self, user_id: i64, state: ConversationState) {
        let record = SessionRecord::new(user_id, state);
        if let Err(e) = self.deps.sessions.save(&record).await {
            warn!("failed to persist session for user {user_id}: {e}");
        }
    }

    /// Channel-membership gate. Passes when no channel is configured, and
    /// fails open when the membership check itself is unavailable.
    async fn subscription_allowed(&self, user_id: i64) -> bool {
        let Some(channel) = &self.deps.required_channel else {
            return true;
        };
        match self
            .deps
            .manager
            .primary_client()
            .is_channel_member(channel, user_id)
            .await
        {
            Ok(member) => member,
            Err(e) => {
                warn!("subscription check unavailable for user {user_id}: {e}");
                true
            }
        }
    }

    fn subscription_reply(&self, message: Option<MessageRef>) -> Reply {
        let channel = self.deps.required_channel.as_deref().unwrap_or_default();
        Reply::edit_or_send(
            message,
            messages::subscription_required(channel),
            keyboards::subscription(channel),
        )
    }

    async fn on_start(&self, user_id: i64) -> anyhow::Result<Reply> {
        info!("start from user {user_id}");
        if !self.subscription_allowed(user_id).await {
            return Ok(self.subscription_reply(None));
        }
        self.save_state(user_id, ConversationState::MainMenu).await;
        Ok(Reply::send(messages::WELCOME, keyboards::main_menu()))
    }

    async fn on_broadcast_command(&self, user_id: i64) -> anyhow::Result<Reply> {
        if !self.deps.admins.contains(&user_id) {
            warn!("broadcast command from non-admin {user_id}");
            return Ok(Reply::send(messages::ADMIN_ONLY, keyboards::back_to_main()));
        }
        self.save_state(user_id, ConversationState::WaitingBroadcastBody)
            .await;
        Ok(Reply::send(
            messages::BROADCAST_PROMPT,
            keyboards::back_to_main(),
        ))
    }

    fn on_stats_command(&self, user_id: i64) -> Reply {
        if !self.deps.admins.contains(&user_id) {
            return Reply::send(messages::ADMIN_ONLY, keyboards::back_to_main());
        }
        let stats = self.deps.manager.stats();
        Reply::send(messages::stats_text(&stats), keyboards::back_to_main())
    }

    async fn on_text(&self, user_id: i64, text: &str) -> anyhow::Result<Reply> {
        match self.current_state(user_id).await? {
            ConversationState::MainMenu => {
                Ok(Reply::send(messages::WELCOME, keyboards::main_menu()))
            }
            ConversationState::WaitingGovernorate => {
                // Governorates come in as button presses; re-show the picker
                let governorates = self.deps.directory.list_governorates().await?;
                Ok(Reply::send(
                    messages::GOVERNORATE_PROMPT,
                    keyboards::governorates(&governorates),
                ))
            }
            ConversationState::WaitingName { governorate } => {
                self.handle_name_input(user_id, text, &governorate).await
            }
            ConversationState::WaitingExamNo => self.handle_examno_input(user_id, text).await,
            ConversationState::WaitingBroadcastBody => {
                Ok(self.handle_broadcast_body(user_id, text).await)
            }
            ConversationState::WaitingBroadcastConfirm { message } => {
                self.handle_broadcast_confirm(user_id, text, &message).await
            }
        }
    }

    async fn handle_name_input(
        &self,
        user_id: i64,
        raw: &str,
        governorate: &str,
    ) -> anyhow::Result<Reply> {
        if !self.deps.limiter.allow(user_id).await {
            return Ok(Reply::send(
                messages::RATE_LIMIT_EXCEEDED,
                keyboards::back_to_main(),
            ));
        }

        let Some(name) = validation::clean_arabic_name(raw) else {
            return Ok(Reply::send(messages::INVALID_NAME, keyboards::back_to_main()));
        };
        if validation::is_spam_input(&name) {
            return Ok(Reply::send(
                messages::INVALID_INPUT,
                keyboards::back_to_main(),
            ));
        }

        info!("name search by user {user_id}: '{name}' in {governorate}");
        let results = self
            .deps
            .directory
            .find_by_name(&name, Some(governorate), self.deps.page_limit, 0)
            .await?;

        let reply = match results.students.as_slice() {
            [] => Reply::send(
                messages::no_name_matches(&name, governorate),
                keyboards::back_to_main(),
            ),
            [only] => {
                let (text, keyboard) = self.render_result(&only.examno).await?;
                Reply::send(text, keyboard)
            }
            many => Reply::send(
                messages::name_search_listing(
                    &name,
                    governorate,
                    many,
                    results.total_count,
                    results.has_more,
                ),
                keyboards::student_results(many),
            ),
        };

        self.save_state(user_id, ConversationState::MainMenu).await;
        Ok(reply)
    }

    async fn handle_examno_input(&self, user_id: i64, raw: &str) -> anyhow::Result<Reply> {
        if !self.deps.limiter.allow(user_id).await {
            return Ok(Reply::send(
                messages::RATE_LIMIT_EXCEEDED,
                keyboards::back_to_main(),
            ));
        }

        let Some(examno) = validation::clean_exam_number(raw) else {
            return Ok(Reply::send(
                messages::INVALID_EXAMNO,
                keyboards::back_to_main(),
            ));
        };

        info!("exam-number lookup by user {user_id}: {examno}");
        let (text, keyboard) = self.render_result(&examno).await?;
        self.save_state(user_id, ConversationState::MainMenu).await;
        Ok(Reply::send(text, keyboard))
    }

    async fn handle_broadcast_body(&self, user_id: i64, text: &str) -> Reply {
        if text.trim() == messages::CANCEL_TOKEN {
            self.save_state(user_id, ConversationState::MainMenu).await;
            return Reply::send(messages::BROADCAST_CANCELLED, keyboards::main_menu());
        }

        self.save_state(
            user_id,
            ConversationState::WaitingBroadcastConfirm {
                message: text.to_string(),
            },
        )
        .await;
        Reply::send(messages::broadcast_confirm(text), keyboards::back_to_main())
    }

    async fn handle_broadcast_confirm(
        &self,
        user_id: i64,
        text: &str,
        message: &str,
    ) -> anyhow::Result<Reply> {
        match text.trim() {
            messages::CONFIRM_TOKEN => {
                info!("broadcast confirmed by admin {user_id}");
                let result = self.deps.broadcaster.run(message).await?;
                self.save_state(user_id, ConversationState::MainMenu).await;
                Ok(Reply::send(
                    messages::broadcast_receipt(&result),
                    keyboards::main_menu(),
                ))
            }
            messages::CANCEL_TOKEN => {
                self.save_state(user_id, ConversationState::MainMenu).await;
                Ok(Reply::send(
                    messages::BROADCAST_CANCELLED,
                    keyboards::main_menu(),
                ))
            }
            _ => Ok(Reply::send(
                messages::BROADCAST_REPROMPT,
                keyboards::back_to_main(),
            )),
        }
    }

    async fn on_callback(
        &self,
        user_id: i64,
        message: Option<MessageRef>,
        action: CallbackAction,
    ) -> anyhow::Result<Reply> {
        match action {
            CallbackAction::MainMenu => {
                self.save_state(user_id, ConversationState::MainMenu).await;
                Ok(Reply::edit_or_send(
                    message,
                    messages::WELCOME,
                    keyboards::main_menu(),
                ))
            }
            CallbackAction::SearchByName => self.start_name_search(user_id, message).await,
            CallbackAction::SearchByExamNo => {
                if !self.subscription_allowed(user_id).await {
                    return Ok(self.subscription_reply(message));
                }
                self.save_state(user_id, ConversationState::WaitingExamNo)
                    .await;
                Ok(Reply::edit_or_send(
                    message,
                    messages::EXAMNO_PROMPT,
                    keyboards::back_to_main(),
                ))
            }
            CallbackAction::Governorate(governorate) => {
                self.select_governorate(user_id, message, governorate).await
            }
            CallbackAction::SelectStudent(examno) => {
                self.select_student(user_id, message, &examno).await
            }
            CallbackAction::Share(examno) => self.share_result(&examno).await,
            CallbackAction::CheckSubscription => Ok(self.recheck_subscription(user_id, message).await),
            CallbackAction::Unknown(data) => {
                warn!("unknown callback from user {user_id}: {data}");
                Ok(Reply::edit_or_send(
                    message,
                    messages::UNKNOWN_OPTION,
                    keyboards::main_menu(),
                ))
            }
        }
    }

    async fn start_name_search(
        &self,
        user_id: i64,
        message: Option<MessageRef>,
    ) -> anyhow::Result<Reply> {
        if !self.subscription_allowed(user_id).await {
            return Ok(self.subscription_reply(message));
        }
        let governorates = self.deps.directory.list_governorates().await?;
        self.save_state(user_id, ConversationState::WaitingGovernorate)
            .await;
        Ok(Reply::edit_or_send(
            message,
            messages::GOVERNORATE_PROMPT,
            keyboards::governorates(&governorates),
        ))
    }

    async fn select_governorate(
        &self,
        user_id: i64,
        message: Option<MessageRef>,
        governorate: String,
    ) -> anyhow::Result<Reply> {
        if self.current_state(user_id).await? != ConversationState::WaitingGovernorate {
            return Ok(Reply::edit_or_send(
                message,
                messages::SESSION_EXPIRED,
                keyboards::main_menu(),
            ));
        }

        let known = self.deps.directory.list_governorates().await?;
        if !validation::validate_governorate(&governorate, &known) {
            return Ok(Reply::edit_or_send(
                message,
                messages::UNKNOWN_OPTION,
                keyboards::main_menu(),
            ));
        }

        let prompt = messages::governorate_chosen(&governorate);
        self.save_state(user_id, ConversationState::WaitingName { governorate })
            .await;
        Ok(Reply::edit_or_send(
            message,
            prompt,
            keyboards::back_to_main(),
        ))
    }

    async fn select_student(
        &self,
        user_id: i64,
        message: Option<MessageRef>,
        examno: &str,
    ) -> anyhow::Result<Reply> {
        if !self.deps.limiter.allow(user_id).await {
            return Ok(Reply::alert(messages::RATE_LIMIT_EXCEEDED));
        }
        let (text, keyboard) = self.render_result(examno).await?;
        self.save_state(user_id, ConversationState::MainMenu).await;
        Ok(Reply::edit_or_send(message, text, keyboard))
    }

    async fn share_result(&self, examno: &str) -> anyhow::Result<Reply> {
        match self.deps.directory.find_by_exam_number(examno).await? {
            Some(student) => Ok(Reply::send(
                messages::share_message(&student.name, examno),
                keyboards::back_to_main(),
            )),
            None => Ok(Reply::alert(messages::NO_STUDENT_DATA)),
        }
    }

    async fn recheck_subscription(&self, user_id: i64, message: Option<MessageRef>) -> Reply {
        if self.subscription_allowed(user_id).await {
            self.save_state(user_id, ConversationState::MainMenu).await;
            Reply::edit_or_send(
                message,
                messages::SUBSCRIPTION_SUCCESS,
                keyboards::main_menu(),
            )
        } else {
            self.subscription_reply(message)
        }
    }

    /// Build the result card for an exam number.
    ///
    /// Prefers the locally stored result; falls back to the external lookup
    /// service, and degrades to the "no result available" card when neither
    /// has anything — lookups failing is not an error the user sees.
    async fn render_result(
        &self,
        examno: &str,
    ) -> anyhow::Result<(String, teloxide::types::InlineKeyboardMarkup)> {
        let Some(student) = self.deps.directory.find_by_exam_number(examno).await? else {
            return Ok((messages::NO_STUDENT_DATA.to_string(), keyboards::back_to_main()));
        };

        let local = match self.deps.directory.find_result(examno).await {
            Ok(result) => result,
            Err(e) => {
                warn!("local result lookup failed for {examno}: {e}");
                None
            }
        };

        let text = match local {
            Some(result) => messages::format_exam_result(&student, Some(&result)),
            None => match self.deps.lookup.lookup(examno).await {
                Ok(payload) => messages::format_api_result(&payload),
                Err(e) => {
                    info!("external lookup empty for {examno}: {e}");
                    messages::format_exam_result(&student, None)
                }
            },
        };

        Ok((text, keyboards::result_actions(examno)))
    }
}
