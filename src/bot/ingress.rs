//! Thin update → event → reply routing
//!
//! The single ingress point: teloxide updates are reduced to
//! [`InboundEvent`]s, handed to the conversation, and the resulting
//! [`Reply`] is delivered through the routed dispatcher. Updates for
//! different users may be processed concurrently; ordering within one user
//! follows the order the transport delivers them.

use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::utils::command::BotCommands;
use tracing::{debug, error};

use crate::bot::conversation::{
    CallbackAction, InboundEvent, Reply, ReplyKind, SearchConversation,
};
use crate::dispatch::{MessageRef, ResponseDispatcher};

/// Supported slash commands
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "الأوامر المدعومة:")]
pub enum Command {
    /// Open the main menu
    #[command(description = "بدء البحث عن النتائج")]
    Start,
    /// Start an admin broadcast
    #[command(description = "بث رسالة لجميع المستخدمين")]
    Broadcast,
    /// Show routing stats
    #[command(description = "إحصائيات البوت")]
    Stats,
}

/// The full update-routing tree for one ingress bot
#[must_use]
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text),
                ),
        )
}

fn user_id_of(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0.cast_signed())
}

async fn handle_command(
    msg: Message,
    cmd: Command,
    conversation: Arc<SearchConversation>,
    dispatcher: Arc<ResponseDispatcher>,
) -> Result<(), teloxide::RequestError> {
    let Some(user_id) = user_id_of(&msg) else {
        return respond(());
    };

    let event = match cmd {
        Command::Start => InboundEvent::Start,
        Command::Broadcast => InboundEvent::Broadcast,
        Command::Stats => InboundEvent::Stats,
    };

    let reply = conversation.handle_inbound(user_id, event).await;
    deliver(&dispatcher, user_id, reply, None).await;
    respond(())
}

async fn handle_text(
    msg: Message,
    conversation: Arc<SearchConversation>,
    dispatcher: Arc<ResponseDispatcher>,
) -> Result<(), teloxide::RequestError> {
    let (Some(user_id), Some(text)) = (user_id_of(&msg), msg.text()) else {
        return respond(());
    };

    let reply = conversation
        .handle_inbound(user_id, InboundEvent::Text(text.to_string()))
        .await;
    deliver(&dispatcher, user_id, reply, None).await;
    respond(())
}

async fn handle_callback(
    q: CallbackQuery,
    conversation: Arc<SearchConversation>,
    dispatcher: Arc<ResponseDispatcher>,
) -> Result<(), teloxide::RequestError> {
    let user_id = q.from.id.0.cast_signed();
    let Some(data) = q.data.as_deref() else {
        let _ = dispatcher.answer_callback(q.id.0.as_str(), None, false).await;
        return respond(());
    };

    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: m.chat().id.0,
        message_id: m.id().0,
    });

    let event = InboundEvent::Callback {
        message,
        action: CallbackAction::parse(data),
    };
    let reply = conversation.handle_inbound(user_id, event).await;
    deliver(&dispatcher, user_id, reply, Some(q.id.0.as_str())).await;
    respond(())
}

/// Push a reply out through the routed dispatcher.
///
/// Callback queries are always answered, either silently or as the alert the
/// reply asked for. Delivery failures are logged; by this point both the
/// routed and the primary credential have already been tried.
async fn deliver(
    dispatcher: &ResponseDispatcher,
    user_id: i64,
    reply: Reply,
    callback_id: Option<&str>,
) {
    match reply.kind {
        ReplyKind::Alert => {
            if let Some(id) = callback_id {
                if let Err(e) = dispatcher.answer_callback(id, Some(&reply.text), true).await {
                    error!("failed to answer callback for user {user_id}: {e}");
                }
            }
        }
        ReplyKind::Edit(message) => {
            ack_silently(dispatcher, callback_id, user_id).await;
            if let Err(e) = dispatcher.edit(user_id, message, &reply.payload()).await {
                error!("failed to edit reply for user {user_id}: {e}");
            }
        }
        ReplyKind::Send => {
            ack_silently(dispatcher, callback_id, user_id).await;
            if let Err(e) = dispatcher.send(user_id, &reply.payload()).await {
                error!("failed to send reply to user {user_id}: {e}");
            }
        }
    }
}

async fn ack_silently(dispatcher: &ResponseDispatcher, callback_id: Option<&str>, user_id: i64) {
    if let Some(id) = callback_id {
        if let Err(e) = dispatcher.answer_callback(id, None, false).await {
            debug!("callback ack failed for user {user_id}: {e}");
        }
    }
}
