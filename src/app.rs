//! Shared state of the running bot, handed to every handler.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Mutex;

use crate::{
    config::Settings,
    database::Database,
    dialogue::FlowStore,
    error::EngineError,
    lifecycle::{MessageLifecycle, Owner},
    messenger::{Messenger, OutgoingMessage},
    pending::PendingOperations,
    types::{Group, MessageKey, User},
};

/// Where an update comes from and who sent it.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatContext {
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub is_group: bool,
    pub user: User,
}

impl ChatContext {
    /// The same chat, seen from another user.
    pub fn for_user(&self, user: User) -> ChatContext {
        ChatContext {
            user,
            ..self.clone()
        }
    }
}

pub struct App<D: Database, M: Messenger> {
    pub database: Arc<Mutex<D>>,
    pub lifecycle: MessageLifecycle<M>,
    pub flows: FlowStore,
    pub settings: Arc<Settings>,
}

impl<D: Database, M: Messenger> Clone for App<D, M> {
    fn clone(&self) -> Self {
        App {
            database: self.database.clone(),
            lifecycle: self.lifecycle.clone(),
            flows: self.flows.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<D: Database, M: Messenger> App<D, M> {
    pub fn new(database: D, messenger: Arc<M>, settings: Settings) -> Self {
        let lifecycle =
            MessageLifecycle::new(messenger, PendingOperations::new(), settings.timings);
        App {
            database: Arc::new(Mutex::new(database)),
            lifecycle,
            flows: FlowStore::default(),
            settings: Arc::new(settings),
        }
    }

    pub fn messenger(&self) -> &Arc<M> {
        self.lifecycle.messenger()
    }

    pub fn pending(&self) -> &PendingOperations {
        self.lifecycle.pending()
    }

    pub fn currency(&self) -> &str {
        &self.settings.currency
    }

    /// Upsert the user, the chat and the membership.
    pub async fn record_interaction(&self, ctx: &ChatContext) -> Result<(), EngineError> {
        let title = ctx
            .chat_title
            .clone()
            .unwrap_or_else(|| ctx.user.display_name());

        let mut database = self.database.lock().await;
        database.save_user(&ctx.user)?;
        database.save_group(&Group {
            id: ctx.chat_id,
            title,
        })?;
        database.add_group_member(ctx.chat_id, ctx.user.id)?;
        Ok(())
    }

    /// Administrator check through the platform. Any failure counts as "not an admin".
    pub async fn is_admin(&self, chat_id: i64, user_id: i64) -> bool {
        match self.messenger().chat_administrators(chat_id).await {
            Ok(administrators) => administrators.contains(&user_id),
            Err(e) => {
                warn!("Cannot get administrators of chat {chat_id}: {e}");
                false
            }
        }
    }

    pub async fn require_admin(
        &self,
        ctx: &ChatContext,
        action: &'static str,
    ) -> Result<(), EngineError> {
        if self.is_admin(ctx.chat_id, ctx.user.id).await {
            Ok(())
        } else {
            Err(EngineError::Permission(action))
        }
    }

    /// Send a message that disappears after the configured delay.
    pub async fn reply<T: Into<String>>(&self, chat_id: i64, text: T) -> Option<MessageKey> {
        self.lifecycle
            .send_ephemeral(OutgoingMessage::new(chat_id, text), None)
            .await
    }

    pub async fn reply_markdown<T: Into<String>>(
        &self,
        chat_id: i64,
        text: T,
    ) -> Option<MessageKey> {
        self.lifecycle
            .send_ephemeral(OutgoingMessage::new(chat_id, text).markdown(), None)
            .await
    }

    /// Send a prompt belonging to an unfinished operation of `owner`.
    pub async fn prompt(&self, message: OutgoingMessage, owner: Owner) -> Option<MessageKey> {
        self.lifecycle.send_ephemeral(message, Some(owner)).await
    }

    pub async fn report_error(&self, chat_id: i64, e: &EngineError) {
        if e.is_validation() {
            debug!("Rejected input in chat {chat_id}: {e}");
        } else {
            warn!("Operation failed in chat {chat_id}: {e}");
        }
        self.reply(chat_id, e.user_message()).await;
    }

    /// Remove a message sent by a user. The bot may lack the rights to do it.
    pub async fn delete_user_message(&self, key: MessageKey) {
        if let Err(e) = self.messenger().delete_message(key).await {
            debug!("Cannot delete user message {key:?}: {e}");
        }
    }
}
