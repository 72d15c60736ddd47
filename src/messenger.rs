//! The calls the bot makes to the messaging platform.
//!
//! Everything above this trait is platform-neutral, which keeps the flows,
//! the endpoints and the message lifecycle testable without Telegram.

use async_trait::async_trait;

use crate::{error::MessengerError, parser::CallbackAction, types::MessageKey};

#[derive(Clone, Debug, PartialEq)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn new<T: Into<String>>(text: T, action: CallbackAction) -> Button {
        Button {
            text: text.into(),
            data: action.data(),
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<Button>>;

#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub reply_to: Option<i32>,
    pub markdown: bool,
}

impl OutgoingMessage {
    pub fn new<T: Into<String>>(chat_id: i64, text: T) -> OutgoingMessage {
        OutgoingMessage {
            chat_id,
            text: text.into(),
            keyboard: None,
            reply_to: None,
            markdown: false,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn reply_to(mut self, message_id: i32) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    /// The text is MarkdownV2 and already escaped.
    pub fn markdown(mut self) -> Self {
        self.markdown = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinnedMessage {
    pub key: MessageKey,
    /// Whether the bot itself wrote the pinned message.
    pub from_self: bool,
}

/// Failures are returned to the caller, which logs them and moves on.
#[async_trait]
pub trait Messenger: Send + Sync + 'static {
    async fn send_message(&self, message: OutgoingMessage) -> Result<MessageKey, MessengerError>;

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<MessageKey, MessengerError>;

    async fn edit_message_text(
        &self,
        key: MessageKey,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessengerError>;

    async fn delete_message(&self, key: MessageKey) -> Result<(), MessengerError>;

    async fn pin_message(&self, key: MessageKey) -> Result<(), MessengerError>;

    async fn unpin_message(&self, key: MessageKey) -> Result<(), MessengerError>;

    /// The message currently pinned in the chat, if any.
    async fn pinned_message(&self, chat_id: i64) -> Result<Option<PinnedMessage>, MessengerError>;

    /// IDs of the users that administer the chat.
    async fn chat_administrators(&self, chat_id: i64) -> Result<Vec<i64>, MessengerError>;

    /// Whether the bot is allowed to pin messages in the chat.
    async fn can_pin_messages(&self, chat_id: i64) -> Result<bool, MessengerError>;
}
