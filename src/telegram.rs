//! `Messenger` on top of the Telegram Bot API.

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{
        ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode, UserId,
    },
};

use crate::{
    error::MessengerError,
    messenger::{Keyboard, Messenger, OutgoingMessage, PinnedMessage},
    types::MessageKey,
};

pub struct TelegramMessenger {
    bot: Bot,
    bot_id: UserId,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, bot_id: UserId) -> Self {
        TelegramMessenger { bot, bot_id }
    }
}

fn markup(keyboard: Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.into_iter().map(|row| {
        row.into_iter()
            .map(|button| InlineKeyboardButton::callback(button.text, button.data))
            .collect::<Vec<_>>()
    }))
}

fn key_of(message: &Message) -> MessageKey {
    MessageKey::new(message.chat.id.0, message.id.0)
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(&self, message: OutgoingMessage) -> Result<MessageKey, MessengerError> {
        let mut request = self.bot.send_message(ChatId(message.chat_id), message.text);
        if let Some(keyboard) = message.keyboard {
            request = request.reply_markup(markup(keyboard));
        }
        if let Some(reply_to) = message.reply_to {
            request = request.reply_to_message_id(MessageId(reply_to));
        }
        if message.markdown {
            request = request.parse_mode(ParseMode::MarkdownV2);
        }
        let sent = request.await?;
        Ok(key_of(&sent))
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<MessageKey, MessengerError> {
        let file = InputFile::memory(data).file_name(file_name.to_string());
        let sent = self.bot.send_document(ChatId(chat_id), file).await?;
        Ok(key_of(&sent))
    }

    async fn edit_message_text(
        &self,
        key: MessageKey,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessengerError> {
        let mut request =
            self.bot
                .edit_message_text(ChatId(key.chat_id), MessageId(key.message_id), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(markup(keyboard));
        }
        request.await?;
        Ok(())
    }

    async fn delete_message(&self, key: MessageKey) -> Result<(), MessengerError> {
        self.bot
            .delete_message(ChatId(key.chat_id), MessageId(key.message_id))
            .await?;
        Ok(())
    }

    async fn pin_message(&self, key: MessageKey) -> Result<(), MessengerError> {
        self.bot
            .pin_chat_message(ChatId(key.chat_id), MessageId(key.message_id))
            .disable_notification(true)
            .await?;
        Ok(())
    }

    async fn unpin_message(&self, key: MessageKey) -> Result<(), MessengerError> {
        self.bot
            .unpin_chat_message(ChatId(key.chat_id))
            .message_id(MessageId(key.message_id))
            .await?;
        Ok(())
    }

    async fn pinned_message(&self, chat_id: i64) -> Result<Option<PinnedMessage>, MessengerError> {
        let chat = self.bot.get_chat(ChatId(chat_id)).await?;
        Ok(chat.pinned_message.as_deref().map(|message| PinnedMessage {
            key: key_of(message),
            from_self: message.from().map(|u| u.id) == Some(self.bot_id),
        }))
    }

    async fn chat_administrators(&self, chat_id: i64) -> Result<Vec<i64>, MessengerError> {
        let administrators = self.bot.get_chat_administrators(ChatId(chat_id)).await?;
        Ok(administrators
            .into_iter()
            .map(|member| member.user.id.0 as i64)
            .collect())
    }

    async fn can_pin_messages(&self, chat_id: i64) -> Result<bool, MessengerError> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), self.bot_id)
            .await?;
        Ok(member.kind.can_pin_messages())
    }
}
