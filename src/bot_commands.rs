//! Definition of Telegram bot commands and handlers.

use log::{debug, warn};
use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    types::{Chat, ChatMemberUpdated},
    utils::command::BotCommands,
};

use crate::{
    app::{App, ChatContext},
    database::sqlite::SqliteDatabase,
    dialogue, endpoints,
    error::{BotError, EngineError},
    parser::parse_callback,
    telegram::TelegramMessenger,
    types::{MessageKey, User},
};

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "This bot keeps track of the shared expenses of a group. Supported commands:"
)]
pub enum Command {
    #[command(description = "shows the menu.")]
    Start,
    #[command(description = "shows this message.")]
    Help,
    #[command(description = "add an expense; /addexpense 1500 Dinner adds it right away.")]
    AddExpense(String),
    #[command(description = "register money you sent; /send @username 500 skips the questions.")]
    Send(String),
    #[command(description = "show what you owe and the transfers to confirm.")]
    MyDebt,
    #[command(description = "show the group rules; administrators can change them.")]
    Rules,
    #[command(description = "download the expense report (administrators).")]
    Report,
    #[command(description = "edit or delete expenses and transfers (administrators).")]
    Admin,
    #[command(description = "wipe the ledger of the group (administrators).")]
    Reset,
    #[command(description = "stop the current operation.")]
    Cancel,
}

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

// The handlers are not generic over the database and the messenger: dptree
// looks dependencies up by type, so the concrete types are fixed here.
pub type AppInUse = App<SqliteDatabase, TelegramMessenger>;

pub fn handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    let command_handler = teloxide::filter_command::<Command, _>().endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(
            dptree::filter_map(|msg: Message| {
                msg.new_chat_members().map(|members| members.to_vec())
            })
            .endpoint(handle_new_members),
        )
        .branch(
            dptree::filter_map(|msg: Message| {
                msg.photo()
                    .and_then(|sizes| sizes.last())
                    .map(|largest| largest.file.id.clone())
            })
            .endpoint(handle_photo),
        )
        .branch(
            dptree::filter_map(|msg: Message| msg.text().map(str::to_string))
                .endpoint(handle_text),
        );

    dptree::entry()
        .branch(message_handler)
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_my_chat_member().endpoint(handle_my_chat_member))
}

fn user_of(user: &teloxide::types::User) -> User {
    User::new(
        user.id.0 as i64,
        user.username.as_deref(),
        Some(&user.first_name),
        user.last_name.as_deref(),
    )
}

fn context_of(chat: &Chat, user: &teloxide::types::User) -> ChatContext {
    ChatContext {
        chat_id: chat.id.0,
        chat_title: chat.title().map(str::to_string),
        is_group: chat.is_group() || chat.is_supergroup(),
        user: user_of(user),
    }
}

fn key_of(msg: &Message) -> MessageKey {
    MessageKey::new(msg.chat.id.0, msg.id.0)
}

/// Context of a message written by a user, after recording the user.
async fn message_context(msg: &Message, app: &AppInUse) -> Option<ChatContext> {
    let ctx = context_of(&msg.chat, msg.from()?);
    if let Err(e) = app.record_interaction(&ctx).await {
        warn!("Cannot record interaction in chat {}: {e}", ctx.chat_id);
    }
    Some(ctx)
}

/// Show the failure in the chat. Anything but bad input is also handed to
/// the teloxide default error handler, which logs it.
async fn finish(
    app: &AppInUse,
    ctx: &ChatContext,
    result: Result<(), EngineError>,
    context: &str,
) -> HandlerResult {
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            app.report_error(ctx.chat_id, &e).await;
            if e.is_validation() {
                Ok(())
            } else {
                Err(BotError::engine(context, &e).into())
            }
        }
    }
}

async fn handle_command(msg: Message, cmd: Command, app: AppInUse) -> HandlerResult {
    let Some(ctx) = message_context(&msg, &app).await else {
        return Ok(());
    };
    if ctx.is_group {
        app.delete_user_message(key_of(&msg)).await;
    }

    let result = match cmd {
        Command::Start | Command::Help => endpoints::show_menu(&app, &ctx).await,
        Command::AddExpense(args) if args.trim().is_empty() => {
            dialogue::start_add_expense(&app, &ctx).await
        }
        Command::AddExpense(args) => dialogue::quick_add_expense(&app, &ctx, &args).await,
        Command::Send(args) if args.trim().is_empty() => {
            dialogue::start_send_money(&app, &ctx).await
        }
        Command::Send(args) => dialogue::quick_send(&app, &ctx, &args).await,
        Command::MyDebt => endpoints::show_debt(&app, &ctx).await,
        Command::Rules => endpoints::rules(&app, &ctx).await,
        Command::Report => endpoints::send_report(&app, &ctx).await,
        Command::Admin => endpoints::admin_menu(&app, &ctx).await,
        Command::Reset => endpoints::ask_reset(&app, &ctx).await,
        Command::Cancel => {
            if !dialogue::cancel(&app, &ctx).await {
                app.reply(ctx.chat_id, "Nothing to cancel.").await;
            }
            Ok(())
        }
    };

    finish(&app, &ctx, result, "cannot handle command").await
}

async fn handle_new_members(
    msg: Message,
    members: Vec<teloxide::types::User>,
    app: AppInUse,
) -> HandlerResult {
    let Some(ctx) = message_context(&msg, &app).await else {
        return Ok(());
    };
    let humans = members
        .iter()
        .filter(|member| !member.is_bot)
        .map(user_of)
        .collect();

    let result = endpoints::welcome_members(&app, &ctx, humans).await;
    finish(&app, &ctx, result, "cannot welcome new members").await
}

async fn handle_text(msg: Message, text: String, app: AppInUse) -> HandlerResult {
    let Some(ctx) = message_context(&msg, &app).await else {
        return Ok(());
    };
    if !endpoints::handle_text(&app, &ctx, &text, key_of(&msg)).await {
        debug!("Message in chat {} belongs to no flow", ctx.chat_id);
    }
    Ok(())
}

async fn handle_photo(msg: Message, file_id: String, app: AppInUse) -> HandlerResult {
    let Some(ctx) = message_context(&msg, &app).await else {
        return Ok(());
    };
    endpoints::handle_photo(&app, &ctx, &file_id).await;
    Ok(())
}

async fn handle_callback(bot: Bot, query: CallbackQuery, app: AppInUse) -> HandlerResult {
    // Stop the loading animation on the button, whatever happens next
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        warn!("Cannot answer callback query: {e}");
    }

    let (Some(data), Some(msg)) = (query.data.as_deref(), query.message.as_ref()) else {
        return Ok(());
    };
    let ctx = context_of(&msg.chat, &query.from);
    if let Err(e) = app.record_interaction(&ctx).await {
        warn!("Cannot record interaction in chat {}: {e}", ctx.chat_id);
    }

    let action = match parse_callback(data) {
        Ok(action) => action,
        Err(e) => {
            warn!("Ignoring button of user {}: {e}", ctx.user.id);
            return Ok(());
        }
    };

    let result = endpoints::handle_callback(&app, &ctx, action, Some(key_of(msg))).await;
    finish(&app, &ctx, result, "cannot handle button").await
}

async fn handle_my_chat_member(update: ChatMemberUpdated, app: AppInUse) -> HandlerResult {
    let could_pin = update.old_chat_member.kind.can_pin_messages();
    let can_pin = update.new_chat_member.kind.can_pin_messages();
    if can_pin && !could_pin {
        match endpoints::repin_rules(&app, update.chat.id.0).await {
            Ok(pinned) => debug!(
                "Bot promoted in chat {}, rules pinned: {pinned}",
                update.chat.id.0
            ),
            Err(e) => warn!("Cannot pin the rules of chat {}: {e}", update.chat.id.0),
        }
    }
    Ok(())
}
