//! Registering money sent to another member. The receiver confirms or
//! rejects the transfer later, from the buttons of the notification.

use log::info;

use crate::{
    app::{App, ChatContext},
    database::Database,
    error::EngineError,
    formatter::{format_amount, success, warning},
    ledger,
    messenger::{Button, Messenger, OutgoingMessage},
    parser::{parse_amount, parse_handle, parse_send_args, CallbackAction},
    types::{Amount, Decision, User},
};

use super::{start, Event, Flow, Outcome};

#[derive(Clone, Debug, PartialEq)]
pub enum Recipient {
    Member(i64),
    /// A typed handle, without the `@`. Resolved only when the transfer is created.
    Handle(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SendMoneyStep {
    SelectingRecipient,
    EnteringAmount { recipient: Recipient },
    Confirming { recipient: Recipient, amount: Amount },
}

pub async fn start_send_money<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    let members = app.database.lock().await.get_group_members(ctx.chat_id)?;
    let keyboard = members
        .iter()
        .filter(|m| m.id != ctx.user.id && !app.settings.bot_filter.is_bot(m))
        .map(|m| vec![Button::new(m.display_name(), CallbackAction::Recipient(m.id))])
        .collect();

    let message = OutgoingMessage::new(
        ctx.chat_id,
        "💸 Who did you send money to? Pick a member or type their @username.",
    )
    .with_keyboard(keyboard);
    start(
        app,
        ctx,
        Flow::SendMoney(SendMoneyStep::SelectingRecipient),
        message,
        None,
    )
    .await;
    Ok(())
}

/// `/send @username 500`
pub async fn quick_send<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    args: &str,
) -> Result<(), EngineError> {
    let (handle, amount) = parse_send_args(args)?;
    let text = submit(app, ctx, Recipient::Handle(handle), amount).await?;
    app.reply(ctx.chat_id, text).await;
    Ok(())
}

pub(super) async fn on_send_money<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    step: SendMoneyStep,
    event: Event<'_>,
) -> Result<Outcome, EngineError> {
    use SendMoneyStep::*;

    let outcome = match (step, event) {
        (SelectingRecipient, Event::Button(CallbackAction::Recipient(user_id))) => {
            let recipient = Recipient::Member(user_id);
            let name = recipient_name(app, &recipient).await?;
            ask_amount(ctx, recipient, &name)
        }
        (SelectingRecipient, Event::Text(text)) => match parse_handle(text) {
            Some(handle) => {
                let name = format!("@{handle}");
                ask_amount(ctx, Recipient::Handle(handle), &name)
            }
            None => Outcome::Retry(
                Flow::SendMoney(SelectingRecipient),
                warning("Type the @username of the member, or pick one from the list."),
            ),
        },

        (EnteringAmount { recipient }, Event::Text(text)) => match parse_amount(text) {
            Ok(amount) => {
                let name = recipient_name(app, &recipient).await?;
                let keyboard = vec![vec![
                    Button::new("✅ Confirm", CallbackAction::SendConfirm),
                    Button::new("❌ Cancel", CallbackAction::SendCancel),
                ]];
                Outcome::Next(
                    Flow::SendMoney(Confirming { recipient, amount }),
                    OutgoingMessage::new(
                        ctx.chat_id,
                        format!(
                            "You sent {} to {name}. Is that right?",
                            format_amount(amount, app.currency())
                        ),
                    )
                    .with_keyboard(keyboard),
                )
            }
            Err(e) => Outcome::Retry(
                Flow::SendMoney(EnteringAmount { recipient }),
                EngineError::from(e).user_message(),
            ),
        },

        (Confirming { recipient, amount }, Event::Button(CallbackAction::SendConfirm)) => {
            let text = submit(app, ctx, recipient, amount).await?;
            Outcome::Done(Some(OutgoingMessage::new(ctx.chat_id, text)))
        }
        (Confirming { .. }, Event::Button(CallbackAction::SendCancel)) => Outcome::Done(Some(
            OutgoingMessage::new(ctx.chat_id, "Transfer cancelled."),
        )),

        (step, _) => Outcome::Ignored(Flow::SendMoney(step)),
    };
    Ok(outcome)
}

fn ask_amount(ctx: &ChatContext, recipient: Recipient, name: &str) -> Outcome {
    Outcome::Next(
        Flow::SendMoney(SendMoneyStep::EnteringAmount { recipient }),
        OutgoingMessage::new(ctx.chat_id, format!("How much did you send to {name}?")),
    )
}

async fn recipient_name<D: Database, M: Messenger>(
    app: &App<D, M>,
    recipient: &Recipient,
) -> Result<String, EngineError> {
    match recipient {
        Recipient::Member(user_id) => Ok(app
            .database
            .lock()
            .await
            .get_user(*user_id)?
            .ok_or_else(|| EngineError::not_found(format!("user {user_id}")))?
            .display_name()),
        Recipient::Handle(handle) => Ok(format!("@{handle}")),
    }
}

/// Create the transfer and notify the receiver. Returns the text for the sender.
async fn submit<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    recipient: Recipient,
    amount: Amount,
) -> Result<String, EngineError> {
    let receiver = match recipient {
        Recipient::Member(user_id) => app
            .database
            .lock()
            .await
            .get_user(user_id)?
            .ok_or_else(|| EngineError::not_found(format!("user {user_id}")))?,
        Recipient::Handle(handle) => match find_member(app, ctx.chat_id, &handle).await? {
            Some(user) => user,
            None => {
                info!("Handle @{handle} is not a member of chat {}", ctx.chat_id);
                return Ok(warning(format!(
                    "@{handle} is not a known member of this group, so no transfer was registered. \
                     They must write in the group first."
                )));
            }
        },
    };

    let transfer_id =
        ledger::create_transfer(ctx.chat_id, ctx.user.id, receiver.id, amount, &app.database)
            .await?;
    notify_receiver(app, ctx, &receiver, transfer_id, amount).await;

    Ok(success(format!(
        "Transfer of {} to {} registered. It counts once they confirm it.",
        format_amount(amount, app.currency()),
        receiver.display_name()
    )))
}

/// Handles are matched exactly, as stored.
async fn find_member<D: Database, M: Messenger>(
    app: &App<D, M>,
    chat_id: i64,
    handle: &str,
) -> Result<Option<User>, EngineError> {
    let members = app.database.lock().await.get_group_members(chat_id)?;
    Ok(members
        .into_iter()
        .find(|m| m.username.as_deref() == Some(handle)))
}

async fn notify_receiver<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    receiver: &User,
    transfer_id: i64,
    amount: Amount,
) {
    let mention = match &receiver.username {
        Some(username) => format!("@{username}"),
        None => receiver.display_name(),
    };
    let keyboard = vec![vec![
        Button::new(
            "✅ Received",
            CallbackAction::SettleTransfer(transfer_id, Decision::Confirm),
        ),
        Button::new(
            "❌ Not received",
            CallbackAction::SettleTransfer(transfer_id, Decision::Reject),
        ),
    ]];
    let text = format!(
        "💸 {mention}, {} says they sent you {}. Did you receive it?",
        ctx.user.display_name(),
        format_amount(amount, app.currency())
    );
    app.lifecycle
        .send_ephemeral(
            OutgoingMessage::new(ctx.chat_id, text).with_keyboard(keyboard),
            None,
        )
        .await;
}
