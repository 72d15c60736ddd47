//! Core implementation of bot handlers.
//!
//! This is split from `bot_commands` so that everything here can be tested
//! against the in-memory messenger, without mocking Telegram APIs.

use log::{debug, info, warn};

use crate::{
    app::{App, ChatContext},
    database::Database,
    dialogue,
    error::EngineError,
    formatter::{
        format_amount, format_debt_message, format_expense_line, format_pending_transfers,
        format_rules, format_transfer_line, success, warning,
    },
    ledger::{self, ADMIN_LIST_LIMIT},
    lifecycle::Owner,
    messenger::{Button, Keyboard, Messenger, OutgoingMessage},
    parser::{AdminAction, CallbackAction, Shortcut},
    pending::OperationType,
    report::{CsvReportRenderer, ReportRenderer},
    types::{Decision, GroupRules, MessageKey, TransferStatus, User},
};

const HELP: &str = "\
I keep track of the shared expenses of this group.

/addexpense - add an expense, step by step (or /addexpense 1500 Dinner)
/send - register money you sent to someone (or /send @username 500)
/mydebt - what you owe, and transfers waiting for your confirmation
/rules - show the group rules (administrators can change them)
/report - download the expense report (administrators)
/admin - edit or delete expenses and transfers (administrators)
/reset - wipe the ledger of the group (administrators)
/cancel - stop what you are doing";

fn shortcut_keyboard() -> Keyboard {
    vec![
        vec![
            Button::new("➕ Expense", CallbackAction::Shortcut(Shortcut::AddExpense)),
            Button::new("💸 Send", CallbackAction::Shortcut(Shortcut::Send)),
        ],
        vec![
            Button::new("💰 My debt", CallbackAction::Shortcut(Shortcut::MyDebt)),
            Button::new("📋 Rules", CallbackAction::Shortcut(Shortcut::Rules)),
            Button::new("📊 Report", CallbackAction::Shortcut(Shortcut::Report)),
        ],
    ]
}

fn admin_keyboard() -> Keyboard {
    vec![
        vec![
            Button::new("✏️ Edit expense", CallbackAction::Admin(AdminAction::EditExpenses)),
            Button::new("🗑 Delete expense", CallbackAction::Admin(AdminAction::DeleteExpenses)),
        ],
        vec![
            Button::new("🔁 Delete transfer", CallbackAction::Admin(AdminAction::DeleteTransfers)),
            Button::new("♻️ Reset", CallbackAction::Admin(AdminAction::Reset)),
        ],
        vec![close_button()],
    ]
}

fn close_button() -> Button {
    Button::new("Close", CallbackAction::Admin(AdminAction::Close))
}

/// `/start` and `/help`.
pub async fn show_menu<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    let mut keyboard = shortcut_keyboard();
    if app.is_admin(ctx.chat_id, ctx.user.id).await {
        // Everything but the close button
        keyboard.extend(admin_keyboard().into_iter().take(2));
    }
    app.lifecycle
        .send_ephemeral(
            OutgoingMessage::new(ctx.chat_id, HELP).with_keyboard(keyboard),
            None,
        )
        .await;
    Ok(())
}

/// `/mydebt`: the debt summary, then one message with buttons for each
/// transfer waiting for the confirmation of the user.
pub async fn show_debt<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    let total = ledger::total_debt(ctx.user.id, ctx.chat_id, &app.database).await?;
    let details = ledger::detailed_debts(ctx.user.id, ctx.chat_id, &app.database).await?;
    let transfers = ledger::pending_transfers_for(ctx.user.id, ctx.chat_id, &app.database).await?;

    let mut incoming = Vec::with_capacity(transfers.len());
    for transfer in transfers {
        let sender = user_name(app, transfer.sender_id).await?;
        incoming.push((transfer, sender));
    }

    let mut text = format_debt_message(total, &details, app.currency());
    if !incoming.is_empty() {
        text.push_str(&format_pending_transfers(&incoming, app.currency()));
    }
    app.reply_markdown(ctx.chat_id, text).await;

    for (transfer, sender) in incoming {
        let keyboard = vec![vec![
            Button::new(
                "✅ Received",
                CallbackAction::SettleTransfer(transfer.id, Decision::Confirm),
            ),
            Button::new(
                "❌ Not received",
                CallbackAction::SettleTransfer(transfer.id, Decision::Reject),
            ),
        ]];
        let text = format!(
            "💸 {sender} says they sent you {}. Did you receive it?",
            format_amount(transfer.amount, app.currency())
        );
        app.lifecycle
            .send_ephemeral(
                OutgoingMessage::new(ctx.chat_id, text).with_keyboard(keyboard),
                None,
            )
            .await;
    }
    Ok(())
}

/// The receiver answers a pending transfer. `button` is the message with the buttons.
pub async fn settle_transfer<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    transfer_id: i64,
    decision: Decision,
    button: Option<MessageKey>,
) -> Result<(), EngineError> {
    let transfer = app
        .database
        .lock()
        .await
        .get_transfer(transfer_id)?
        .ok_or_else(|| EngineError::not_found(format!("transfer #{transfer_id}")))?;
    if transfer.receiver_id != ctx.user.id {
        app.reply(
            ctx.chat_id,
            warning("Only the receiver can answer this transfer."),
        )
        .await;
        return Ok(());
    }

    let settlement = ledger::settle_transfer(transfer_id, decision, &app.database).await?;
    if let Some(button) = button {
        app.lifecycle.delete_now(button).await;
    }

    let sender = user_name(app, transfer.sender_id).await?;
    let amount = format_amount(transfer.amount, app.currency());
    let text = match settlement.status {
        TransferStatus::Rejected => warning(format!(
            "{} did not receive {amount} from {sender}. The transfer was rejected.",
            ctx.user.display_name()
        )),
        _ => {
            let mut text = success(format!(
                "{} received {amount} from {sender}. {} debt(s) paid off.",
                ctx.user.display_name(),
                settlement.paid.len()
            ));
            if settlement.discarded > 0.0 {
                text.push('\n');
                text.push_str(&warning(format!(
                    "{} exceeded the debts and was not counted.",
                    format_amount(settlement.discarded, app.currency())
                )));
            }
            text
        }
    };
    app.reply(ctx.chat_id, text).await;
    Ok(())
}

/// `/rules`: administrators configure them, everyone else reads them.
pub async fn rules<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    if ctx.is_group && app.is_admin(ctx.chat_id, ctx.user.id).await {
        return dialogue::start_configure_rules(app, ctx).await;
    }
    show_rules(app, ctx).await
}

pub async fn show_rules<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    let rules = app.database.lock().await.get_group_rules(ctx.chat_id)?;
    match rules {
        Some(rules) => {
            app.reply_markdown(ctx.chat_id, format_rules(&rules)).await;
        }
        None => {
            app.reply(
                ctx.chat_id,
                "This group has no rules yet. An administrator can set them with /rules.",
            )
            .await;
        }
    }
    Ok(())
}

/// Publish the rules as a permanent message and pin it, replacing the rules
/// pinned earlier by the bot. Returns false if nothing was pinned.
pub async fn pin_rules<D: Database, M: Messenger>(
    app: &App<D, M>,
    chat_id: i64,
    rules: &GroupRules,
) -> bool {
    let messenger = app.messenger();
    match messenger.can_pin_messages(chat_id).await {
        Ok(true) => {}
        Ok(false) => {
            info!("Cannot pin the rules of chat {chat_id}: missing rights");
            return false;
        }
        Err(e) => {
            warn!("Cannot check pin rights in chat {chat_id}: {e}");
            return false;
        }
    }

    unpin_own_message(app, chat_id).await;

    let message = OutgoingMessage::new(chat_id, format_rules(rules))
        .markdown()
        .with_keyboard(shortcut_keyboard());
    let key = match messenger.send_message(message).await {
        Ok(key) => key,
        Err(e) => {
            warn!("Cannot send the rules of chat {chat_id}: {e}");
            return false;
        }
    };
    match messenger.pin_message(key).await {
        Ok(()) => {
            info!("Rules of chat {chat_id} pinned");
            true
        }
        Err(e) => {
            warn!("Cannot pin the rules of chat {chat_id}: {e}");
            false
        }
    }
}

/// The bot just got the right to pin: pin the rules, if the group has any.
pub async fn repin_rules<D: Database, M: Messenger>(
    app: &App<D, M>,
    chat_id: i64,
) -> Result<bool, EngineError> {
    let rules = app.database.lock().await.get_group_rules(chat_id)?;
    match rules {
        Some(rules) => Ok(pin_rules(app, chat_id, &rules).await),
        None => Ok(false),
    }
}

async fn unpin_own_message<D: Database, M: Messenger>(app: &App<D, M>, chat_id: i64) {
    match app.messenger().pinned_message(chat_id).await {
        Ok(Some(pinned)) if pinned.from_self => {
            if let Err(e) = app.messenger().unpin_message(pinned.key).await {
                warn!("Cannot unpin {:?}: {e}", pinned.key);
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Cannot get the pinned message of chat {chat_id}: {e}"),
    }
}

/// `/report`: the spreadsheet and the text document, as files.
pub async fn send_report<D: Database + Send + 'static, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "download the report").await?;

    let renderer = CsvReportRenderer::new(
        app.database.clone(),
        app.settings.bot_filter,
        app.currency(),
    );
    let files = [
        ("report.csv", renderer.render_spreadsheet(ctx.chat_id).await),
        ("report.txt", renderer.render_document(ctx.chat_id).await),
    ];

    let mut sent = 0;
    for (file_name, data) in files {
        let Some(data) = data else { continue };
        match app.messenger().send_document(ctx.chat_id, file_name, data).await {
            Ok(_) => sent += 1,
            Err(e) => warn!("Cannot send {file_name} to chat {}: {e}", ctx.chat_id),
        }
    }
    if sent == 0 {
        app.reply(
            ctx.chat_id,
            warning("I could not generate the report, please try again later."),
        )
        .await;
    }
    Ok(())
}

/// `/admin`
pub async fn admin_menu<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "use the admin menu").await?;

    let message =
        OutgoingMessage::new(ctx.chat_id, "⚙️ Admin menu").with_keyboard(admin_keyboard());
    if let Some(menu) = app
        .prompt(message, Owner::new(ctx.user.id, OperationType::AdminMenu))
        .await
    {
        app.pending()
            .register(
                ctx.user.id,
                OperationType::AdminMenu,
                ctx.chat_id,
                menu.message_id,
                None,
            )
            .await;
    }
    Ok(())
}

/// A button of the admin menu. `menu` is the message holding the buttons.
pub async fn admin_action<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    action: AdminAction,
    menu: Option<MessageKey>,
) -> Result<(), EngineError> {
    if action == AdminAction::Close {
        if let Some(menu) = menu {
            app.lifecycle.delete_now(menu).await;
        }
        if app.pending().is_open(ctx.user.id, OperationType::AdminMenu).await {
            app.pending().complete(ctx.user.id).await;
        }
        return Ok(());
    }

    app.require_admin(ctx, "use the admin menu").await?;

    let (text, mut keyboard): (&str, Keyboard) = match action {
        AdminAction::EditExpenses => (
            "Which expense do you want to edit?",
            expense_buttons(app, ctx.chat_id, CallbackAction::EditExpense).await?,
        ),
        AdminAction::DeleteExpenses => (
            "Which expense do you want to delete?",
            expense_buttons(app, ctx.chat_id, CallbackAction::DeleteExpense).await?,
        ),
        AdminAction::DeleteTransfers => (
            "Which transfer do you want to delete?",
            transfer_buttons(app, ctx.chat_id).await?,
        ),
        AdminAction::Reset => return ask_reset(app, ctx).await,
        AdminAction::Close => return Ok(()),
    };
    let text = if keyboard.is_empty() {
        "Nothing to show!"
    } else {
        text
    };
    keyboard.push(vec![close_button()]);

    match menu {
        Some(menu) => {
            if let Err(e) = app
                .messenger()
                .edit_message_text(menu, text, Some(keyboard))
                .await
            {
                warn!("Cannot update admin menu {menu:?}: {e}");
            }
        }
        None => {
            app.lifecycle
                .send_ephemeral(
                    OutgoingMessage::new(ctx.chat_id, text).with_keyboard(keyboard),
                    None,
                )
                .await;
        }
    }
    Ok(())
}

async fn expense_buttons<D: Database, M: Messenger>(
    app: &App<D, M>,
    chat_id: i64,
    action: fn(i64) -> CallbackAction,
) -> Result<Keyboard, EngineError> {
    let expenses = ledger::group_expenses(chat_id, Some(ADMIN_LIST_LIMIT), &app.database).await?;
    Ok(expenses
        .iter()
        .map(|e| vec![Button::new(format_expense_line(e, app.currency()), action(e.id))])
        .collect())
}

async fn transfer_buttons<D: Database, M: Messenger>(
    app: &App<D, M>,
    chat_id: i64,
) -> Result<Keyboard, EngineError> {
    let transfers =
        ledger::group_transfers(chat_id, None, Some(ADMIN_LIST_LIMIT), &app.database).await?;
    let mut keyboard = Vec::with_capacity(transfers.len());
    for transfer in transfers {
        let sender = user_name(app, transfer.sender_id).await?;
        let receiver = user_name(app, transfer.receiver_id).await?;
        keyboard.push(vec![Button::new(
            format_transfer_line(&transfer, &sender, &receiver, app.currency()),
            CallbackAction::DeleteTransfer(transfer.id),
        )]);
    }
    Ok(keyboard)
}

fn confirmation_keyboard(confirm: CallbackAction) -> Keyboard {
    vec![vec![Button::new("Yes, delete", confirm), close_button()]]
}

pub async fn ask_delete_expense<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    expense_id: i64,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "delete expenses").await?;
    let expense = ledger::group_expense(ctx.chat_id, expense_id, &app.database).await?;
    let text = format!(
        "Delete {}? Its debts are deleted too.",
        format_expense_line(&expense, app.currency())
    );
    app.lifecycle
        .send_ephemeral(
            OutgoingMessage::new(ctx.chat_id, text)
                .with_keyboard(confirmation_keyboard(CallbackAction::ConfirmDeleteExpense(expense_id))),
            None,
        )
        .await;
    Ok(())
}

pub async fn delete_expense<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    expense_id: i64,
    button: Option<MessageKey>,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "delete expenses").await?;
    let expense = ledger::delete_expense(ctx.chat_id, expense_id, &app.database).await?;
    if let Some(button) = button {
        app.lifecycle.delete_now(button).await;
    }
    app.reply(
        ctx.chat_id,
        success(format!(
            "Expense #{} \"{}\" deleted.",
            expense.id, expense.description
        )),
    )
    .await;
    Ok(())
}

pub async fn ask_delete_transfer<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    transfer_id: i64,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "delete transfers").await?;
    let transfer = ledger::group_transfer(ctx.chat_id, transfer_id, &app.database).await?;
    let sender = user_name(app, transfer.sender_id).await?;
    let receiver = user_name(app, transfer.receiver_id).await?;
    let text = format!(
        "Delete {}? Debts already paid off by it stay paid.",
        format_transfer_line(&transfer, &sender, &receiver, app.currency())
    );
    app.lifecycle
        .send_ephemeral(
            OutgoingMessage::new(ctx.chat_id, text).with_keyboard(confirmation_keyboard(
                CallbackAction::ConfirmDeleteTransfer(transfer_id),
            )),
            None,
        )
        .await;
    Ok(())
}

pub async fn delete_transfer<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    transfer_id: i64,
    button: Option<MessageKey>,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "delete transfers").await?;
    ledger::delete_transfer(ctx.chat_id, transfer_id, &app.database).await?;
    if let Some(button) = button {
        app.lifecycle.delete_now(button).await;
    }
    app.reply(ctx.chat_id, success(format!("Transfer #{transfer_id} deleted.")))
        .await;
    Ok(())
}

/// `/reset`: ask before wiping anything.
pub async fn ask_reset<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "reset the ledger").await?;
    let keyboard = vec![vec![
        Button::new("Yes, reset", CallbackAction::Reset(true)),
        Button::new("No", CallbackAction::Reset(false)),
    ]];
    app.lifecycle
        .send_ephemeral(
            OutgoingMessage::new(
                ctx.chat_id,
                warning("This deletes every expense, debt, transfer and the rules of the group. Continue?"),
            )
            .with_keyboard(keyboard),
            None,
        )
        .await;
    Ok(())
}

pub async fn reset<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    confirmed: bool,
    button: Option<MessageKey>,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "reset the ledger").await?;
    if let Some(button) = button {
        app.lifecycle.delete_now(button).await;
    }
    if !confirmed {
        app.reply(ctx.chat_id, "Reset cancelled.").await;
        return Ok(());
    }

    unpin_own_message(app, ctx.chat_id).await;
    ledger::reset_group(ctx.chat_id, &app.database).await?;
    app.reply(ctx.chat_id, success("The ledger of the group was reset."))
        .await;
    Ok(())
}

/// Members joined the chat: record them and start the introduction of the humans.
pub async fn welcome_members<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    members: Vec<User>,
) -> Result<(), EngineError> {
    for member in members {
        let member_ctx = ctx.for_user(member);
        app.record_interaction(&member_ctx).await?;
        if app.settings.bot_filter.is_bot(&member_ctx.user) {
            debug!("Not introducing bot {}", member_ctx.user.id);
            continue;
        }
        dialogue::start_introduction(app, &member_ctx).await;
    }
    Ok(())
}

/// Plain text outside commands. Answers consumed by a flow are removed from the chat.
pub async fn handle_text<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    text: &str,
    message: MessageKey,
) -> bool {
    let consumed = dialogue::on_text(app, ctx, text).await;
    if consumed {
        app.delete_user_message(message).await;
    }
    consumed
}

pub async fn handle_photo<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    file_id: &str,
) -> bool {
    dialogue::on_photo(app, ctx, file_id).await
}

/// Any inline button. `message` is the message the button belongs to.
pub async fn handle_callback<D: Database + Send + 'static, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    action: CallbackAction,
    message: Option<MessageKey>,
) -> Result<(), EngineError> {
    if dialogue::on_callback(app, ctx, action).await {
        return Ok(());
    }

    match action {
        CallbackAction::SettleTransfer(id, decision) => {
            settle_transfer(app, ctx, id, decision, message).await
        }
        CallbackAction::Shortcut(shortcut) => run_shortcut(app, ctx, shortcut).await,
        CallbackAction::Admin(action) => admin_action(app, ctx, action, message).await,
        CallbackAction::EditExpense(id) => dialogue::start_edit_amount(app, ctx, id).await,
        CallbackAction::DeleteExpense(id) => ask_delete_expense(app, ctx, id).await,
        CallbackAction::ConfirmDeleteExpense(id) => delete_expense(app, ctx, id, message).await,
        CallbackAction::DeleteTransfer(id) => ask_delete_transfer(app, ctx, id).await,
        CallbackAction::ConfirmDeleteTransfer(id) => {
            delete_transfer(app, ctx, id, message).await
        }
        CallbackAction::Reset(confirmed) => reset(app, ctx, confirmed, message).await,
        other => {
            debug!(
                "Button {} of user {} belongs to no open flow",
                other.data(),
                ctx.user.id
            );
            Ok(())
        }
    }
}

async fn run_shortcut<D: Database + Send + 'static, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    shortcut: Shortcut,
) -> Result<(), EngineError> {
    match shortcut {
        Shortcut::AddExpense => dialogue::start_add_expense(app, ctx).await,
        Shortcut::Send => dialogue::start_send_money(app, ctx).await,
        Shortcut::MyDebt => show_debt(app, ctx).await,
        Shortcut::Rules => show_rules(app, ctx).await,
        Shortcut::Report => send_report(app, ctx).await,
    }
}

async fn user_name<D: Database, M: Messenger>(
    app: &App<D, M>,
    user_id: i64,
) -> Result<String, EngineError> {
    Ok(app
        .database
        .lock()
        .await
        .get_user(user_id)?
        .map(|u| u.display_name())
        .unwrap_or_else(|| format!("user {user_id}")))
}
