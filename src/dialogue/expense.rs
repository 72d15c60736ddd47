//! Adding an expense step by step, and changing the amount of an existing one.

use crate::{
    app::{App, ChatContext},
    database::Database,
    error::{EngineError, InputError},
    formatter::{format_amount, format_participant_button, success},
    ledger,
    messenger::{Button, Keyboard, Messenger, OutgoingMessage},
    parser::{parse_amount, parse_expense_args, CallbackAction, SplitMode},
    types::{Amount, User},
};

use super::{start, Event, Flow, Outcome};

#[derive(Clone, Debug, PartialEq)]
pub enum AddExpenseStep {
    ChoosingSplitMode,
    EnteringAmount {
        mode: SplitMode,
    },
    EnteringDescription {
        mode: SplitMode,
        amount: Amount,
    },
    SelectingParticipants {
        amount: Amount,
        description: String,
        candidates: Vec<User>,
        selected: Vec<i64>,
    },
    AttachingReceipt {
        amount: Amount,
        description: String,
        /// `None` lets the ledger pick the default participants.
        participants: Option<Vec<i64>>,
        awaiting_photo: bool,
    },
}

const PICKER_TEXT: &str = "Who shares this expense? Tap the names, then press Done.";

pub async fn start_add_expense<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    let keyboard = vec![vec![
        Button::new("👥 Everyone", CallbackAction::Split(SplitMode::AllMembers)),
        Button::new("☑️ Choose", CallbackAction::Split(SplitMode::Selective)),
    ]];
    let message = OutgoingMessage::new(ctx.chat_id, "💸 New expense. How should it be split?")
        .with_keyboard(keyboard);
    start(
        app,
        ctx,
        Flow::AddExpense(AddExpenseStep::ChoosingSplitMode),
        message,
        None,
    )
    .await;
    Ok(())
}

/// `/addexpense 1500 Dinner`: one shot, split among the default participants.
pub async fn quick_add_expense<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    args: &str,
) -> Result<(), EngineError> {
    let (amount, description) = parse_expense_args(args)?;
    let expense_id = ledger::create_expense(
        ctx.chat_id,
        amount,
        &description,
        ctx.user.id,
        None,
        None,
        app.settings.bot_filter,
        &app.database,
    )
    .await?;
    let summary = expense_summary(app, expense_id).await?;
    app.reply(ctx.chat_id, summary).await;
    Ok(())
}

pub async fn start_edit_amount<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    expense_id: i64,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "edit expenses").await?;
    let expense = ledger::group_expense(ctx.chat_id, expense_id, &app.database).await?;

    let text = format!(
        "✏️ Enter the new amount of #{} {} (now {}):",
        expense.id,
        expense.description,
        format_amount(expense.amount, app.currency())
    );
    start(
        app,
        ctx,
        Flow::EditExpense { expense_id },
        OutgoingMessage::new(ctx.chat_id, text),
        Some(expense_id.to_string()),
    )
    .await;
    Ok(())
}

pub(super) async fn on_add_expense<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    step: AddExpenseStep,
    event: Event<'_>,
) -> Result<Outcome, EngineError> {
    use AddExpenseStep::*;

    let outcome = match (step, event) {
        (ChoosingSplitMode, Event::Button(CallbackAction::Split(mode))) => Outcome::Next(
            Flow::AddExpense(EnteringAmount { mode }),
            OutgoingMessage::new(ctx.chat_id, "Enter the amount, for example 1500 or 99,50:"),
        ),

        (EnteringAmount { mode }, Event::Text(text)) => match parse_amount(text) {
            Ok(amount) => Outcome::Next(
                Flow::AddExpense(EnteringDescription { mode, amount }),
                OutgoingMessage::new(ctx.chat_id, "What was it for? Enter a short description:"),
            ),
            Err(e) => retry(Flow::AddExpense(EnteringAmount { mode }), e),
        },

        (EnteringDescription { mode, amount }, Event::Text(text)) => {
            let description = text.trim();
            if description.is_empty() {
                retry(
                    Flow::AddExpense(EnteringDescription { mode, amount }),
                    InputError::empty_description(),
                )
            } else {
                choose_participants(app, ctx, mode, amount, description.to_string()).await?
            }
        }

        (
            SelectingParticipants {
                amount,
                description,
                candidates,
                mut selected,
            },
            Event::Button(action),
        ) => match action {
            CallbackAction::ToggleParticipant(user_id) => {
                if candidates.iter().any(|c| c.id == user_id) {
                    match selected.iter().position(|&id| id == user_id) {
                        Some(i) => {
                            selected.remove(i);
                        }
                        None => selected.push(user_id),
                    }
                }
                let keyboard = picker_keyboard(&candidates, &selected);
                Outcome::Refresh(
                    Flow::AddExpense(SelectingParticipants {
                        amount,
                        description,
                        candidates,
                        selected,
                    }),
                    PICKER_TEXT.to_string(),
                    keyboard,
                )
            }
            CallbackAction::SelectAllParticipants => {
                let selected: Vec<i64> = candidates.iter().map(|c| c.id).collect();
                let keyboard = picker_keyboard(&candidates, &selected);
                Outcome::Refresh(
                    Flow::AddExpense(SelectingParticipants {
                        amount,
                        description,
                        candidates,
                        selected,
                    }),
                    PICKER_TEXT.to_string(),
                    keyboard,
                )
            }
            CallbackAction::ParticipantsDone => receipt_question(ctx, amount, description, Some(selected)),
            _ => Outcome::Ignored(Flow::AddExpense(SelectingParticipants {
                amount,
                description,
                candidates,
                selected,
            })),
        },

        (
            AttachingReceipt {
                amount,
                description,
                participants,
                awaiting_photo: false,
            },
            Event::Button(CallbackAction::Receipt(attach)),
        ) => {
            if attach {
                Outcome::Next(
                    Flow::AddExpense(AttachingReceipt {
                        amount,
                        description,
                        participants,
                        awaiting_photo: true,
                    }),
                    OutgoingMessage::new(ctx.chat_id, "📷 Send the photo of the receipt:"),
                )
            } else {
                save_expense(app, ctx, amount, &description, participants, None).await?
            }
        }

        (
            AttachingReceipt {
                amount,
                description,
                participants,
                awaiting_photo: true,
            },
            Event::Photo(file_id),
        ) => {
            save_expense(
                app,
                ctx,
                amount,
                &description,
                participants,
                Some(file_id.to_string()),
            )
            .await?
        }

        (step @ AttachingReceipt { awaiting_photo: true, .. }, Event::Text(_)) => Outcome::Retry(
            Flow::AddExpense(step),
            "📷 I need a photo of the receipt. Send it, or /cancel.".to_string(),
        ),

        (step, _) => Outcome::Ignored(Flow::AddExpense(step)),
    };
    Ok(outcome)
}

pub(super) async fn on_edit_amount<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    expense_id: i64,
    event: Event<'_>,
) -> Result<Outcome, EngineError> {
    let Event::Text(text) = event else {
        return Ok(Outcome::Ignored(Flow::EditExpense { expense_id }));
    };
    let amount = match parse_amount(text) {
        Ok(amount) => amount,
        Err(e) => return Ok(retry(Flow::EditExpense { expense_id }, e)),
    };

    let change =
        ledger::edit_expense_amount(ctx.chat_id, expense_id, amount, &app.database).await?;
    let text = success(format!(
        "Expense #{expense_id} \"{}\" changed from {} to {}.",
        change.description,
        format_amount(change.old_amount, app.currency()),
        format_amount(change.new_amount, app.currency())
    ));
    Ok(Outcome::Done(Some(OutgoingMessage::new(ctx.chat_id, text))))
}

fn retry(flow: Flow, e: InputError) -> Outcome {
    Outcome::Retry(flow, EngineError::from(e).user_message())
}

async fn choose_participants<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    mode: SplitMode,
    amount: Amount,
    description: String,
) -> Result<Outcome, EngineError> {
    let members = app.database.lock().await.get_group_members(ctx.chat_id)?;
    let candidates: Vec<User> = members
        .into_iter()
        .filter(|m| m.id != ctx.user.id && !app.settings.bot_filter.is_bot(m))
        .collect();

    let outcome = match mode {
        SplitMode::AllMembers => {
            let everyone = candidates.iter().map(|c| c.id).collect();
            receipt_question(ctx, amount, description, Some(everyone))
        }
        SplitMode::Selective if ctx.is_group && candidates.len() > 1 => {
            let keyboard = picker_keyboard(&candidates, &[]);
            Outcome::Next(
                Flow::AddExpense(AddExpenseStep::SelectingParticipants {
                    amount,
                    description,
                    candidates,
                    selected: vec![],
                }),
                OutgoingMessage::new(ctx.chat_id, PICKER_TEXT).with_keyboard(keyboard),
            )
        }
        // Nobody to choose from
        SplitMode::Selective => receipt_question(ctx, amount, description, None),
    };
    Ok(outcome)
}

fn picker_keyboard(candidates: &[User], selected: &[i64]) -> Keyboard {
    let mut keyboard: Keyboard = candidates
        .iter()
        .map(|c| {
            vec![Button::new(
                format_participant_button(c, selected.contains(&c.id)),
                CallbackAction::ToggleParticipant(c.id),
            )]
        })
        .collect();
    keyboard.push(vec![
        Button::new("Everyone", CallbackAction::SelectAllParticipants),
        Button::new("Done", CallbackAction::ParticipantsDone),
    ]);
    keyboard
}

fn receipt_question(
    ctx: &ChatContext,
    amount: Amount,
    description: String,
    participants: Option<Vec<i64>>,
) -> Outcome {
    let keyboard = vec![vec![
        Button::new("📷 Yes", CallbackAction::Receipt(true)),
        Button::new("No", CallbackAction::Receipt(false)),
    ]];
    Outcome::Next(
        Flow::AddExpense(AddExpenseStep::AttachingReceipt {
            amount,
            description,
            participants,
            awaiting_photo: false,
        }),
        OutgoingMessage::new(ctx.chat_id, "Do you want to attach a photo of the receipt?")
            .with_keyboard(keyboard),
    )
}

async fn save_expense<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    amount: Amount,
    description: &str,
    participants: Option<Vec<i64>>,
    attachment: Option<String>,
) -> Result<Outcome, EngineError> {
    let expense_id = ledger::create_expense(
        ctx.chat_id,
        amount,
        description,
        ctx.user.id,
        attachment,
        participants,
        app.settings.bot_filter,
        &app.database,
    )
    .await?;
    let summary = expense_summary(app, expense_id).await?;
    Ok(Outcome::Done(Some(OutgoingMessage::new(ctx.chat_id, summary))))
}

async fn expense_summary<D: Database, M: Messenger>(
    app: &App<D, M>,
    expense_id: i64,
) -> Result<String, EngineError> {
    let saved = ledger::get_expense_with_debts(expense_id, &app.database).await?;
    let expense = &saved.expense;
    let total = format_amount(expense.amount, app.currency());

    let text = match saved.debts.first() {
        Some(debt) => format!(
            "Expense \"{}\" of {} added. Each of the {} participants owes {}.",
            expense.description,
            total,
            saved.debts.len(),
            format_amount(debt.amount, app.currency())
        ),
        None => format!(
            "Expense \"{}\" of {} added. Nobody else shares it.",
            expense.description, total
        ),
    };
    Ok(success(text))
}
