//! Multi-step conversations with a single user.
//!
//! Each (chat, user) pair has at most one flow. A flow is kept alive only while
//! its pending operation is open: once the operation completes or is aborted
//! for inactivity, the next input from the user finds the flow expired and
//! drops it.
//!
//! Every flow keeps one live prompt. Moving to the next step deletes the
//! previous prompt and sends a new one, so the reminder and abort timers
//! always count from the last answer of the user.

use std::{collections::HashMap, sync::Arc};

use log::{debug, warn};
use tokio::sync::Mutex;

use crate::{
    app::{App, ChatContext},
    database::Database,
    lifecycle::Owner,
    messenger::{Keyboard, Messenger, OutgoingMessage},
    parser::CallbackAction,
    pending::OperationType,
    types::MessageKey,
};

mod expense;
mod introduction;
mod rules;
mod transfer;

pub use expense::{quick_add_expense, start_add_expense, start_edit_amount, AddExpenseStep};
pub use introduction::{start_introduction, IntroductionStep};
pub use rules::{start_configure_rules, RulesStep};
pub use transfer::{quick_send, start_send_money, SendMoneyStep};

#[derive(Clone, Debug, PartialEq)]
pub enum Flow {
    AddExpense(AddExpenseStep),
    EditExpense { expense_id: i64 },
    SendMoney(SendMoneyStep),
    ConfigureRules(RulesStep),
    Introduction(IntroductionStep),
}

impl Flow {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Flow::AddExpense(_) => OperationType::AddExpense,
            Flow::EditExpense { .. } => OperationType::EditExpense,
            Flow::SendMoney(_) => OperationType::SendMoney,
            Flow::ConfigureRules(_) => OperationType::ConfigureRules,
            Flow::Introduction(_) => OperationType::Introduction,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlowState {
    pub flow: Flow,
    /// The bot message waiting for the next answer.
    pub prompt: Option<MessageKey>,
}

#[derive(Clone, Default)]
pub struct FlowStore {
    inner: Arc<Mutex<HashMap<(i64, i64), FlowState>>>,
}

impl FlowStore {
    pub async fn put(&self, chat_id: i64, user_id: i64, state: FlowState) {
        self.inner.lock().await.insert((chat_id, user_id), state);
    }

    pub async fn take(&self, chat_id: i64, user_id: i64) -> Option<FlowState> {
        self.inner.lock().await.remove(&(chat_id, user_id))
    }

    #[cfg(test)]
    pub async fn get(&self, chat_id: i64, user_id: i64) -> Option<FlowState> {
        self.inner.lock().await.get(&(chat_id, user_id)).cloned()
    }
}

/// User input delivered to a flow.
#[derive(Clone, Copy, Debug)]
pub enum Event<'a> {
    Text(&'a str),
    Button(CallbackAction),
    /// Platform file ID of the largest size of a photo.
    Photo(&'a str),
}

/// Result of feeding an event to the current step.
pub(crate) enum Outcome {
    /// Go to the next step with a new prompt.
    Next(Flow, OutgoingMessage),
    /// Stay on the step and redraw the prompt in place.
    Refresh(Flow, String, Keyboard),
    /// Stay on the step and explain what was wrong with the input.
    Retry(Flow, String),
    /// The event does not belong to this step.
    Ignored(Flow),
    /// The flow is over, optionally with a final message.
    Done(Option<OutgoingMessage>),
}

pub async fn on_text<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    text: &str,
) -> bool {
    drive(app, ctx, Event::Text(text)).await
}

pub async fn on_callback<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    action: CallbackAction,
) -> bool {
    drive(app, ctx, Event::Button(action)).await
}

pub async fn on_photo<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    file_id: &str,
) -> bool {
    drive(app, ctx, Event::Photo(file_id)).await
}

/// Drop the flow of the user, if any. Returns false if there was nothing to cancel.
pub async fn cancel<D: Database, M: Messenger>(app: &App<D, M>, ctx: &ChatContext) -> bool {
    match app.flows.take(ctx.chat_id, ctx.user.id).await {
        Some(state) => {
            debug!(
                "User {} cancelled flow {}",
                ctx.user.id,
                state.flow.operation_type()
            );
            finish(app, ctx, state.prompt, Some(OutgoingMessage::new(ctx.chat_id, "Operation cancelled."))).await;
            true
        }
        None => false,
    }
}

/// Start a flow for the user of `ctx`, replacing any flow they had in the chat.
pub(crate) async fn start<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    flow: Flow,
    message: OutgoingMessage,
    payload: Option<String>,
) {
    if let Some(previous) = app.flows.take(ctx.chat_id, ctx.user.id).await {
        debug!(
            "Flow {} of user {} replaced",
            previous.flow.operation_type(),
            ctx.user.id
        );
        if let Some(prompt) = previous.prompt {
            app.lifecycle.delete_now(prompt).await;
        }
    }

    let operation = flow.operation_type();
    let Some(prompt) = app.prompt(message, Owner::new(ctx.user.id, operation)).await else {
        return;
    };
    app.pending()
        .register(ctx.user.id, operation, ctx.chat_id, prompt.message_id, payload)
        .await;
    app.flows
        .put(
            ctx.chat_id,
            ctx.user.id,
            FlowState {
                flow,
                prompt: Some(prompt),
            },
        )
        .await;
}

async fn drive<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    event: Event<'_>,
) -> bool {
    let Some(state) = app.flows.take(ctx.chat_id, ctx.user.id).await else {
        return false;
    };

    let operation = state.flow.operation_type();
    if !app.pending().is_open(ctx.user.id, operation).await {
        debug!(
            "Flow {operation} of user {} expired, dropping it",
            ctx.user.id
        );
        return false;
    }

    let prompt = state.prompt;
    let outcome = match state.flow {
        Flow::AddExpense(step) => expense::on_add_expense(app, ctx, step, event).await,
        Flow::EditExpense { expense_id } => {
            expense::on_edit_amount(app, ctx, expense_id, event).await
        }
        Flow::SendMoney(step) => transfer::on_send_money(app, ctx, step, event).await,
        Flow::ConfigureRules(step) => rules::on_configure_rules(app, ctx, step, event).await,
        Flow::Introduction(step) => introduction::on_introduction(app, ctx, step, event).await,
    };

    let keep = |flow: Flow, prompt: Option<MessageKey>| FlowState { flow, prompt };

    match outcome {
        Ok(Outcome::Next(flow, message)) => {
            if let Some(previous) = prompt {
                app.lifecycle.delete_now(previous).await;
            }
            let prompt = app
                .prompt(message, Owner::new(ctx.user.id, operation))
                .await;
            app.flows
                .put(ctx.chat_id, ctx.user.id, keep(flow, prompt))
                .await;
            true
        }
        Ok(Outcome::Refresh(flow, text, keyboard)) => {
            if let Some(prompt) = prompt {
                if let Err(e) = app
                    .messenger()
                    .edit_message_text(prompt, &text, Some(keyboard))
                    .await
                {
                    warn!("Cannot redraw prompt {prompt:?}: {e}");
                }
            }
            app.flows
                .put(ctx.chat_id, ctx.user.id, keep(flow, prompt))
                .await;
            true
        }
        Ok(Outcome::Retry(flow, text)) => {
            let message = OutgoingMessage::new(ctx.chat_id, text);
            match prompt {
                Some(prompt) => {
                    app.lifecycle.send_child(prompt, message, None).await;
                }
                None => {
                    app.lifecycle.send_ephemeral(message, None).await;
                }
            }
            app.flows
                .put(ctx.chat_id, ctx.user.id, keep(flow, prompt))
                .await;
            true
        }
        Ok(Outcome::Ignored(flow)) => {
            app.flows
                .put(ctx.chat_id, ctx.user.id, keep(flow, prompt))
                .await;
            false
        }
        Ok(Outcome::Done(message)) => {
            finish(app, ctx, prompt, message).await;
            true
        }
        Err(e) => {
            finish(app, ctx, prompt, None).await;
            app.report_error(ctx.chat_id, &e).await;
            true
        }
    }
}

async fn finish<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    prompt: Option<MessageKey>,
    message: Option<OutgoingMessage>,
) {
    if let Some(prompt) = prompt {
        app.lifecycle.delete_now(prompt).await;
    }
    app.pending().complete(ctx.user.id).await;
    if let Some(message) = message {
        app.lifecycle.send_ephemeral(message, None).await;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::{
        app::testing::*,
        error::EngineError,
        formatter::{ERROR_MARKER, SUCCESS_MARKER, WARNING_MARKER},
        ledger,
        messenger::testing::RecordingMessenger,
        parser::{SplitMode, CallbackAction::*},
        types::{BotFilter, Decision, TransferStatus},
    };

    async fn text(app: &TestApp, user_id: i64, text: &str) -> bool {
        on_text(app, &context(user_id), text).await
    }

    async fn press(app: &TestApp, user_id: i64, action: CallbackAction) -> bool {
        on_callback(app, &context(user_id), action).await
    }

    async fn flow_of(app: &TestApp, user_id: i64) -> Option<Flow> {
        app.flows.get(GROUP, user_id).await.map(|s| s.flow)
    }

    fn last_text(app: &TestApp) -> String {
        app.messenger().last_sent().unwrap().1.text
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_expense_for_all_members() {
        let app = app().await;
        start_add_expense(&app, &context(ADMIN)).await.unwrap();
        assert!(app.pending().is_open(ADMIN, OperationType::AddExpense).await);

        assert!(press(&app, ADMIN, Split(SplitMode::AllMembers)).await);
        assert!(text(&app, ADMIN, "90").await);
        assert!(text(&app, ADMIN, "Dinner").await);
        assert!(matches!(
            flow_of(&app, ADMIN).await,
            Some(Flow::AddExpense(AddExpenseStep::AttachingReceipt { .. }))
        ));
        assert!(press(&app, ADMIN, Receipt(false)).await);

        assert!(last_text(&app).starts_with(SUCCESS_MARKER));
        assert!(flow_of(&app, ADMIN).await.is_none());
        assert!(!app.pending().is_open(ADMIN, OperationType::AddExpense).await);

        let expenses = ledger::group_expenses(GROUP, None, &app.database).await.unwrap();
        assert_eq!(1, expenses.len());
        assert_eq!(vec![BOB, CARL], expenses[0].participants);
        let saved = ledger::get_expense_with_debts(expenses[0].id, &app.database)
            .await
            .unwrap();
        for debt in saved.debts {
            assert_abs_diff_eq!(45.0, debt.amount);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_amount_reprompts() {
        let app = app().await;
        start_add_expense(&app, &context(ADMIN)).await.unwrap();
        press(&app, ADMIN, Split(SplitMode::AllMembers)).await;

        assert!(text(&app, ADMIN, "abc").await);
        assert!(last_text(&app).starts_with(ERROR_MARKER));
        assert!(text(&app, ADMIN, "-5").await);
        assert!(last_text(&app).contains("positive"));
        assert!(matches!(
            flow_of(&app, ADMIN).await,
            Some(Flow::AddExpense(AddExpenseStep::EnteringAmount { .. }))
        ));

        assert!(text(&app, ADMIN, "12,50").await);
        assert!(matches!(
            flow_of(&app, ADMIN).await,
            Some(Flow::AddExpense(AddExpenseStep::EnteringDescription { .. }))
        ));
        assert!(text(&app, ADMIN, "   ").await);
        assert!(last_text(&app).starts_with(ERROR_MARKER));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_selective_expense_with_receipt() {
        let app = app().await;
        start_add_expense(&app, &context(ADMIN)).await.unwrap();
        press(&app, ADMIN, Split(SplitMode::Selective)).await;
        text(&app, ADMIN, "30").await;
        text(&app, ADMIN, "Taxi").await;
        assert!(matches!(
            flow_of(&app, ADMIN).await,
            Some(Flow::AddExpense(AddExpenseStep::SelectingParticipants { .. }))
        ));

        assert!(press(&app, ADMIN, ToggleParticipant(CARL)).await);
        let edited = app.messenger().recorded.lock().unwrap().edited.clone();
        let (_, _, keyboard) = edited.last().unwrap();
        let labels: Vec<String> = keyboard.as_ref().unwrap()[..2]
            .iter()
            .map(|row| row[0].text.clone())
            .collect();
        assert_eq!(vec!["⬜ Bob".to_string(), "✅ Carl".to_string()], labels);

        press(&app, ADMIN, ParticipantsDone).await;
        press(&app, ADMIN, Receipt(true)).await;
        assert!(text(&app, ADMIN, "here it is").await);
        assert!(last_text(&app).contains("photo"));
        assert!(on_photo(&app, &context(ADMIN), "file-1").await);

        let expenses = ledger::group_expenses(GROUP, None, &app.database).await.unwrap();
        assert_eq!(vec![CARL], expenses[0].participants);
        assert_eq!(Some("file-1".to_string()), expenses[0].attachment);
        assert_abs_diff_eq!(30.0, expenses[0].amount);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_selection_falls_back_to_everyone() {
        let app = app().await;
        start_add_expense(&app, &context(ADMIN)).await.unwrap();
        press(&app, ADMIN, Split(SplitMode::Selective)).await;
        text(&app, ADMIN, "30").await;
        text(&app, ADMIN, "Taxi").await;
        press(&app, ADMIN, ParticipantsDone).await;
        press(&app, ADMIN, Receipt(false)).await;

        let expenses = ledger::group_expenses(GROUP, None, &app.database).await.unwrap();
        assert_eq!(vec![BOB, CARL], expenses[0].participants);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_quick_add_expense() {
        let app = app().await;
        quick_add_expense(&app, &context(BOB), "60 Pizza night")
            .await
            .unwrap();
        let expenses = ledger::group_expenses(GROUP, None, &app.database).await.unwrap();
        assert_eq!("Pizza night", expenses[0].description);
        assert_eq!(vec![ADMIN, CARL], expenses[0].participants);

        assert!(quick_add_expense(&app, &context(BOB), "pizza")
            .await
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_money_to_member() {
        let app = app().await;
        start_send_money(&app, &context(BOB)).await.unwrap();
        let (_, prompt) = app.messenger().last_sent().unwrap();
        let recipients: Vec<String> = prompt
            .keyboard
            .unwrap()
            .iter()
            .map(|row| row[0].data.clone())
            .collect();
        assert_eq!(
            vec![Recipient(ADMIN).data(), Recipient(CARL).data()],
            recipients
        );

        assert!(press(&app, BOB, Recipient(CARL)).await);
        assert!(text(&app, BOB, "500").await);
        assert!(press(&app, BOB, SendConfirm).await);

        let transfers = ledger::pending_transfers_for(CARL, GROUP, &app.database)
            .await
            .unwrap();
        assert_eq!(1, transfers.len());
        assert_eq!(BOB, transfers[0].sender_id);
        assert_abs_diff_eq!(500.0, transfers[0].amount);

        let sent = app.messenger().recorded.lock().unwrap().sent.clone();
        let notification = sent
            .iter()
            .find(|(_, m)| m.text.contains("@carl"))
            .map(|(_, m)| m.clone())
            .unwrap();
        let buttons = &notification.keyboard.unwrap()[0];
        assert_eq!(
            SettleTransfer(transfers[0].id, Decision::Confirm).data(),
            buttons[0].data
        );
        assert!(!app.pending().is_open(BOB, OperationType::SendMoney).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_money_to_unknown_handle() {
        let app = app().await;
        start_send_money(&app, &context(BOB)).await.unwrap();
        assert!(text(&app, BOB, "@Carl").await);
        assert!(text(&app, BOB, "10").await);
        assert!(press(&app, BOB, SendConfirm).await);

        assert!(last_text(&app).starts_with(WARNING_MARKER));
        let transfers = ledger::group_transfers(GROUP, None, None, &app.database)
            .await
            .unwrap();
        assert!(transfers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_money_cancelled() {
        let app = app().await;
        start_send_money(&app, &context(BOB)).await.unwrap();
        text(&app, BOB, "@carl").await;
        text(&app, BOB, "10").await;
        assert!(press(&app, BOB, SendCancel).await);
        assert!(ledger::group_transfers(GROUP, None, None, &app.database)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_quick_send() {
        let app = app().await;
        quick_send(&app, &context(BOB), "@carl 15").await.unwrap();
        let transfers = ledger::group_transfers(
            GROUP,
            Some(TransferStatus::Pending),
            None,
            &app.database,
        )
        .await
        .unwrap();
        assert_eq!(1, transfers.len());
        assert_eq!(CARL, transfers[0].receiver_id);

        assert!(quick_send(&app, &context(BOB), "carl")
            .await
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_configure_rules() {
        let app = app().await;
        assert!(start_configure_rules(&app, &context(BOB)).await.is_err());

        start_configure_rules(&app, &context(ADMIN)).await.unwrap();
        text(&app, ADMIN, "Split evenly").await;
        assert!(text(&app, ADMIN, "abc").await);
        assert!(last_text(&app).starts_with(ERROR_MARKER));
        text(&app, ADMIN, "24").await;
        assert!(text(&app, ADMIN, "25:00").await);
        assert!(last_text(&app).starts_with(ERROR_MARKER));
        text(&app, ADMIN, "20:00").await;

        let rules = app
            .database
            .lock()
            .await
            .get_group_rules(GROUP)
            .unwrap()
            .unwrap();
        assert_eq!("Split evenly", rules.description);
        assert_eq!(24, rules.deadline_hours);
        assert!(last_text(&app).contains(WARNING_MARKER));
        assert!(app.messenger().recorded.lock().unwrap().pinned.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_configure_rules_pins_message() {
        let app = app_with_messenger(
            RecordingMessenger::with_administrators(vec![ADMIN]).with_pin_rights(),
        )
        .await;
        start_configure_rules(&app, &context(ADMIN)).await.unwrap();
        text(&app, ADMIN, "Split evenly").await;
        text(&app, ADMIN, "48").await;
        text(&app, ADMIN, "9:30").await;

        assert_eq!(1, app.messenger().recorded.lock().unwrap().pinned.len());
        assert!(last_text(&app).starts_with(SUCCESS_MARKER));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_introduction_only_listens_to_the_new_member() {
        let app = app().await;
        let newcomer = context(ADMIN).for_user(crate::types::User::new(5, Some("dan"), None, None));
        app.record_interaction(&newcomer).await.unwrap();
        start_introduction(&app, &newcomer).await;

        assert!(!text(&app, BOB, "Bob").await);
        assert!(on_text(&app, &newcomer, "Dan").await);
        assert!(on_text(&app, &newcomer, "Brown").await);

        let user = app.database.lock().await.get_user(5).unwrap().unwrap();
        assert_eq!(Some("Dan".to_string()), user.first_name);
        assert_eq!(Some("Brown".to_string()), user.last_name);
        assert_eq!(Some("dan".to_string()), user.username);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_expired_flow_is_dropped() {
        let app = app().await;
        start_add_expense(&app, &context(ADMIN)).await.unwrap();
        press(&app, ADMIN, Split(SplitMode::AllMembers)).await;

        app.pending().remove(ADMIN).await;
        assert!(!text(&app, ADMIN, "90").await);
        assert!(flow_of(&app, ADMIN).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel() {
        let app = app().await;
        start_add_expense(&app, &context(ADMIN)).await.unwrap();
        let (prompt, _) = app.messenger().last_sent().unwrap();

        assert!(cancel(&app, &context(ADMIN)).await);
        assert!(app.messenger().deleted().contains(&prompt));
        assert!(!app.pending().is_open(ADMIN, OperationType::AddExpense).await);
        assert!(!cancel(&app, &context(ADMIN)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_new_flow_replaces_previous_one() {
        let app = app().await;
        start_add_expense(&app, &context(BOB)).await.unwrap();
        start_send_money(&app, &context(BOB)).await.unwrap();
        assert!(matches!(flow_of(&app, BOB).await, Some(Flow::SendMoney(_))));
        assert!(!app.pending().is_open(BOB, OperationType::AddExpense).await);
        assert!(!press(&app, BOB, Split(SplitMode::AllMembers)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_edit_expense_amount() {
        let app = app().await;
        let expense_id = ledger::create_expense(
            GROUP,
            90.0,
            "Dinner",
            ADMIN,
            None,
            None,
            BotFilter::NameHeuristic,
            &app.database,
        )
        .await
        .unwrap();

        assert!(start_edit_amount(&app, &context(BOB), expense_id).await.is_err());
        start_edit_amount(&app, &context(ADMIN), expense_id)
            .await
            .unwrap();
        assert!(text(&app, ADMIN, "0").await);
        assert!(text(&app, ADMIN, "120").await);
        assert!(last_text(&app).contains("120.00"));

        let saved = ledger::get_expense_with_debts(expense_id, &app.database)
            .await
            .unwrap();
        for debt in saved.debts {
            assert_abs_diff_eq!(60.0, debt.amount);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_edit_amount_stays_in_the_group() {
        let app = app().await;
        let other_group = -200;
        let expense_id = ledger::create_expense(
            other_group,
            90.0,
            "Hotel",
            CARL,
            None,
            Some(vec![BOB]),
            BotFilter::NameHeuristic,
            &app.database,
        )
        .await
        .unwrap();

        let e = start_edit_amount(&app, &context(ADMIN), expense_id)
            .await
            .unwrap_err();
        assert!(matches!(e, EngineError::NotFound(_)));

        // A flow pointing at the expense of another group cannot change it either
        start(
            &app,
            &context(ADMIN),
            Flow::EditExpense { expense_id },
            OutgoingMessage::new(GROUP, "New amount?"),
            None,
        )
        .await;
        assert!(text(&app, ADMIN, "5000").await);
        assert!(last_text(&app).starts_with(ERROR_MARKER));
        assert!(!app.pending().is_open(ADMIN, OperationType::EditExpense).await);

        let expense = ledger::group_expense(other_group, expense_id, &app.database)
            .await
            .unwrap();
        assert_abs_diff_eq!(90.0, expense.amount);
    }
}
