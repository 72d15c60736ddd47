//! The debt engine: expenses, their debts and the transfers that pay them off.
//!
//! Storage is reached only through the `Database` trait, so every operation
//! here can be tested against an in-memory SQLite database.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::{
    database::{Database, DebtUpdate},
    error::{EngineError, InputError},
    types::{
        Amount, BotFilter, Debt, DebtDetail, DebtStatus, Decision, Expense, ExpenseWithDebts,
        NewExpense, Transfer, TransferStatus, User,
    },
};

/// Below this, a leftover amount is considered rounding noise.
const EPSILON: Amount = 1e-9;

/// Newest items shown by the admin menu.
pub const ADMIN_LIST_LIMIT: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct AmountChange {
    pub description: String,
    pub old_amount: Amount,
    pub new_amount: Amount,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settlement {
    pub transfer: Transfer,
    pub status: TransferStatus,
    /// Debts that were paid off entirely.
    pub paid: Vec<i64>,
    /// Debt that was only partially paid, with its new amount.
    pub partial: Option<(i64, Amount)>,
    /// Part of the transfer that did not match any debt.
    pub discarded: Amount,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PayoffPlan {
    pub updates: Vec<DebtUpdate>,
    pub discarded: Amount,
}

pub fn validate_amount(amount: Amount) -> Result<Amount, InputError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(amount)
    } else {
        Err(InputError::non_positive_amount())
    }
}

/// Same share for everyone. Returns nothing if there are no participants.
pub fn split_evenly(amount: Amount, participants: &[i64]) -> Vec<(i64, Amount)> {
    if participants.is_empty() {
        return vec![];
    }
    let share = amount / participants.len() as Amount;
    participants.iter().map(|&p| (p, share)).collect()
}

/// Spread a new expense amount over its debts, keeping each debt's proportion.
///
/// Falls back to an even split when the old amount is zero. Paid debts keep
/// their status.
pub fn rescale_debts(old_amount: Amount, new_amount: Amount, debts: &[Debt]) -> Vec<DebtUpdate> {
    let ratio_base = old_amount.abs() > EPSILON;
    let even_share = if debts.is_empty() {
        0.0
    } else {
        new_amount / debts.len() as Amount
    };

    debts
        .iter()
        .map(|debt| DebtUpdate {
            user_id: debt.user_id,
            expense_id: debt.expense_id,
            amount: if ratio_base {
                new_amount * debt.amount / old_amount
            } else {
                even_share
            },
            paid: debt.status == DebtStatus::Paid,
        })
        .collect()
}

/// Pay off `debts` in order with `amount`.
///
/// Each fully covered debt becomes paid with a zero amount; the first debt that
/// is not fully covered is reduced and the walk stops there.
pub fn plan_payoff(amount: Amount, debts: &[Debt]) -> PayoffPlan {
    let mut remaining = amount;
    let mut updates = Vec::new();

    for debt in debts {
        if remaining <= EPSILON {
            break;
        }
        if remaining + EPSILON >= debt.amount {
            remaining -= debt.amount;
            updates.push(DebtUpdate {
                user_id: debt.user_id,
                expense_id: debt.expense_id,
                amount: 0.0,
                paid: true,
            });
        } else {
            updates.push(DebtUpdate {
                user_id: debt.user_id,
                expense_id: debt.expense_id,
                amount: debt.amount - remaining,
                paid: false,
            });
            remaining = 0.0;
        }
    }

    PayoffPlan {
        updates,
        discarded: remaining.max(0.0),
    }
}

/// Participants of a new expense. Bots and the creator never owe anything.
///
/// An absent or empty selection means every current member.
async fn resolve_participants<D: Database>(
    group_id: i64,
    creator_id: i64,
    participants: Option<Vec<i64>>,
    bot_filter: BotFilter,
    database: &Arc<Mutex<D>>,
) -> Result<Vec<i64>, EngineError> {
    let members = database.lock().await.get_group_members(group_id)?;
    let is_bot = |user_id: i64| {
        members
            .iter()
            .find(|m| m.id == user_id)
            .map(|m| bot_filter.is_bot(m))
            .unwrap_or(false)
    };

    let candidates: Vec<i64> = match participants {
        Some(participants) if !participants.is_empty() => participants,
        _ => members.iter().map(|m| m.id).collect(),
    };

    let mut seen = HashSet::new();
    Ok(candidates
        .into_iter()
        .filter(|&id| id != creator_id && !is_bot(id))
        .filter(|&id| seen.insert(id))
        .collect())
}

#[allow(clippy::too_many_arguments)]
pub async fn create_expense<D: Database>(
    group_id: i64,
    amount: Amount,
    description: &str,
    creator_id: i64,
    attachment: Option<String>,
    participants: Option<Vec<i64>>,
    bot_filter: BotFilter,
    database: &Arc<Mutex<D>>,
) -> Result<i64, EngineError> {
    let amount = validate_amount(amount)?;
    let description = description.trim();
    if description.is_empty() {
        return Err(InputError::empty_description().into());
    }

    let participants =
        resolve_participants(group_id, creator_id, participants, bot_filter, database).await?;
    let debts = split_evenly(amount, &participants);
    if debts.is_empty() {
        warn!("Expense \"{description}\" in group {group_id} has no participants");
    }

    let expense = NewExpense {
        group_id,
        amount,
        description: description.to_string(),
        creator_id,
        attachment,
        participants,
        created_at: Utc::now(),
    };
    let expense_id = database.lock().await.save_expense(&expense, &debts)?;

    info!(
        "Created expense #{expense_id} of {amount} in group {group_id} split among {} participants",
        debts.len()
    );
    Ok(expense_id)
}

pub async fn edit_expense_amount<D: Database>(
    group_id: i64,
    expense_id: i64,
    new_amount: Amount,
    database: &Arc<Mutex<D>>,
) -> Result<AmountChange, EngineError> {
    let new_amount = validate_amount(new_amount)?;

    let mut database = database.lock().await;
    let expense = expense_of_group(&*database, group_id, expense_id)?;
    let debts = database.get_expense_debts(expense_id)?;

    let updates = rescale_debts(expense.amount, new_amount, &debts);
    database.update_expense_amount(expense_id, new_amount, &updates)?;

    info!(
        "Expense #{expense_id} amount changed from {} to {new_amount}",
        expense.amount
    );
    Ok(AmountChange {
        description: expense.description,
        old_amount: expense.amount,
        new_amount,
    })
}

pub async fn delete_expense<D: Database>(
    group_id: i64,
    expense_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<Expense, EngineError> {
    let mut database = database.lock().await;
    let expense = expense_of_group(&*database, group_id, expense_id)?;
    if !database.delete_expense(expense_id)? {
        return Err(EngineError::not_found(format!("expense #{expense_id}")));
    }
    info!("Deleted expense #{expense_id} of group {group_id}");
    Ok(expense)
}

/// Expenses of other groups are reported as missing.
fn expense_of_group<D: Database>(
    database: &D,
    group_id: i64,
    expense_id: i64,
) -> Result<Expense, EngineError> {
    database
        .get_expense(expense_id)?
        .filter(|expense| expense.group_id == group_id)
        .ok_or_else(|| EngineError::not_found(format!("expense #{expense_id}")))
}

/// Transfers of other groups are reported as missing.
fn transfer_of_group<D: Database>(
    database: &D,
    group_id: i64,
    transfer_id: i64,
) -> Result<Transfer, EngineError> {
    database
        .get_transfer(transfer_id)?
        .filter(|transfer| transfer.group_id == group_id)
        .ok_or_else(|| EngineError::not_found(format!("transfer #{transfer_id}")))
}

pub async fn create_transfer<D: Database>(
    group_id: i64,
    sender_id: i64,
    receiver_id: i64,
    amount: Amount,
    database: &Arc<Mutex<D>>,
) -> Result<i64, EngineError> {
    let amount = validate_amount(amount)?;
    if sender_id == receiver_id {
        return Err(InputError::SelfTransfer.into());
    }

    let transfer_id = database
        .lock()
        .await
        .create_transfer(group_id, sender_id, receiver_id, amount)?;
    info!("Transfer #{transfer_id} of {amount} from {sender_id} to {receiver_id} is pending");
    Ok(transfer_id)
}

pub async fn settle_transfer<D: Database>(
    transfer_id: i64,
    decision: Decision,
    database: &Arc<Mutex<D>>,
) -> Result<Settlement, EngineError> {
    let mut database = database.lock().await;
    let transfer = database
        .get_transfer(transfer_id)?
        .ok_or_else(|| EngineError::not_found(format!("transfer #{transfer_id}")))?;
    if transfer.status != TransferStatus::Pending {
        return Err(EngineError::AlreadySettled(transfer_id, transfer.status));
    }

    let (status, plan) = match decision {
        Decision::Reject => (
            TransferStatus::Rejected,
            PayoffPlan {
                updates: vec![],
                discarded: 0.0,
            },
        ),
        Decision::Confirm => {
            let debts = database.get_unpaid_debts(transfer.receiver_id, transfer.group_id)?;
            (
                TransferStatus::Confirmed,
                plan_payoff(transfer.amount, &debts),
            )
        }
    };

    database.settle_transfer(transfer_id, status, &plan.updates)?;

    if plan.discarded > EPSILON {
        warn!(
            "Transfer #{transfer_id} exceeded the debts of user {} by {}; the excess is discarded",
            transfer.receiver_id, plan.discarded
        );
    }
    info!("Transfer #{transfer_id} settled as {status}");

    let paid = plan
        .updates
        .iter()
        .filter(|u| u.paid)
        .map(|u| u.expense_id)
        .collect();
    let partial = plan
        .updates
        .iter()
        .find(|u| !u.paid)
        .map(|u| (u.expense_id, u.amount));

    Ok(Settlement {
        transfer: Transfer { status, ..transfer },
        status,
        paid,
        partial,
        discarded: plan.discarded,
    })
}

pub async fn total_debt<D: Database>(
    user_id: i64,
    group_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<Amount, EngineError> {
    let debts = database.lock().await.get_unpaid_debts(user_id, group_id)?;
    Ok(debts.iter().map(|d| d.amount).sum())
}

pub async fn detailed_debts<D: Database>(
    user_id: i64,
    group_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<Vec<DebtDetail>, EngineError> {
    Ok(database.lock().await.get_debt_details(user_id, group_id)?)
}

pub async fn get_expense_with_debts<D: Database>(
    expense_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<ExpenseWithDebts, EngineError> {
    let database = database.lock().await;
    let expense = database
        .get_expense(expense_id)?
        .ok_or_else(|| EngineError::not_found(format!("expense #{expense_id}")))?;
    let debts = database.get_expense_debts(expense_id)?;
    Ok(ExpenseWithDebts { expense, debts })
}

pub async fn group_expense<D: Database>(
    group_id: i64,
    expense_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<Expense, EngineError> {
    expense_of_group(&*database.lock().await, group_id, expense_id)
}

pub async fn group_transfer<D: Database>(
    group_id: i64,
    transfer_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<Transfer, EngineError> {
    transfer_of_group(&*database.lock().await, group_id, transfer_id)
}

pub async fn group_expenses<D: Database>(
    group_id: i64,
    limit: Option<usize>,
    database: &Arc<Mutex<D>>,
) -> Result<Vec<Expense>, EngineError> {
    Ok(database.lock().await.get_group_expenses(group_id, limit)?)
}

pub async fn group_transfers<D: Database>(
    group_id: i64,
    status: Option<TransferStatus>,
    limit: Option<usize>,
    database: &Arc<Mutex<D>>,
) -> Result<Vec<Transfer>, EngineError> {
    Ok(database
        .lock()
        .await
        .get_group_transfers(group_id, status, limit)?)
}

/// Pending transfers the user must confirm or reject.
pub async fn pending_transfers_for<D: Database>(
    user_id: i64,
    group_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<Vec<Transfer>, EngineError> {
    Ok(database
        .lock()
        .await
        .get_pending_transfers(user_id, group_id, true)?)
}

pub async fn delete_transfer<D: Database>(
    group_id: i64,
    transfer_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<(), EngineError> {
    let mut database = database.lock().await;
    transfer_of_group(&*database, group_id, transfer_id)?;
    if !database.delete_transfer(transfer_id)? {
        return Err(EngineError::not_found(format!("transfer #{transfer_id}")));
    }
    info!("Deleted transfer #{transfer_id} of group {group_id}");
    Ok(())
}

pub async fn reset_group<D: Database>(
    group_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<(), EngineError> {
    database.lock().await.reset_group(group_id)?;
    info!("Ledger of group {group_id} was reset");
    Ok(())
}

/// Members that owe something, with their total, largest debt first.
pub async fn group_balances<D: Database>(
    group_id: i64,
    database: &Arc<Mutex<D>>,
) -> Result<Vec<(User, Amount)>, EngineError> {
    let database = database.lock().await;
    let balances = database.get_group_balances(group_id)?;
    let mut result = Vec::with_capacity(balances.len());
    for (user_id, amount) in balances {
        let user = match database.get_user(user_id)? {
            Some(user) => user,
            None => {
                debug!("Balance of unknown user {user_id} in group {group_id}");
                User::new(user_id, None, None, None)
            }
        };
        result.push((user, amount));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::Duration;

    use super::*;
    use crate::{database::sqlite::SqliteDatabase, types::Group};

    const GROUP: i64 = -100;
    const ANNA: i64 = 1;
    const BOB: i64 = 2;
    const CARL: i64 = 3;
    const HELPER_BOT: i64 = 4;

    fn database() -> Arc<Mutex<SqliteDatabase>> {
        let mut database = SqliteDatabase::in_memory().unwrap();
        database
            .save_group(&Group {
                id: GROUP,
                title: "Trip".to_string(),
            })
            .unwrap();
        for user in [
            User::new(ANNA, Some("anna"), Some("Anna"), None),
            User::new(BOB, Some("bob"), Some("Bob"), None),
            User::new(CARL, Some("carl"), Some("Carl"), None),
            User::new(HELPER_BOT, Some("ledger_bot"), Some("Ledger"), None),
        ] {
            database.save_user(&user).unwrap();
            database.add_group_member(GROUP, user.id).unwrap();
        }
        Arc::new(Mutex::new(database))
    }

    fn debt(expense_id: i64, amount: Amount) -> Debt {
        Debt {
            user_id: BOB,
            expense_id,
            amount,
            status: DebtStatus::Unpaid,
        }
    }

    async fn expense_at(
        database: &Arc<Mutex<SqliteDatabase>>,
        amount: Amount,
        participants: Vec<i64>,
        minutes_ago: i64,
    ) -> i64 {
        let debts = split_evenly(amount, &participants);
        database
            .lock()
            .await
            .save_expense(
                &NewExpense {
                    group_id: GROUP,
                    amount,
                    description: "dinner".to_string(),
                    creator_id: ANNA,
                    attachment: None,
                    participants,
                    created_at: Utc::now() - Duration::minutes(minutes_ago),
                },
                &debts,
            )
            .unwrap()
    }

    #[test]
    fn test_split_evenly() {
        let shares = split_evenly(90.0, &[BOB, CARL]);
        assert_eq!(2, shares.len());
        assert_abs_diff_eq!(45.0, shares[0].1);
        assert_abs_diff_eq!(45.0, shares[1].1);

        let shares = split_evenly(100.0, &[ANNA, BOB, CARL]);
        let total: Amount = shares.iter().map(|s| s.1).sum();
        assert_abs_diff_eq!(100.0, total, epsilon = 1e-9);

        assert!(split_evenly(10.0, &[]).is_empty());
    }

    #[test]
    fn test_plan_payoff_partial() {
        let plan = plan_payoff(12.0, &[debt(1, 10.0), debt(2, 15.0)]);
        assert_eq!(2, plan.updates.len());
        assert!(plan.updates[0].paid);
        assert_abs_diff_eq!(0.0, plan.updates[0].amount);
        assert!(!plan.updates[1].paid);
        assert_abs_diff_eq!(13.0, plan.updates[1].amount);
        assert_abs_diff_eq!(0.0, plan.discarded);
    }

    #[test]
    fn test_plan_payoff_discards_excess() {
        let plan = plan_payoff(30.0, &[debt(1, 10.0), debt(2, 15.0)]);
        assert!(plan.updates.iter().all(|u| u.paid));
        assert_abs_diff_eq!(5.0, plan.discarded);

        let plan = plan_payoff(7.0, &[]);
        assert!(plan.updates.is_empty());
        assert_abs_diff_eq!(7.0, plan.discarded);
    }

    #[test]
    fn test_plan_payoff_exact_amount_stops() {
        let plan = plan_payoff(10.0, &[debt(1, 10.0), debt(2, 15.0)]);
        assert_eq!(1, plan.updates.len());
        assert!(plan.updates[0].paid);
        assert_abs_diff_eq!(0.0, plan.discarded);
    }

    #[test]
    fn test_rescale_debts() {
        let updates = rescale_debts(90.0, 120.0, &[debt(1, 45.0), debt(1, 45.0)]);
        assert_abs_diff_eq!(60.0, updates[0].amount);
        assert_abs_diff_eq!(60.0, updates[1].amount);

        let updates = rescale_debts(100.0, 50.0, &[debt(1, 75.0), debt(1, 25.0)]);
        assert_abs_diff_eq!(37.5, updates[0].amount);
        assert_abs_diff_eq!(12.5, updates[1].amount);

        let updates = rescale_debts(0.0, 30.0, &[debt(1, 0.0), debt(1, 0.0), debt(1, 0.0)]);
        assert!(updates.iter().all(|u| (u.amount - 10.0).abs() < 1e-9));
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(1.5).is_ok());
        assert_eq!(
            Err(InputError::NonPositiveAmount),
            validate_amount(0.0)
        );
        assert!(validate_amount(-3.0).is_err());
        assert!(validate_amount(Amount::NAN).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_expense_default_participants() {
        let database = database();
        let expense_id = create_expense(
            GROUP,
            90.0,
            "  dinner ",
            ANNA,
            None,
            None,
            BotFilter::NameHeuristic,
            &database,
        )
        .await
        .unwrap();

        let saved = get_expense_with_debts(expense_id, &database).await.unwrap();
        assert_eq!("dinner", saved.expense.description);
        assert_eq!(vec![BOB, CARL], saved.expense.participants);
        assert_eq!(2, saved.debts.len());
        for debt in &saved.debts {
            assert_abs_diff_eq!(45.0, debt.amount);
            assert_eq!(DebtStatus::Unpaid, debt.status);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_expense_explicit_participants() {
        let database = database();
        let expense_id = create_expense(
            GROUP,
            30.0,
            "taxi",
            ANNA,
            None,
            Some(vec![CARL, ANNA, CARL, HELPER_BOT]),
            BotFilter::NameHeuristic,
            &database,
        )
        .await
        .unwrap();
        let saved = get_expense_with_debts(expense_id, &database).await.unwrap();
        assert_eq!(vec![CARL], saved.expense.participants);
        assert_abs_diff_eq!(30.0, saved.debts[0].amount);

        let expense_id = create_expense(
            GROUP,
            30.0,
            "taxi",
            ANNA,
            None,
            Some(vec![]),
            BotFilter::Disabled,
            &database,
        )
        .await
        .unwrap();
        let saved = get_expense_with_debts(expense_id, &database).await.unwrap();
        assert_eq!(vec![BOB, CARL, HELPER_BOT], saved.expense.participants);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_expense_writes_nothing() {
        let database = database();
        for amount in [0.0, -5.0] {
            let e = create_expense(
                GROUP,
                amount,
                "dinner",
                ANNA,
                None,
                None,
                BotFilter::NameHeuristic,
                &database,
            )
            .await
            .unwrap_err();
            assert!(e.is_validation());
        }
        let e = create_expense(
            GROUP,
            10.0,
            "   ",
            ANNA,
            None,
            None,
            BotFilter::NameHeuristic,
            &database,
        )
        .await
        .unwrap_err();
        assert!(e.is_validation());

        assert!(group_expenses(GROUP, None, &database)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirm_transfer_pays_oldest_first() {
        let database = database();
        let older = expense_at(&database, 10.0, vec![BOB], 60).await;
        let newer = expense_at(&database, 15.0, vec![BOB], 5).await;

        let transfer_id = create_transfer(GROUP, CARL, BOB, 12.0, &database)
            .await
            .unwrap();
        assert_abs_diff_eq!(25.0, total_debt(BOB, GROUP, &database).await.unwrap());

        let settlement = settle_transfer(transfer_id, Decision::Confirm, &database)
            .await
            .unwrap();
        assert_eq!(TransferStatus::Confirmed, settlement.status);
        assert_eq!(vec![older], settlement.paid);
        let (partial_expense, partial_amount) = settlement.partial.unwrap();
        assert_eq!(newer, partial_expense);
        assert_abs_diff_eq!(13.0, partial_amount);

        let remaining = detailed_debts(BOB, GROUP, &database).await.unwrap();
        assert_eq!(1, remaining.len());
        assert_eq!(newer, remaining[0].expense_id);
        assert_abs_diff_eq!(13.0, total_debt(BOB, GROUP, &database).await.unwrap());

        let e = settle_transfer(transfer_id, Decision::Confirm, &database)
            .await
            .unwrap_err();
        assert!(matches!(
            e,
            EngineError::AlreadySettled(_, TransferStatus::Confirmed)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirm_transfer_discards_excess() {
        let database = database();
        expense_at(&database, 10.0, vec![BOB], 60).await;
        expense_at(&database, 15.0, vec![BOB], 5).await;

        let transfer_id = create_transfer(GROUP, CARL, BOB, 30.0, &database)
            .await
            .unwrap();
        let settlement = settle_transfer(transfer_id, Decision::Confirm, &database)
            .await
            .unwrap();
        assert_eq!(2, settlement.paid.len());
        assert_abs_diff_eq!(5.0, settlement.discarded);
        assert_abs_diff_eq!(0.0, total_debt(BOB, GROUP, &database).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reject_transfer_keeps_debts() {
        let database = database();
        expense_at(&database, 10.0, vec![BOB], 60).await;

        let transfer_id = create_transfer(GROUP, CARL, BOB, 10.0, &database)
            .await
            .unwrap();
        let settlement = settle_transfer(transfer_id, Decision::Reject, &database)
            .await
            .unwrap();
        assert_eq!(TransferStatus::Rejected, settlement.status);
        assert!(settlement.paid.is_empty());
        assert_abs_diff_eq!(10.0, total_debt(BOB, GROUP, &database).await.unwrap());
        assert!(pending_transfers_for(BOB, GROUP, &database)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_transfers() {
        let database = database();
        let e = create_transfer(GROUP, BOB, BOB, 10.0, &database)
            .await
            .unwrap_err();
        assert!(matches!(
            e,
            EngineError::Validation(InputError::SelfTransfer)
        ));
        assert!(create_transfer(GROUP, CARL, BOB, 0.0, &database)
            .await
            .is_err());
        assert!(matches!(
            settle_transfer(42, Decision::Confirm, &database).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_edit_expense_amount_is_proportional() {
        let database = database();
        let expense_id = expense_at(&database, 90.0, vec![BOB, CARL], 0).await;

        let change = edit_expense_amount(GROUP, expense_id, 120.0, &database)
            .await
            .unwrap();
        assert_abs_diff_eq!(90.0, change.old_amount);
        assert_abs_diff_eq!(120.0, change.new_amount);

        let saved = get_expense_with_debts(expense_id, &database).await.unwrap();
        assert_abs_diff_eq!(120.0, saved.expense.amount);
        assert_eq!(vec![BOB, CARL], saved.expense.participants);
        for debt in saved.debts {
            assert_abs_diff_eq!(60.0, debt.amount);
        }

        assert!(edit_expense_amount(GROUP, expense_id, -1.0, &database)
            .await
            .unwrap_err()
            .is_validation());
        assert!(matches!(
            edit_expense_amount(GROUP, 999, 10.0, &database).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_expense_cascades() {
        let database = database();
        let expense_id = expense_at(&database, 90.0, vec![BOB, CARL], 0).await;

        delete_expense(GROUP, expense_id, &database).await.unwrap();
        assert!(matches!(
            get_expense_with_debts(expense_id, &database).await,
            Err(EngineError::NotFound(_))
        ));
        assert_abs_diff_eq!(0.0, total_debt(BOB, GROUP, &database).await.unwrap());
        assert!(matches!(
            delete_expense(GROUP, expense_id, &database).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_other_groups_cannot_touch_the_ledger() {
        let database = database();
        let other_group = -200;
        let expense_id = expense_at(&database, 90.0, vec![BOB, CARL], 0).await;
        let transfer_id = create_transfer(GROUP, CARL, BOB, 5.0, &database)
            .await
            .unwrap();

        assert!(matches!(
            group_expense(other_group, expense_id, &database).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            edit_expense_amount(other_group, expense_id, 5000.0, &database).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            delete_expense(other_group, expense_id, &database).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            group_transfer(other_group, transfer_id, &database).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            delete_transfer(other_group, transfer_id, &database).await,
            Err(EngineError::NotFound(_))
        ));

        let expense = group_expense(GROUP, expense_id, &database).await.unwrap();
        assert_abs_diff_eq!(90.0, expense.amount);
        assert_abs_diff_eq!(45.0, total_debt(BOB, GROUP, &database).await.unwrap());
        let transfer = group_transfer(GROUP, transfer_id, &database).await.unwrap();
        assert_eq!(TransferStatus::Pending, transfer.status);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_group_balances_and_reset() {
        let database = database();
        expense_at(&database, 90.0, vec![BOB, CARL], 10).await;
        expense_at(&database, 10.0, vec![BOB], 0).await;
        let transfer_id = create_transfer(GROUP, CARL, BOB, 5.0, &database)
            .await
            .unwrap();

        let balances = group_balances(GROUP, &database).await.unwrap();
        assert_eq!(2, balances.len());
        assert_eq!(BOB, balances[0].0.id);
        assert_abs_diff_eq!(55.0, balances[0].1);
        assert_eq!(CARL, balances[1].0.id);

        reset_group(GROUP, &database).await.unwrap();
        assert!(group_balances(GROUP, &database).await.unwrap().is_empty());
        assert!(group_transfers(GROUP, None, None, &database)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            delete_transfer(GROUP, transfer_id, &database).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
