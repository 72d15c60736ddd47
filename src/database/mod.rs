//! Durable storage of the ledger.

use crate::{
    error::DatabaseError,
    types::{
        Amount, Debt, DebtDetail, Expense, Group, GroupRules, NewExpense, Transfer,
        TransferStatus, User,
    },
};

type DatabaseResult<T> = Result<T, DatabaseError>;

pub mod sqlite;

/// A debt that must be brought to a new amount, and possibly marked as paid.
#[derive(Clone, Debug, PartialEq)]
pub struct DebtUpdate {
    pub user_id: i64,
    pub expense_id: i64,
    pub amount: Amount,
    pub paid: bool,
}

/// This trait abstracts over the type of database.
///
/// Every method is a single logical operation: implementations must apply
/// all of its writes atomically, or none of them.
pub trait Database {
    /// Insert or update a user.
    ///
    /// Missing fields never clear known ones. Names set with `set_user_names`
    /// are kept; otherwise the names follow the profile.
    fn save_user(&mut self, user: &User) -> Result<(), DatabaseError>;

    fn get_user(&self, user_id: i64) -> Result<Option<User>, DatabaseError>;

    /// Update only the first and last name of a user, creating it if needed.
    /// Later profile updates no longer change these names.
    fn set_user_names(
        &mut self,
        user_id: i64,
        first_name: &str,
        last_name: &str,
    ) -> Result<(), DatabaseError>;

    /// Insert a group or refresh its title.
    fn save_group(&mut self, group: &Group) -> Result<(), DatabaseError>;

    /// Get the IDs of every known group.
    fn get_groups(&self) -> Result<Vec<Group>, DatabaseError>;

    /// Add a user to a group. If the user is already a member, it is a no-op.
    fn add_group_member(&mut self, group_id: i64, user_id: i64) -> Result<(), DatabaseError>;

    /// Get the members of a group, in the order they joined.
    fn get_group_members(&self, group_id: i64) -> Result<Vec<User>, DatabaseError>;

    /// Save an expense together with one unpaid debt per participant.
    ///
    /// Returns the ID of the new expense.
    fn save_expense(
        &mut self,
        expense: &NewExpense,
        debts: &[(i64, Amount)],
    ) -> Result<i64, DatabaseError>;

    fn get_expense(&self, expense_id: i64) -> Result<Option<Expense>, DatabaseError>;

    /// Get all the debts (paid or unpaid) generated by an expense.
    fn get_expense_debts(&self, expense_id: i64) -> Result<Vec<Debt>, DatabaseError>;

    /// Get the most recent expenses of a group, newest first.
    fn get_group_expenses(
        &self,
        group_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Expense>, DatabaseError>;

    /// Change the amount of an expense and of its debts.
    fn update_expense_amount(
        &mut self,
        expense_id: i64,
        new_amount: Amount,
        debts: &[DebtUpdate],
    ) -> Result<(), DatabaseError>;

    /// Delete an expense and everything that depends on it.
    ///
    /// Returns false if the expense did not exist.
    fn delete_expense(&mut self, expense_id: i64) -> Result<bool, DatabaseError>;

    /// Get the unpaid debts of a user within a group, oldest expense first.
    fn get_unpaid_debts(&self, user_id: i64, group_id: i64) -> Result<Vec<Debt>, DatabaseError>;

    /// Get the unpaid debts of a user within a group joined with their expense,
    /// newest expense first.
    fn get_debt_details(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<Vec<DebtDetail>, DatabaseError>;

    /// Sum of the unpaid debts of every member of the group who owes something.
    fn get_group_balances(&self, group_id: i64) -> Result<Vec<(i64, Amount)>, DatabaseError>;

    /// Create a pending transfer and return its ID.
    fn create_transfer(
        &mut self,
        group_id: i64,
        sender_id: i64,
        receiver_id: i64,
        amount: Amount,
    ) -> Result<i64, DatabaseError>;

    fn get_transfer(&self, transfer_id: i64) -> Result<Option<Transfer>, DatabaseError>;

    /// Move a pending transfer to its final status and apply the given debt updates.
    ///
    /// If the transfer is no longer pending when the write happens, nothing changes
    /// and a concurrency error is returned.
    fn settle_transfer(
        &mut self,
        transfer_id: i64,
        status: TransferStatus,
        debts: &[DebtUpdate],
    ) -> Result<(), DatabaseError>;

    /// Transfers where the user is the receiver (or the sender) that are still pending.
    fn get_pending_transfers(
        &self,
        user_id: i64,
        group_id: i64,
        as_receiver: bool,
    ) -> Result<Vec<Transfer>, DatabaseError>;

    /// Transfers of a group, newest first, optionally filtered by status.
    fn get_group_transfers(
        &self,
        group_id: i64,
        status: Option<TransferStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Transfer>, DatabaseError>;

    /// Returns false if the transfer did not exist.
    fn delete_transfer(&mut self, transfer_id: i64) -> Result<bool, DatabaseError>;

    /// Delete expenses, debts, transfers and rules of a group. Users and
    /// memberships are kept.
    fn reset_group(&mut self, group_id: i64) -> Result<(), DatabaseError>;

    fn get_group_rules(&self, group_id: i64) -> Result<Option<GroupRules>, DatabaseError>;

    /// Insert or replace the rules of a group.
    fn set_group_rules(&mut self, rules: &GroupRules) -> Result<(), DatabaseError>;

    /// Rules of every group that configured them.
    fn get_all_rules(&self) -> Result<Vec<GroupRules>, DatabaseError>;
}
