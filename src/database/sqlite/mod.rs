//! The implementation of a data storage using Sqlite.

use std::path::Path;

use log::debug;
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, OptionalExtension, Row, ToSql,
};
use tokio::task::block_in_place;

use crate::{
    error::DatabaseError,
    types::{
        Amount, Debt, DebtDetail, DebtStatus, Expense, Group, GroupRules, NewExpense, Transfer,
        TransferStatus, User,
    },
};

use super::{Database, DatabaseResult, DebtUpdate};

mod schema;

pub struct SqliteDatabase {
    connection: Connection,
}

impl SqliteDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<SqliteDatabase> {
        block_in_place(|| {
            let connection = Connection::open(path)
                .map_err(|e| DatabaseError::new("cannot open database", e.into()))?;
            Self::with_connection(connection)
        })
    }

    pub fn in_memory() -> DatabaseResult<SqliteDatabase> {
        let connection = Connection::open_in_memory()
            .map_err(|e| DatabaseError::new("cannot open in-memory database", e.into()))?;
        Self::with_connection(connection)
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn with_connection(connection: Connection) -> DatabaseResult<SqliteDatabase> {
        schema::create_all_tables(&connection)
            .map_err(|e| DatabaseError::new("cannot create tables", e))?;
        Ok(SqliteDatabase { connection })
    }
}

const LIMIT_NONE: i64 = -1;

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(LIMIT_NONE)
}

impl Database for SqliteDatabase {
    fn save_user(&mut self, user: &User) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            self.connection.execute(
                "INSERT INTO app_user (id, username, first_name, last_name) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                   username = COALESCE(excluded.username, app_user.username),
                   first_name = CASE WHEN app_user.names_from_intro THEN app_user.first_name
                     ELSE COALESCE(excluded.first_name, app_user.first_name) END,
                   last_name = CASE WHEN app_user.names_from_intro THEN app_user.last_name
                     ELSE COALESCE(excluded.last_name, app_user.last_name) END",
                params![&user.id, &user.username, &user.first_name, &user.last_name],
            )?;
            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot save user", e)))
    }

    fn get_user(&self, user_id: i64) -> DatabaseResult<Option<User>> {
        let fn_impl = || -> anyhow::Result<Option<User>> {
            let user = self
                .connection
                .query_row(
                    "SELECT id, username, first_name, last_name FROM app_user WHERE id = ?1",
                    params![&user_id],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get user", e)))
    }

    fn set_user_names(
        &mut self,
        user_id: i64,
        first_name: &str,
        last_name: &str,
    ) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            self.connection.execute(
                "INSERT INTO app_user (id, first_name, last_name, names_from_intro)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(id) DO UPDATE SET
                   first_name = excluded.first_name,
                   last_name = excluded.last_name,
                   names_from_intro = 1",
                params![&user_id, &first_name, &last_name],
            )?;
            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot set user names", e)))
    }

    fn save_group(&mut self, group: &Group) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            self.connection.execute(
                "INSERT INTO chat_group (id, title) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET title = excluded.title",
                params![&group.id, &group.title],
            )?;
            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot save group", e)))
    }

    fn get_groups(&self) -> DatabaseResult<Vec<Group>> {
        let fn_impl = || -> anyhow::Result<Vec<Group>> {
            let mut stmt = self
                .connection
                .prepare_cached("SELECT id, title FROM chat_group ORDER BY id")?;
            let group_iter = stmt.query_map([], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    title: row.get(1)?,
                })
            })?;
            let groups = group_iter.collect::<Result<_, _>>()?;
            Ok(groups)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get groups", e)))
    }

    fn add_group_member(&mut self, group_id: i64, user_id: i64) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            self.connection.execute(
                "INSERT OR IGNORE INTO group_member (group_id, user_id) VALUES (?1, ?2)",
                params![&group_id, &user_id],
            )?;
            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot add group member", e)))
    }

    fn get_group_members(&self, group_id: i64) -> DatabaseResult<Vec<User>> {
        let fn_impl = || -> anyhow::Result<Vec<User>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT u.id, u.username, u.first_name, u.last_name FROM group_member gm
                 INNER JOIN app_user u ON gm.user_id = u.id
                 WHERE gm.group_id = ?1
                 ORDER BY gm.rowid",
            )?;
            let member_iter = stmt.query_map(params![&group_id], user_from_row)?;
            let members = member_iter.collect::<Result<_, _>>()?;
            Ok(members)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get group members", e)))
    }

    fn save_expense(&mut self, expense: &NewExpense, debts: &[(i64, Amount)]) -> DatabaseResult<i64> {
        let mut fn_impl = || -> anyhow::Result<i64> {
            let tx = self.connection.transaction()?;

            let expense_id: i64 = {
                let mut insert_expense_stmt = tx.prepare_cached(
                    "INSERT INTO expense (group_id, amount, description, created_at, creator_id, attachment)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
                )?;

                insert_expense_stmt.query_row(
                    params![
                        &expense.group_id,
                        &expense.amount,
                        &expense.description,
                        &expense.created_at,
                        &expense.creator_id,
                        &expense.attachment
                    ],
                    |row| row.get(0),
                )?
            };

            debug!("expense_id is {expense_id}");

            {
                let mut insert_participant_stmt = tx.prepare_cached(
                    "INSERT INTO expense_participant (expense_id, position, user_id) VALUES (?1, ?2, ?3)",
                )?;
                for (position, user_id) in expense.participants.iter().enumerate() {
                    insert_participant_stmt.execute(params![&expense_id, &(position as i64), user_id])?;
                }
            }

            {
                let mut insert_debt_stmt = tx.prepare_cached(
                    "INSERT INTO debt (user_id, expense_id, amount, status) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (user_id, amount) in debts {
                    insert_debt_stmt.execute(params![
                        user_id,
                        &expense_id,
                        amount,
                        &DebtStatus::Unpaid
                    ])?;
                }
            }

            tx.commit()?;

            Ok(expense_id)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot save expense", e)))
    }

    fn get_expense(&self, expense_id: i64) -> DatabaseResult<Option<Expense>> {
        let fn_impl = || -> anyhow::Result<Option<Expense>> {
            let expense = self
                .connection
                .query_row(
                    "SELECT id, group_id, amount, description, created_at, creator_id, attachment
                     FROM expense WHERE id = ?1",
                    params![&expense_id],
                    expense_from_row,
                )
                .optional()?;

            match expense {
                Some(mut expense) => {
                    expense.participants = load_participants(&self.connection, expense.id)?;
                    Ok(Some(expense))
                }
                None => Ok(None),
            }
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get expense", e)))
    }

    fn get_expense_debts(&self, expense_id: i64) -> DatabaseResult<Vec<Debt>> {
        let fn_impl = || -> anyhow::Result<Vec<Debt>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT d.user_id, d.expense_id, d.amount, d.status FROM debt d
                 LEFT JOIN expense_participant ep
                   ON ep.expense_id = d.expense_id AND ep.user_id = d.user_id
                 WHERE d.expense_id = ?1
                 ORDER BY ep.position, d.user_id",
            )?;
            let debt_iter = stmt.query_map(params![&expense_id], debt_from_row)?;
            let debts = debt_iter.collect::<Result<_, _>>()?;
            Ok(debts)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get expense debts", e)))
    }

    fn get_group_expenses(
        &self,
        group_id: i64,
        limit: Option<usize>,
    ) -> DatabaseResult<Vec<Expense>> {
        let fn_impl = || -> anyhow::Result<Vec<Expense>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT id, group_id, amount, description, created_at, creator_id, attachment
                 FROM expense WHERE group_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let expense_iter =
                stmt.query_map(params![&group_id, &sql_limit(limit)], expense_from_row)?;
            let mut expenses: Vec<Expense> = expense_iter.collect::<Result<_, _>>()?;
            for expense in &mut expenses {
                expense.participants = load_participants(&self.connection, expense.id)?;
            }
            Ok(expenses)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get group expenses", e)))
    }

    fn update_expense_amount(
        &mut self,
        expense_id: i64,
        new_amount: Amount,
        debts: &[DebtUpdate],
    ) -> DatabaseResult<()> {
        let mut fn_impl = || -> anyhow::Result<()> {
            let tx = self.connection.transaction()?;

            let num_updated_rows = tx.execute(
                "UPDATE expense SET amount = ?1 WHERE id = ?2",
                params![&new_amount, &expense_id],
            )?;
            if num_updated_rows == 0 {
                return Err(DatabaseError::concurrency("the expense was not found").into());
            }

            apply_debt_updates(&tx, debts)?;

            tx.commit()?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot update expense amount", e)))
    }

    fn delete_expense(&mut self, expense_id: i64) -> DatabaseResult<bool> {
        debug!("Deleting expense. Expense ID: {expense_id}");
        let mut fn_impl = || -> anyhow::Result<bool> {
            let tx = self.connection.transaction()?;

            tx.execute("DELETE FROM debt WHERE expense_id = ?1", params![&expense_id])?;
            tx.execute(
                "DELETE FROM expense_participant WHERE expense_id = ?1",
                params![&expense_id],
            )?;
            let num_deleted_rows =
                tx.execute("DELETE FROM expense WHERE id = ?1", params![&expense_id])?;

            tx.commit()?;

            Ok(num_deleted_rows > 0)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot delete expense", e)))
    }

    fn get_unpaid_debts(&self, user_id: i64, group_id: i64) -> DatabaseResult<Vec<Debt>> {
        let fn_impl = || -> anyhow::Result<Vec<Debt>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT d.user_id, d.expense_id, d.amount, d.status FROM debt d
                 INNER JOIN expense e ON d.expense_id = e.id
                 WHERE d.user_id = ?1 AND e.group_id = ?2 AND d.status = ?3
                 ORDER BY e.created_at ASC, e.id ASC",
            )?;
            let debt_iter = stmt.query_map(
                params![&user_id, &group_id, &DebtStatus::Unpaid],
                debt_from_row,
            )?;
            let debts = debt_iter.collect::<Result<_, _>>()?;
            Ok(debts)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get unpaid debts", e)))
    }

    fn get_debt_details(&self, user_id: i64, group_id: i64) -> DatabaseResult<Vec<DebtDetail>> {
        let fn_impl = || -> anyhow::Result<Vec<DebtDetail>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT e.id, e.description, e.created_at, d.amount FROM debt d
                 INNER JOIN expense e ON d.expense_id = e.id
                 WHERE d.user_id = ?1 AND e.group_id = ?2 AND d.status = ?3
                 ORDER BY e.created_at DESC, e.id DESC",
            )?;
            let detail_iter = stmt.query_map(
                params![&user_id, &group_id, &DebtStatus::Unpaid],
                |row| {
                    Ok(DebtDetail {
                        expense_id: row.get(0)?,
                        description: row.get(1)?,
                        created_at: row.get(2)?,
                        amount: row.get(3)?,
                    })
                },
            )?;
            let details = detail_iter.collect::<Result<_, _>>()?;
            Ok(details)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get debt details", e)))
    }

    fn get_group_balances(&self, group_id: i64) -> DatabaseResult<Vec<(i64, Amount)>> {
        let fn_impl = || -> anyhow::Result<Vec<(i64, Amount)>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT d.user_id, SUM(d.amount) AS total FROM debt d
                 INNER JOIN expense e ON d.expense_id = e.id
                 WHERE e.group_id = ?1 AND d.status = ?2
                 GROUP BY d.user_id
                 HAVING total > 0
                 ORDER BY total DESC",
            )?;
            let balance_iter = stmt.query_map(params![&group_id, &DebtStatus::Unpaid], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            let balances = balance_iter.collect::<Result<_, _>>()?;
            Ok(balances)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get group balances", e)))
    }

    fn create_transfer(
        &mut self,
        group_id: i64,
        sender_id: i64,
        receiver_id: i64,
        amount: Amount,
    ) -> DatabaseResult<i64> {
        let fn_impl = || -> anyhow::Result<i64> {
            let transfer_id = self.connection.query_row(
                "INSERT INTO transfer (group_id, sender_id, receiver_id, amount, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
                params![
                    &group_id,
                    &sender_id,
                    &receiver_id,
                    &amount,
                    &chrono::Utc::now(),
                    &TransferStatus::Pending
                ],
                |row| row.get(0),
            )?;
            Ok(transfer_id)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot create transfer", e)))
    }

    fn get_transfer(&self, transfer_id: i64) -> DatabaseResult<Option<Transfer>> {
        let fn_impl = || -> anyhow::Result<Option<Transfer>> {
            let transfer = self
                .connection
                .query_row(
                    "SELECT id, group_id, sender_id, receiver_id, amount, created_at, status
                     FROM transfer WHERE id = ?1",
                    params![&transfer_id],
                    transfer_from_row,
                )
                .optional()?;
            Ok(transfer)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get transfer", e)))
    }

    fn settle_transfer(
        &mut self,
        transfer_id: i64,
        status: TransferStatus,
        debts: &[DebtUpdate],
    ) -> DatabaseResult<()> {
        debug!("Settling transfer {transfer_id} as {status}");
        let mut fn_impl = || -> anyhow::Result<()> {
            let tx = self.connection.transaction()?;

            let num_updated_rows = tx.execute(
                "UPDATE transfer SET status = ?1 WHERE id = ?2 AND status = ?3",
                params![&status, &transfer_id, &TransferStatus::Pending],
            )?;
            if num_updated_rows == 0 {
                return Err(
                    DatabaseError::concurrency("the transfer is no longer pending").into(),
                );
            }

            apply_debt_updates(&tx, debts)?;

            tx.commit()?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot settle transfer", e)))
    }

    fn get_pending_transfers(
        &self,
        user_id: i64,
        group_id: i64,
        as_receiver: bool,
    ) -> DatabaseResult<Vec<Transfer>> {
        let fn_impl = || -> anyhow::Result<Vec<Transfer>> {
            let query = if as_receiver {
                "SELECT id, group_id, sender_id, receiver_id, amount, created_at, status
                 FROM transfer WHERE receiver_id = ?1 AND group_id = ?2 AND status = ?3
                 ORDER BY created_at ASC, id ASC"
            } else {
                "SELECT id, group_id, sender_id, receiver_id, amount, created_at, status
                 FROM transfer WHERE sender_id = ?1 AND group_id = ?2 AND status = ?3
                 ORDER BY created_at ASC, id ASC"
            };
            let mut stmt = self.connection.prepare_cached(query)?;
            let transfer_iter = stmt.query_map(
                params![&user_id, &group_id, &TransferStatus::Pending],
                transfer_from_row,
            )?;
            let transfers = transfer_iter.collect::<Result<_, _>>()?;
            Ok(transfers)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get pending transfers", e)))
    }

    fn get_group_transfers(
        &self,
        group_id: i64,
        status: Option<TransferStatus>,
        limit: Option<usize>,
    ) -> DatabaseResult<Vec<Transfer>> {
        let fn_impl = || -> anyhow::Result<Vec<Transfer>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT id, group_id, sender_id, receiver_id, amount, created_at, status
                 FROM transfer WHERE group_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )?;
            let transfer_iter = stmt.query_map(
                params![&group_id, &status, &sql_limit(limit)],
                transfer_from_row,
            )?;
            let transfers = transfer_iter.collect::<Result<_, _>>()?;
            Ok(transfers)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get group transfers", e)))
    }

    fn delete_transfer(&mut self, transfer_id: i64) -> DatabaseResult<bool> {
        debug!("Deleting transfer. Transfer ID: {transfer_id}");
        let fn_impl = || -> anyhow::Result<bool> {
            let num_deleted_rows = self
                .connection
                .execute("DELETE FROM transfer WHERE id = ?1", params![&transfer_id])?;
            Ok(num_deleted_rows > 0)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot delete transfer", e)))
    }

    fn reset_group(&mut self, group_id: i64) -> DatabaseResult<()> {
        debug!("Resetting group data. Group ID: {group_id}");
        let mut fn_impl = || -> anyhow::Result<()> {
            let tx = self.connection.transaction()?;

            tx.execute(
                "DELETE FROM debt WHERE expense_id IN (SELECT id FROM expense WHERE group_id = ?1)",
                params![&group_id],
            )?;
            tx.execute(
                "DELETE FROM expense_participant
                 WHERE expense_id IN (SELECT id FROM expense WHERE group_id = ?1)",
                params![&group_id],
            )?;
            tx.execute("DELETE FROM expense WHERE group_id = ?1", params![&group_id])?;
            tx.execute("DELETE FROM transfer WHERE group_id = ?1", params![&group_id])?;
            tx.execute("DELETE FROM group_rules WHERE group_id = ?1", params![&group_id])?;

            tx.commit()?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot reset group", e)))
    }

    fn get_group_rules(&self, group_id: i64) -> DatabaseResult<Option<GroupRules>> {
        let fn_impl = || -> anyhow::Result<Option<GroupRules>> {
            let rules = self
                .connection
                .query_row(
                    "SELECT group_id, description, deadline_hours, notification_time
                     FROM group_rules WHERE group_id = ?1",
                    params![&group_id],
                    rules_from_row,
                )
                .optional()?;
            Ok(rules)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get group rules", e)))
    }

    fn set_group_rules(&mut self, rules: &GroupRules) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            self.connection.execute(
                "INSERT INTO group_rules (group_id, description, deadline_hours, notification_time)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(group_id) DO UPDATE SET
                   description = excluded.description,
                   deadline_hours = excluded.deadline_hours,
                   notification_time = excluded.notification_time",
                params![
                    &rules.group_id,
                    &rules.description,
                    &rules.deadline_hours,
                    &rules.notification_time
                ],
            )?;
            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot set group rules", e)))
    }

    fn get_all_rules(&self) -> DatabaseResult<Vec<GroupRules>> {
        let fn_impl = || -> anyhow::Result<Vec<GroupRules>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT group_id, description, deadline_hours, notification_time
                 FROM group_rules ORDER BY group_id",
            )?;
            let rules_iter = stmt.query_map([], rules_from_row)?;
            let rules = rules_iter.collect::<Result<_, _>>()?;
            Ok(rules)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get all group rules", e)))
    }
}

fn apply_debt_updates(connection: &Connection, debts: &[DebtUpdate]) -> anyhow::Result<()> {
    let mut update_debt_stmt = connection.prepare_cached(
        "UPDATE debt SET amount = ?1, status = ?2 WHERE user_id = ?3 AND expense_id = ?4",
    )?;

    for debt in debts {
        let status = if debt.paid {
            DebtStatus::Paid
        } else {
            DebtStatus::Unpaid
        };
        let num_updated_rows = update_debt_stmt.execute(params![
            &debt.amount,
            &status,
            &debt.user_id,
            &debt.expense_id
        ])?;
        if num_updated_rows == 0 {
            return Err(DatabaseError::concurrency("the debt was not found").into());
        }
    }

    Ok(())
}

fn load_participants(connection: &Connection, expense_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = connection.prepare_cached(
        "SELECT user_id FROM expense_participant WHERE expense_id = ?1 ORDER BY position",
    )?;
    let participant_iter = stmt.query_map(params![&expense_id], |row| row.get(0))?;
    participant_iter.collect()
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
    })
}

fn expense_from_row(row: &Row) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        group_id: row.get(1)?,
        amount: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        creator_id: row.get(5)?,
        attachment: row.get(6)?,
        participants: vec![],
    })
}

fn debt_from_row(row: &Row) -> rusqlite::Result<Debt> {
    Ok(Debt {
        user_id: row.get(0)?,
        expense_id: row.get(1)?,
        amount: row.get(2)?,
        status: row.get(3)?,
    })
}

fn transfer_from_row(row: &Row) -> rusqlite::Result<Transfer> {
    Ok(Transfer {
        id: row.get(0)?,
        group_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        amount: row.get(4)?,
        created_at: row.get(5)?,
        status: row.get(6)?,
    })
}

fn rules_from_row(row: &Row) -> rusqlite::Result<GroupRules> {
    Ok(GroupRules {
        group_id: row.get(0)?,
        description: row.get(1)?,
        deadline_hours: row.get(2)?,
        notification_time: row.get(3)?,
    })
}

impl ToSql for DebtStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for DebtStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for TransferStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TransferStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

fn map_error<T: AsRef<str>>(message: T, e: anyhow::Error) -> DatabaseError {
    match e.downcast::<DatabaseError>() {
        Ok(e) => e,
        Err(e) => DatabaseError::new(message, e),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, NaiveTime, Utc};
    use tempdir::TempDir;

    use super::*;

    fn database_with_group() -> SqliteDatabase {
        let mut database = SqliteDatabase::in_memory().unwrap();
        database
            .save_group(&Group {
                id: -100,
                title: "Trip".to_string(),
            })
            .unwrap();
        for (id, name) in [(1, "anna"), (2, "bob"), (3, "carl")] {
            database
                .save_user(&User::new(id, Some(name), None, None))
                .unwrap();
            database.add_group_member(-100, id).unwrap();
        }
        database
    }

    fn new_expense(amount: Amount, participants: Vec<i64>, minutes_ago: i64) -> NewExpense {
        NewExpense {
            group_id: -100,
            amount,
            description: format!("expense of {amount}"),
            creator_id: 1,
            attachment: None,
            participants,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_save_user_refreshes_profile_names() {
        let mut database = SqliteDatabase::in_memory().unwrap();
        database
            .save_user(&User::new(1, Some("anna"), Some("Anna"), None))
            .unwrap();
        database
            .save_user(&User::new(1, None, Some("Ann"), Some("Lee")))
            .unwrap();

        let user = database.get_user(1).unwrap().unwrap();
        assert_eq!(Some("anna".to_string()), user.username);
        assert_eq!(Some("Ann".to_string()), user.first_name);
        assert_eq!(Some("Lee".to_string()), user.last_name);

        // Names given to the bot win over later profile updates
        database.set_user_names(1, "Anna", "Smith").unwrap();
        database
            .save_user(&User::new(1, Some("annie"), Some("Annie"), None))
            .unwrap();
        let user = database.get_user(1).unwrap().unwrap();
        assert_eq!(Some("annie".to_string()), user.username);
        assert_eq!(Some("Anna".to_string()), user.first_name);
        assert_eq!(Some("Smith".to_string()), user.last_name);
    }

    #[test]
    fn test_membership_is_idempotent() {
        let mut database = database_with_group();
        database.add_group_member(-100, 2).unwrap();

        let members: Vec<i64> = database
            .get_group_members(-100)
            .unwrap()
            .iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(vec![1, 2, 3], members);
    }

    #[test]
    fn test_save_and_delete_expense() {
        let mut database = database_with_group();
        let expense_id = database
            .save_expense(&new_expense(90.0, vec![3, 2], 0), &[(3, 45.0), (2, 45.0)])
            .unwrap();

        let expense = database.get_expense(expense_id).unwrap().unwrap();
        assert_eq!(vec![3, 2], expense.participants);
        let debts = database.get_expense_debts(expense_id).unwrap();
        assert_eq!(2, debts.len());
        assert_eq!(3, debts[0].user_id);
        assert!(debts.iter().all(|d| d.status == DebtStatus::Unpaid));

        assert!(database.delete_expense(expense_id).unwrap());
        assert!(database.get_expense(expense_id).unwrap().is_none());
        assert!(database.get_expense_debts(expense_id).unwrap().is_empty());
        assert!(!database.delete_expense(expense_id).unwrap());
    }

    #[test]
    fn test_unpaid_debts_are_sorted_oldest_first() {
        let mut database = database_with_group();
        let newer = database
            .save_expense(&new_expense(15.0, vec![2], 5), &[(2, 15.0)])
            .unwrap();
        let older = database
            .save_expense(&new_expense(10.0, vec![2], 60), &[(2, 10.0)])
            .unwrap();

        let debts = database.get_unpaid_debts(2, -100).unwrap();
        let order: Vec<_> = debts.iter().map(|d| d.expense_id).collect();
        assert_eq!(vec![older, newer], order);

        let details = database.get_debt_details(2, -100).unwrap();
        let order: Vec<_> = details.iter().map(|d| d.expense_id).collect();
        assert_eq!(vec![newer, older], order);
    }

    #[test]
    fn test_settle_transfer_is_applied_once() {
        let mut database = database_with_group();
        let expense_id = database
            .save_expense(&new_expense(10.0, vec![2], 0), &[(2, 10.0)])
            .unwrap();
        let transfer_id = database.create_transfer(-100, 3, 2, 4.0).unwrap();

        let updates = vec![DebtUpdate {
            user_id: 2,
            expense_id,
            amount: 6.0,
            paid: false,
        }];
        database
            .settle_transfer(transfer_id, TransferStatus::Confirmed, &updates)
            .unwrap();

        let transfer = database.get_transfer(transfer_id).unwrap().unwrap();
        assert_eq!(TransferStatus::Confirmed, transfer.status);
        assert!(database
            .settle_transfer(transfer_id, TransferStatus::Confirmed, &updates)
            .is_err());

        let debts = database.get_unpaid_debts(2, -100).unwrap();
        assert_abs_diff_eq!(6.0, debts[0].amount);
    }

    #[test]
    fn test_failed_settlement_is_rolled_back() {
        let mut database = database_with_group();
        let transfer_id = database.create_transfer(-100, 3, 2, 4.0).unwrap();

        let missing_debt = vec![DebtUpdate {
            user_id: 2,
            expense_id: 999,
            amount: 0.0,
            paid: true,
        }];
        assert!(database
            .settle_transfer(transfer_id, TransferStatus::Confirmed, &missing_debt)
            .is_err());

        let transfer = database.get_transfer(transfer_id).unwrap().unwrap();
        assert_eq!(TransferStatus::Pending, transfer.status);
    }

    #[test]
    fn test_transfers_queries() {
        let mut database = database_with_group();
        let t1 = database.create_transfer(-100, 3, 2, 4.0).unwrap();
        let t2 = database.create_transfer(-100, 1, 2, 5.0).unwrap();
        database
            .settle_transfer(t1, TransferStatus::Rejected, &[])
            .unwrap();

        let pending = database.get_pending_transfers(2, -100, true).unwrap();
        assert_eq!(vec![t2], pending.iter().map(|t| t.id).collect::<Vec<_>>());
        assert!(database.get_pending_transfers(2, -100, false).unwrap().is_empty());

        let all = database.get_group_transfers(-100, None, None).unwrap();
        assert_eq!(2, all.len());
        let rejected = database
            .get_group_transfers(-100, Some(TransferStatus::Rejected), None)
            .unwrap();
        assert_eq!(vec![t1], rejected.iter().map(|t| t.id).collect::<Vec<_>>());

        assert!(database.delete_transfer(t2).unwrap());
        assert!(database.get_transfer(t2).unwrap().is_none());
    }

    #[test]
    fn test_reset_keeps_users_and_members() {
        let mut database = database_with_group();
        database
            .save_expense(&new_expense(10.0, vec![2], 0), &[(2, 10.0)])
            .unwrap();
        database.create_transfer(-100, 3, 2, 4.0).unwrap();
        database
            .set_group_rules(&GroupRules {
                group_id: -100,
                description: "Split evenly".to_string(),
                deadline_hours: 24,
                notification_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            })
            .unwrap();

        database.reset_group(-100).unwrap();

        assert!(database.get_group_expenses(-100, None).unwrap().is_empty());
        assert!(database.get_group_transfers(-100, None, None).unwrap().is_empty());
        assert!(database.get_group_rules(-100).unwrap().is_none());
        assert!(database.get_group_balances(-100).unwrap().is_empty());
        assert_eq!(3, database.get_group_members(-100).unwrap().len());
        assert!(database.get_user(2).unwrap().is_some());
    }

    #[test]
    fn test_rules_upsert() {
        let mut database = database_with_group();
        let mut rules = GroupRules {
            group_id: -100,
            description: "Split evenly".to_string(),
            deadline_hours: 24,
            notification_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        };
        database.set_group_rules(&rules).unwrap();
        rules.deadline_hours = 48;
        rules.notification_time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        database.set_group_rules(&rules).unwrap();

        assert_eq!(Some(rules), database.get_group_rules(-100).unwrap());
        assert_eq!(1, database.get_all_rules().unwrap().len());
    }

    #[test]
    fn test_group_expenses_limit() {
        let mut database = database_with_group();
        for minutes_ago in [30, 20, 10] {
            database
                .save_expense(&new_expense(10.0, vec![2], minutes_ago), &[(2, 10.0)])
                .unwrap();
        }
        let expenses = database.get_group_expenses(-100, Some(2)).unwrap();
        assert_eq!(2, expenses.len());
        assert!(expenses[0].created_at > expenses[1].created_at);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = TempDir::new("ledger").unwrap();
        let path = dir.path().join("ledger.db");
        {
            let mut database = SqliteDatabase::open(&path).unwrap();
            database
                .save_group(&Group {
                    id: -1,
                    title: "Flat".to_string(),
                })
                .unwrap();
        }
        let database = SqliteDatabase::open(&path).unwrap();
        assert_eq!(1, database.get_groups().unwrap().len());
    }
}
