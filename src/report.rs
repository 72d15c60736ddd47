//! Group reports, sent as files by the `/report` command.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use csv::WriterBuilder;
use log::error;
use tokio::sync::Mutex;

use crate::{
    database::Database,
    error::EngineError,
    formatter::format_amount,
    ledger,
    types::{Amount, BotFilter, Expense, User},
};

const DATE_FORMAT: &str = "%d.%m.%Y %H:%M";

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// A spreadsheet (CSV) with the expenses and a per-member summary.
    ///
    /// `None` if the report could not be generated; the cause is logged.
    async fn render_spreadsheet(&self, group_id: i64) -> Option<Vec<u8>>;

    /// The same data as a plain-text document.
    async fn render_document(&self, group_id: i64) -> Option<Vec<u8>>;
}

/// What a member spent and what they still owe to even out the group spending.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberSummary {
    pub user: User,
    pub spent: Amount,
    /// Even share of all the expenses minus what the member spent.
    /// Negative means the group owes the member.
    pub balance: Amount,
}

pub fn summarize(
    expenses: &[Expense],
    members: &[User],
    bot_filter: BotFilter,
) -> Vec<MemberSummary> {
    let humans: Vec<&User> = members.iter().filter(|m| !bot_filter.is_bot(m)).collect();
    if humans.is_empty() {
        return vec![];
    }

    let total: Amount = expenses.iter().map(|e| e.amount).sum();
    let share = total / humans.len() as Amount;

    let mut spent_by: HashMap<i64, Amount> = HashMap::new();
    for expense in expenses {
        *spent_by.entry(expense.creator_id).or_default() += expense.amount;
    }

    humans
        .into_iter()
        .map(|user| {
            let spent = spent_by.get(&user.id).copied().unwrap_or(0.0);
            MemberSummary {
                user: user.clone(),
                spent,
                balance: share - spent,
            }
        })
        .collect()
}

struct ReportData {
    expenses: Vec<Expense>,
    creators: HashMap<i64, String>,
    summary: Vec<MemberSummary>,
}

impl ReportData {
    fn creator_name(&self, creator_id: i64) -> String {
        self.creators
            .get(&creator_id)
            .cloned()
            .unwrap_or_else(|| creator_id.to_string())
    }
}

pub struct CsvReportRenderer<D: Database> {
    database: Arc<Mutex<D>>,
    bot_filter: BotFilter,
    currency: String,
}

impl<D: Database> CsvReportRenderer<D> {
    pub fn new(database: Arc<Mutex<D>>, bot_filter: BotFilter, currency: &str) -> Self {
        CsvReportRenderer {
            database,
            bot_filter,
            currency: currency.to_string(),
        }
    }

    async fn load(&self, group_id: i64) -> Result<ReportData, EngineError> {
        let mut expenses = ledger::group_expenses(group_id, None, &self.database).await?;
        expenses.reverse();

        let database = self.database.lock().await;
        let members = database.get_group_members(group_id)?;
        let mut creators = HashMap::new();
        for expense in &expenses {
            if creators.contains_key(&expense.creator_id) {
                continue;
            }
            if let Some(user) = database.get_user(expense.creator_id)? {
                creators.insert(expense.creator_id, user.display_name());
            }
        }

        let summary = summarize(&expenses, &members, self.bot_filter);
        Ok(ReportData {
            expenses,
            creators,
            summary,
        })
    }

    fn write_csv(&self, data: &ReportData) -> anyhow::Result<Vec<u8>> {
        let mut writer = WriterBuilder::new().flexible(true).from_writer(vec![]);

        writer.write_record(["ID", "Date", "Description", "Amount", "Added by"])?;
        for expense in &data.expenses {
            writer.write_record([
                expense.id.to_string(),
                expense.created_at.format(DATE_FORMAT).to_string(),
                expense.description.clone(),
                format!("{:.2}", expense.amount),
                data.creator_name(expense.creator_id),
            ])?;
        }

        writer.write_record([""])?;
        writer.write_record(["#", "ID", "Name", "Total spent", "Balance"])?;
        for (i, summary) in data.summary.iter().enumerate() {
            writer.write_record([
                (i + 1).to_string(),
                summary.user.id.to_string(),
                summary.user.display_name(),
                format!("{:.2}", summary.spent),
                format!("{:.2}", summary.balance),
            ])?;
        }

        writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("cannot flush spreadsheet: {}", e.error()))
    }

    fn write_text(&self, data: &ReportData) -> String {
        let mut text = String::from("EXPENSE REPORT\n\nExpenses\n");
        if data.expenses.is_empty() {
            text.push_str("  (none)\n");
        }
        for expense in &data.expenses {
            text.push_str(&format!(
                "  #{} {} {} - {} (added by {})\n",
                expense.id,
                expense.created_at.format(DATE_FORMAT),
                expense.description,
                format_amount(expense.amount, &self.currency),
                data.creator_name(expense.creator_id),
            ));
        }

        text.push_str("\nSummary\n");
        for summary in &data.summary {
            text.push_str(&format!(
                "  {}: spent {}, balance {}\n",
                summary.user.display_name(),
                format_amount(summary.spent, &self.currency),
                format_amount(summary.balance, &self.currency),
            ));
        }
        text
    }
}

#[async_trait]
impl<D: Database + Send + 'static> ReportRenderer for CsvReportRenderer<D> {
    async fn render_spreadsheet(&self, group_id: i64) -> Option<Vec<u8>> {
        let data = match self.load(group_id).await {
            Ok(data) => data,
            Err(e) => {
                error!("Cannot load report data of group {group_id}: {e}");
                return None;
            }
        };
        match self.write_csv(&data) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Cannot write spreadsheet of group {group_id}: {e}");
                None
            }
        }
    }

    async fn render_document(&self, group_id: i64) -> Option<Vec<u8>> {
        match self.load(group_id).await {
            Ok(data) => Some(self.write_text(&data).into_bytes()),
            Err(e) => {
                error!("Cannot load report data of group {group_id}: {e}");
                None
            }
        }
    }
}
