use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveTime, Utc};

pub type Amount = f64;

/// A bot message (or any chat message) identified by its chat and its ID inside the chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub chat_id: i64,
    pub message_id: i32,
}

impl MessageKey {
    pub fn new(chat_id: i64, message_id: i32) -> MessageKey {
        MessageKey {
            chat_id,
            message_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    pub fn new(
        id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> User {
        User {
            id,
            username: username.map(str::to_string),
            first_name: first_name.map(str::to_string),
            last_name: last_name.map(str::to_string),
        }
    }

    /// Full name if known, then the handle, then a generic label with the ID.
    pub fn display_name(&self) -> String {
        let full_name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !full_name.is_empty() {
            full_name
        } else if let Some(username) = &self.username {
            format!("@{username}")
        } else {
            format!("user {}", self.id)
        }
    }
}

/// How automated accounts are told apart from humans when computing
/// the default participants of an expense.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotFilter {
    /// Case-insensitive "bot" substring in the handle or in the first name.
    NameHeuristic,
    /// Every member is considered human.
    Disabled,
}

impl BotFilter {
    pub fn is_bot(&self, user: &User) -> bool {
        match self {
            BotFilter::Disabled => false,
            BotFilter::NameHeuristic => [user.username.as_deref(), user.first_name.as_deref()]
                .iter()
                .flatten()
                .any(|name| name.to_lowercase().contains("bot")),
        }
    }
}

impl FromStr for BotFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "name" | "heuristic" => Ok(BotFilter::NameHeuristic),
            "none" | "disabled" | "off" => Ok(BotFilter::Disabled),
            other => Err(format!("unknown bot filter `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub id: i64,
    pub title: String,
}

/// An expense that has not been saved yet.
#[derive(Clone, Debug)]
pub struct NewExpense {
    pub group_id: i64,
    pub amount: Amount,
    pub description: String,
    pub creator_id: i64,
    pub attachment: Option<String>,
    pub participants: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expense {
    pub id: i64,
    pub group_id: i64,
    pub amount: Amount,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub creator_id: i64,
    pub attachment: Option<String>,
    pub participants: Vec<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebtStatus {
    Unpaid,
    Paid,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Debt {
    pub user_id: i64,
    pub expense_id: i64,
    pub amount: Amount,
    pub status: DebtStatus,
}

/// An unpaid debt joined with the expense it comes from.
#[derive(Clone, Debug, PartialEq)]
pub struct DebtDetail {
    pub expense_id: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub amount: Amount,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseWithDebts {
    pub expense: Expense,
    pub debts: Vec<Debt>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Confirmed,
    Rejected,
}

/// The receiver's answer to a pending transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Confirm,
    Reject,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transfer {
    pub id: i64,
    pub group_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
    pub status: TransferStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupRules {
    pub group_id: i64,
    pub description: String,
    pub deadline_hours: u32,
    pub notification_time: NaiveTime,
}

impl DebtStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebtStatus::Unpaid => "unpaid",
            DebtStatus::Paid => "paid",
        }
    }
}

impl FromStr for DebtStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(DebtStatus::Unpaid),
            "paid" => Ok(DebtStatus::Paid),
            other => Err(format!("unknown debt status `{other}`")),
        }
    }
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "confirmed" => Ok(TransferStatus::Confirmed),
            "rejected" => Ok(TransferStatus::Rejected),
            other => Err(format!("unknown transfer status `{other}`")),
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let user = User::new(1, Some("anna"), Some("Anna"), Some("Smith"));
        assert_eq!("Anna Smith", user.display_name());

        let user = User::new(1, Some("anna"), None, None);
        assert_eq!("@anna", user.display_name());

        let user = User::new(7, None, Some("  "), None);
        assert_eq!("user 7", user.display_name());
    }

    #[test]
    fn test_bot_filter() {
        let bot = User::new(1, Some("LedgerBot"), Some("Ledger"), None);
        let bot_by_name = User::new(2, None, Some("Robot Arm"), None);
        let human = User::new(3, Some("bob"), Some("Bob"), None);

        assert!(BotFilter::NameHeuristic.is_bot(&bot));
        assert!(BotFilter::NameHeuristic.is_bot(&bot_by_name));
        assert!(!BotFilter::NameHeuristic.is_bot(&human));
        assert!(!BotFilter::Disabled.is_bot(&bot));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TransferStatus::Pending,
            TransferStatus::Confirmed,
            TransferStatus::Rejected,
        ] {
            assert_eq!(Ok(status), status.as_str().parse());
        }
        assert!("paid ".parse::<DebtStatus>().is_err());
    }
}
