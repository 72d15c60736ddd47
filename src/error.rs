use teloxide::RequestError;
use thiserror::Error;

use crate::{formatter::ERROR_MARKER, types::TransferStatus};

#[derive(Error)]
#[error("An error occurred: {user_message}")]
pub struct BotError {
    message: String,
    user_message: String,
}

#[derive(Error, Debug, PartialEq)]
pub enum InputError {
    #[error("invalid amount `{0}`: enter a number, for example 150 or 99,50")]
    InvalidAmount(String),

    #[error("the amount must be a positive number")]
    NonPositiveAmount,

    #[error("the description cannot be empty")]
    EmptyDescription,

    #[error("invalid deadline `{0}`: expected a positive whole number of hours")]
    InvalidDeadline(String),

    #[error("invalid time `{0}`: expected HH:MM, for example 20:00")]
    InvalidNotificationTime(String),

    #[error("invalid syntax; example of valid syntax: {0}")]
    InvalidCommandSyntax(&'static str),

    #[error("unsupported button `{0}`")]
    InvalidCallbackData(String),

    #[error("you cannot send money to yourself")]
    SelfTransfer,
}

impl InputError {
    pub fn invalid_amount(amount: &str) -> Self {
        InputError::InvalidAmount(amount.to_string())
    }

    pub fn non_positive_amount() -> Self {
        InputError::NonPositiveAmount
    }

    pub fn empty_description() -> Self {
        InputError::EmptyDescription
    }

    pub fn invalid_deadline(deadline: &str) -> Self {
        InputError::InvalidDeadline(deadline.to_string())
    }

    pub fn invalid_notification_time(time: &str) -> Self {
        InputError::InvalidNotificationTime(time.to_string())
    }

    pub fn invalid_command_syntax(example: &'static str) -> Self {
        InputError::InvalidCommandSyntax(example)
    }

    pub fn invalid_callback_data(data: &str) -> Self {
        InputError::InvalidCallbackData(data.to_string())
    }
}

#[derive(Error, Debug)]
#[error("{message}: {cause}")]
pub struct DatabaseError {
    message: String,
    cause: anyhow::Error,
}

impl DatabaseError {
    pub fn new<T: AsRef<str>>(message: T, cause: anyhow::Error) -> Self {
        DatabaseError {
            message: message.as_ref().to_string(),
            cause,
        }
    }

    /// The data changed between two statements of the same logical operation.
    pub fn concurrency(message: &str) -> Self {
        DatabaseError::new(
            "concurrent modification detected",
            anyhow::anyhow!(message.to_string()),
        )
    }
}

/// Failure of a ledger operation. Expected failures (validation, missing
/// entities, permissions) and storage faults share the same shape so that
/// callers can always render a message for the user.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] InputError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("only group administrators can {0}")]
    Permission(&'static str),

    #[error("transfer #{0} was already {1}")]
    AlreadySettled(i64, TransferStatus),

    #[error("storage failure: {0}")]
    Storage(#[from] DatabaseError),
}

impl EngineError {
    pub fn not_found<T: AsRef<str>>(what: T) -> Self {
        EngineError::NotFound(what.as_ref().to_string())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    /// The message shown in the chat. Storage details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Storage(_) => {
                format!("{ERROR_MARKER} Cannot access the ledger, please try again later.")
            }
            other => format!("{ERROR_MARKER} {}", capitalize(&other.to_string())),
        }
    }
}

/// A call to the messaging platform failed. These are logged and never shown to users.
#[derive(Error, Debug)]
pub enum MessengerError {
    #[error("request to Telegram failed: {0}")]
    Telegram(#[from] RequestError),

    #[error("{0}")]
    Rejected(String),
}

impl BotError {
    pub fn engine(message: &str, e: &EngineError) -> Self {
        let message = format!("{message}: {e}");
        BotError {
            message,
            user_message: e.user_message(),
        }
    }
}

impl std::fmt::Debug for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_has_error_marker() {
        let e = EngineError::from(InputError::non_positive_amount());
        assert_eq!("❌ The amount must be a positive number", e.user_message());

        let e = EngineError::not_found("expense #3");
        assert_eq!("❌ Expense #3 not found", e.user_message());

        let e = EngineError::from(DatabaseError::new(
            "cannot save expense",
            anyhow::anyhow!("disk I/O error"),
        ));
        assert!(e.user_message().starts_with(ERROR_MARKER));
        assert!(!e.user_message().contains("disk"));
    }
}
