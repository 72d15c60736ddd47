//! Produce the strings that are sent as bot messages.
//! Messages marked as markdown use Telegram MarkdownV2, so every piece of
//! user-provided text must go through `escape`.

use teloxide::utils::markdown::{bold, escape};

use crate::types::{Amount, DebtDetail, Expense, GroupRules, Transfer, User};

pub const ERROR_MARKER: &str = "❌";
pub const SUCCESS_MARKER: &str = "✅";
pub const WARNING_MARKER: &str = "⚠️";

pub fn format_amount(amount: Amount, currency: &str) -> String {
    format!("{amount:.2} {currency}")
}

pub fn success<T: AsRef<str>>(text: T) -> String {
    format!("{SUCCESS_MARKER} {}", text.as_ref())
}

pub fn warning<T: AsRef<str>>(text: T) -> String {
    format!("{WARNING_MARKER} {}", text.as_ref())
}

/// Total and per-expense breakdown of a user's unpaid debts (markdown).
pub fn format_debt_message(total: Amount, details: &[DebtDetail], currency: &str) -> String {
    if total <= 0.0 && details.is_empty() {
        return escape("You have no debts in this group! 🎉");
    }

    let mut message = format!(
        "💰 {} {}\n",
        bold("Your total debt:"),
        escape(&format_amount(total, currency))
    );

    if !details.is_empty() {
        message.push('\n');
        message.push_str(&bold("Details:"));
        message.push('\n');
        for debt in details {
            message.push_str(&escape(&format!(
                "- {}: {} ({})\n",
                debt.description,
                format_amount(debt.amount, currency),
                debt.created_at.format("%d.%m.%Y")
            )));
        }
    }

    message
}

/// Pending incoming transfers appended to the debt message (markdown).
pub fn format_pending_transfers(transfers: &[(Transfer, String)], currency: &str) -> String {
    let mut message = format!("\n{}\n", bold("Transfers waiting for your confirmation:"));
    for (transfer, sender) in transfers {
        message.push_str(&escape(&format!(
            "- {} from {}\n",
            format_amount(transfer.amount, currency),
            sender
        )));
    }
    message
}

/// Group rules (markdown).
pub fn format_rules(rules: &GroupRules) -> String {
    format!(
        "{}\n\n• {} {}\n• {} {}\n• {} {}",
        bold("GROUP RULES"),
        bold("Description:"),
        escape(&rules.description),
        bold("Repayment deadline:"),
        escape(&format!("{} hours", rules.deadline_hours)),
        bold("Daily reminder at:"),
        escape(&rules.notification_time.format("%H:%M").to_string()),
    )
}

pub fn format_expense_line(expense: &Expense, currency: &str) -> String {
    format!(
        "#{} {} - {} ({})",
        expense.id,
        expense.description,
        format_amount(expense.amount, currency),
        expense.created_at.format("%d.%m.%Y")
    )
}

pub fn format_transfer_line(transfer: &Transfer, sender: &str, receiver: &str, currency: &str) -> String {
    format!(
        "#{} {} → {}: {} [{}]",
        transfer.id,
        sender,
        receiver,
        format_amount(transfer.amount, currency),
        transfer.status
    )
}

/// Toggle marks shown on the participant picker buttons.
pub fn format_participant_button(user: &User, selected: bool) -> String {
    let mark = if selected { "✅" } else { "⬜" };
    format!("{mark} {}", user.display_name())
}

/// Members with outstanding debts, used by the daily reminder.
pub fn format_balances(balances: &[(User, Amount)], currency: &str) -> String {
    if balances.is_empty() {
        return "Nobody owes anything today! 🎉".to_string();
    }

    let mut message = "🔔 Daily reminder, outstanding debts:\n".to_string();
    for (user, amount) in balances {
        message.push_str(&format!(
            "- {}: {}\n",
            user.display_name(),
            format_amount(*amount, currency)
        ));
    }
    message.push_str("\nUse /mydebt to see the details and /send to settle.");
    message
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, TimeZone, Utc};

    use super::*;

    #[test]
    fn test_format_debt_message() {
        let details = vec![DebtDetail {
            expense_id: 1,
            description: "Pizza".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
            amount: 45.0,
        }];

        let result = format_debt_message(45.0, &details, "RUB");

        assert_eq!(
            "💰 *Your total debt:* 45\\.00 RUB\n\n*Details:*\n\\- Pizza: 45\\.00 RUB \\(05\\.03\\.2024\\)\n",
            result
        );
    }

    #[test]
    fn test_format_no_debts() {
        assert_eq!(
            "You have no debts in this group\\! 🎉",
            format_debt_message(0.0, &[], "RUB")
        );
    }

    #[test]
    fn test_format_rules() {
        let rules = GroupRules {
            group_id: -1,
            description: "Split evenly".to_string(),
            deadline_hours: 24,
            notification_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        };

        let result = format_rules(&rules);

        assert!(result.starts_with("*GROUP RULES*"));
        assert!(result.contains("24 hours"));
        assert!(result.contains("20:00"));
    }
}
