//! Parse the user input: typed amounts, times and command arguments, plus
//! the data attached to inline keyboard buttons.
//!
//! Typed input is parsed with nom; every parser consumes the whole (trimmed) input.

use chrono::NaiveTime;
use nom::{
    bytes::complete::{take_while1, take_while_m_n},
    character::complete::{char, digit1, one_of, space1},
    combinator::{all_consuming, map_res, opt, recognize, rest, verify},
    sequence::{pair, preceded, separated_pair, tuple},
    IResult,
};

use crate::{
    error::InputError,
    types::{Amount, Decision},
};

const SEND_SYNTAX: &str = "/send @username 500";
const EXPENSE_SYNTAX: &str = "/addexpense 1500 Dinner";

/// A number with an optional sign and an optional fractional part, which can be
/// separated by either a dot or a comma.
fn amount_token(s: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(one_of(".,"), digit1)),
    )))(s)
}

fn to_amount(token: &str) -> Result<Amount, InputError> {
    let amount: Amount = token
        .replace(',', ".")
        .parse()
        .map_err(|_| InputError::invalid_amount(token))?;
    if amount > 0.0 && amount.is_finite() {
        Ok(amount)
    } else {
        Err(InputError::non_positive_amount())
    }
}

/// Parse a positive amount such as `150`, `99.5` or `99,50`.
pub fn parse_amount(input: &str) -> Result<Amount, InputError> {
    let input = input.trim();
    let (_, token) =
        all_consuming(amount_token)(input).map_err(|_| InputError::invalid_amount(input))?;
    to_amount(token)
}

/// Parse a positive number of hours.
pub fn parse_deadline_hours(input: &str) -> Result<u32, InputError> {
    let input = input.trim();
    let result: IResult<&str, u32> = all_consuming(verify(
        map_res(digit1, |d: &str| d.parse::<u32>()),
        |hours: &u32| *hours > 0,
    ))(input);

    result
        .map(|(_, hours)| hours)
        .map_err(|_| InputError::invalid_deadline(input))
}

/// Parse a time of day as `H:MM` or `HH:MM` (hours 0-23, minutes 00-59).
pub fn parse_notification_time(input: &str) -> Result<NaiveTime, InputError> {
    let input = input.trim();

    fn two_digits_or_one(s: &str) -> IResult<&str, u32> {
        map_res(take_while_m_n(1, 2, |c: char| c.is_ascii_digit()), |d: &str| {
            d.parse::<u32>()
        })(s)
    }

    fn exactly_two_digits(s: &str) -> IResult<&str, u32> {
        map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), |d: &str| {
            d.parse::<u32>()
        })(s)
    }

    let result: IResult<&str, (u32, u32)> = all_consuming(separated_pair(
        verify(two_digits_or_one, |h: &u32| *h <= 23),
        char(':'),
        verify(exactly_two_digits, |m: &u32| *m <= 59),
    ))(input);

    result
        .ok()
        .and_then(|(_, (hour, minute))| NaiveTime::from_hms_opt(hour, minute, 0))
        .ok_or_else(|| InputError::invalid_notification_time(input))
}

fn handle(s: &str) -> IResult<&str, &str> {
    preceded(
        opt(char('@')),
        take_while1(|c: char| c.is_alphanumeric() || c == '_'),
    )(s)
}

/// Strip the optional `@` in front of a typed handle.
pub fn parse_handle(input: &str) -> Option<String> {
    all_consuming(handle)(input.trim())
        .ok()
        .map(|(_, h)| h.to_string())
}

/// Parse the arguments of `/send`, e.g. `@username 500`.
pub fn parse_send_args(input: &str) -> Result<(String, Amount), InputError> {
    let result: IResult<&str, (&str, &str)> =
        all_consuming(separated_pair(handle, space1, amount_token))(input.trim());
    let (_, (handle, amount)) =
        result.map_err(|_| InputError::invalid_command_syntax(SEND_SYNTAX))?;
    Ok((handle.to_string(), to_amount(amount)?))
}

/// Parse the arguments of `/addexpense`, e.g. `1500 Dinner at Luigi's`.
pub fn parse_expense_args(input: &str) -> Result<(Amount, String), InputError> {
    let result: IResult<&str, (&str, &str)> =
        separated_pair(amount_token, space1, rest)(input.trim());
    let (_, (amount, description)) =
        result.map_err(|_| InputError::invalid_command_syntax(EXPENSE_SYNTAX))?;
    let description = description.trim();
    if description.is_empty() {
        return Err(InputError::empty_description());
    }
    Ok((to_amount(amount)?, description.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitMode {
    AllMembers,
    Selective,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shortcut {
    AddExpense,
    MyDebt,
    Report,
    Send,
    Rules,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminAction {
    EditExpenses,
    DeleteExpenses,
    DeleteTransfers,
    Reset,
    Close,
}

/// What an inline keyboard button does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Split(SplitMode),
    ToggleParticipant(i64),
    SelectAllParticipants,
    ParticipantsDone,
    Receipt(bool),
    Recipient(i64),
    SendConfirm,
    SendCancel,
    SettleTransfer(i64, Decision),
    Reset(bool),
    Shortcut(Shortcut),
    Admin(AdminAction),
    EditExpense(i64),
    DeleteExpense(i64),
    ConfirmDeleteExpense(i64),
    DeleteTransfer(i64),
    ConfirmDeleteTransfer(i64),
}

impl CallbackAction {
    /// The button payload. Telegram limits it to 64 bytes, which all variants respect.
    pub fn data(&self) -> String {
        match self {
            CallbackAction::Split(SplitMode::AllMembers) => "split:all".to_string(),
            CallbackAction::Split(SplitMode::Selective) => "split:selective".to_string(),
            CallbackAction::ToggleParticipant(id) => format!("participant:{id}"),
            CallbackAction::SelectAllParticipants => "participants:all".to_string(),
            CallbackAction::ParticipantsDone => "participants:done".to_string(),
            CallbackAction::Receipt(true) => "receipt:yes".to_string(),
            CallbackAction::Receipt(false) => "receipt:no".to_string(),
            CallbackAction::Recipient(id) => format!("recipient:{id}"),
            CallbackAction::SendConfirm => "send:confirm".to_string(),
            CallbackAction::SendCancel => "send:cancel".to_string(),
            CallbackAction::SettleTransfer(id, Decision::Confirm) => {
                format!("transfer:confirm:{id}")
            }
            CallbackAction::SettleTransfer(id, Decision::Reject) => format!("transfer:reject:{id}"),
            CallbackAction::Reset(true) => "reset:confirm".to_string(),
            CallbackAction::Reset(false) => "reset:cancel".to_string(),
            CallbackAction::Shortcut(shortcut) => format!(
                "menu:{}",
                match shortcut {
                    Shortcut::AddExpense => "addexpense",
                    Shortcut::MyDebt => "mydebt",
                    Shortcut::Report => "report",
                    Shortcut::Send => "send",
                    Shortcut::Rules => "rules",
                }
            ),
            CallbackAction::Admin(action) => format!(
                "admin:{}",
                match action {
                    AdminAction::EditExpenses => "edit",
                    AdminAction::DeleteExpenses => "delete",
                    AdminAction::DeleteTransfers => "transfers",
                    AdminAction::Reset => "reset",
                    AdminAction::Close => "close",
                }
            ),
            CallbackAction::EditExpense(id) => format!("expense:edit:{id}"),
            CallbackAction::DeleteExpense(id) => format!("expense:delete:{id}"),
            CallbackAction::ConfirmDeleteExpense(id) => format!("expense:delete-confirm:{id}"),
            CallbackAction::DeleteTransfer(id) => format!("transfer:delete:{id}"),
            CallbackAction::ConfirmDeleteTransfer(id) => format!("transfer:delete-confirm:{id}"),
        }
    }
}

pub fn parse_callback(data: &str) -> Result<CallbackAction, InputError> {
    let parts: Vec<&str> = data.split(':').collect();
    let action = match parts.as_slice() {
        ["split", "all"] => CallbackAction::Split(SplitMode::AllMembers),
        ["split", "selective"] => CallbackAction::Split(SplitMode::Selective),
        ["participant", user_id] => CallbackAction::ToggleParticipant(parse_id(data, user_id)?),
        ["participants", "all"] => CallbackAction::SelectAllParticipants,
        ["participants", "done"] => CallbackAction::ParticipantsDone,
        ["receipt", "yes"] => CallbackAction::Receipt(true),
        ["receipt", "no"] => CallbackAction::Receipt(false),
        ["recipient", user_id] => CallbackAction::Recipient(parse_id(data, user_id)?),
        ["send", "confirm"] => CallbackAction::SendConfirm,
        ["send", "cancel"] => CallbackAction::SendCancel,
        ["transfer", "confirm", t] => CallbackAction::SettleTransfer(parse_id(data, t)?, Decision::Confirm),
        ["transfer", "reject", t] => CallbackAction::SettleTransfer(parse_id(data, t)?, Decision::Reject),
        ["transfer", "delete", t] => CallbackAction::DeleteTransfer(parse_id(data, t)?),
        ["transfer", "delete-confirm", t] => CallbackAction::ConfirmDeleteTransfer(parse_id(data, t)?),
        ["reset", "confirm"] => CallbackAction::Reset(true),
        ["reset", "cancel"] => CallbackAction::Reset(false),
        ["menu", "addexpense"] => CallbackAction::Shortcut(Shortcut::AddExpense),
        ["menu", "mydebt"] => CallbackAction::Shortcut(Shortcut::MyDebt),
        ["menu", "report"] => CallbackAction::Shortcut(Shortcut::Report),
        ["menu", "send"] => CallbackAction::Shortcut(Shortcut::Send),
        ["menu", "rules"] => CallbackAction::Shortcut(Shortcut::Rules),
        ["admin", "edit"] => CallbackAction::Admin(AdminAction::EditExpenses),
        ["admin", "delete"] => CallbackAction::Admin(AdminAction::DeleteExpenses),
        ["admin", "transfers"] => CallbackAction::Admin(AdminAction::DeleteTransfers),
        ["admin", "reset"] => CallbackAction::Admin(AdminAction::Reset),
        ["admin", "close"] => CallbackAction::Admin(AdminAction::Close),
        ["expense", "edit", e] => CallbackAction::EditExpense(parse_id(data, e)?),
        ["expense", "delete", e] => CallbackAction::DeleteExpense(parse_id(data, e)?),
        ["expense", "delete-confirm", e] => CallbackAction::ConfirmDeleteExpense(parse_id(data, e)?),
        _ => return Err(InputError::invalid_callback_data(data)),
    };
    Ok(action)
}

fn parse_id(data: &str, id: &str) -> Result<i64, InputError> {
    id.parse()
        .map_err(|_| InputError::invalid_callback_data(data))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_abs_diff_eq!(150.0, parse_amount("150").unwrap());
        assert_abs_diff_eq!(99.5, parse_amount(" 99,50 ").unwrap());
        assert_abs_diff_eq!(0.25, parse_amount("0.25").unwrap());

        assert_eq!(Err(InputError::non_positive_amount()), parse_amount("0"));
        assert_eq!(Err(InputError::non_positive_amount()), parse_amount("-12"));
        assert_eq!(Err(InputError::invalid_amount("12abc")), parse_amount("12abc"));
        assert_eq!(Err(InputError::invalid_amount("")), parse_amount(""));
        assert!(parse_amount("1.2.3").is_err());
    }

    #[test]
    fn test_parse_deadline_hours() {
        assert_eq!(Ok(24), parse_deadline_hours("24"));
        assert!(parse_deadline_hours("0").is_err());
        assert!(parse_deadline_hours("-4").is_err());
        assert!(parse_deadline_hours("two").is_err());
        assert!(parse_deadline_hours("1.5").is_err());
    }

    #[test]
    fn test_parse_notification_time() {
        let time = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert_eq!(Ok(time(20, 0)), parse_notification_time("20:00"));
        assert_eq!(Ok(time(9, 5)), parse_notification_time("9:05"));
        assert_eq!(Ok(time(0, 59)), parse_notification_time("00:59"));
        assert_eq!(Ok(time(23, 30)), parse_notification_time("23:30"));

        assert!(parse_notification_time("24:00").is_err());
        assert!(parse_notification_time("12:60").is_err());
        assert!(parse_notification_time("12:5").is_err());
        assert!(parse_notification_time("123:00").is_err());
        assert!(parse_notification_time("noon").is_err());
    }

    #[test]
    fn test_parse_send_args() {
        let (handle, amount) = parse_send_args("@anna 500").unwrap();
        assert_eq!("anna", handle);
        assert_abs_diff_eq!(500.0, amount);

        let (handle, amount) = parse_send_args("bob_99  12,5").unwrap();
        assert_eq!("bob_99", handle);
        assert_abs_diff_eq!(12.5, amount);

        assert_eq!(
            Err(InputError::invalid_command_syntax(SEND_SYNTAX)),
            parse_send_args("@anna")
        );
        assert_eq!(
            Err(InputError::non_positive_amount()),
            parse_send_args("@anna 0")
        );
    }

    #[test]
    fn test_parse_expense_args() {
        let (amount, description) = parse_expense_args("1500 Dinner at Luigi's").unwrap();
        assert_abs_diff_eq!(1500.0, amount);
        assert_eq!("Dinner at Luigi's", description);

        assert!(parse_expense_args("Dinner 1500").is_err());
        assert!(parse_expense_args("1500").is_err());
    }

    #[test]
    fn test_parse_handle() {
        assert_eq!(Some("anna".to_string()), parse_handle("@anna"));
        assert_eq!(Some("Anna_K".to_string()), parse_handle(" Anna_K "));
        assert_eq!(None, parse_handle("@"));
        assert_eq!(None, parse_handle("two words"));
    }

    #[test]
    fn test_callback_data_is_understood() {
        let actions = [
            CallbackAction::Split(SplitMode::Selective),
            CallbackAction::ToggleParticipant(-42),
            CallbackAction::SettleTransfer(7, Decision::Reject),
            CallbackAction::Shortcut(Shortcut::MyDebt),
            CallbackAction::Admin(AdminAction::DeleteTransfers),
            CallbackAction::ConfirmDeleteExpense(12),
        ];
        for action in actions {
            assert!(action.data().len() <= 64);
            assert_eq!(Ok(action), parse_callback(&action.data()));
        }

        assert_eq!(
            Err(InputError::invalid_callback_data("participant:abc")),
            parse_callback("participant:abc")
        );
        assert!(parse_callback("unknown").is_err());
    }
}
