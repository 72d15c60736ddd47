//! Daily reminder of the outstanding debts, sent to every group that has rules
//! at the notification time of the group (local clock).

use std::collections::HashMap;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use log::{error, info, warn};
use tokio::time::interval;

use crate::{
    app::App,
    database::Database,
    error::EngineError,
    formatter::format_balances,
    ledger,
    messenger::{Messenger, OutgoingMessage},
};

/// How late a reminder can still go out, if the loop missed the exact minute.
const GRACE_MINUTES: i64 = 10;

/// The day whose reminder for `time` must be sent at `now`, if any. A reminder
/// late in the evening can still go out just after midnight, for the previous day.
pub fn due_date(
    time: NaiveTime,
    now: NaiveDateTime,
    last_sent: Option<NaiveDate>,
) -> Option<NaiveDate> {
    let today = now.date();
    [today.pred_opt(), Some(today)]
        .into_iter()
        .flatten()
        .filter(|day| last_sent != Some(*day))
        .find(|day| {
            let late = now.signed_duration_since(day.and_time(time));
            late >= Duration::zero() && late < Duration::minutes(GRACE_MINUTES)
        })
}

/// Send the reminders that are due and record them in `sent`. Returns how many went out.
pub async fn send_due_reminders<D: Database, M: Messenger>(
    app: &App<D, M>,
    now: NaiveDateTime,
    sent: &mut HashMap<i64, NaiveDate>,
) -> Result<usize, EngineError> {
    let all_rules = app.database.lock().await.get_all_rules()?;

    let mut count = 0;
    for rules in all_rules {
        let group_id = rules.group_id;
        let Some(day) = due_date(rules.notification_time, now, sent.get(&group_id).copied())
        else {
            continue;
        };
        sent.insert(group_id, day);

        let balances = match ledger::group_balances(group_id, &app.database).await {
            Ok(balances) => balances,
            Err(e) => {
                error!("Cannot compute the balances of group {group_id}: {e}");
                continue;
            }
        };
        let message = OutgoingMessage::new(group_id, format_balances(&balances, app.currency()));
        match app.messenger().send_message(message).await {
            Ok(_) => {
                info!("Daily reminder sent to group {group_id}");
                count += 1;
            }
            Err(e) => warn!("Cannot send the daily reminder to group {group_id}: {e}"),
        }
    }
    Ok(count)
}

pub fn spawn_daily_reminder<D: Database + Send + 'static, M: Messenger>(app: App<D, M>) {
    tokio::spawn(async move {
        let mut interval = interval(app.settings.reminder_check_interval);
        let mut sent = HashMap::new();

        loop {
            interval.tick().await;
            let now = Local::now().naive_local();
            if let Err(e) = send_due_reminders(&app, now, &mut sent).await {
                error!("Cannot send the daily reminders: {e}");
            }
        }
    });
}
