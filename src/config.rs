//! Runtime settings, read from the environment (and from a `.env` file, if present).
//!
//! The bot token itself is read by teloxide from `TELOXIDE_TOKEN`.

use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context};

use crate::{lifecycle::LifecycleTimings, types::BotFilter};

const DEFAULT_DATABASE_PATH: &str = "ledger.db";
const DEFAULT_DELETE_AFTER_SECS: u64 = 300;
const DEFAULT_REMINDER_AFTER_SECS: u64 = 240;
const DEFAULT_REMINDER_CHECK_SECS: u64 = 60;
const DEFAULT_CURRENCY: &str = "RUB";

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_path: String,
    pub timings: LifecycleTimings,
    pub bot_filter: BotFilter,
    pub currency: String,
    /// How often the daily reminder loop looks at the clock.
    pub reminder_check_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            timings: LifecycleTimings::default(),
            bot_filter: BotFilter::NameHeuristic,
            currency: DEFAULT_CURRENCY.to_string(),
            reminder_check_interval: Duration::from_secs(DEFAULT_REMINDER_CHECK_SECS),
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let delete_after = parse_or(&lookup, "LEDGER_DELETE_AFTER_SECS", DEFAULT_DELETE_AFTER_SECS)?;
        let reminder_after = parse_or(
            &lookup,
            "LEDGER_REMINDER_AFTER_SECS",
            DEFAULT_REMINDER_AFTER_SECS,
        )?;
        if reminder_after >= delete_after {
            bail!(
                "LEDGER_REMINDER_AFTER_SECS ({reminder_after}) must be smaller than \
                 LEDGER_DELETE_AFTER_SECS ({delete_after})"
            );
        }

        let bot_filter = match lookup("LEDGER_BOT_FILTER") {
            Some(value) => value
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("invalid LEDGER_BOT_FILTER")?,
            None => BotFilter::NameHeuristic,
        };

        let check_secs = parse_or(
            &lookup,
            "LEDGER_REMINDER_CHECK_SECS",
            DEFAULT_REMINDER_CHECK_SECS,
        )?;
        if check_secs == 0 {
            bail!("LEDGER_REMINDER_CHECK_SECS must be positive");
        }

        Ok(Settings {
            database_path: lookup("LEDGER_DB_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            timings: LifecycleTimings {
                delete_after: Duration::from_secs(delete_after),
                reminder_after: Duration::from_secs(reminder_after),
            },
            bot_filter,
            currency: lookup("LEDGER_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            reminder_check_interval: Duration::from_secs(check_secs),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value `{value}` for {key}")),
        None => Ok(default),
    }
}
