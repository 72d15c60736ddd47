use std::{env, sync::Arc};

use anyhow::Context;
use log::{info, warn};
use teloxide::{prelude::*, utils::command::BotCommands};
use tokio::time::{interval, Duration};

mod app;
mod bot_commands;
mod config;
mod database;
mod dialogue;
mod endpoints;
mod error;
mod formatter;
mod ledger;
mod lifecycle;
mod messenger;
mod parser;
mod pending;
mod reminder;
mod report;
mod telegram;
mod types;

use crate::{
    app::App,
    bot_commands::{handler, Command},
    config::Settings,
    database::sqlite::SqliteDatabase,
    telegram::TelegramMessenger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_log();

    spawn_background_health_log();

    let settings = Settings::from_env().context("Invalid configuration")?;

    info!("Initializing database at {}...", settings.database_path);
    let database =
        SqliteDatabase::open(&settings.database_path).context("Cannot initialize database")?;

    info!("Starting bot...");
    let bot = Bot::from_env();
    let me = bot.get_me().await.context("Cannot get the bot identity")?;
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Cannot register the command list: {e}");
    }
    let messenger = TelegramMessenger::new(bot.clone(), me.id);

    let app = App::new(database, Arc::new(messenger), settings);
    reminder::spawn_daily_reminder(app.clone());

    Dispatcher::builder(bot, handler())
        .dependencies(dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

/// WORKAROUND: This is an attempt at preventing the OS from killing the bot
/// after a while when it is inactive for too long.
fn spawn_background_health_log() {
    tokio::spawn(async {
        let mut interval = interval(Duration::from_secs(3 * 60 * 60));

        loop {
            interval.tick().await;
            info!("Bot is healthy");
        }
    });
}

/// `RUST_LOG` filters, `info` when unset.
fn init_log() {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    match env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) => builder.filter_level(log::LevelFilter::Info),
    };
    builder.init();
}
