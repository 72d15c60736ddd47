use log::info;

use crate::{
    app::{App, ChatContext},
    database::Database,
    endpoints,
    error::{EngineError, InputError},
    formatter::{success, warning},
    messenger::{Messenger, OutgoingMessage},
    parser::{parse_deadline_hours, parse_notification_time},
    types::GroupRules,
};

use super::{start, Event, Flow, Outcome};

#[derive(Clone, Debug, PartialEq)]
pub enum RulesStep {
    EnteringDescription,
    EnteringDeadline {
        description: String,
    },
    EnteringNotificationTime {
        description: String,
        deadline_hours: u32,
    },
}

pub async fn start_configure_rules<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
) -> Result<(), EngineError> {
    app.require_admin(ctx, "configure the group rules").await?;
    start(
        app,
        ctx,
        Flow::ConfigureRules(RulesStep::EnteringDescription),
        OutgoingMessage::new(
            ctx.chat_id,
            "📋 Describe the rules of the group: how expenses are shared and what members should do.",
        ),
        None,
    )
    .await;
    Ok(())
}

pub(super) async fn on_configure_rules<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    step: RulesStep,
    event: Event<'_>,
) -> Result<Outcome, EngineError> {
    use RulesStep::*;

    let text = match event {
        Event::Text(text) => text,
        _ => return Ok(Outcome::Ignored(Flow::ConfigureRules(step))),
    };

    let outcome = match step {
        EnteringDescription => {
            let description = text.trim();
            if description.is_empty() {
                retry(EnteringDescription, InputError::empty_description())
            } else {
                Outcome::Next(
                    Flow::ConfigureRules(EnteringDeadline {
                        description: description.to_string(),
                    }),
                    OutgoingMessage::new(
                        ctx.chat_id,
                        "⏳ Within how many hours must debts be repaid? For example 24.",
                    ),
                )
            }
        }

        EnteringDeadline { description } => match parse_deadline_hours(text) {
            Ok(deadline_hours) => Outcome::Next(
                Flow::ConfigureRules(EnteringNotificationTime {
                    description,
                    deadline_hours,
                }),
                OutgoingMessage::new(
                    ctx.chat_id,
                    "🔔 At what time should I send the daily reminder? Use HH:MM, for example 20:00.",
                ),
            ),
            Err(e) => retry(EnteringDeadline { description }, e),
        },

        EnteringNotificationTime {
            description,
            deadline_hours,
        } => match parse_notification_time(text) {
            Ok(notification_time) => {
                let rules = GroupRules {
                    group_id: ctx.chat_id,
                    description,
                    deadline_hours,
                    notification_time,
                };
                app.database.lock().await.set_group_rules(&rules)?;
                info!("Rules of group {} updated", ctx.chat_id);

                let text = if endpoints::pin_rules(app, ctx.chat_id, &rules).await {
                    success("Rules saved and pinned.")
                } else {
                    format!(
                        "{}\n{}",
                        success("Rules saved."),
                        warning("I could not pin them: make me an administrator allowed to pin messages.")
                    )
                };
                Outcome::Done(Some(OutgoingMessage::new(ctx.chat_id, text)))
            }
            Err(e) => retry(
                EnteringNotificationTime {
                    description,
                    deadline_hours,
                },
                e,
            ),
        },
    };
    Ok(outcome)
}

fn retry(step: RulesStep, e: InputError) -> Outcome {
    Outcome::Retry(Flow::ConfigureRules(step), EngineError::from(e).user_message())
}
