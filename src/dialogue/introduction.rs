//! New members are asked their name, so that the ledger shows real names
//! instead of handles.

use crate::{
    app::{App, ChatContext},
    database::Database,
    error::EngineError,
    formatter::success,
    messenger::{Messenger, OutgoingMessage},
};

use super::{start, Event, Flow, Outcome};

#[derive(Clone, Debug, PartialEq)]
pub enum IntroductionStep {
    EnteringFirstName,
    EnteringLastName { first_name: String },
}

/// `ctx.user` is the member who just joined.
pub async fn start_introduction<D: Database, M: Messenger>(app: &App<D, M>, ctx: &ChatContext) {
    let mention = match &ctx.user.username {
        Some(username) => format!("@{username}"),
        None => ctx.user.display_name(),
    };
    start(
        app,
        ctx,
        Flow::Introduction(IntroductionStep::EnteringFirstName),
        OutgoingMessage::new(
            ctx.chat_id,
            format!("👋 Welcome, {mention}! What is your first name?"),
        ),
        None,
    )
    .await;
}

pub(super) async fn on_introduction<D: Database, M: Messenger>(
    app: &App<D, M>,
    ctx: &ChatContext,
    step: IntroductionStep,
    event: Event<'_>,
) -> Result<Outcome, EngineError> {
    let name = match event {
        Event::Text(text) if !text.trim().is_empty() => text.trim().to_string(),
        Event::Text(_) => {
            return Ok(Outcome::Retry(
                Flow::Introduction(step),
                "The name cannot be empty.".to_string(),
            ))
        }
        _ => return Ok(Outcome::Ignored(Flow::Introduction(step))),
    };

    let outcome = match step {
        IntroductionStep::EnteringFirstName => Outcome::Next(
            Flow::Introduction(IntroductionStep::EnteringLastName { first_name: name }),
            OutgoingMessage::new(ctx.chat_id, "And your last name?"),
        ),
        IntroductionStep::EnteringLastName { first_name } => {
            app.database
                .lock()
                .await
                .set_user_names(ctx.user.id, &first_name, &name)?;
            Outcome::Done(Some(OutgoingMessage::new(
                ctx.chat_id,
                success(format!("Nice to meet you, {first_name} {name}!")),
            )))
        }
    };
    Ok(outcome)
}
