//! Automatic removal of the bot's interactive messages.
//!
//! Every prompt gets a deletion timer. Prompts that belong to an operation the
//! user has not finished get a reminder first and, if the operation is still
//! open when the timer expires, an abort notice. Messages chained under a
//! parent (reminders, follow-up prompts) are removed together with it.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    formatter::ERROR_MARKER,
    messenger::{Messenger, OutgoingMessage},
    pending::{OperationType, PendingOperations},
    types::MessageKey,
};

const DEFAULT_DELETE_AFTER: Duration = Duration::from_secs(300);
const DEFAULT_REMINDER_AFTER: Duration = Duration::from_secs(240);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleTimings {
    pub delete_after: Duration,
    /// Must be shorter than `delete_after`.
    pub reminder_after: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        LifecycleTimings {
            delete_after: DEFAULT_DELETE_AFTER,
            reminder_after: DEFAULT_REMINDER_AFTER,
        }
    }
}

/// The user and the operation a prompt was sent for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Owner {
    pub user_id: i64,
    pub operation: OperationType,
}

impl Owner {
    pub fn new(user_id: i64, operation: OperationType) -> Owner {
        Owner { user_id, operation }
    }
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    timers: HashMap<MessageKey, (u64, JoinHandle<()>)>,
    chains: HashMap<MessageKey, Vec<MessageKey>>,
}

struct Inner<M> {
    messenger: Arc<M>,
    pending: PendingOperations,
    timings: LifecycleTimings,
    registry: Mutex<Registry>,
}

pub struct MessageLifecycle<M: Messenger> {
    inner: Arc<Inner<M>>,
}

impl<M: Messenger> Clone for MessageLifecycle<M> {
    fn clone(&self) -> Self {
        MessageLifecycle {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Messenger> MessageLifecycle<M> {
    pub fn new(messenger: Arc<M>, pending: PendingOperations, timings: LifecycleTimings) -> Self {
        MessageLifecycle {
            inner: Arc::new(Inner {
                messenger,
                pending,
                timings,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn messenger(&self) -> &Arc<M> {
        &self.inner.messenger
    }

    pub fn pending(&self) -> &PendingOperations {
        &self.inner.pending
    }

    pub fn timings(&self) -> LifecycleTimings {
        self.inner.timings
    }

    // The lock is never held across an await point.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start (or restart) the deletion timer of a message.
    ///
    /// Reminder and abort notice are only sent when there is an owner and
    /// `extend_if_pending` is set.
    pub fn schedule(&self, key: MessageKey, owner: Option<Owner>, extend_if_pending: bool) {
        let owner = owner.filter(|_| extend_if_pending);

        let mut registry = self.registry();
        registry.next_generation += 1;
        let generation = registry.next_generation;

        if let Some((_, previous)) = registry.timers.remove(&key) {
            previous.abort();
            debug!("Deletion timer of {key:?} restarted");
        }

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(key, owner, generation).await });
        registry.timers.insert(key, (generation, handle));
    }

    /// Returns false if the message had no live timer.
    pub fn cancel(&self, key: MessageKey) -> bool {
        match self.registry().timers.remove(&key) {
            Some((_, handle)) => {
                handle.abort();
                debug!("Deletion timer of {key:?} cancelled");
                true
            }
            None => false,
        }
    }

    /// Delete `child` whenever `parent` is deleted.
    pub fn add_child(&self, parent: MessageKey, child: MessageKey) {
        let mut registry = self.registry();
        let children = registry.chains.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    #[cfg(test)]
    pub fn chain_of(&self, key: MessageKey) -> Vec<MessageKey> {
        self.registry()
            .chains
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn active_timers(&self) -> usize {
        self.registry().timers.len()
    }

    /// Send a message and start its deletion timer.
    ///
    /// Prompts with an owner get the reminder treatment. Send failures are
    /// logged and give `None`.
    pub async fn send_ephemeral(
        &self,
        message: OutgoingMessage,
        owner: Option<Owner>,
    ) -> Option<MessageKey> {
        match self.inner.messenger.send_message(message).await {
            Ok(key) => {
                self.schedule(key, owner, owner.is_some());
                Some(key)
            }
            Err(e) => {
                warn!("Cannot send message: {e}");
                None
            }
        }
    }

    /// Like `send_ephemeral`, and the message goes away with `parent`.
    pub async fn send_child(
        &self,
        parent: MessageKey,
        message: OutgoingMessage,
        owner: Option<Owner>,
    ) -> Option<MessageKey> {
        let key = self.send_ephemeral(message, owner).await?;
        self.add_child(parent, key);
        Some(key)
    }

    /// Delete a message and its chain right away.
    pub async fn delete_now(&self, key: MessageKey) {
        self.cancel(key);
        self.delete_chain(key).await;
    }

    async fn run(self, key: MessageKey, owner: Option<Owner>, generation: u64) {
        let timings = self.inner.timings;

        match owner {
            Some(owner) => {
                sleep(timings.reminder_after).await;
                let remaining = timings.delete_after.saturating_sub(timings.reminder_after);

                let reminded = self.is_open(owner).await;
                if reminded {
                    self.send_reminder(key, remaining).await;
                }

                sleep(remaining).await;

                if reminded && self.is_open(owner).await {
                    self.send_abort_notice(key, owner).await;
                }
            }
            None => sleep(timings.delete_after).await,
        }

        self.release(key, generation);
        self.delete_chain(key).await;
    }

    async fn is_open(&self, owner: Owner) -> bool {
        self.inner
            .pending
            .is_open(owner.user_id, owner.operation)
            .await
    }

    async fn send_reminder(&self, key: MessageKey, remaining: Duration) {
        let text = format!(
            "⏰ Reminder: this operation will be cancelled in {} seconds if it is not completed.",
            remaining.as_secs()
        );
        let message = OutgoingMessage::new(key.chat_id, text).reply_to(key.message_id);
        match self.inner.messenger.send_message(message).await {
            Ok(reminder) => {
                self.schedule(reminder, None, false);
                self.add_child(key, reminder);
                debug!("Reminder {reminder:?} sent for {key:?}");
            }
            Err(e) => warn!("Cannot send reminder for {key:?}: {e}"),
        }
    }

    async fn send_abort_notice(&self, key: MessageKey, owner: Owner) {
        let text = format!("{ERROR_MARKER} Operation cancelled due to inactivity.");
        match self
            .inner
            .messenger
            .send_message(OutgoingMessage::new(key.chat_id, text))
            .await
        {
            Ok(notice) => self.schedule(notice, None, false),
            Err(e) => warn!("Cannot send abort notice for {key:?}: {e}"),
        }

        self.inner.pending.remove(owner.user_id).await;
        info!(
            "Operation {} of user {} aborted after inactivity",
            owner.operation, owner.user_id
        );
    }

    /// Forget the timer of `key`, unless it was replaced by a newer one.
    fn release(&self, key: MessageKey, generation: u64) {
        let mut registry = self.registry();
        if matches!(registry.timers.get(&key), Some((g, _)) if *g == generation) {
            registry.timers.remove(&key);
        }
    }

    /// Remove `key` and all its descendants from the chains, stopping their
    /// timers. Descendants come out deepest first.
    fn take_descendants(&self, key: MessageKey) -> Vec<MessageKey> {
        fn visit(
            registry: &mut Registry,
            key: MessageKey,
            visited: &mut HashSet<MessageKey>,
            out: &mut Vec<MessageKey>,
        ) {
            let children = registry.chains.remove(&key).unwrap_or_default();
            for child in children {
                if visited.insert(child) {
                    visit(registry, child, visited, out);
                    out.push(child);
                }
            }
        }

        let mut registry = self.registry();
        let mut visited = HashSet::from([key]);
        let mut descendants = Vec::new();
        visit(&mut registry, key, &mut visited, &mut descendants);

        for child in &descendants {
            if let Some((_, handle)) = registry.timers.remove(child) {
                handle.abort();
            }
        }
        for children in registry.chains.values_mut() {
            children.retain(|c| *c != key);
        }
        registry.chains.retain(|_, children| !children.is_empty());

        descendants
    }

    async fn delete_chain(&self, key: MessageKey) {
        let messenger = &self.inner.messenger;

        for child in self.take_descendants(key) {
            if let Err(e) = messenger.delete_message(child).await {
                warn!("Cannot delete chained message {child:?}: {e}");
            }
        }

        match messenger.delete_message(key).await {
            Ok(()) => debug!("Deleted message {key:?}"),
            Err(e) => warn!("Cannot delete message {key:?}: {e}"),
        }
    }
}
