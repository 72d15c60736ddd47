//! Registry of the long-running operation each user has open.
//!
//! A user can have at most one open operation: registering a new one replaces
//! the previous entry. The lifecycle manager reads the registry to decide
//! whether a prompt deserves a reminder or an abort notice.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    AddExpense,
    SendMoney,
    ConfigureRules,
    Introduction,
    EditExpense,
    AdminMenu,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::AddExpense => "expense_add",
            OperationType::SendMoney => "send_money",
            OperationType::ConfigureRules => "configure_rules",
            OperationType::Introduction => "user_intro",
            OperationType::EditExpense => "expense_edit",
            OperationType::AdminMenu => "admin_menu",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingOperation {
    pub operation_type: OperationType,
    pub chat_id: i64,
    pub message_id: i32,
    pub start_time: DateTime<Utc>,
    pub completed: bool,
    pub payload: Option<String>,
}

#[derive(Clone, Default)]
pub struct PendingOperations {
    inner: Arc<Mutex<HashMap<i64, PendingOperation>>>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        user_id: i64,
        operation_type: OperationType,
        chat_id: i64,
        message_id: i32,
        payload: Option<String>,
    ) {
        let operation = PendingOperation {
            operation_type,
            chat_id,
            message_id,
            start_time: Utc::now(),
            completed: false,
            payload,
        };
        let previous = self.inner.lock().await.insert(user_id, operation);
        if let Some(previous) = previous.filter(|p| !p.completed) {
            debug!(
                "Operation {} of user {user_id} replaced before completion",
                previous.operation_type
            );
        }
        info!("Registered operation {operation_type} for user {user_id}");
    }

    /// Mark the operation of the user as completed. No-op if there is none.
    pub async fn complete(&self, user_id: i64) {
        if let Some(operation) = self.inner.lock().await.get_mut(&user_id) {
            operation.completed = true;
            info!(
                "Operation {} of user {user_id} completed",
                operation.operation_type
            );
        }
    }

    /// Whether the user still has an uncompleted operation of the given type.
    pub async fn is_open(&self, user_id: i64, operation_type: OperationType) -> bool {
        self.inner
            .lock()
            .await
            .get(&user_id)
            .map(|op| op.operation_type == operation_type && !op.completed)
            .unwrap_or(false)
    }

    pub async fn remove(&self, user_id: i64) -> Option<PendingOperation> {
        self.inner.lock().await.remove(&user_id)
    }

    pub async fn get(&self, user_id: i64) -> Option<PendingOperation> {
        self.inner.lock().await.get(&user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_overwrites() {
        let pending = PendingOperations::new();
        pending
            .register(1, OperationType::AddExpense, -10, 5, None)
            .await;
        pending
            .register(1, OperationType::SendMoney, -10, 6, Some("anna".to_string()))
            .await;

        let operation = pending.get(1).await.unwrap();
        assert_eq!(OperationType::SendMoney, operation.operation_type);
        assert_eq!(6, operation.message_id);
        assert_eq!(Some("anna".to_string()), operation.payload);
        assert!(!pending.is_open(1, OperationType::AddExpense).await);
        assert!(pending.is_open(1, OperationType::SendMoney).await);
    }

    #[tokio::test]
    async fn test_complete() {
        let pending = PendingOperations::new();
        pending.complete(1).await;
        assert!(pending.get(1).await.is_none());

        pending
            .register(1, OperationType::SendMoney, -10, 5, None)
            .await;
        pending.complete(1).await;

        let operation = pending.get(1).await.unwrap();
        assert!(operation.completed);
        assert!(!pending.is_open(1, OperationType::SendMoney).await);
    }

    #[tokio::test]
    async fn test_remove() {
        let pending = PendingOperations::new();
        pending
            .register(1, OperationType::ConfigureRules, -10, 5, None)
            .await;
        assert!(pending.remove(1).await.is_some());
        assert!(!pending.is_open(1, OperationType::ConfigureRules).await);
        assert!(pending.remove(1).await.is_none());
    }
}
