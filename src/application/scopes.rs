//! Team- and session-scoped data handles
//!
//! A scope handle pairs one resolved identity with the store (and, for
//! teams, the pub/sub fanout) partitioned by it. Handles are constructed
//! per request after identity resolution and threaded explicitly into
//! handlers and subscribe hooks; they hold no request state beyond the
//! identity itself.

use crate::domain::errors::ApiError;
use crate::infrastructure::pubsub::{valid_channel_name, PubSub};
use crate::infrastructure::store::{ScopedKvStore, StoreError};
use serde_json::Value;

/// Data and fanout access for one team
#[derive(Clone)]
pub struct TeamScope {
    team_id: String,
    store: ScopedKvStore,
    pubsub: PubSub,
}

impl TeamScope {
    pub fn new(team_id: String, store: ScopedKvStore, pubsub: PubSub) -> Self {
        Self {
            team_id,
            store,
            pubsub,
        }
    }

    pub fn id(&self) -> &str {
        &self.team_id
    }

    pub async fn get(&self) -> Result<Option<Value>, StoreError> {
        self.store.get(&self.team_id).await
    }

    pub async fn get_or_default(&self, default: &Value) -> Result<Value, StoreError> {
        self.store.get_or_default(&self.team_id, default).await
    }

    pub async fn set(&self, value: &Value) -> Result<(), StoreError> {
        self.store.set(&self.team_id, value).await
    }

    /// Publish `message` on this team's `sub_channel`.
    ///
    /// The sub-channel name is validated against the allow-list before the
    /// full channel name `{team_id}:{sub_channel}` is composed, so a caller
    /// can never escape its tenant namespace.
    pub async fn publish(&self, sub_channel: &str, message: &str) -> Result<(), ApiError> {
        if !valid_channel_name(sub_channel) {
            return Err(ApiError::InvalidChannel);
        }
        self.pubsub
            .publish(&format!("{}:{}", self.team_id, sub_channel), message)
            .await?;
        Ok(())
    }
}

/// Data access for one session
#[derive(Clone)]
pub struct SessionScope {
    session_id: String,
    store: ScopedKvStore,
}

impl SessionScope {
    pub fn new(session_id: String, store: ScopedKvStore) -> Self {
        Self { session_id, store }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub async fn get(&self) -> Result<Option<Value>, StoreError> {
        self.store.get(&self.session_id).await
    }

    pub async fn get_or_default(&self, default: &Value) -> Result<Value, StoreError> {
        self.store.get_or_default(&self.session_id, default).await
    }

    pub async fn set(&self, value: &Value) -> Result<(), StoreError> {
        self.store.set(&self.session_id, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pubsub::{LocalBus, Subscriber};
    use crate::infrastructure::store::KvTableConfig;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn team_scope(pubsub: PubSub) -> TeamScope {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/huddle_test")
            .unwrap();
        let store =
            ScopedKvStore::new(pool, KvTableConfig::new("team_data", "team", "data")).unwrap();
        TeamScope::new("team-42".to_string(), store, pubsub)
    }

    #[tokio::test]
    async fn publish_rejects_invalid_sub_channel() {
        let pubsub = PubSub::new(Arc::new(LocalBus::new()), "huddle");
        let scope = team_scope(pubsub);

        let err = scope.publish("../etc", "x").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidChannel));
    }

    #[tokio::test]
    async fn publish_composes_tenant_scoped_channel() {
        let pubsub = PubSub::new(Arc::new(LocalBus::new()), "huddle");
        let scope = team_scope(pubsub.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: Subscriber = Arc::new(move |payload: &str| {
            let _ = tx.send(payload.to_string());
        });
        let sub = pubsub.subscribe("team-42:lobby", handler).await.unwrap();

        scope.publish("lobby", "hello").await.unwrap();

        let delivered = timeout(Duration::from_millis(200), rx.recv()).await;
        assert_eq!(delivered.unwrap().as_deref(), Some("hello"));
        sub.unsubscribe().await.unwrap();
    }
}
