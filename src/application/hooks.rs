//! "On first subscriber" notification hooks
//!
//! Handlers registered for a sub-channel name run once per new WebSocket
//! connection to that sub-channel, independent of team, receiving the
//! connection's [`TeamScope`]. This lets the server react to a client
//! subscribing (seed data, announce presence) without polling.

use crate::application::scopes::TeamScope;
use crate::domain::errors::ApiError;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

/// A subscribe hook: receives the new subscriber's team scope
pub type SubscribeHook =
    Arc<dyn Fn(TeamScope) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

/// Registry of subscribe hooks, keyed by sub-channel name
#[derive(Clone, Default)]
pub struct SubscribeHooks {
    inner: Arc<RwLock<HashMap<String, Vec<SubscribeHook>>>>,
}

impl SubscribeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` to run for every new connection to `sub_channel`
    pub async fn on_subscribe(&self, sub_channel: &str, hook: SubscribeHook) {
        self.inner
            .write()
            .await
            .entry(sub_channel.to_string())
            .or_default()
            .push(hook);
    }

    /// Run every hook registered for `sub_channel` with the subscriber's
    /// team scope. Hooks run in spawned tasks; failures are logged and
    /// never affect the triggering connection.
    pub async fn notify(&self, sub_channel: &str, scope: TeamScope) {
        let hooks = self.inner.read().await;
        let Some(registered) = hooks.get(sub_channel) else {
            return;
        };

        for hook in registered {
            let future = hook(scope.clone());
            let channel = sub_channel.to_string();
            tokio::spawn(async move {
                if let Err(e) = future.await {
                    error!(channel = %channel, "subscribe hook failed: {}", e);
                }
            });
        }
    }
}
