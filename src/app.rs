//! Application setup and wiring
//!
//! Constructs every shared component once at startup - pools, bus, stores,
//! limiter, hook registry - and hands them to the router as explicit state.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::SubscribeHooks;
use crate::config::{Config, CounterBackend};
use crate::domain::identity::HeaderIdentityResolver;
use crate::infrastructure::pubsub::{LocalBus, MessageBus, PubSub, RedisBus};
use crate::infrastructure::rate_limit::{
    CounterStore, InMemoryCounterStore, RedisCounterStore, WindowLimiter,
};
use crate::infrastructure::store::{KvTableConfig, ScopedKvStore};
use crate::presentation::{create_router, AppState};

/// Handle returned from create_app for graceful shutdown coordination
pub struct AppHandle {
    pub router: Router,
    pub shutdown_token: CancellationToken,
}

/// Build the message bus, preferring Redis and falling back to the
/// in-process bus when it is unreachable (single-instance development).
async fn build_bus(url: &str) -> Arc<dyn MessageBus> {
    match RedisBus::connect(url).await {
        Ok(bus) => {
            info!("Pub/sub using Redis bus at {}", url);
            Arc::new(bus)
        }
        Err(e) => {
            warn!(
                "Failed to connect to Redis pub/sub, falling back to in-process bus: {}",
                e
            );
            Arc::new(LocalBus::new())
        }
    }
}

/// Build the rate limit counter backend per configuration, with the same
/// fallback behavior as the bus.
async fn build_counters(backend: &CounterBackend, url: &str) -> Arc<dyn CounterStore> {
    match backend {
        CounterBackend::Redis => match RedisCounterStore::new(url).await {
            Ok(store) => {
                info!("Rate limiter using Redis counter backend at {}", url);
                Arc::new(store)
            }
            Err(e) => {
                warn!(
                    "Failed to connect to Redis for rate limiting, falling back to in-memory: {}",
                    e
                );
                Arc::new(InMemoryCounterStore::new())
            }
        },
        CounterBackend::Memory => {
            info!("Rate limiter using in-memory counter backend");
            Arc::new(InMemoryCounterStore::new())
        }
    }
}

/// Spawns a background worker that periodically prunes expired counter
/// entries. Respects the cancellation token for graceful shutdown.
fn spawn_counter_cleanup(counters: Arc<dyn CounterStore>, shutdown_token: CancellationToken) {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(Duration::from_secs(300));
        interval_timer.tick().await;

        loop {
            tokio::select! {
                _ = interval_timer.tick() => counters.cleanup().await,
                _ = shutdown_token.cancelled() => break,
            }
        }
    });
}

/// Create the application router and its background tasks
pub async fn create_app(config: Config) -> anyhow::Result<AppHandle> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_lazy(&config.database.url)?;

    let team_store = ScopedKvStore::new(
        pool.clone(),
        KvTableConfig::new("team_data", "team", "data"),
    )?;
    let session_store = ScopedKvStore::new(
        pool,
        KvTableConfig::new("session_data", "session_id", "data"),
    )?;

    team_store.init_schema().await?;
    session_store.init_schema().await?;

    let bus = build_bus(&config.redis.url).await;
    let pubsub = PubSub::new(bus, &config.redis.namespace);

    let counters = build_counters(&config.rate_limit.backend, &config.redis.url).await;
    let limiter = WindowLimiter::new(Arc::clone(&counters), "ratelimit");

    let shutdown_token = CancellationToken::new();
    spawn_counter_cleanup(counters, shutdown_token.clone());

    let state = AppState {
        team_store,
        session_store,
        pubsub,
        limiter,
        identity: Arc::new(HeaderIdentityResolver::new(
            config.identity.default_team.clone(),
        )),
        hooks: SubscribeHooks::new(),
        limits: config.rate_limit.clone(),
    };

    Ok(AppHandle {
        router: create_router(state),
        shutdown_token,
    })
}
