//! Message bus backends
//!
//! The bus is the cross-process half of pub/sub: `publish` reaches every
//! process, `subscribe`/`unsubscribe` manage which raw channels this
//! process receives, and deliveries arrive on one process-wide stream keyed
//! by raw channel name.
//!
//! - `RedisBus` for production fanout across processes
//! - `LocalBus` for development and tests, looping publishes back in-process

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink, PubSubStream};
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Message bus failures
#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("bus connection closed")]
    Closed,
}

/// One delivery from the bus: `(raw_channel, payload)`
pub type BusDelivery = (String, String);

/// Backing message bus with best-effort broadcast semantics.
///
/// Per-channel delivery order from one publisher follows publish order; no
/// durability, no acknowledgment.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, raw_channel: &str, payload: &str) -> Result<(), BusError>;

    async fn subscribe(&self, raw_channel: &str) -> Result<(), BusError>;

    async fn unsubscribe(&self, raw_channel: &str) -> Result<(), BusError>;

    /// Take the process-wide delivery stream. Yields `Some` exactly once;
    /// the single consumer dispatches to local subscribers.
    fn take_deliveries(&self) -> Option<mpsc::UnboundedReceiver<BusDelivery>>;
}

enum SubCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Redis pub/sub bus.
///
/// Publishing goes through a multiplexed [`ConnectionManager`]; receiving
/// requires a dedicated pub/sub connection, driven by a background task
/// that also applies subscribe/unsubscribe commands (the sink is owned by
/// that task).
pub struct RedisBus {
    publish_conn: ConnectionManager,
    commands: mpsc::UnboundedSender<SubCommand>,
    deliveries: Mutex<Option<mpsc::UnboundedReceiver<BusDelivery>>>,
}

impl RedisBus {
    /// Connect both halves of the bus and spawn the receive task
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let publish_conn = ConnectionManager::new(client.clone()).await?;

        // Test connection
        let mut conn = publish_conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        let (sink, stream) = client.get_async_pubsub().await?.split();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive_pubsub(sink, stream, cmd_rx, delivery_tx));

        debug!("Successfully connected to Redis pub/sub bus at {}", url);

        Ok(Self {
            publish_conn,
            commands: cmd_tx,
            deliveries: Mutex::new(Some(delivery_rx)),
        })
    }
}

/// Owns the pub/sub connection: applies subscription commands and forwards
/// incoming messages to the delivery stream. A dropped connection ends the
/// task with a warning; it must not take the process down.
async fn drive_pubsub(
    mut sink: PubSubSink,
    mut stream: PubSubStream,
    mut commands: mpsc::UnboundedReceiver<SubCommand>,
    deliveries: mpsc::UnboundedSender<BusDelivery>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SubCommand::Subscribe(channel)) => {
                    if let Err(e) = sink.subscribe(&channel).await {
                        warn!(channel = %channel, "bus subscribe failed: {}", e);
                    }
                }
                Some(SubCommand::Unsubscribe(channel)) => {
                    if let Err(e) = sink.unsubscribe(&channel).await {
                        warn!(channel = %channel, "bus unsubscribe failed: {}", e);
                    }
                }
                None => break,
            },
            message = stream.next() => match message {
                Some(message) => {
                    let channel = message.get_channel_name().to_string();
                    match message.get_payload::<String>() {
                        Ok(payload) => {
                            if deliveries.send((channel, payload)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(channel = %channel, "undecodable bus payload: {}", e),
                    }
                }
                None => {
                    warn!("Redis pub/sub connection closed; bus deliveries stopped");
                    break;
                }
            },
        }
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, raw_channel: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.publish_conn.clone();
        redis::cmd("PUBLISH")
            .arg(raw_channel)
            .arg(payload)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, raw_channel: &str) -> Result<(), BusError> {
        self.commands
            .send(SubCommand::Subscribe(raw_channel.to_string()))
            .map_err(|_| BusError::Closed)
    }

    async fn unsubscribe(&self, raw_channel: &str) -> Result<(), BusError> {
        self.commands
            .send(SubCommand::Unsubscribe(raw_channel.to_string()))
            .map_err(|_| BusError::Closed)
    }

    fn take_deliveries(&self) -> Option<mpsc::UnboundedReceiver<BusDelivery>> {
        self.deliveries.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// In-process bus for development and tests.
///
/// Publishes loop straight back to the delivery stream when this process
/// holds a subscription for the raw channel, mimicking the bus contract
/// closely enough to exercise the fanout layer.
pub struct LocalBus {
    subscribed: RwLock<HashSet<String>>,
    delivery_tx: mpsc::UnboundedSender<BusDelivery>,
    deliveries: Mutex<Option<mpsc::UnboundedReceiver<BusDelivery>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        Self {
            subscribed: RwLock::new(HashSet::new()),
            delivery_tx,
            deliveries: Mutex::new(Some(delivery_rx)),
        }
    }

    /// Whether this process currently holds a bus-level subscription
    pub async fn is_subscribed(&self, raw_channel: &str) -> bool {
        self.subscribed.read().await.contains(raw_channel)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, raw_channel: &str, payload: &str) -> Result<(), BusError> {
        if self.subscribed.read().await.contains(raw_channel) {
            let _ = self
                .delivery_tx
                .send((raw_channel.to_string(), payload.to_string()));
        }
        Ok(())
    }

    async fn subscribe(&self, raw_channel: &str) -> Result<(), BusError> {
        self.subscribed.write().await.insert(raw_channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, raw_channel: &str) -> Result<(), BusError> {
        self.subscribed.write().await.remove(raw_channel);
        Ok(())
    }

    fn take_deliveries(&self) -> Option<mpsc::UnboundedReceiver<BusDelivery>> {
        self.deliveries.lock().ok().and_then(|mut slot| slot.take())
    }
}
