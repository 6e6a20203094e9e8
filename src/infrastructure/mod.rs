//! External integrations: Postgres persistence, Redis counters, pub/sub bus

pub mod pubsub;
pub mod rate_limit;
pub mod store;
