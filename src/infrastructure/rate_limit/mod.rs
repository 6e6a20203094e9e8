//! Distributed rate limiting
//!
//! Counters live in a shared backend ([`CounterStore`]) so every process of
//! the service enforces one quota per identity. Fixed windows trade strict
//! sliding-window accuracy for O(1) state per identity.

mod limiter;
mod storage;
mod types;

pub use limiter::WindowLimiter;
pub use storage::{CounterStore, InMemoryCounterStore, RedisCounterStore};
pub use types::{current_time_secs, window_bucket, LimitScope, RateCheck};
