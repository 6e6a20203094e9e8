//! Huddle - a small real-time backend toolkit
//!
//! Huddle provides the three coupled subsystems a multi-process real-time
//! backend needs, plus the WebSocket bridge that ties them to live clients:
//!
//! # Modules
//!
//! - [`config`] - Strongly-typed configuration with file and environment variable support
//! - [`domain`] - Error taxonomy and request identity resolution
//! - [`application`] - Team- and session-scoped data handles and subscribe hooks
//! - [`infrastructure`] - Scoped key-value store, rate limit counters, pub/sub fanout
//! - [`presentation`] - HTTP/WebSocket surface built on axum
//! - [`logging`] - Structured logging with tracing
//!
//! # Architecture
//!
//! ```text
//! huddle/
//! ├── domain/           # ApiError, RequestIdentity, IdentityResolver
//! ├── application/      # TeamScope / SessionScope, SubscribeHooks
//! ├── infrastructure/   # External integrations
//! │   ├── store/        # Postgres-backed scoped key-value persistence
//! │   ├── rate_limit/   # Redis/in-memory window counters
//! │   └── pubsub/       # Redis/local message bus + subscriber registry
//! ├── presentation/     # Routes, WebSocket channel bridge, error rendering
//! └── config/           # Configuration management
//! ```
//!
//! # Configuration
//!
//! Load configuration from files and environment:
//!
//! ```rust,ignore
//! use huddle::Config;
//!
//! let config = Config::load()?;
//! ```
//!
//! Environment variables use the `HUDDLE__` prefix with double underscore separators:
//!
//! ```bash
//! HUDDLE__SERVER__PORT=8080
//! HUDDLE__RATE_LIMIT__BACKEND=memory
//! ```

pub mod app;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;
pub mod presentation;

pub use app::{create_app, AppHandle};
pub use config::Config;
pub use logging::init_tracing;
