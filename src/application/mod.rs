//! Request-scoped data handles and subscribe hooks

pub mod hooks;
pub mod scopes;

pub use hooks::{SubscribeHook, SubscribeHooks};
pub use scopes::{SessionScope, TeamScope};
