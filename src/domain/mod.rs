//! Core domain types: the error taxonomy and request identity resolution

pub mod errors;
pub mod identity;

pub use errors::ApiError;
pub use identity::{HeaderIdentityResolver, IdentityResolver, RequestIdentity};
