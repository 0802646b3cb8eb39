//! Queue sessions: scopes, the per-session cache, and shields

pub mod cache;
pub mod scope;
pub mod shield;

pub use cache::{IncrementalSummary, SessionCache, SessionCacheBuilder};
pub use scope::{descendants_scope, expand_scope, resolve_scopes, ResolvedScopes, Scope};
pub use shield::{Shield, ShieldKind, ShieldStatus};
