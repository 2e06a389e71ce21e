//! In-memory state owned by the relay for the lifetime of the process.
//!
//! Nothing here survives a restart: an offline event that arrives after a
//! restart finds no live message and is skipped.
pub mod live;
pub mod recent;

pub use live::{LiveMessageGuard, LiveMessageStore};
pub use recent::{MessageIdOutcome, RecentMessageIds, DEFAULT_RECENT_CAPACITY};
