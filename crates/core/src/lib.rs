//! Domain types shared by the relay crates.
//!
//! Nothing here performs I/O: the envelope and configuration types are plain
//! serde models and the announcement builder is a pure function, so the app
//! crate owns every network call.
pub mod announcement;
pub mod types;

pub use announcement::{live_message, ChatMessage};
pub use types::{
    BroadcasterRouting, LiveMessageKey, LiveMessageRecord, NotificationEnvelope, StreamEvent,
    StreamSnapshot, Subscription, WebhookTarget, STREAM_OFFLINE, STREAM_ONLINE,
};
