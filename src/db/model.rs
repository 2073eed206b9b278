//! Database view models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

use crate::model::TrackingSnapshot;

/// Subscription slice used by the dispatcher when fanning out a message.
#[derive(Debug, Clone)]
pub struct ActiveSubscription {
    pub id: i64,
    pub payload: String,
}

/// The tracking row together with the time of the last successful check.
#[derive(Debug, Clone, Copy)]
pub struct TrackingRow {
    pub snapshot: TrackingSnapshot,
    pub last_check: Option<DateTime<Utc>>,
}
