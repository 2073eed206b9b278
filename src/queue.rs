//! Notification queue: validated enqueue with slot assignment, and due reads.
use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, instrument};

use crate::db;
use crate::model::{NewQueueEntry, QueueEntry};
use crate::push::{self, MAX_PAYLOAD_BYTES};
use crate::schedule::SlotPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("{0} must be non-empty")]
    MissingField(&'static str),
    #[error("notification payload is {size} bytes; at most {limit} fit in a push message")]
    PayloadTooLarge { size: usize, limit: usize },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Enqueued {
    pub queue_id: i64,
    pub scheduled_at: DateTime<FixedOffset>,
}

/// Checks a normalized entry; `icon` is the one the dispatcher will attach.
pub fn validate(entry: &NewQueueEntry, icon: Option<&str>) -> Result<(), QueueError> {
    if entry.content_type.trim().is_empty() {
        return Err(QueueError::MissingField("content_type"));
    }
    if entry.title.trim().is_empty() {
        return Err(QueueError::MissingField("title"));
    }
    let size = push::payload_size(&entry.message(icon));
    if size > MAX_PAYLOAD_BYTES {
        return Err(QueueError::PayloadTooLarge {
            size,
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

/// Stores `entry` at the next free slot after `now`.
///
/// The latest slot lookup and the insert share one transaction.
#[instrument(skip_all, fields(content_type = %entry.content_type, content_id = entry.content_id))]
pub async fn enqueue(
    pool: &SqlitePool,
    policy: &SlotPolicy,
    entry: &NewQueueEntry,
    icon: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Enqueued> {
    let entry = entry.clone().normalized();
    validate(&entry, icon)?;

    let mut tx = pool.begin().await?;
    let last = db::latest_scheduled_since_tx(&mut tx, now - policy.lookback).await?;
    let slot = policy.next_slot(now, last);
    let queue_id = db::insert_queue_entry_tx(&mut tx, &entry, slot.with_timezone(&Utc)).await?;
    tx.commit().await?;

    info!(queue_id, scheduled_at = %slot.to_rfc3339(), "notification queued");
    Ok(Enqueued {
        queue_id,
        scheduled_at: slot,
    })
}

/// Pending entries due at `now`, oldest first, at most `limit`.
pub async fn pending(pool: &SqlitePool, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueEntry>> {
    db::due_queue_entries(pool, now, limit).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> NewQueueEntry {
        NewQueueEntry {
            content_type: "news".into(),
            content_id: 1,
            title: "Title".into(),
            body: String::new(),
            url: "/".into(),
        }
    }

    #[test]
    fn validate_rejects_blank_fields() {
        assert!(validate(&entry(), None).is_ok());

        let mut e = entry();
        e.content_type = " ".into();
        assert_eq!(validate(&e, None), Err(QueueError::MissingField("content_type")));

        let mut e = entry();
        e.title = String::new();
        assert_eq!(validate(&e, None), Err(QueueError::MissingField("title")));
    }

    #[test]
    fn blank_url_falls_back_to_root() {
        let mut e = entry();
        e.url = "  ".into();
        let e = e.normalized();
        assert_eq!(e.url, "/");
        assert!(validate(&e, None).is_ok());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut e = entry();
        e.body = "б".repeat(2000);
        assert!(matches!(
            validate(&e, None),
            Err(QueueError::PayloadTooLarge { limit: MAX_PAYLOAD_BYTES, .. })
        ));
    }

    #[test]
    fn icon_counts_towards_the_payload() {
        let overhead = push::payload_size(&entry().message(Some("/logo.png")));
        let mut e = entry();
        e.body = "x".repeat(MAX_PAYLOAD_BYTES - overhead);
        assert!(validate(&e, Some("/logo.png")).is_ok());

        let err = validate(&e, Some("/logo-large.png")).unwrap_err();
        assert_eq!(
            err,
            QueueError::PayloadTooLarge {
                size: MAX_PAYLOAD_BYTES + 6,
                limit: MAX_PAYLOAD_BYTES
            }
        );
    }

    #[test]
    fn defaults_apply_when_deserializing() {
        let e: NewQueueEntry =
            serde_json::from_str(r#"{"content_type":"news","content_id":5,"title":"T"}"#).unwrap();
        assert_eq!(e.url, "/");
        assert_eq!(e.body, "");
    }
}
