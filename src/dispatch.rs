use crate::db::{self, ActiveSubscription};
use crate::model::{DeliveryOutcome, PushMessage};
use crate::push::PushService;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub batch_size: i64,
    /// Icon attached to queued notifications.
    pub icon: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            icon: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DispatchReport {
    pub entries_sent: u32,
    pub entries_deferred: u32,
    /// Entries that can never be delivered, taken out of the queue.
    pub entries_failed: u32,
    pub delivered: u32,
    pub failed: u32,
    pub deactivated: u32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: u32,
    pub failed: u32,
    pub deactivated: u32,
}

#[derive(Debug, Default)]
struct FanOut {
    delivered: u32,
    permanent: u32,
    transient: u32,
    /// Set when the message itself was refused; fan-out stops there.
    undeliverable: Option<String>,
}

impl FanOut {
    fn failed(&self) -> u32 {
        self.permanent + self.transient + u32::from(self.undeliverable.is_some())
    }
}

/// Delivers `message` to every subscription not yet known dead. Permanent
/// failures deactivate the subscription and add it to `dead`.
async fn fan_out(
    pool: &SqlitePool,
    push: &dyn PushService,
    subscriptions: &[ActiveSubscription],
    message: &PushMessage,
    dead: &mut HashSet<i64>,
) -> FanOut {
    let mut result = FanOut::default();
    for sub in subscriptions {
        if dead.contains(&sub.id) {
            continue;
        }
        match push.send(&sub.payload, message).await {
            DeliveryOutcome::Delivered => result.delivered += 1,
            DeliveryOutcome::PermanentFailure(reason) => {
                result.permanent += 1;
                dead.insert(sub.id);
                info!(subscription_id = sub.id, %reason, "deactivating subscription");
                if let Err(err) = db::deactivate_subscription(pool, sub.id).await {
                    warn!(?err, subscription_id = sub.id, "failed to persist deactivation");
                }
            }
            DeliveryOutcome::TransientFailure(reason) => {
                result.transient += 1;
                warn!(subscription_id = sub.id, %reason, "push delivery failed; will retry next run");
            }
            DeliveryOutcome::Undeliverable(reason) => {
                result.undeliverable = Some(reason);
                break;
            }
        }
    }
    result
}

/// Sends every due queue entry to every active subscription.
///
/// An entry is marked sent once no delivery for it failed transiently;
/// otherwise it stays pending and the next run tries again. An entry whose
/// message can never be built is marked failed so it stops occupying the batch.
#[instrument(skip_all)]
pub async fn run(
    pool: &SqlitePool,
    push: &dyn PushService,
    options: &DispatchOptions,
    now: DateTime<Utc>,
) -> Result<DispatchReport> {
    let mut report = DispatchReport::default();

    let entries = db::due_queue_entries(pool, now, options.batch_size).await?;
    if entries.is_empty() {
        return Ok(report);
    }
    let subscriptions = db::list_active_subscriptions(pool).await?;
    let mut dead = HashSet::new();

    for entry in &entries {
        let message = PushMessage::from_entry(entry).with_icon(options.icon.clone());
        let out = fan_out(pool, push, &subscriptions, &message, &mut dead).await;

        report.delivered += out.delivered;
        report.failed += out.failed();
        report.deactivated += out.permanent;

        if let Some(reason) = &out.undeliverable {
            db::mark_queue_entry_failed(pool, entry.id).await?;
            report.entries_failed += 1;
            warn!(id = entry.id, %reason, "queue entry can never be delivered; marked failed");
        } else if out.transient == 0 {
            db::mark_queue_entry_sent(pool, entry.id, now).await?;
            report.entries_sent += 1;
            info!(id = entry.id, delivered = out.delivered, "queue entry sent");
        } else {
            report.entries_deferred += 1;
            warn!(id = entry.id, transient = out.transient, "queue entry left pending");
        }
    }

    Ok(report)
}

/// Immediate fan-out of one message, bypassing the queue.
#[instrument(skip_all)]
pub async fn broadcast(
    pool: &SqlitePool,
    push: &dyn PushService,
    message: &PushMessage,
) -> Result<BroadcastReport> {
    let subscriptions = db::list_active_subscriptions(pool).await?;
    let mut dead = HashSet::new();
    let out = fan_out(pool, push, &subscriptions, message, &mut dead).await;
    if let Some(reason) = &out.undeliverable {
        warn!(%reason, "broadcast message can never be delivered");
    }
    Ok(BroadcastReport {
        sent: out.delivered,
        failed: out.failed(),
        deactivated: out.permanent,
    })
}
