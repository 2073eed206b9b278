//! Comment and view delta tracker.
//!
//! Each check compares the live counters with the stored snapshot, claims the
//! new snapshot with a compare-and-swap, and only then broadcasts one summary
//! per counter that grew. Two concurrent checks can therefore never both
//! announce the same delta.
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::db;
use crate::dispatch;
use crate::model::{PushMessage, TrackingSnapshot};
use crate::push::PushService;

const ADMIN_URL: &str = "/admin";
const ADMIN_ICON: &str = "/icon-192.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Comments,
    Views,
}

impl CounterKind {
    fn title(self) -> &'static str {
        match self {
            CounterKind::Comments => "Новый комментарий",
            CounterKind::Views => "👁 Новые просмотры",
        }
    }

    /// Singular, few (2..=4), many.
    fn forms(self) -> [&'static str; 3] {
        match self {
            CounterKind::Comments => ["комментарий", "комментария", "комментариев"],
            CounterKind::Views => ["просмотр", "просмотра", "просмотров"],
        }
    }
}

/// Picks the noun form for `n`: 1, 2..=4, everything else.
pub fn plural(n: i64, forms: [&'static str; 3]) -> &'static str {
    match n {
        1 => forms[0],
        2..=4 => forms[1],
        _ => forms[2],
    }
}

pub fn summary(kind: CounterKind, delta: i64) -> PushMessage {
    PushMessage::new(
        kind.title(),
        format!("+{} {}", delta, plural(delta, kind.forms())),
        ADMIN_URL,
    )
    .with_icon(Some(ADMIN_ICON.to_string()))
}

/// One message per counter that grew since `previous`.
pub fn detect(previous: TrackingSnapshot, current: TrackingSnapshot) -> Vec<PushMessage> {
    [
        (CounterKind::Comments, current.comments - previous.comments),
        (CounterKind::Views, current.views - previous.views),
    ]
    .into_iter()
    .filter(|(_, delta)| *delta > 0)
    .map(|(kind, delta)| summary(kind, delta))
    .collect()
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CheckReport {
    pub new_comments: i64,
    pub new_views: i64,
    pub notifications_sent: u32,
    /// Another check advanced the snapshot first; nothing was sent.
    pub skipped: bool,
}

#[instrument(skip_all)]
pub async fn check_updates(
    pool: &SqlitePool,
    push: &dyn PushService,
    now: DateTime<Utc>,
) -> Result<CheckReport> {
    let previous = db::load_tracking(pool).await?.snapshot;
    let current = db::current_counters(pool).await?;

    let mut report = CheckReport {
        new_comments: current.comments - previous.comments,
        new_views: current.views - previous.views,
        ..Default::default()
    };

    if !db::advance_tracking(pool, previous, current, now).await? {
        info!("tracking snapshot moved concurrently; skipping notifications");
        report.skipped = true;
        return Ok(report);
    }

    for message in detect(previous, current) {
        let sent = match dispatch::broadcast(pool, push, &message).await {
            Ok(sent) => sent,
            Err(err) => {
                // The snapshot already moved; this delta will not be announced again.
                warn!(
                    ?err,
                    title = %message.title,
                    body = %message.body,
                    "snapshot advanced but broadcast failed; update alert lost"
                );
                return Err(err);
            }
        };
        report.notifications_sent += sent.sent;
    }

    info!(
        new_comments = report.new_comments,
        new_views = report.new_views,
        notifications_sent = report.notifications_sent,
        "update check finished"
    );
    Ok(report)
}
