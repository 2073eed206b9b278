use super::model::{ActiveSubscription, TrackingRow};
use crate::model::{NewQueueEntry, QueueEntry, QueueStatus, Subscription, TrackingSnapshot};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Transaction};
use sqlx::{Sqlite, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    // sqlx refuses to open a missing file unless asked to create it.
    if !rebuilt.contains("mode=") {
        rebuilt.push(if query_part.is_some() { '&' } else { '?' });
        rebuilt.push_str("mode=rwc");
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// --- subscriptions -------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_subscription(pool: &Pool, payload: &str, user_agent: &str) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO notification_subscriptions (subscription_data, user_agent, is_active) VALUES (?, ?, 1) RETURNING id",
    )
    .bind(payload)
    .bind(user_agent)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn list_active_subscriptions(pool: &Pool) -> Result<Vec<ActiveSubscription>> {
    let rows = sqlx::query(
        "SELECT id, subscription_data FROM notification_subscriptions WHERE is_active = 1 ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(ActiveSubscription {
                id: row.try_get("id")?,
                payload: row.try_get("subscription_data")?,
            })
        })
        .collect()
}

pub async fn get_subscription(pool: &Pool, id: i64) -> Result<Option<Subscription>> {
    let row = sqlx::query(
        "SELECT id, subscription_data, user_agent, is_active FROM notification_subscriptions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(Subscription {
        id: row.try_get("id")?,
        payload: row.try_get("subscription_data")?,
        user_agent: row.try_get("user_agent")?,
        is_active: row.try_get("is_active")?,
    }))
}

/// Marks a subscription inactive. Returns false when it was already inactive or unknown.
#[instrument(skip_all)]
pub async fn deactivate_subscription(pool: &Pool, id: i64) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE notification_subscriptions SET is_active = 0 WHERE id = ? AND is_active = 1",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to deactivate subscription")?;
    Ok(res.rows_affected() == 1)
}

// --- notification queue --------------------------------------------------

/// Latest `scheduled_at` strictly after `since`, regardless of status.
#[instrument(skip_all)]
pub async fn latest_scheduled_since_tx(
    tx: &mut Transaction<'_, Sqlite>,
    since: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let latest = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT scheduled_at FROM notification_queue WHERE status IN ('pending', 'sent') AND datetime(scheduled_at) > datetime(?) ORDER BY datetime(scheduled_at) DESC LIMIT 1",
    )
    .bind(since)
    .fetch_optional(&mut **tx)
    .await
    .context("failed to read latest scheduled notification")?;
    Ok(latest)
}

pub async fn latest_scheduled_since(pool: &Pool, since: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let mut tx = pool.begin().await?;
    let latest = latest_scheduled_since_tx(&mut tx, since).await?;
    tx.commit().await?;
    Ok(latest)
}

#[instrument(skip_all)]
pub async fn insert_queue_entry_tx(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &NewQueueEntry,
    scheduled_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO notification_queue (content_type, content_id, title, body, url, scheduled_at, status) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&entry.content_type)
    .bind(entry.content_id)
    .bind(&entry.title)
    .bind(&entry.body)
    .bind(&entry.url)
    .bind(scheduled_at)
    .bind(QueueStatus::Pending.as_str())
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

fn queue_entry_from_row(row: &SqliteRow) -> Result<QueueEntry> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = QueueStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("queue entry {} has unknown status {}", id, status))?;
    Ok(QueueEntry {
        id,
        content_type: row.try_get("content_type")?,
        content_id: row.try_get("content_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        url: row.try_get("url")?,
        scheduled_at: row
            .try_get("scheduled_at")
            .with_context(|| format!("queue entry {} has a malformed scheduled_at", id))?,
        status,
    })
}

/// Pending entries due at `now`, oldest first.
#[instrument(skip_all)]
pub async fn due_queue_entries(pool: &Pool, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query(
        "SELECT id, content_type, content_id, title, body, url, scheduled_at, status FROM notification_queue WHERE status = 'pending' AND datetime(scheduled_at) <= datetime(?) ORDER BY datetime(scheduled_at) ASC, id ASC LIMIT ?",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(queue_entry_from_row).collect()
}

pub async fn get_queue_entry(pool: &Pool, id: i64) -> Result<Option<QueueEntry>> {
    let row = sqlx::query(
        "SELECT id, content_type, content_id, title, body, url, scheduled_at, status FROM notification_queue WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(queue_entry_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn mark_queue_entry_sent(pool: &Pool, id: i64, sent_at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE notification_queue SET status = 'sent', sent_at = ? WHERE id = ? AND status = 'pending'")
        .bind(sent_at)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark queue entry sent")?;
    Ok(())
}

/// Takes an entry that can never be delivered out of the due set.
#[instrument(skip_all)]
pub async fn mark_queue_entry_failed(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("UPDATE notification_queue SET status = 'failed' WHERE id = ? AND status = 'pending'")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark queue entry failed")?;
    Ok(())
}

// --- tracking counters ---------------------------------------------------

/// Reads the tracking row, creating it with zero counters on first use.
#[instrument(skip_all)]
pub async fn load_tracking(pool: &Pool) -> Result<TrackingRow> {
    sqlx::query(
        "INSERT OR IGNORE INTO admin_tracking (id, last_comments_count, last_views_count) VALUES (1, 0, 0)",
    )
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT last_comments_count, last_views_count, last_check FROM admin_tracking WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(TrackingRow {
        snapshot: TrackingSnapshot {
            comments: row.try_get("last_comments_count")?,
            views: row.try_get("last_views_count")?,
        },
        last_check: row.try_get("last_check")?,
    })
}

/// Compare-and-swap on the tracking row: moves it from `previous` to `current`
/// only if nobody else did first. Returns whether this caller won.
#[instrument(skip_all)]
pub async fn advance_tracking(
    pool: &Pool,
    previous: TrackingSnapshot,
    current: TrackingSnapshot,
    checked_at: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE admin_tracking SET last_comments_count = ?, last_views_count = ?, last_check = ? WHERE id = 1 AND last_comments_count = ? AND last_views_count = ?",
    )
    .bind(current.comments)
    .bind(current.views)
    .bind(checked_at)
    .bind(previous.comments)
    .bind(previous.views)
    .execute(pool)
    .await
    .context("failed to advance tracking snapshot")?;
    Ok(res.rows_affected() == 1)
}

/// Total comments and total views over published news.
#[instrument(skip_all)]
pub async fn current_counters(pool: &Pool) -> Result<TrackingSnapshot> {
    let comments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
        .fetch_one(pool)
        .await?;
    let views: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(views), 0) FROM news WHERE status = ?")
        .bind("published")
        .fetch_one(pool)
        .await?;
    Ok(TrackingSnapshot { comments, views })
}
