use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Sent,
    /// The message can never be delivered (e.g. too large to encrypt).
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "sent" => Some(QueueStatus::Sent),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

/// A stored push subscription. `payload` is kept as the raw JSON the client sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub payload: String,
    pub user_agent: String,
    pub is_active: bool,
}

/// Producer input for the notification queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewQueueEntry {
    pub content_type: String,
    pub content_id: i64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "/".to_string()
}

impl NewQueueEntry {
    /// Blank urls fall back to the site root.
    pub fn normalized(mut self) -> Self {
        if self.url.trim().is_empty() {
            self.url = default_url();
        }
        self
    }

    /// The message subscribers will receive for this entry.
    pub fn message(&self, icon: Option<&str>) -> PushMessage {
        PushMessage::new(&self.title, &self.body, &self.url).with_icon(icon.map(str::to_string))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub content_type: String,
    pub content_id: i64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: QueueStatus,
}

/// Last observed aggregate counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingSnapshot {
    pub comments: i64,
    pub views: i64,
}

/// The JSON document delivered to the browser's service worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub icon: Option<String>,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            url: url.into(),
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    pub fn from_entry(entry: &QueueEntry) -> Self {
        Self::new(&entry.title, &entry.body, &entry.url)
    }
}

/// Result of handing one message to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The endpoint is gone; the subscription must be deactivated.
    PermanentFailure(String),
    /// Worth trying again on a later run.
    TransientFailure(String),
    /// The message itself can never be delivered; the subscription is fine.
    Undeliverable(String),
}
