use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushError, WebPushMessage,
    WebPushMessageBuilder,
};

use crate::config::{self, ConfigError};
use crate::model::{DeliveryOutcome, PushMessage};

/// Delivers one message to one subscription.
///
/// Implementations never return errors: every failure is classified into a
/// [`DeliveryOutcome`] so one bad endpoint cannot abort a fan-out.
#[async_trait]
pub trait PushService: Send + Sync {
    async fn send(&self, subscription: &str, message: &PushMessage) -> DeliveryOutcome;
}

/// Largest JSON payload `web-push` will encrypt.
pub const MAX_PAYLOAD_BYTES: usize = 3052;

/// Size of `message` as delivered, in bytes.
pub fn payload_size(message: &PushMessage) -> usize {
    serde_json::to_vec(message).map_or(usize::MAX, |payload| payload.len())
}

/// 404 and 410 mean the browser dropped the subscription.
pub fn classify_status(status: StatusCode) -> DeliveryOutcome {
    if status.is_success() {
        DeliveryOutcome::Delivered
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        DeliveryOutcome::PermanentFailure(format!("push service returned {}", status))
    } else {
        DeliveryOutcome::TransientFailure(format!("push service returned {}", status))
    }
}

/// Parses the stored subscription JSON (`{endpoint, keys: {p256dh, auth}}`).
pub fn parse_subscription(raw: &str) -> Result<SubscriptionInfo> {
    serde_json::from_str(raw).context("subscription payload is not a push subscription")
}

/// Web Push (RFC 8030) client: aes128gcm payload encryption and VAPID
/// signing via `web-push`, HTTP delivery via `reqwest`.
#[derive(Clone)]
pub struct WebPushClient {
    http: Client,
    private_key_pem: String,
    subject: String,
    ttl: u32,
}

impl fmt::Debug for WebPushClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPushClient")
            .field("subject", &self.subject)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl WebPushClient {
    /// Builds a client from the `push` section; fails when the VAPID key is missing.
    pub fn from_config(push: &config::Push) -> Result<Self, ConfigError> {
        let private_key_pem = push.private_key()?.to_string();
        let http = Client::builder()
            .user_agent(concat!("portal-notify/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(push.timeout_seconds))
            .build()
            .map_err(|_| ConfigError::Invalid("push http client could not be built"))?;
        Ok(Self {
            http,
            private_key_pem,
            subject: push.subject.clone(),
            ttl: push.ttl_seconds,
        })
    }

    fn build_message(&self, info: &SubscriptionInfo, message: &PushMessage) -> Result<WebPushMessage> {
        let payload = serde_json::to_vec(message)?;

        let mut signature = VapidSignatureBuilder::from_pem(self.private_key_pem.as_bytes(), info)
            .context("invalid VAPID private key")?;
        signature.add_claim("sub", self.subject.as_str());
        let signature = signature.build().context("failed to sign VAPID claims")?;

        let mut builder = WebPushMessageBuilder::new(info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &payload);
        builder.set_ttl(self.ttl);
        builder.set_vapid_signature(signature);
        builder.build().context("failed to encrypt push payload")
    }

    async fn post(&self, message: WebPushMessage) -> DeliveryOutcome {
        let endpoint = message.endpoint.to_string();
        let mut request = self
            .http
            .post(&endpoint)
            .header("TTL", message.ttl.to_string());

        if let Some(payload) = message.payload {
            request = request
                .header("Content-Encoding", "aes128gcm")
                .header("Content-Type", "application/octet-stream");
            for (name, value) in payload.crypto_headers {
                request = request.header(name, value);
            }
            request = request.body(payload.content);
        }

        match request.send().await {
            Ok(res) => {
                let status = res.status();
                let outcome = classify_status(status);
                if outcome != DeliveryOutcome::Delivered {
                    let body = res.text().await.unwrap_or_default();
                    debug!(%status, %body, "push service rejected message");
                }
                outcome
            }
            Err(err) => {
                warn!(error = %err, "push request failed");
                DeliveryOutcome::TransientFailure(err.to_string())
            }
        }
    }
}

#[async_trait]
impl PushService for WebPushClient {
    async fn send(&self, subscription: &str, message: &PushMessage) -> DeliveryOutcome {
        let info = match parse_subscription(subscription) {
            Ok(info) => info,
            Err(err) => return DeliveryOutcome::PermanentFailure(format!("{:#}", err)),
        };
        let built = match self.build_message(&info, message) {
            Ok(built) => built,
            Err(err) if is_payload_too_large(&err) => {
                return DeliveryOutcome::Undeliverable(format!("{:#}", err))
            }
            // Signing or encryption problems are on our side; keep the subscription.
            Err(err) => return DeliveryOutcome::TransientFailure(format!("{:#}", err)),
        };
        self.post(built).await
    }
}

fn is_payload_too_large(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<WebPushError>(), Some(WebPushError::PayloadTooLarge))
}
