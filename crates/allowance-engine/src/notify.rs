//! Fire-and-forget domain event notification.
//!
//! The ledger never depends on a notification succeeding: [`emit`] logs and
//! drops any [`NotifyError`]. Delivery transport is left to the [`Notifier`]
//! implementation; this module only defines the webhook envelope and its
//! HMAC-SHA256 signature.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use crate::model::FamilyId;

pub const TRANSACTION_CREATED: &str = "transaction.created";
pub const RECURRING_PAYMENT_PROCESSED: &str = "recurring_payment.processed";
pub const RECURRING_PAYMENT_SKIPPED: &str = "recurring_payment.skipped";
pub const DEDUCTION_CREATED: &str = "deduction.created";
pub const CHILD_UPDATED: &str = "child.updated";
pub const CHILD_DELETED: &str = "child.deleted";

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
const USER_AGENT: &str = "AllowanceEngine/0.1";

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Invalid webhook secret")]
    InvalidSecret,

    #[error("Payload serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receives `(event_name, payload)` pairs.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &str, payload: &Value) -> Result<(), NotifyError>;
}

/// Send an event, swallowing and logging any failure.
pub fn emit<N: Notifier + ?Sized>(notifier: &N, event: &str, payload: Value) {
    if let Err(err) = notifier.notify(event, &payload) {
        warn!(event, error = %err, "notification failed; ledger state unaffected");
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: &str, _payload: &Value) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &str, payload: &Value) -> Result<(), NotifyError> {
        self.events.lock().push((event.to_string(), payload.clone()));
        Ok(())
    }
}

/// JSON body posted to a family's webhook URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub family_id: Option<FamilyId>,
    pub data: Value,
}

impl WebhookEnvelope {
    pub fn new(event: &str, data: Value, family_id: Option<FamilyId>, at: DateTime<Utc>) -> Self {
        Self {
            event: event.to_string(),
            timestamp: at.timestamp(),
            family_id,
            data,
        }
    }
}

/// A serialized envelope plus the HTTP headers a transport should send.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedWebhook {
    pub body: String,
    pub headers: Vec<(String, String)>,
}

/// Hex-encoded HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign_payload(secret: &str, body: &str) -> Result<String, NotifyError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| NotifyError::InvalidSecret)?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Serialize an envelope and, when a secret is configured, sign it.
///
/// The signature header value has the form `sha256=<hex>`.
pub fn prepare_webhook(
    envelope: &WebhookEnvelope,
    secret: Option<&str>,
) -> Result<SignedWebhook, NotifyError> {
    let body = serde_json::to_string(envelope)?;
    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), USER_AGENT.to_string()),
    ];
    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        let signature = sign_payload(secret, &body)?;
        headers.push((SIGNATURE_HEADER.to_string(), format!("sha256={}", signature)));
    }
    Ok(SignedWebhook { body, headers })
}
