//! Outbox notifier: renders each event as a signed webhook request, one JSON
//! object per line, for a separate delivery process to pick up.
//!
//! Lines are buffered while a command runs and only appended by [`OutboxNotifier::flush`],
//! which the CLI calls after the state file has been saved.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use allowance_engine::model::FamilyId;
use allowance_engine::notify::{prepare_webhook, NotifyError, WebhookEnvelope};
use allowance_engine::{Clock, Notifier};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

pub struct OutboxNotifier {
    path: PathBuf,
    secret: Option<String>,
    family_id: Option<FamilyId>,
    clock: Arc<dyn Clock>,
    pending: Mutex<Vec<String>>,
}

impl OutboxNotifier {
    pub fn new(
        path: PathBuf,
        secret: Option<String>,
        family_id: Option<FamilyId>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            path,
            secret,
            family_id,
            clock,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Append buffered lines to the outbox file. Returns how many were written.
    pub fn flush(&self) -> Result<usize> {
        let lines = std::mem::take(&mut *self.pending.lock());
        if lines.is_empty() {
            return Ok(0);
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open outbox: {}", self.path.display()))?;
        let mut block = lines.join("\n");
        block.push('\n');
        file.write_all(block.as_bytes())
            .with_context(|| format!("Failed to append to outbox: {}", self.path.display()))?;
        Ok(lines.len())
    }
}

impl Notifier for OutboxNotifier {
    fn notify(&self, event: &str, payload: &Value) -> Result<(), NotifyError> {
        // Payloads from manual actions name the child's family; scheduler events fall back to config.
        let family_id = payload
            .get("family_id")
            .and_then(|v| serde_json::from_value::<FamilyId>(v.clone()).ok())
            .or(self.family_id);

        let envelope = WebhookEnvelope::new(event, payload.clone(), family_id, self.clock.now());
        let signed = prepare_webhook(&envelope, self.secret.as_deref())?;

        let headers: Map<String, Value> = signed
            .headers
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        let line = serde_json::to_string(&json!({
            "event": event,
            "headers": headers,
            "body": signed.body,
        }))?;

        self.pending.lock().push(line);
        Ok(())
    }
}
