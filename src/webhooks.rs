//! Webhook notifications for finished extractions
//!
//! Delivery is fire and forget: [`WebhookNotifier::notify`] spawns the HTTP
//! request so the queue's driver task never waits on the network. Failures
//! are logged and published as [`Event::WebhookFailed`].

use crate::config::WebhookConfig;
use crate::error::{Error, Result};
use crate::types::{Event, ExtractionResult};
use crate::utils::format_duration;
use chrono::Utc;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::broadcast;

/// Response bodies are read (and discarded) up to this many bytes
const MAX_RESPONSE_BODY: usize = 1024 * 1024;

const DISCORD_GREEN: u32 = 3_066_993;
const DISCORD_RED: u32 = 15_158_332;

/// Posts extraction results to a single configured URL
#[derive(Clone)]
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
    event_tx: broadcast::Sender<Event>,
}

impl WebhookNotifier {
    /// Create a notifier; the client carries the configured timeout
    pub fn new(config: WebhookConfig, event_tx: broadcast::Sender<Event>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            event_tx,
        })
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Send `result` in the background if its event is subscribed
    pub fn notify(&self, result: &ExtractionResult) {
        let event = event_name(result);
        if !self.config.events.iter().any(|e| e == event) {
            tracing::debug!(event, name = %result.name, "webhook event not subscribed");
            return;
        }

        let payload = self.build_payload(result, event);
        let notifier = self.clone();

        tokio::spawn(async move {
            if let Err(e) = notifier.send(&payload).await {
                tracing::warn!(url = %notifier.config.url, error = %e, "webhook failed");
                notifier
                    .event_tx
                    .send(Event::WebhookFailed {
                        url: notifier.config.url.clone(),
                        error: e.to_string(),
                    })
                    .ok();
            } else {
                tracing::debug!(url = %notifier.config.url, "webhook sent successfully");
            }
        });
    }

    /// Send a synthetic successful result and wait for the response
    pub async fn test(&self) -> Result<()> {
        let result = ExtractionResult {
            name: "test-extraction".to_string(),
            source: "test".to_string(),
            path: "/downloads/test-extraction".into(),
            delete_original: false,
            started_at: Utc::now(),
            elapsed: Duration::from_secs(30),
            archive_count: 1,
            file_count: 10,
            total_bytes: 100 * 1024 * 1024,
            success: true,
            error: None,
        };
        let payload = self.build_payload(&result, "extracted");
        self.send(&payload).await
    }

    /// Payload for the configured template
    pub fn build_payload(&self, result: &ExtractionResult, event: &str) -> Value {
        match self.config.template.as_str() {
            "discord" => discord_payload(result),
            "slack" => slack_payload(result),
            "gotify" => gotify_payload(result),
            _ => json_payload(result, event),
        }
    }

    async fn send(&self, payload: &Value) -> Result<()> {
        let timeout = self.config.timeout;
        let request = async {
            let mut response = self.client.post(&self.config.url).json(payload).send().await?;
            let status = response.status();

            let mut drained = 0;
            while drained < MAX_RESPONSE_BODY {
                match response.chunk().await? {
                    Some(chunk) => drained += chunk.len(),
                    None => break,
                }
            }

            if status.as_u16() >= 400 {
                return Err(Error::Other(format!(
                    "webhook returned status {}",
                    status.as_u16()
                )));
            }
            Ok::<(), Error>(())
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::Other(format!(
                "webhook timed out after {:?}",
                timeout
            ))),
        }
    }
}

/// "extracted" or "failed"
pub fn event_name(result: &ExtractionResult) -> &'static str {
    if result.success { "extracted" } else { "failed" }
}

fn size_mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
}

fn discord_payload(result: &ExtractionResult) -> Value {
    let (status, color) = if result.success {
        ("✅ Extracted", DISCORD_GREEN)
    } else {
        ("❌ Failed", DISCORD_RED)
    };

    let mut fields = vec![
        json!({"name": "Archives", "value": result.archive_count.to_string(), "inline": true}),
        json!({"name": "Files", "value": result.file_count.to_string(), "inline": true}),
        json!({"name": "Size", "value": size_mib(result.total_bytes), "inline": true}),
    ];
    if let (false, Some(error)) = (result.success, &result.error) {
        fields.push(json!({"name": "Error", "value": error}));
    }

    json!({
        "embeds": [{
            "title": format!("{}: {}", status, result.name),
            "description": format!(
                "Source: {}\nDuration: {}",
                result.source,
                format_duration(result.elapsed)
            ),
            "color": color,
            "timestamp": result.started_at.to_rfc3339(),
            "fields": fields,
        }]
    })
}

fn slack_payload(result: &ExtractionResult) -> Value {
    let (status, color) = if result.success {
        ("Extracted", "good")
    } else {
        ("Failed", "danger")
    };

    let mut text = format!(
        "*{}:* {}\n*Source:* {}\n*Duration:* {}\n*Archives:* {} | *Files:* {} | *Size:* {}",
        status,
        result.name,
        result.source,
        format_duration(result.elapsed),
        result.archive_count,
        result.file_count,
        size_mib(result.total_bytes)
    );
    if let (false, Some(error)) = (result.success, &result.error) {
        text.push_str(&format!("\n*Error:* {}", error));
    }

    json!({
        "attachments": [{
            "color": color,
            "text": text,
            "ts": result.started_at.timestamp(),
        }]
    })
}

fn gotify_payload(result: &ExtractionResult) -> Value {
    let (status, priority) = if result.success {
        ("Extracted", 5)
    } else {
        ("Failed", 8)
    };

    let mut message = format!(
        "Source: {}\nDuration: {}\nArchives: {} | Files: {} | Size: {}",
        result.source,
        format_duration(result.elapsed),
        result.archive_count,
        result.file_count,
        size_mib(result.total_bytes)
    );
    if let (false, Some(error)) = (result.success, &result.error) {
        message.push_str(&format!("\nError: {}", error));
    }

    json!({
        "title": format!("{}: {}", status, result.name),
        "message": message,
        "priority": priority,
    })
}

fn json_payload(result: &ExtractionResult, event: &str) -> Value {
    let mut payload = json!({
        "event": event,
        "name": result.name,
        "source": result.source,
        "path": result.path,
        "success": result.success,
        "started": result.started_at.to_rfc3339(),
        "elapsed": format_duration(result.elapsed),
        "elapsed_ms": result.elapsed.as_millis() as u64,
        "archives": result.archive_count,
        "files": result.file_count,
        "size": result.total_bytes,
    });
    if let (Some(error), Some(map)) = (&result.error, payload.as_object_mut()) {
        map.insert("error".to_string(), Value::String(error.clone()));
    }
    payload
}
