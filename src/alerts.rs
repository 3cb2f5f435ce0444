use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

use crate::task::{TaskKind, TaskStatus};

const GREEN: u32 = 0x00FF00;
const BLUE: u32 = 0x0099FF;
const ORANGE: u32 = 0xFFA500;
const RED: u32 = 0xFF0000;

/// Discord webhook notifier for task lifecycle events
#[derive(Clone)]
pub struct AlertClient {
    client: Client,
    webhook_url: Option<String>,
}

impl AlertClient {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, webhook_url }
    }

    /// No-op client
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Post one embed; failures are logged and swallowed
    async fn send(&self, content: &str, color: u32) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        let payload = json!({
            "embeds": [{
                "description": content,
                "color": color
            }]
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => debug!("Discord alert sent"),
            Ok(resp) => error!("Discord alert rejected: HTTP {}", resp.status()),
            Err(e) => error!("Failed to send Discord alert: {}", e),
        }
    }

    pub async fn task_started(&self, task_id: &str, kind: TaskKind, dry_run: bool) {
        let mode = if dry_run { "DRY RUN" } else { "LIVE" };
        let msg = format!(
            "🚀 **Task Started**\n{} `{}`\nMode: {}",
            kind.as_str(),
            task_id,
            mode
        );
        self.send(&msg, BLUE).await;
    }

    pub async fn task_finished(&self, task_id: &str, kind: TaskKind, status: TaskStatus, detail: &str) {
        let (emoji, color) = match status {
            TaskStatus::Completed => ("✅", GREEN),
            TaskStatus::Error => ("❌", RED),
            _ => ("⛔", ORANGE),
        };
        let mut msg = format!(
            "{} **Task {}**\n{} `{}`",
            emoji,
            status.as_str().to_uppercase(),
            kind.as_str(),
            task_id
        );
        if !detail.is_empty() {
            msg.push_str(&format!("\n```{}```", detail));
        }
        self.send(&msg, color).await;
    }
}
