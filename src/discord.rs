use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::alerts::AlertTransition;
use crate::config::Discord;
use crate::model::{ServiceAvailability, ServiceMonitor};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscordManager {
    client: Client,
}

impl DiscordManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn build_service_embed(
        &self,
        monitor: &ServiceMonitor,
        availability: &ServiceAvailability,
        transition: AlertTransition,
        last_error: Option<&str>,
    ) -> Embed {
        let (title, description, color) = match transition {
            AlertTransition::Firing => (
                "🔴 Service Failing",
                format!(
                    "**{}** failed {} of {} checks in the last window",
                    monitor.name, availability.failed_checks, availability.total_checks
                ),
                15158332, // Red
            ),
            AlertTransition::Resolved => (
                "✅ Service Recovered",
                format!("**{}** is healthy again", monitor.name),
                3066993, // Green
            ),
        };

        let mut fields = vec![
            EmbedField {
                name: "📊 Availability".to_string(),
                value: format!("{:.2}%", availability.availability),
                inline: true,
            },
            EmbedField {
                name: "⚠️ Threshold".to_string(),
                value: format!("{} failed checks", monitor.failure_threshold),
                inline: true,
            },
        ];

        if let Some(avg) = availability.avg_latency_ms {
            fields.push(EmbedField {
                name: "⏱️ Avg Latency".to_string(),
                value: format!("{:.0} ms", avg),
                inline: true,
            });
        }

        if let Some(err) = last_error {
            fields.push(EmbedField {
                name: "❗ Last Error".to_string(),
                value: err.to_string(),
                inline: false,
            });
        }

        Embed {
            title: Some(title.to_string()),
            description: Some(description),
            color: Some(color),
            fields,
            footer: Some(EmbedFooter {
                text: format!("{} | {}", monitor.probe_type(), monitor.target),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    #[instrument(skip(self, discord, message))]
    pub async fn send_message(&self, discord: &Discord, message: &Message) {
        match self.client.post(&discord.url).json(message).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent Discord message");
                } else {
                    error!("Discord message failed with status: {}", response.status());
                    if let Ok(error_text) = response.text().await {
                        error!("Discord API error response: {}", error_text);
                    }
                }
            }
            Err(e) => {
                error!("Failed to send Discord message: {}", e);
            }
        }
    }
}
