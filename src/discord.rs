//! Optional Discord run notifications.

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info};

use crate::pipeline::PartitionReport;

const USERNAME: &str = "geomaster";
const COLOR_OK: u32 = 0x00FF00;
const COLOR_FAILED: u32 = 0xFF0000;

#[derive(Serialize, Debug)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
}

#[derive(Serialize, Debug)]
struct DiscordPayload {
    username: String,
    embeds: Vec<DiscordEmbed>,
}

pub struct DiscordWebhook {
    url: String,
    client: reqwest::Client,
}

/// Embed text for a finished partition.
pub fn partition_summary(report: &PartitionReport) -> String {
    let s = &report.stats;
    format!(
        "**{}**: {} distinct addresses, {} cache hits, {} new lookups \
         ({} resolved, {} unresolved, {} transient). Cache now holds **{}** addresses.",
        report.partition,
        s.total,
        s.cache_hits,
        s.lookups,
        s.resolved,
        s.unresolved,
        s.transient_failures,
        report.cache_size
    )
}

impl DiscordWebhook {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn send(&self, title: &str, description: &str, success: bool) -> Result<()> {
        let payload = DiscordPayload {
            username: USERNAME.to_string(),
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description: description.to_string(),
                color: if success { COLOR_OK } else { COLOR_FAILED },
                timestamp: chrono::Utc::now().to_rfc3339(),
            }],
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            error!("Failed to send Discord notification: {}", error_text);
            anyhow::bail!("Discord notification failed: {}", error_text);
        }

        info!("Sent Discord notification: {}", title);
        Ok(())
    }

    pub async fn partition_done(&self, report: &PartitionReport) -> Result<()> {
        self.send("Partition Geocoded", &partition_summary(report), true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ResolveStats;

    #[test]
    fn test_partition_summary() {
        let report = PartitionReport {
            partition: "hittakuri".into(),
            stats: ResolveStats {
                total: 12,
                cache_hits: 9,
                lookups: 3,
                resolved: 2,
                unresolved: 1,
                transient_failures: 0,
                checkpoints: 1,
            },
            cache_size: 340,
        };
        let text = partition_summary(&report);
        assert!(text.starts_with("**hittakuri**: 12 distinct addresses, 9 cache hits"));
        assert!(text.ends_with("Cache now holds **340** addresses."));
    }

    #[test]
    fn test_payload_shape() {
        let payload = DiscordPayload {
            username: USERNAME.into(),
            embeds: vec![DiscordEmbed {
                title: "t".into(),
                description: "d".into(),
                color: COLOR_OK,
                timestamp: "2024-01-01T00:00:00+00:00".into(),
            }],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["username"], "geomaster");
        assert_eq!(value["embeds"][0]["color"], 0x00FF00);
    }
}
