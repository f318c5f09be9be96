// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Slack notifications for zone updates.

use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::config::SlackConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("received error: {0}")]
    Response(String),
}

/// Post a zone-update notification. A missing webhook URL disables
/// notifications; failures never affect zone state, the caller only logs
/// them.
pub async fn notify_slack(
    config: &SlackConfig,
    zone: &str,
    serial: u32,
    diff: &str,
) -> Result<(), NotifyError> {
    if config.webhook_url.is_empty() {
        return Ok(());
    }
    let payload = json!({
        "channel": config.channel,
        "username": config.name,
        "icon_emoji": config.icon_emoji,
        "icon_url": config.icon_url,
        "attachments": [{
            "fallback": format!("{zone} is updated."),
            "color": "#36a64f",
            "title": "DNS zone update notification",
            "fields": [
                {"title": "Zone", "value": zone, "short": true},
                {"title": "Serial", "value": serial.to_string(), "short": true},
                {"title": "Timestamp", "value": Utc::now().to_rfc3339(), "short": false},
                {"title": "Diff", "value": diff, "short": false},
            ],
        }],
    });
    let response = reqwest::Client::new().post(&config.webhook_url).json(&payload).send().await?;
    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NotifyError::Response(body));
    }
    Ok(())
}
