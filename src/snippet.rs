//! Managed keys of the tblocker configuration.
//!
//! The snippet is rebuilt from the bot token and chat id on every update and
//! merged over the live file. It is never written on its own.

use crate::error::InputError;
use serde::Serialize;
use serde_yaml::Value;

pub const STORAGE_DIR: &str = "/opt/tblocker";

/// Loopback plus the published Cloudflare ranges.
pub const BYPASS_IPS: &[&str] = &[
    "127.0.0.1",
    "::1",
    "173.245.48.0/20",
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "141.101.64.0/18",
    "108.162.192.0/18",
    "190.93.240.0/20",
    "188.114.96.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
    "162.158.0.0/15",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "172.64.0.0/13",
    "131.0.72.0/22",
    "2400:cb00::/32",
    "2606:4700::/32",
    "2803:f800::/32",
    "2405:b500::/32",
    "2405:8100::/32",
    "2a06:98c0::/29",
    "2c0f:f248::/32",
];

const WEBHOOK_URL_PREFIX: &str = "https://api.telegram.org/bot";

// Filled in by tblocker: user, ip, server, action, duration (minutes), time.
const MESSAGE_TEXT: &str =
    "<b>tblocker</b>\nUser: %s\nIP: %s\nServer: %s\nAction: %s\nDuration: %d min\nTime: %s";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snippet {
    #[serde(rename = "BypassIPS")]
    pub bypass_ips: Vec<String>,
    #[serde(rename = "StorageDir")]
    pub storage_dir: String,
    #[serde(rename = "SendWebhook")]
    pub send_webhook: bool,
    #[serde(rename = "WebhookURL")]
    pub webhook_url: String,
    #[serde(rename = "WebhookTemplate")]
    pub webhook_template: String,
}

impl Snippet {
    /// The snippet as a YAML mapping, ready to be merged.
    pub fn to_value(&self) -> Value {
        // A struct of strings, bools and string lists always serializes.
        serde_yaml::to_value(self).unwrap_or(Value::Null)
    }
}

/// Build the managed keys from the operator's secrets.
///
/// Both inputs are trimmed; an empty result is rejected before anything
/// else happens.
pub fn build_snippet(bot_token: &str, chat_id: &str) -> Result<Snippet, InputError> {
    let bot_token = bot_token.trim();
    let chat_id = chat_id.trim();
    if bot_token.is_empty() {
        return Err(InputError::EmptyToken);
    }
    if chat_id.is_empty() {
        return Err(InputError::EmptyChatId);
    }

    Ok(Snippet {
        bypass_ips: BYPASS_IPS.iter().map(|s| s.to_string()).collect(),
        storage_dir: STORAGE_DIR.to_string(),
        send_webhook: true,
        webhook_url: format!("{WEBHOOK_URL_PREFIX}{bot_token}/sendMessage"),
        webhook_template: webhook_template(chat_id),
    })
}

fn webhook_template(chat_id: &str) -> String {
    serde_json::json!({
        "chat_id": chat_id,
        "parse_mode": "HTML",
        "text": MESSAGE_TEXT,
    })
    .to_string()
}

/// Token with everything but the bot id replaced, for logs.
pub fn mask_token(token: &str) -> String {
    match token.trim().split_once(':') {
        Some((id, _)) => format!("{id}:***"),
        None => "***".to_string(),
    }
}
