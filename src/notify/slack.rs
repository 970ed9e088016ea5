use async_trait::async_trait;
use log::warn;
use serde_json::json;

use super::{NotifyArgs, NotifyError, Notifier};
use crate::config::Config;

/// `SLACK`: a plain `reqwest` POST to the Slack Web API's
/// `chat.postMessage`, bearer-authenticated with the bot token.
pub struct SlackNotifier {
    http: reqwest::Client,
    bot_token: String,
}

impl SlackNotifier {
    pub fn from_config(config: &Config) -> Self {
        SlackNotifier {
            http: reqwest::Client::new(),
            bot_token: config.slack_bot_token.clone(),
        }
    }

    #[cfg(test)]
    fn new_for_test(base_url: &str, bot_token: &str) -> (Self, String) {
        let notifier = SlackNotifier { http: reqwest::Client::new(), bot_token: bot_token.to_string() };
        (notifier, base_url.to_string())
    }
}

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, args: &NotifyArgs) -> Result<(), NotifyError> {
        let (message, channel) = match args {
            NotifyArgs::Slack { message, channel } => (message, channel),
            other => return Err(NotifyError::InvalidArgs(format!("SLACK notifier received {other:?}"))),
        };

        let resp = self
            .http
            .post(SLACK_POST_MESSAGE_URL)
            .bearer_auth(&self.bot_token)
            .json(&json!({ "channel": channel, "text": message }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NotifyError::Transport(format!("slack API returned {}", resp.status())));
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| NotifyError::Transport(e.to_string()))?;
        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let err = body.get("error").and_then(|v| v.as_str()).unwrap_or("unknown slack error");
            warn!("slack API reported failure: {err}");
            return Err(NotifyError::Transport(err.to_string()));
        }
        Ok(())
    }
}
