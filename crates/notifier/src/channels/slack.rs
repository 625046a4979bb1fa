//! Slack incoming-webhook sender.

use serde_json::json;

use herald_engine::processor::DispatchError;

/// Posts rendered text to a Slack incoming webhook.
#[derive(Clone)]
pub struct SlackSender {
    client: reqwest::Client,
}

impl SlackSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn send(&self, webhook_url: &str, text: &str) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| DispatchError::Transport(format!("Slack request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected(format!(
                "Slack webhook returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}
