//! Email sender backed by the Resend HTTP API.
//!
//! Rendered email content is a JSON object with `subject` and `body`; the
//! body is sent as HTML.

use serde::Serialize;

use herald_engine::processor::DispatchError;
use herald_engine::resolver::EmailContent;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Clone)]
pub struct EmailSender {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl EmailSender {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }

    /// Point the sender at another Resend-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn send(
        &self,
        to: &str,
        from: Option<&str>,
        reply_to: Option<&str>,
        content: &str,
    ) -> Result<(), DispatchError> {
        let from = from.ok_or_else(|| {
            DispatchError::Rejected("No sender address configured for email".to_string())
        })?;
        let email: EmailContent = parse_content(content)?;

        let payload = ResendEmail {
            from,
            to: [to],
            subject: &email.subject,
            html: &email.body,
            reply_to,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(format!("Resend request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(format!(
                "Resend returned HTTP {}: {detail}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

/// Placeholders are substituted on the raw string, so a variable containing
/// a quote can break the JSON.
fn parse_content(content: &str) -> Result<EmailContent, DispatchError> {
    serde_json::from_str(content).map_err(|e| {
        DispatchError::Rejected(format!("Rendered email is not a subject/body object: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rendered_content() {
        let email = parse_content(r#"{"subject":"Disk full","body":"<b>web-1</b>"}"#).unwrap();
        assert_eq!(email.subject, "Disk full");
        assert_eq!(email.body, "<b>web-1</b>");

        let err = parse_content(r#"{"subject":"say "hi"","body":"x"}"#).unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
    }

    #[test]
    fn test_payload_shape() {
        let payload = ResendEmail {
            from: "ops@herald.dev",
            to: ["a@herald.dev"],
            subject: "s",
            html: "b",
            reply_to: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["to"][0], "a@herald.dev");
        assert!(value.get("reply_to").is_none());
    }
}
