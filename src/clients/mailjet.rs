//! Outbound email via the Mailjet v3.1 send API.
//!
//! The [`Mailer`] trait is the seam the identity flows depend on. The
//! real client reports the provider's status code and parsed body in a
//! [`MailResult`]; callers map 4xx/5xx onto their own error responses.
//! `LogMailer` stands in for the provider in dev and tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

use crate::config::MailConfig;

const MAILJET_SEND_API: &str = "https://api.mailjet.com/v3.1/send";

/// Structured delivery result: the provider's status code plus its JSON
/// body, parseable as either `{Messages:[{Errors:[...]}]}` or
/// `{Messages:"..."}` on failure.
#[derive(Debug, Clone)]
pub struct MailResult {
    pub status_code: u16,
    pub body: Value,
}

impl MailResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }

    /// Flatten the provider's failure body into a displayable string.
    #[must_use]
    pub fn error_details(&self) -> String {
        if let Some(messages) = self.body.get("Messages") {
            if let Some(text) = messages.as_str() {
                return text.to_string();
            }

            if let Some(list) = messages.as_array() {
                let errors: Vec<String> = list
                    .iter()
                    .filter_map(|m| m.get("Errors"))
                    .filter_map(Value::as_array)
                    .flatten()
                    .map(|err| {
                        err.get("ErrorMessage")
                            .and_then(Value::as_str)
                            .map_or_else(|| err.to_string(), ToString::to_string)
                    })
                    .collect();

                if !errors.is_empty() {
                    return errors.join(", ");
                }
            }
        }

        self.body.to_string()
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_confirmation(
        &self,
        email: &str,
        username: &str,
        url: &str,
    ) -> Result<MailResult>;

    async fn send_password_reset(
        &self,
        email: &str,
        username: &str,
        url: &str,
    ) -> Result<MailResult>;
}

pub struct MailjetClient {
    client: Client,
    api_key: String,
    api_secret: String,
    sender_email: String,
    sender_name: String,
}

impl MailjetClient {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent("U4I/1.0")
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build Mailjet HTTP client: {e}"))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            sender_email: config.sender_email.clone(),
            sender_name: config.sender_name.clone(),
        })
    }

    async fn send(
        &self,
        email: &str,
        username: &str,
        subject: &str,
        text: String,
    ) -> Result<MailResult> {
        let payload = json!({
            "Messages": [{
                "From": {
                    "Email": self.sender_email,
                    "Name": self.sender_name,
                },
                "To": [{
                    "Email": email,
                    "Name": username,
                }],
                "Subject": subject,
                "TextPart": text,
            }]
        });

        let response = self
            .client
            .post(MAILJET_SEND_API)
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .json(&payload)
            .send()
            .await
            .context("Mailjet request failed")?;

        let status_code = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(MailResult { status_code, body })
    }
}

#[async_trait]
impl Mailer for MailjetClient {
    async fn send_confirmation(
        &self,
        email: &str,
        username: &str,
        url: &str,
    ) -> Result<MailResult> {
        let text = format!(
            "Hi {username},\n\nPlease validate your email address by visiting the link below:\n\n{url}\n\nThis link expires in one hour.\n\n- URLS4IRL"
        );
        self.send(email, username, "Validate your URLS4IRL email", text)
            .await
    }

    async fn send_password_reset(
        &self,
        email: &str,
        username: &str,
        url: &str,
    ) -> Result<MailResult> {
        let text = format!(
            "Hi {username},\n\nA password reset was requested for your account. Visit the link below to choose a new password:\n\n{url}\n\nIf you did not request this, you can ignore this email.\n\n- URLS4IRL"
        );
        self.send(email, username, "Reset your URLS4IRL password", text)
            .await
    }
}

/// Dev/test sender that logs the would-be email and reports success.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_confirmation(
        &self,
        email: &str,
        username: &str,
        url: &str,
    ) -> Result<MailResult> {
        info!(to = %email, user = %username, url = %url, "confirmation email send stub");
        Ok(MailResult {
            status_code: 200,
            body: Value::Null,
        })
    }

    async fn send_password_reset(
        &self,
        email: &str,
        username: &str,
        url: &str,
    ) -> Result<MailResult> {
        info!(to = %email, user = %username, url = %url, "password reset email send stub");
        Ok(MailResult {
            status_code: 200,
            body: Value::Null,
        })
    }
}
