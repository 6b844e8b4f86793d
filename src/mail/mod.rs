//! Mail dispatch through the connected mailbox.
//!
//! Sends are attempted once. A rejected send surfaces as
//! [`ConnectorError::MailDelivery`] with the upstream status and body; retry
//! policy belongs to the caller.

use crate::error::{ConnectorError, Result};
use crate::oauth::ProviderEndpoints;
use crate::token::AccessTokenProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// A message to send from the connected mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    /// Trimmed recipients; fails on an empty list or a blank address.
    fn recipients(&self) -> Result<Vec<&str>> {
        if self.to.is_empty() {
            return Err(ConnectorError::InvalidMessage(
                "at least one recipient is required".to_string(),
            ));
        }

        self.to
            .iter()
            .map(|address| {
                let address = address.trim();
                if address.is_empty() {
                    Err(ConnectorError::InvalidMessage(
                        "recipient address must not be blank".to_string(),
                    ))
                } else {
                    Ok(address)
                }
            })
            .collect()
    }
}

// Wire shape of the send-mail request body

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest<'a> {
    message: WireMessage<'a>,
    save_to_sent_items: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage<'a> {
    subject: &'a str,
    body: WireBody<'a>,
    to_recipients: Vec<Recipient<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reply_to: Vec<Recipient<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    email_address: Address<'a>,
}

#[derive(Serialize)]
struct Address<'a> {
    address: &'a str,
}

impl<'a> Recipient<'a> {
    fn new(address: &'a str) -> Self {
        Self {
            email_address: Address { address },
        }
    }
}

/// Sends mail as the allow-listed mailbox.
pub struct MailDispatcher {
    tokens: Arc<AccessTokenProvider>,
    http: reqwest::Client,
    send_url: String,
}

impl MailDispatcher {
    pub fn new(
        tokens: Arc<AccessTokenProvider>,
        endpoints: &ProviderEndpoints,
        mailbox: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            tokens,
            http,
            send_url: endpoints.send_mail_url(mailbox.trim()),
        })
    }

    /// Sends `message`.
    ///
    /// Fails with `InvalidMessage` before any network call if the recipient
    /// list is unusable, with the token provider's error if no valid token is
    /// available, and with `MailDelivery` if the send call is rejected.
    pub async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let recipients = message.recipients()?;
        let access_token = self.tokens.access_token().await?;

        let reply_to = message
            .reply_to
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(Recipient::new)
            .into_iter()
            .collect();

        let request = SendMailRequest {
            message: WireMessage {
                subject: &message.subject,
                body: WireBody {
                    content_type: "HTML",
                    content: &message.html_body,
                },
                to_recipients: recipients.iter().copied().map(Recipient::new).collect(),
                reply_to,
            },
            save_to_sent_items: false,
        };

        let response = self
            .http
            .post(&self.send_url)
            .bearer_auth(&access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Send-mail request did not complete");
                ConnectorError::MailDelivery {
                    status: None,
                    body: e.to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            error!(status = %status, body = %body, "Send-mail request rejected");
            return Err(ConnectorError::MailDelivery {
                status: Some(status.as_u16()),
                body,
            });
        }

        info!(recipients = recipients.len(), "Mail sent");
        Ok(())
    }
}
