use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::{Client, Url};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification endpoint returned {0}")]
    Status(u16),
    #[error("invalid webhook url: {0}")]
    Url(String),
}

/// A booking confirmation addressed to one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub to: String,
    pub customer_name: String,
    pub service_name: String,
    pub start: DateTime<Utc>,
    /// `start` rendered in the business time zone.
    pub when: String,
    pub business: String,
}

impl Confirmation {
    pub fn new(
        to: &str,
        customer_name: &str,
        service_name: &str,
        start: DateTime<Utc>,
        tz: Tz,
        business: &str,
    ) -> Self {
        Self {
            to: to.to_string(),
            customer_name: customer_name.to_string(),
            service_name: service_name.to_string(),
            start,
            when: start
                .with_timezone(&tz)
                .format("%A, %B %-d, %Y at %-I:%M %p %Z")
                .to_string(),
            business: business.to_string(),
        }
    }

    pub fn subject(&self) -> String {
        format!("Booking Confirmed: {}", self.service_name)
    }

    pub fn body(&self) -> String {
        format!(
            "Hi {},\n\nYour appointment for {} is confirmed!\n\nWhen: {}\n\nSee you soon,\n{}\n",
            self.customer_name, self.service_name, self.when, self.business
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, msg: &Confirmation) -> Result<(), NotifyError>;
}

/// Writes the rendered message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_confirmation(&self, msg: &Confirmation) -> Result<(), NotifyError> {
        tracing::info!(
            to = %msg.to,
            subject = %msg.subject(),
            "confirmation (log delivery)\n{}",
            msg.body()
        );
        Ok(())
    }
}

/// POSTs the confirmation as JSON to a mail relay or automation hook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    confirmation: &'a Confirmation,
    subject: String,
    body: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let url = Url::parse(url).map_err(|e| NotifyError::Url(e.to_string()))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_confirmation(&self, msg: &Confirmation) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            confirmation: msg,
            subject: msg.subject(),
            body: msg.body(),
        };
        let resp = self.client.post(self.url.clone()).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}
