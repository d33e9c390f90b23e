//! Outbound email. The core only needs "send this message to this address";
//! delivery failures are surfaced to the caller, never retried here.
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("mail transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail provider rejected message with status {status}")]
    Rejected { status: u16 },
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), DeliveryError>;
}

/// Resend-style JSON API: `POST {api_url}` with a bearer API key.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct SendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: &Email) -> Result<(), DeliveryError> {
        let payload = SendPayload {
            from: &self.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            text: &email.body,
        };
        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
            });
        }
        info!("email accepted by provider");
        Ok(())
    }
}

/// Development mailer: records that a message would have been sent. The body
/// may carry a reset link, so only the envelope is logged.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), DeliveryError> {
        info!(to = %email.to, subject = %email.subject, "email delivery disabled; message dropped");
        Ok(())
    }
}

pub fn from_config(cfg: &MailConfig) -> Arc<dyn Mailer> {
    match &cfg.api_key {
        Some(key) => Arc::new(HttpMailer::new(
            cfg.api_url.clone(),
            key.clone(),
            cfg.from_address.clone(),
        )),
        None => {
            tracing::warn!("MAIL_API_KEY not set; outgoing email will only be logged");
            Arc::new(LogMailer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let payload = SendPayload {
            from: "noreply@userhub.local",
            to: ["a@x.com"],
            subject: "Reset",
            text: "body",
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["to"][0], "a@x.com");
        assert_eq!(json["from"], "noreply@userhub.local");
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mail = Email {
            to: "a@x.com".into(),
            subject: "hi".into(),
            body: "secret link".into(),
        };
        assert!(LogMailer.send(&mail).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_delivery_error() {
        let mailer = HttpMailer::new(
            "http://127.0.0.1:9/emails".into(),
            "key".into(),
            "noreply@userhub.local".into(),
        );
        let mail = Email {
            to: "a@x.com".into(),
            subject: "hi".into(),
            body: "body".into(),
        };
        assert!(matches!(
            mailer.send(&mail).await.unwrap_err(),
            DeliveryError::Transport(_)
        ));
    }
}
