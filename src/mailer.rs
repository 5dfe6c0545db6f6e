// Outgoing mail for invitations, one-time codes and password resets

use std::sync::Arc;

use serde::Serialize;

use crate::error::AppResult;
use crate::http_client::HttpClient;
use crate::models::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail delivery abstraction.
#[tonic::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()>;
}

/// Writes messages to the log. Used when no delivery endpoint is configured.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[tonic::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Mail delivery not configured, message body follows:\n{}",
            email.body
        );
        Ok(())
    }
}

/// Posts messages as JSON to a delivery webhook. Delivery runs in the
/// background so a slow mail relay never blocks the request.
#[derive(Clone)]
pub struct WebhookMailer {
    url: String,
    http_client: Arc<HttpClient>,
}

impl WebhookMailer {
    pub fn new(url: String, http_client: Arc<HttpClient>) -> Self {
        Self { url, http_client }
    }
}

#[tonic::async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        let url = self.url.clone();
        let http_client = self.http_client.clone();

        tokio::spawn(async move {
            match http_client.post_json(&url, &email).await {
                Ok(response) => {
                    if response.status().is_success() {
                        tracing::info!("Mail sent to {}", email.to);
                    } else {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        tracing::error!("Mail webhook failed: {} - {}", status, body);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to call mail webhook: {}", e);
                }
            }
        });

        Ok(())
    }
}

pub fn invitation_email(
    to: &str,
    inviter_name: &str,
    workspace_name: &str,
    role: Role,
    app_base_url: &str,
    token: &str,
    expiry_days: i64,
) -> OutgoingEmail {
    let link = format!("{}/invite?token={}", app_base_url, urlencoding::encode(token));
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("{} invited you to join {}", inviter_name, workspace_name),
        body: format!(
            "{} has invited you to join the workspace \"{}\" as {}.\n\n\
             Accept the invitation here:\n{}\n\n\
             This invitation expires in {} days.",
            inviter_name, workspace_name, role, link, expiry_days
        ),
    }
}

pub fn otp_email(to: &str, code: &str, ttl_minutes: i64) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: "Your sign-in code".to_string(),
        body: format!(
            "Your sign-in code is {}.\n\nIt expires in {} minutes. If you did not request it, you can ignore this email.",
            code, ttl_minutes
        ),
    }
}

pub fn password_reset_email(to: &str, app_base_url: &str, token: &str) -> OutgoingEmail {
    let link = format!(
        "{}/auth/reset-password?token={}",
        app_base_url,
        urlencoding::encode(token)
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        body: format!(
            "Someone asked to reset the password of your account.\n\n\
             Choose a new password here:\n{}\n\n\
             If this was not you, you can ignore this email.",
            link
        ),
    }
}
