use std::future::Future;

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info, warn};

use crate::{
    config::SmtpConfig,
    error::{AuthError, AuthResult},
};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("failed to build email message: {0}")]
    MessageBuild(String),
    #[error("failed to send email: {0}")]
    SendFailed(String),
    #[error("mail configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailKind {
    VerificationCode,
    Welcome,
    PasswordReset,
}

/// Outbound notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailMessage {
    VerificationCode { to: String, code: String },
    Welcome { to: String, first_name: String },
    PasswordReset { to: String, code: String },
}

impl MailMessage {
    pub fn to(&self) -> &str {
        match self {
            MailMessage::VerificationCode { to, .. }
            | MailMessage::Welcome { to, .. }
            | MailMessage::PasswordReset { to, .. } => to,
        }
    }

    pub fn kind(&self) -> MailKind {
        match self {
            MailMessage::VerificationCode { .. } => MailKind::VerificationCode,
            MailMessage::Welcome { .. } => MailKind::Welcome,
            MailMessage::PasswordReset { .. } => MailKind::PasswordReset,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            MailMessage::VerificationCode { .. } => "Verify your ScriptPhi account",
            MailMessage::Welcome { .. } => "Welcome to ScriptPhi",
            MailMessage::PasswordReset { .. } => "Reset your ScriptPhi password",
        }
    }

    pub fn html_body(&self) -> String {
        match self {
            MailMessage::VerificationCode { code, .. } => code_body(
                "Verify your email",
                "Enter this code to finish creating your account:",
                code,
            ),
            MailMessage::PasswordReset { code, .. } => code_body(
                "Password reset",
                "Use this code to choose a new password:",
                code,
            ),
            MailMessage::Welcome { first_name, .. } => format!(
                r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #333;">Welcome, {first_name}!</h1>
    <p>Your account is verified and ready to use.</p>
</body>
</html>
"#
            ),
        }
    }
}

fn code_body(title: &str, lead: &str, code: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #333;">{title}</h1>
    <p>{lead}</p>
    <p style="font-size: 32px; letter-spacing: 6px; text-align: center; margin: 30px 0;"><strong>{code}</strong></p>
    <p style="color: #999; font-size: 12px; margin-top: 40px;">This code expires in 15 minutes. If you did not request it, you can ignore this email.</p>
</body>
</html>
"#
    )
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, MailError> {
        let credentials = Credentials::new(cfg.username.clone(), cfg.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .map_err(|e| MailError::Config(format!("SMTP starttls error: {e}")))?
            .port(cfg.port)
            .credentials(credentials)
            .build();
        Ok(Self {
            transport,
            from: format!("{} <{}>", cfg.from_name, cfg.from_email),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| MailError::MessageBuild(format!("invalid from address: {e}")))?,
            )
            .to(message
                .to()
                .parse()
                .map_err(|e| MailError::MessageBuild(format!("invalid to address: {e}")))?)
            .subject(message.subject())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body())
            .map_err(|e| MailError::MessageBuild(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them. Development only.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        match &message {
            MailMessage::VerificationCode { to, code } | MailMessage::PasswordReset { to, code } => {
                let masked = mask_code(code);
                info!(to = %to, kind = ?message.kind(), code = %masked, "[log mailer] code email");
                debug!(to = %to, code = %code, "[log mailer] full code");
            }
            MailMessage::Welcome { to, .. } => info!(to = %to, "[log mailer] welcome email"),
        }
        Ok(())
    }
}

/// Keeps the first two digits of a code.
fn mask_code(code: &str) -> String {
    code.chars()
        .enumerate()
        .map(|(i, c)| if i < 2 { c } else { '*' })
        .collect()
}

pub fn mailer_from_config(smtp: Option<&SmtpConfig>) -> Box<dyn Mailer> {
    match smtp.map(SmtpMailer::new) {
        Some(Ok(mailer)) => {
            info!("using SMTP mailer");
            Box::new(mailer)
        }
        Some(Err(e)) => {
            warn!(error = %e, "SMTP mailer unavailable, falling back to log mailer (development only)");
            Box::new(LogMailer)
        }
        None => {
            warn!("SMTP not configured, emails will be logged; log mailer is for development only");
            Box::new(LogMailer)
        }
    }
}

/// Whether a side effect's failure aborts the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Required,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped,
}

pub async fn deliver<F>(effect: Effect, what: &str, send: F) -> AuthResult<Delivery>
where
    F: Future<Output = Result<(), MailError>>,
{
    match (send.await, effect) {
        (Ok(()), _) => Ok(Delivery::Sent),
        (Err(e), Effect::Required) => Err(AuthError::from(e)),
        (Err(e), Effect::BestEffort) => {
            warn!(error = %e, what, "best-effort email dropped");
            Ok(Delivery::Dropped)
        }
    }
}
