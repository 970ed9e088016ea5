use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{NotifyArgs, NotifyError, Notifier};
use crate::config::Config;

/// `EMAIL`: STARTTLS SMTP via `lettre`, mirroring
/// `notify_via_email`'s `smtplib.SMTP(...).starttls()` flow.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn from_config(config: &Config) -> Self {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .map(|b| b.port(config.smtp_port).credentials(creds).build())
            .unwrap_or_else(|_| AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_server).build());
        EmailNotifier { transport }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, args: &NotifyArgs) -> Result<(), NotifyError> {
        let (sender, recipient, subject, body) = match args {
            NotifyArgs::Email { sender, recipient, subject, body } => (sender, recipient, subject, body),
            other => return Err(NotifyError::InvalidArgs(format!("EMAIL notifier received {other:?}"))),
        };

        let from: Mailbox = sender
            .parse()
            .map_err(|e| NotifyError::InvalidArgs(format!("invalid sender address: {e}")))?;
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| NotifyError::InvalidArgs(format!("invalid recipient address: {e}")))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject.clone())
            .body(body.clone())
            .map_err(|e| NotifyError::InvalidArgs(format!("failed to build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(())
    }
}
