use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::processors::MailSender;

/// SMTP sender using STARTTLS on the configured relay.
pub struct EmailClient {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailClient {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
    ) -> Result<Self, Error> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| anyhow!("Invalid EMAIL_FROM address: {}", e))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        info!(host, port, "SMTP client initialized");

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl MailSender for EmailClient {
    async fn send_email(&self, subject: &str, body: &str, recipient: &str) -> Result<()> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| anyhow!("Invalid recipient address: {}", e))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        debug!(recipient, "Sending email");

        self.transport
            .send(email)
            .await
            .map_err(|e| anyhow!("SMTP send failed: {}", e))?;

        Ok(())
    }
}
