//! SMTP alert transport
//!
//! Async SMTP delivery with optional STARTTLS. Every notification carries an
//! HTML body plus a plain-text fallback.

use crate::common::config::SmtpConfig;
use crate::errors::Result;
use lettre::message::{Mailbox, MultiPart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, instrument};

/// Async mailer over one configured SMTP relay.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let transport = if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
                .port(config.port)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        };

        Ok(Self {
            transport,
            from: config.from_address.parse()?,
        })
    }

    /// Send one message to every recipient. Fails on the first transport
    /// error; the caller records the failure rather than retrying.
    #[instrument(skip(self, html_body, text_body))]
    pub async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in recipients {
            builder = builder.to(recipient.parse()?);
        }

        let message = builder.multipart(MultiPart::alternative_plain_html(
            text_body.to_string(),
            html_body.to_string(),
        ))?;

        self.transport.send(message).await?;
        info!("Sent alert e-mail to {} recipient(s)", recipients.len());
        Ok(())
    }
}
