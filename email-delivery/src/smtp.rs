use anyhow::{Context, Result};
use async_trait::async_trait;
use interfaces::defs::{DeliveryError, DeliveryReceipt, DeliveryRequest, Dispatcher};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::Tls;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info};

pub const EPUB_CONTENT_TYPE: &str = "application/epub+zip";

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    /// Upgrade the connection with STARTTLS. Only local test relays run without it.
    pub starttls: bool,
    pub timeout: Duration,
}

/// Sends each artifact as a single mail with the EPUB attached.
pub struct SmtpDispatcher {
    from: Mailbox,
    server: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpDispatcher {
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        let from = parse_mailbox(&settings.from_address)?;

        let builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
                .with_context(|| format!("invalid SMTP relay '{}'", settings.server))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.server).tls(Tls::None)
        };

        let mut builder = builder.port(settings.port).timeout(Some(settings.timeout));
        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(settings.username.clone(), settings.password.clone()));
        }

        debug!(
            "SMTP transport for {}:{} (starttls: {})",
            settings.server, settings.port, settings.starttls
        );
        Ok(Self {
            from,
            server: settings.server,
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Dispatcher for SmtpDispatcher {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn dispatch(&self, request: DeliveryRequest) -> std::result::Result<DeliveryReceipt, DeliveryError> {
        let to = parse_mailbox(&request.destination).map_err(|e| DeliveryError::InvalidAddress {
            address: request.destination.clone(),
            reason: e.to_string(),
        })?;
        let bytes = request.artifact.len();
        let destination = request.destination.clone();

        let message = build_message(self.from.clone(), to, request)
            .map_err(|e| DeliveryError::Message(format!("{:#}", e)))?;

        info!("Sending {} bytes to {} via {}", bytes, destination, self.server);
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        debug!("SMTP server replied {}", response.code());

        Ok(DeliveryReceipt {
            destination,
            bytes_sent: bytes,
            sent: true,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse::<Mailbox>()
        .with_context(|| format!("'{}' is not a valid email address", address))
}

/// A multipart/mixed mail: a short text note plus the artifact as an attachment.
pub fn build_message(from: Mailbox, to: Mailbox, request: DeliveryRequest) -> Result<Message> {
    let note = format!(
        "Your newspaper is attached as {} ({} KB).\n",
        request.file_name,
        request.artifact.len().div_ceil(1024)
    );
    let content_type = ContentType::parse(EPUB_CONTENT_TYPE).context("invalid attachment content type")?;
    let attachment = Attachment::new(request.file_name).body(request.artifact, content_type);

    Message::builder()
        .from(from)
        .to(to)
        .subject(request.subject)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(note))
                .singlepart(attachment),
        )
        .context("failed to assemble message")
}
