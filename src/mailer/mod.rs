//! Outbound delivery over SMTP.
use anyhow::{anyhow, Result};
use lettre::{
    message::{Mailbox, Message},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use mailparse::{addrparse, MailAddr};
use tracing::info;

use crate::config::SmtpSettings;
use crate::errors::{AppError, AppResult};

/// Recipient fields are comma-separated address lists.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub subject: String,
    pub body: String,
}

pub async fn send(smtp: &SmtpSettings, request: &SendRequest) -> AppResult<()> {
    deliver(smtp, request)
        .await
        .map_err(|e| AppError::RemoteUnavailable(format!("SMTP delivery failed: {e:#}")))
}

async fn deliver(smtp: &SmtpSettings, request: &SendRequest) -> Result<()> {
    let email = build_message(&smtp.from, request)?;

    let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());
    let tls_parameters = TlsParameters::builder(smtp.host.clone()).build()?;
    let builder = if smtp.port == 465 {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
            .port(smtp.port)
            .tls(Tls::Wrapper(tls_parameters))
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
            .port(smtp.port)
            .tls(Tls::Required(tls_parameters))
    };
    let mailer = builder.credentials(creds).build();

    mailer
        .send(email)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    info!(host = %smtp.host, subject = %request.subject, "Message delivered");
    Ok(())
}

pub fn build_message(from: &str, request: &SendRequest) -> Result<Message> {
    let from_addr = parse_mailbox(from)?;
    let to_addrs = parse_mailbox_list(&request.to)?;
    let cc_addrs = parse_mailbox_list(&request.cc)?;
    let bcc_addrs = parse_mailbox_list(&request.bcc)?;
    if to_addrs.is_empty() && cc_addrs.is_empty() && bcc_addrs.is_empty() {
        return Err(anyhow!("No recipients"));
    }

    let mut builder = Message::builder().from(from_addr).subject(&request.subject);
    for addr in to_addrs {
        builder = builder.to(addr);
    }
    for addr in cc_addrs {
        builder = builder.cc(addr);
    }
    for addr in bcc_addrs {
        builder = builder.bcc(addr);
    }
    Ok(builder.body(request.body.clone())?)
}

fn parse_mailbox(input: &str) -> Result<Mailbox> {
    let trimmed = input.trim();
    if let (Some(start), Some(end)) = (trimmed.find('<'), trimmed.find('>')) {
        let name = trimmed[..start].trim().trim_matches('"');
        let addr = trimmed[start + 1..end].trim();
        let name = (!name.is_empty()).then(|| name.to_string());
        return Ok(Mailbox::new(name, addr.parse()?));
    }
    Ok(Mailbox::new(None, trimmed.parse()?))
}

fn parse_mailbox_list(input: &str) -> Result<Vec<Mailbox>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parsed = addrparse(trimmed)?;

    let mut out = Vec::new();
    for addr in parsed.iter() {
        match addr {
            MailAddr::Single(info) => {
                out.push(Mailbox::new(info.display_name.clone(), info.addr.parse()?));
            }
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    out.push(Mailbox::new(info.display_name.clone(), info.addr.parse()?));
                }
            }
        }
    }
    Ok(out)
}
