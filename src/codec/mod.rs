use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeader, MailHeaderMap, ParsedMail};
use tracing::warn;

use crate::imap::RemoteMessage;
use crate::types::{MessageDetail, StoredMessage};

pub const UNKNOWN_ADDRESS: &str = "unknown";
pub const BODY_UNAVAILABLE: &str = "Email content not available (unable to fetch from server)";

/// Builds the cache record for a message, keyed by its UID in the folder it came from.
///
/// The sender is the first `From` address. `received_at` is the server's internal
/// date, falling back to the `Date` header.
pub fn decode(message: &RemoteMessage) -> Result<StoredMessage> {
    let (headers, _) = mailparse::parse_headers(message.parse_source())
        .with_context(|| format!("parsing headers for UID {}", message.uid))?;

    let received_at = message.internal_date.or_else(|| header_date(&headers));

    Ok(StoredMessage {
        id: message.uid.to_string(),
        sender: first_address(&headers, "From"),
        subject: headers.get_first_value("Subject"),
        received_at,
        unread: !message.seen,
        trashed: false,
        raw: message.raw.clone(),
        reconcile_pending: false,
    })
}

/// Same as [`decode`] but from the sender's point of view: the listed party is the
/// first `To` recipient and the `Date` header wins over the internal date.
pub fn decode_sent_preview(message: &RemoteMessage) -> Result<StoredMessage> {
    let (headers, _) = mailparse::parse_headers(message.parse_source())
        .with_context(|| format!("parsing headers for UID {}", message.uid))?;

    let received_at = header_date(&headers).or(message.internal_date);

    Ok(StoredMessage {
        id: message.uid.to_string(),
        sender: first_address(&headers, "To"),
        subject: headers.get_first_value("Subject"),
        received_at,
        unread: !message.seen,
        trashed: false,
        raw: None,
        reconcile_pending: false,
    })
}

/// Display fields for a cached message. Without raw bytes, or when they cannot be
/// parsed, the body is a placeholder and the recipient lists are empty.
pub fn parse_detail(stored: &StoredMessage) -> MessageDetail {
    let fallback = || MessageDetail {
        id: stored.id.clone(),
        sender: stored.sender.clone(),
        subject: stored.subject.clone(),
        body: BODY_UNAVAILABLE.to_string(),
        received_at: stored.received_at,
        unread: stored.unread,
        to: Vec::new(),
        cc: Vec::new(),
    };

    let raw = match &stored.raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return fallback(),
    };

    let parsed = match mailparse::parse_mail(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(id = %stored.id, error = %e, "Failed to parse stored message");
            return fallback();
        }
    };

    let body = match extract_text_body(&parsed) {
        Ok(body) => body,
        Err(e) => {
            warn!(id = %stored.id, error = %e, "Failed to decode message body");
            return fallback();
        }
    };

    MessageDetail {
        id: stored.id.clone(),
        sender: stored.sender.clone(),
        subject: stored.subject.clone(),
        body,
        received_at: stored.received_at,
        unread: stored.unread,
        to: all_addresses(&parsed.headers, "To"),
        cc: all_addresses(&parsed.headers, "Cc"),
    }
}

/// The `Message-ID` header, trimmed.
pub fn message_id(source: &[u8]) -> Option<String> {
    let (headers, _) = mailparse::parse_headers(source).ok()?;
    headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Whether a display sender (`Name <addr>` or bare `addr`) is the given address.
pub fn is_sent_by(sender: &str, address: &str) -> bool {
    let bare = match (sender.rfind('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if start < end => &sender[start + 1..end],
        _ => sender,
    };
    bare.trim().eq_ignore_ascii_case(address.trim())
}

/// Plain text wins; HTML is passed through untouched; multipart parts are walked in
/// order, stopping at the first plain-text part.
fn extract_text_body(part: &ParsedMail) -> Result<String> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if mimetype == "text/plain" || mimetype == "text/html" {
        return part.get_body().context("decoding text part");
    }

    if mimetype.starts_with("multipart/") {
        let mut combined = String::new();
        for sub in &part.subparts {
            let text = extract_text_body(sub)?;
            if text.is_empty() {
                continue;
            }
            if sub.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
                return Ok(text);
            }
            combined.push_str(&text);
        }
        return Ok(combined);
    }

    Ok(String::new())
}

fn header_date(headers: &[MailHeader]) -> Option<DateTime<Utc>> {
    let raw = headers.get_first_value("Date")?;
    let ts = mailparse::dateparse(&raw).ok()?;
    DateTime::<Utc>::from_timestamp(ts, 0)
}

fn first_address(headers: &[MailHeader], name: &str) -> String {
    all_addresses(headers, name)
        .into_iter()
        .next()
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

fn all_addresses(headers: &[MailHeader], name: &str) -> Vec<String> {
    let mut out = Vec::new();
    for header in headers.get_all_headers(name) {
        let list = match mailparse::addrparse_header(header) {
            Ok(list) => list,
            Err(e) => {
                warn!(header = %name, error = %e, "Unparseable address header");
                continue;
            }
        };
        for addr in list.iter() {
            match addr {
                MailAddr::Single(info) => out.push(display_address(info)),
                MailAddr::Group(group) => out.extend(group.addrs.iter().map(display_address)),
            }
        }
    }
    out
}

fn display_address(info: &mailparse::SingleInfo) -> String {
    match info.display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("{name} <{}>", info.addr),
        _ => info.addr.clone(),
    }
}
