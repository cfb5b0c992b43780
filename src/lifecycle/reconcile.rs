//! Finding a message's UID in the folder it was just copied to.
//!
//! The server may report the new UID with the copy (UIDPLUS). When it does not,
//! the destination is scanned from a little below its pre-copy UIDNEXT for a
//! message with the same `Message-ID` header.
use anyhow::Result;
use tracing::debug;

use crate::codec;
use crate::imap::{FetchProfile, MailSession, OpenMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidResolution {
    /// Reported by the server with the copy.
    Direct(u32),
    /// Matched by `Message-ID` in the destination.
    Correlated(u32),
    Unresolved,
}

impl UidResolution {
    pub fn uid(&self) -> Option<u32> {
        match self {
            UidResolution::Direct(uid) | UidResolution::Correlated(uid) => Some(*uid),
            UidResolution::Unresolved => None,
        }
    }
}

/// What is known right after a copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyReceipt {
    /// Destination UIDNEXT before the copy.
    pub watermark: Option<u32>,
    pub direct_uid: Option<u32>,
}

/// Copies `uid` from the open folder into `dest`, recording the destination's
/// UIDNEXT beforehand. The open folder stays selected.
pub async fn copy_tracking_uid(
    session: &mut dyn MailSession,
    uid: u32,
    dest: &str,
) -> Result<CopyReceipt> {
    let watermark = match session.status(dest).await {
        Ok(status) => status.uid_next,
        Err(e) => {
            debug!(folder = %dest, error = %e, "Unable to read UIDNEXT before copy");
            None
        }
    };

    let direct_uid = session.copy_with_uid_mapping(uid, dest).await?;
    Ok(CopyReceipt {
        watermark,
        direct_uid: direct_uid.filter(|u| *u > 0),
    })
}

/// Direct UID first, then `Message-ID` correlation. Correlation opens `dest`
/// read-only, so callers must be done with the source folder.
pub async fn resolve(
    session: &mut dyn MailSession,
    receipt: CopyReceipt,
    dest: &str,
    message_id: Option<&str>,
    slack: u32,
) -> UidResolution {
    if let Some(uid) = receipt.direct_uid {
        return UidResolution::Direct(uid);
    }

    let Some(message_id) = message_id else {
        debug!(folder = %dest, "Message has no Message-ID header; cannot correlate");
        return UidResolution::Unresolved;
    };

    match correlate_by_message_id(session, dest, receipt.watermark, slack, message_id).await {
        Ok(Some(uid)) => UidResolution::Correlated(uid),
        Ok(None) => UidResolution::Unresolved,
        Err(e) => {
            debug!(folder = %dest, error = %format!("{e:#}"), "Correlation by Message-ID failed");
            UidResolution::Unresolved
        }
    }
}

/// Highest UID in `dest` at or above `watermark - slack` whose `Message-ID`
/// matches, ignoring case.
pub async fn correlate_by_message_id(
    session: &mut dyn MailSession,
    dest: &str,
    watermark: Option<u32>,
    slack: u32,
    message_id: &str,
) -> Result<Option<u32>> {
    session.close().await?;
    let status = session.open(dest, OpenMode::ReadOnly).await?;

    // Without a pre-copy watermark the current UIDNEXT is one past the copy.
    let start = match (watermark, status.uid_next) {
        (Some(mark), _) => mark.saturating_sub(slack),
        (None, Some(next)) => next.saturating_sub(slack.saturating_add(1)),
        (None, None) => {
            debug!(folder = %dest, "No UIDNEXT available for correlation");
            return Ok(None);
        }
    }
    .max(1);

    let candidates = session.fetch_uid_range(start, FetchProfile::Envelope).await?;
    debug!(folder = %dest, start, candidates = candidates.len(), "Scanning for copied message");

    let found = candidates
        .iter()
        .filter(|m| {
            codec::message_id(m.parse_source())
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(message_id))
        })
        .map(|m| m.uid)
        .max();

    Ok(found)
}
