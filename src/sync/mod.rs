use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Settings;
use crate::errors::{AppError, AppResult};
use crate::imap::{release, FetchProfile, MailConnector, MailSession, OpenMode};
use crate::locator::{locate, Probe};
use crate::types::{newest_first, StoredMessage};

/// Pulls recent messages from the server. Every call opens and releases its own
/// connection.
pub struct SyncEngine {
    connector: Arc<dyn MailConnector>,
    settings: Arc<Settings>,
}

impl SyncEngine {
    pub fn new(connector: Arc<dyn MailConnector>, settings: Arc<Settings>) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// The most recent `fetch_batch_size` messages of a folder, plus every unseen
    /// message when the folder is the inbox. Unique by id, newest first.
    pub async fn sync_folder(&self, folder_name: &str) -> AppResult<Vec<StoredMessage>> {
        let sync_start = Instant::now();
        info!(folder = %folder_name, "Syncing folder");

        let mut session = self.connector.connect().await.map_err(AppError::remote)?;
        let result = self.sync_open_session(session.as_mut(), folder_name).await;
        release(session).await;

        match &result {
            Ok(messages) => info!(
                folder = %folder_name,
                count = messages.len(),
                elapsed_ms = ?sync_start.elapsed().as_millis(),
                "Folder sync completed"
            ),
            Err(e) => warn!(folder = %folder_name, error = %e, "Folder sync failed"),
        }
        result
    }

    async fn sync_open_session(
        &self,
        session: &mut dyn MailSession,
        folder_name: &str,
    ) -> AppResult<Vec<StoredMessage>> {
        let status = session
            .open(folder_name, OpenMode::ReadOnly)
            .await
            .map_err(AppError::remote)?;

        let count = status.exists;
        if count == 0 {
            debug!(folder = %folder_name, "Folder is empty");
            return Ok(Vec::new());
        }

        let start = recent_window_start(count, self.settings.sync.fetch_batch_size);
        let mut fetched = session
            .fetch_sequence_range(start, count, FetchProfile::Envelope)
            .await
            .map_err(AppError::remote)?;
        debug!(folder = %folder_name, start, end = count, fetched = fetched.len(), "Fetched recent window");

        if self.settings.folders.is_inbox(folder_name) {
            let unseen = session.search_unseen().await.map_err(AppError::remote)?;
            if !unseen.is_empty() {
                let unread = session
                    .fetch_uids(&unseen, FetchProfile::Envelope)
                    .await
                    .map_err(AppError::remote)?;
                debug!(folder = %folder_name, unseen = unread.len(), "Fetched unseen messages");
                fetched.extend(unread);
            }
        }

        let mut decoded = Vec::with_capacity(fetched.len());
        for message in &fetched {
            decoded.push(codec::decode(message).map_err(AppError::remote)?);
        }
        Ok(dedupe_newest_first(decoded))
    }

    /// Recipient-oriented previews of the last `sent_limit` messages in the first
    /// sent folder that exists. Messages that fail to decode are skipped.
    pub async fn sync_sent_folder(&self) -> AppResult<Vec<StoredMessage>> {
        let mut session = self.connector.connect().await.map_err(AppError::remote)?;
        let result = self.sync_sent_open_session(session.as_mut()).await;
        release(session).await;
        result
    }

    async fn sync_sent_open_session(
        &self,
        session: &mut dyn MailSession,
    ) -> AppResult<Vec<StoredMessage>> {
        let located = locate(
            session,
            &self.settings.folders.sent,
            OpenMode::ReadOnly,
            Probe::Exists,
        )
        .await?;

        let count = located.status.exists;
        if count == 0 {
            return Ok(Vec::new());
        }

        let start = recent_window_start(count, self.settings.sync.sent_limit);
        let fetched = session
            .fetch_sequence_range(start, count, FetchProfile::Envelope)
            .await
            .map_err(AppError::remote)?;

        let mut decoded = Vec::with_capacity(fetched.len());
        for message in &fetched {
            match codec::decode_sent_preview(message) {
                Ok(stored) => decoded.push(stored),
                Err(e) => warn!(
                    folder = %located.name,
                    uid = message.uid,
                    error = %e,
                    "Skipping sent message that failed to decode"
                ),
            }
        }

        info!(folder = %located.name, count = decoded.len(), "Loaded sent messages");
        Ok(dedupe_newest_first(decoded))
    }

    /// Fetches one message in full by UID from whichever folder holds it, searching
    /// the folder table in priority order. `Ok(None)` when no folder has it.
    /// The first folder holding the UID wins, so trash shadows the inbox.
    pub async fn fetch_message(&self, id: &str, mark_seen: bool) -> AppResult<Option<StoredMessage>> {
        let Some(uid) = parse_uid(id) else {
            debug!(id = %id, "Not a UID; nothing to fetch");
            return Ok(None);
        };

        let mut session = self.connector.connect().await.map_err(AppError::remote)?;
        let result = self.fetch_from_session(session.as_mut(), uid, mark_seen).await;
        release(session).await;
        result
    }

    async fn fetch_from_session(
        &self,
        session: &mut dyn MailSession,
        uid: u32,
        mark_seen: bool,
    ) -> AppResult<Option<StoredMessage>> {
        let mode = if mark_seen {
            OpenMode::ReadWrite
        } else {
            OpenMode::ReadOnly
        };
        let candidates = self.settings.folders.search_order();
        let probe = Probe::ContainsUid {
            uid,
            profile: FetchProfile::Full,
        };

        let located = match locate(session, &candidates, mode, probe).await {
            Ok(located) => located,
            Err(AppError::NotFound(what)) => {
                debug!(uid, "Message not found remotely: {what}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(message) = located.message else {
            return Ok(None);
        };

        let mut stored = codec::decode(&message).map_err(AppError::remote)?;
        if mark_seen && stored.unread {
            match session.mark_seen(uid).await {
                Ok(()) => stored.unread = false,
                Err(e) => warn!(uid, folder = %located.name, error = %e, "Failed to mark message seen"),
            }
        }

        debug!(uid, folder = %located.name, "Fetched message");
        Ok(Some(stored))
    }
}

pub(crate) fn parse_uid(id: &str) -> Option<u32> {
    id.trim().parse::<u32>().ok().filter(|uid| *uid > 0)
}

/// First sequence number of the last `window` messages out of `count`.
fn recent_window_start(count: u32, window: u32) -> u32 {
    count.saturating_sub(window.max(1)).saturating_add(1).max(1)
}

/// Later entries replace earlier ones with the same id.
fn dedupe_newest_first(messages: Vec<StoredMessage>) -> Vec<StoredMessage> {
    let mut by_id: HashMap<String, StoredMessage> = HashMap::with_capacity(messages.len());
    for message in messages {
        by_id.insert(message.id.clone(), message);
    }

    let mut out: Vec<StoredMessage> = by_id.into_values().collect();
    out.sort_by(|a, b| {
        newest_first(&a.received_at, &b.received_at)
            .then_with(|| parse_uid(&b.id).cmp(&parse_uid(&a.id)))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_covers_last_messages() {
        assert_eq!(recent_window_start(250, 100), 151);
        assert_eq!(recent_window_start(100, 100), 1);
        assert_eq!(recent_window_start(3, 100), 1);
        assert_eq!(recent_window_start(1, 1), 1);
    }
}
