//! Trash, restore and delete.
//!
//! The cache is changed first and the server second. When the server leg of a
//! trash or restore fails, the local flag is put back; permanent delete keeps
//! the local delete no matter what the server does.
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::{FolderTable, Settings};
use crate::errors::{AppError, AppResult};
use crate::imap::{release, FetchProfile, MailConnector, MailSession, OpenMode};
use crate::locator::{first_existing, locate, Probe};
use crate::storage::OfflineCache;
use crate::sync::{parse_uid, SyncEngine};
use crate::types::MoveOutcome;

pub mod reconcile;

pub use reconcile::UidResolution;

const TRASH_CORRELATION_SLACK: u32 = 5;
const RESTORE_CORRELATION_SLACK: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToTrash,
    FromTrash,
}

impl Direction {
    fn sources(self, folders: &FolderTable) -> Vec<String> {
        match self {
            Direction::ToTrash => folders.search_order(),
            Direction::FromTrash => folders.trash.clone(),
        }
    }

    fn destinations(self, folders: &FolderTable) -> Vec<String> {
        match self {
            Direction::ToTrash => folders.trash.clone(),
            Direction::FromTrash => folders.inbox.clone(),
        }
    }

    fn slack(self) -> u32 {
        match self {
            Direction::ToTrash => TRASH_CORRELATION_SLACK,
            Direction::FromTrash => RESTORE_CORRELATION_SLACK,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Direction::ToTrash => "trash",
            Direction::FromTrash => "restore",
        }
    }
}

pub struct LifecycleOrchestrator {
    connector: Arc<dyn MailConnector>,
    settings: Arc<Settings>,
    cache: OfflineCache,
    sync: SyncEngine,
}

impl LifecycleOrchestrator {
    pub fn new(
        connector: Arc<dyn MailConnector>,
        settings: Arc<Settings>,
        cache: OfflineCache,
    ) -> Self {
        let sync = SyncEngine::new(connector.clone(), settings.clone());
        Self {
            connector,
            settings,
            cache,
            sync,
        }
    }

    /// Marks the message trashed locally, then moves it into the trash folder on
    /// the server. A message not yet cached is fetched from the server first.
    pub async fn trash(&self, id: &str) -> MoveOutcome {
        info!(id = %id, "Moving message to trash");

        let was_trashed = self.cache.is_trashed(id).await;
        let mut local_ok = self.cache.mark_trashed(id).await;
        if !local_ok {
            info!(id = %id, "Message missing from cache, hydrating before trash");
            local_ok = self.hydrate(id).await && self.cache.mark_trashed(id).await;
        }
        if !local_ok {
            warn!(id = %id, "Failed to mark message trashed locally");
            return MoveOutcome::failed(id);
        }

        let mut effective_id = id.to_string();
        match self.move_remote(id, Direction::ToTrash, &mut effective_id).await {
            Ok(()) => MoveOutcome::succeeded(effective_id),
            Err(e) => {
                error!(id = %id, error = %e, "Failed to move message to trash on server");
                if !self.revert_flag(id, &effective_id, was_trashed).await {
                    error!(id = %id, effective_id = %effective_id, "Rolling back trashed flag failed");
                }
                MoveOutcome::failed(effective_id)
            }
        }
    }

    /// Clears the trashed flag locally, then moves the message from the trash
    /// folder back to the inbox on the server.
    pub async fn restore(&self, id: &str) -> MoveOutcome {
        info!(id = %id, "Restoring message from trash");

        let was_trashed = self.cache.is_trashed(id).await;
        let mut local_ok = self.cache.unmark_trashed(id).await;
        if !local_ok {
            info!(id = %id, "Message missing from cache, hydrating before restore");
            local_ok = self.hydrate(id).await && self.cache.unmark_trashed(id).await;
        }
        if !local_ok {
            warn!(id = %id, "Failed to restore message locally");
            return MoveOutcome::failed(id);
        }

        let mut effective_id = id.to_string();
        match self.move_remote(id, Direction::FromTrash, &mut effective_id).await {
            Ok(()) => MoveOutcome::succeeded(effective_id),
            Err(e) => {
                error!(id = %id, error = %e, "Failed to restore message on server");
                if !self.revert_flag(id, &effective_id, was_trashed).await {
                    error!(id = %id, effective_id = %effective_id, "Rolling back restore failed");
                }
                MoveOutcome::failed(effective_id)
            }
        }
    }

    /// Deletes a trashed message for good. Refused for messages that are not
    /// trashed. Once the local row is gone the result is `true`, even if the
    /// server could not be updated.
    pub async fn permanently_delete(&self, id: &str) -> bool {
        info!(id = %id, "Permanently deleting message");

        if !self.cache.is_trashed(id).await {
            warn!(error = %AppError::InvalidState(format!("message {id} is not in trash")), "Refusing permanent delete");
            return false;
        }

        if !self.cache.permanently_delete(id).await {
            warn!(id = %id, "Failed to delete message from cache");
            return false;
        }

        let Some(uid) = parse_uid(id) else {
            return true;
        };

        match self.connector.connect().await {
            Ok(mut session) => {
                if let Err(e) = self.purge_from_trash(session.as_mut(), uid).await {
                    warn!(id = %id, error = %e, "Remote delete failed; deleted locally only");
                }
                release(session).await;
            }
            Err(e) => warn!(id = %id, error = %format!("{e:#}"), "Remote delete skipped; deleted locally only"),
        }
        true
    }

    /// Moves a message into the trash folder and expunges it from its source in
    /// one go, then drops the cached row. Any server failure is reported as
    /// `false`; server-side steps already taken are not undone.
    pub async fn delete(&self, id: &str) -> bool {
        info!(id = %id, "Deleting message");

        let Some(uid) = parse_uid(id) else {
            warn!(id = %id, "Not a UID; cannot delete");
            return false;
        };

        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => {
                error!(id = %id, error = %format!("{e:#}"), "Failed to delete message");
                return false;
            }
        };
        let result = self.delete_in_session(session.as_mut(), uid).await;
        release(session).await;

        if let Err(e) = result {
            error!(id = %id, error = %e, "Failed to delete message");
            return false;
        }

        if !self.cache.permanently_delete(id).await {
            debug!(id = %id, "Deleted message was not cached");
        }
        info!(id = %id, "Message deleted");
        true
    }

    /// Puts the trashed flag back to what it was before the operation, on the
    /// rebound id first and then on the requested one.
    async fn revert_flag(&self, id: &str, effective_id: &str, was_trashed: bool) -> bool {
        self.set_flag(effective_id, was_trashed).await
            || (effective_id != id && self.set_flag(id, was_trashed).await)
    }

    async fn set_flag(&self, id: &str, trashed: bool) -> bool {
        if trashed {
            self.cache.mark_trashed(id).await
        } else {
            self.cache.unmark_trashed(id).await
        }
    }

    async fn hydrate(&self, id: &str) -> bool {
        if self.cache.load_by_id(id).await.is_some() {
            return true;
        }

        match self.sync.fetch_message(id, false).await {
            Ok(Some(message)) => self.cache.upsert_batch(&[message]).await,
            Ok(None) => {
                warn!(id = %id, "Unable to find message on server while hydrating");
                false
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Unable to fetch message while hydrating");
                false
            }
        }
    }

    async fn move_remote(
        &self,
        id: &str,
        direction: Direction,
        effective_id: &mut String,
    ) -> AppResult<()> {
        let uid = parse_uid(id)
            .ok_or_else(|| AppError::InvalidState(format!("{id} is not a UID")))?;

        let mut session = self.connector.connect().await.map_err(AppError::remote)?;
        let result = self
            .move_in_session(session.as_mut(), uid, direction, effective_id)
            .await;
        release(session).await;
        result
    }

    async fn move_in_session(
        &self,
        session: &mut dyn MailSession,
        uid: u32,
        direction: Direction,
        effective_id: &mut String,
    ) -> AppResult<()> {
        let folders = &self.settings.folders;
        let probe = Probe::ContainsUid {
            uid,
            profile: FetchProfile::Envelope,
        };

        let source = match locate(session, &direction.sources(folders), OpenMode::ReadWrite, probe).await {
            Ok(source) => source,
            Err(AppError::NotFound(_)) => {
                warn!(uid, op = direction.label(), "Message not found on server; changed locally only");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Some(dest) = first_existing(session, &direction.destinations(folders)).await else {
            warn!(uid, op = direction.label(), "No destination folder on server; changed locally only");
            return Ok(());
        };

        // Trash is searched before the inbox, so an inbox UID that also exists in
        // trash resolves to the trash copy and the move is skipped.
        if source.name.eq_ignore_ascii_case(&dest) {
            debug!(uid, folder = %dest, "Message already in destination folder");
            return Ok(());
        }

        let message_id = source
            .message
            .as_ref()
            .and_then(|m| codec::message_id(m.parse_source()));

        let receipt = reconcile::copy_tracking_uid(session, uid, &dest)
            .await
            .map_err(AppError::remote)?;
        session.mark_deleted(uid).await.map_err(AppError::remote)?;
        session.expunge().await.map_err(AppError::remote)?;
        info!(uid, from = %source.name, to = %dest, op = direction.label(), "Moved message on server");

        let resolution =
            reconcile::resolve(session, receipt, &dest, message_id.as_deref(), direction.slack()).await;
        self.adopt_resolution(effective_id, resolution).await;
        Ok(())
    }

    async fn adopt_resolution(&self, effective_id: &mut String, resolution: UidResolution) {
        match resolution.uid() {
            Some(new_uid) => {
                let new_id = new_uid.to_string();
                if self.cache.rebind_id(effective_id, &new_id).await {
                    debug!(old_id = %effective_id, new_id = %new_id, ?resolution, "Adopted new UID");
                    *effective_id = new_id;
                } else {
                    self.cache.set_reconcile_pending(effective_id, true).await;
                    warn!(
                        error = %AppError::Inconsistent(format!("cannot rebind {effective_id} to {new_id}")),
                        "Keeping old id; marked for reconciliation"
                    );
                }
            }
            None => {
                self.cache.set_reconcile_pending(effective_id, true).await;
                warn!(
                    error = %AppError::Inconsistent(format!("new UID of {effective_id} unknown after copy")),
                    "Keeping old id; marked for reconciliation"
                );
            }
        }
    }

    async fn purge_from_trash(&self, session: &mut dyn MailSession, uid: u32) -> AppResult<()> {
        let probe = Probe::ContainsUid {
            uid,
            profile: FetchProfile::Envelope,
        };
        let located = match locate(session, &self.settings.folders.trash, OpenMode::ReadWrite, probe).await {
            Ok(located) => located,
            Err(AppError::NotFound(_)) => {
                warn!(uid, "Message not found in server trash; deleted locally only");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        session.mark_deleted(uid).await.map_err(AppError::remote)?;
        session.expunge().await.map_err(AppError::remote)?;
        info!(uid, folder = %located.name, "Message permanently deleted from server trash");
        Ok(())
    }

    async fn delete_in_session(&self, session: &mut dyn MailSession, uid: u32) -> AppResult<()> {
        let folders = &self.settings.folders;
        let probe = Probe::ContainsUid {
            uid,
            profile: FetchProfile::Envelope,
        };
        let source = locate(session, &folders.search_order(), OpenMode::ReadWrite, probe).await?;

        let trash = first_existing(session, &folders.trash).await;
        let already_in_trash = trash
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(&source.name));
        debug!(uid, source = %source.name, trash = ?trash, already_in_trash, "Deleting message");

        if let Some(trash) = trash.as_deref().filter(|_| !already_in_trash) {
            session.copy(uid, trash).await.map_err(AppError::remote)?;
            info!(uid, folder = %trash, "Copied message to trash");
        }

        session.mark_deleted(uid).await.map_err(AppError::remote)?;
        session.expunge().await.map_err(AppError::remote)?;
        Ok(())
    }
}
