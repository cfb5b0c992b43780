//! Operations offered to callers: listings, detail view and message lifecycle.
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Settings;
use crate::errors::{AppError, AppResult};
use crate::imap::MailConnector;
use crate::lifecycle::LifecycleOrchestrator;
use crate::mailer::{self, SendRequest};
use crate::storage::OfflineCache;
use crate::sync::SyncEngine;
use crate::types::{MessageDetail, MessagePreview, MoveOutcome};

pub struct Mailbox {
    settings: Arc<Settings>,
    cache: OfflineCache,
    sync: SyncEngine,
    lifecycle: LifecycleOrchestrator,
}

impl Mailbox {
    pub fn new(
        connector: Arc<dyn MailConnector>,
        settings: Arc<Settings>,
        cache: OfflineCache,
    ) -> Self {
        Self {
            sync: SyncEngine::new(connector.clone(), settings.clone()),
            lifecycle: LifecycleOrchestrator::new(connector, settings.clone(), cache.clone()),
            settings,
            cache,
        }
    }

    /// Refreshes the inbox, then lists cached, non-trashed messages that were not
    /// sent by the account itself.
    pub async fn list_inbox(&self) -> Vec<MessagePreview> {
        debug!("Refreshing inbox cache before listing");
        let refreshed = self.refresh_inbox().await;

        let limit = self.settings.storage.preview_limit;
        let mut previews = self.cache.load_previews(false, limit).await;

        if previews.is_empty() && !refreshed {
            info!("Cache empty after failed refresh, retrying inbox sync");
            if !self.refresh_inbox().await {
                return Vec::new();
            }
            previews = self.cache.load_previews(false, limit).await;
        }

        let own_address = &self.settings.imap.username;
        previews.retain(|p| !codec::is_sent_by(&p.sender, own_address));
        previews
    }

    async fn refresh_inbox(&self) -> bool {
        match self.sync.sync_folder(self.settings.folders.inbox_name()).await {
            Ok(messages) => {
                self.cache.upsert_batch(&messages).await;
                true
            }
            Err(e) => {
                warn!(error = %e, "Unable to refresh inbox cache");
                false
            }
        }
    }

    /// Read straight from the server; sent mail is not cached.
    pub async fn list_sent(&self) -> Vec<MessagePreview> {
        match self.sync.sync_sent_folder().await {
            Ok(messages) => messages.iter().map(|m| m.to_preview()).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to fetch sent messages");
                Vec::new()
            }
        }
    }

    pub async fn list_trash(&self) -> Vec<MessagePreview> {
        self.cache
            .load_previews(true, self.settings.storage.preview_limit)
            .await
    }

    /// Full view of a message. Marks it read and downloads the raw message when
    /// the cache only has the preview. Ids the cache does not know are fetched
    /// from the server and cached.
    pub async fn get_detail(&self, id: &str) -> Option<MessageDetail> {
        debug!(id = %id, "Loading message detail");

        let Some(mut stored) = self.cache.load_by_id(id).await else {
            return self.fetch_detail(id).await;
        };

        if stored.unread && self.cache.mark_read(id).await {
            stored.unread = false;
        }

        if !stored.has_raw() {
            info!(id = %id, "Raw message not cached, fetching from server");
            if let Some(detail) = self.fetch_detail(id).await {
                return Some(detail);
            }
        }

        Some(codec::parse_detail(&stored))
    }

    async fn fetch_detail(&self, id: &str) -> Option<MessageDetail> {
        let mut fetched = match self.sync.fetch_message(id, true).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                warn!(id = %id, "Message not found on server");
                return None;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to fetch message from server");
                return None;
            }
        };

        self.cache.upsert_batch(std::slice::from_ref(&fetched)).await;
        if fetched.unread && self.cache.mark_read(id).await {
            fetched.unread = false;
        }
        Some(codec::parse_detail(&fetched))
    }

    pub async fn trash(&self, id: &str) -> MoveOutcome {
        self.lifecycle.trash(id).await
    }

    pub async fn restore(&self, id: &str) -> MoveOutcome {
        self.lifecycle.restore(id).await
    }

    pub async fn permanently_delete(&self, id: &str) -> bool {
        self.lifecycle.permanently_delete(id).await
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.lifecycle.delete(id).await
    }

    pub async fn send(&self, request: &SendRequest) -> AppResult<()> {
        let smtp = self
            .settings
            .smtp
            .as_ref()
            .ok_or_else(|| AppError::Config("SMTP is not configured".into()))?;
        info!(subject = %request.subject, "Sending message");
        mailer::send(smtp, request).await
    }
}
