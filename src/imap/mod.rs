//! Remote mail store capability.
//!
//! Everything above this module talks to the server through [`MailConnector`] and
//! [`MailSession`]; the production implementation lives in [`client`].
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod client;

pub use client::{copyuid_destination, ImapConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Which parts of a message a fetch should bring back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchProfile {
    /// UID, flags, internal date and the header block.
    Envelope,
    /// Everything in `Envelope` plus the complete raw message.
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderStatus {
    pub name: String,
    pub exists: u32,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
}

/// A message as returned by the server for one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub uid: u32,
    pub seen: bool,
    pub internal_date: Option<DateTime<Utc>>,
    pub header: Vec<u8>,
    pub raw: Option<Vec<u8>>,
}

impl RemoteMessage {
    /// Bytes to parse headers from: the full message when present, else the header block.
    pub fn parse_source(&self) -> &[u8] {
        match &self.raw {
            Some(raw) if !raw.is_empty() => raw,
            _ => &self.header,
        }
    }
}

/// One authenticated connection. At most one folder is open at a time.
#[async_trait]
pub trait MailSession: Send {
    async fn folder_exists(&mut self, name: &str) -> Result<bool>;

    async fn open(&mut self, name: &str, mode: OpenMode) -> Result<FolderStatus>;

    /// Closes the open folder, if any.
    async fn close(&mut self) -> Result<()>;

    /// Status of a folder without opening it.
    async fn status(&mut self, name: &str) -> Result<FolderStatus>;

    async fn fetch_by_uid(&mut self, uid: u32, profile: FetchProfile)
        -> Result<Option<RemoteMessage>>;

    /// Messages with sequence numbers `start..=end` in the open folder.
    async fn fetch_sequence_range(
        &mut self,
        start: u32,
        end: u32,
        profile: FetchProfile,
    ) -> Result<Vec<RemoteMessage>>;

    /// Messages with UID `from` or above in the open folder.
    async fn fetch_uid_range(&mut self, from: u32, profile: FetchProfile)
        -> Result<Vec<RemoteMessage>>;

    async fn fetch_uids(&mut self, uids: &[u32], profile: FetchProfile)
        -> Result<Vec<RemoteMessage>>;

    async fn search_unseen(&mut self) -> Result<Vec<u32>>;

    /// Copies a message and returns its UID in `dest` when the server reports it.
    async fn copy_with_uid_mapping(&mut self, uid: u32, dest: &str) -> Result<Option<u32>>;

    async fn copy(&mut self, uid: u32, dest: &str) -> Result<()>;

    async fn mark_deleted(&mut self, uid: u32) -> Result<()>;

    async fn mark_seen(&mut self, uid: u32) -> Result<()>;

    async fn expunge(&mut self) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailSession>>;
}

/// Closes the open folder and logs out. Failures are logged only, so callers can
/// run this on every exit path.
pub async fn release(mut session: Box<dyn MailSession>) {
    if let Err(e) = session.close().await {
        tracing::debug!(error = %e, "Closing folder before logout failed");
    }
    if let Err(e) = session.logout().await {
        tracing::warn!(error = %e, "Error closing IMAP connection");
    }
}
