#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use mailmirror::config::{
    FolderTable, ImapSettings, Settings, StorageSettings, SyncSettings,
};
use mailmirror::imap::{
    FetchProfile, FolderStatus, MailConnector, MailSession, OpenMode, RemoteMessage,
};
use mailmirror::storage::{Database, OfflineCache};

pub const OWN_ADDRESS: &str = "me@example.com";

#[derive(Clone, Debug)]
struct FakeMessage {
    uid: u32,
    raw: Vec<u8>,
    seen: bool,
    deleted: bool,
    internal_date: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct FakeFolder {
    uid_next: u32,
    messages: Vec<FakeMessage>,
}

#[derive(Debug, Default)]
struct ServerState {
    folders: BTreeMap<String, FakeFolder>,
    uidplus: bool,
    fail_connect: bool,
    fail_copy: bool,
    fail_expunge: bool,
    open_sessions: usize,
    connects: usize,
}

/// In-memory IMAP server: folders of messages with per-folder UIDs.
#[derive(Clone, Default)]
pub struct FakeMailServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeMailServer {
    /// `INBOX`, `Trash` and `Sent`, with UIDPLUS enabled.
    pub fn standard() -> Self {
        let server = Self::default();
        server.add_folder("INBOX", 1);
        server.add_folder("Trash", 1);
        server.add_folder("Sent", 1);
        server.set_uidplus(true);
        server
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("fake server lock")
    }

    pub fn add_folder(&self, name: &str, first_uid: u32) {
        self.lock().folders.insert(
            name.to_string(),
            FakeFolder {
                uid_next: first_uid,
                messages: Vec::new(),
            },
        );
    }

    /// Appends a message and returns its UID.
    pub fn add_message(
        &self,
        folder: &str,
        raw: Vec<u8>,
        seen: bool,
        internal_date: Option<DateTime<Utc>>,
    ) -> u32 {
        let mut state = self.lock();
        let folder = state.folders.get_mut(folder).expect("folder exists");
        let uid = folder.uid_next;
        folder.uid_next += 1;
        folder.messages.push(FakeMessage {
            uid,
            raw,
            seen,
            deleted: false,
            internal_date,
        });
        uid
    }

    pub fn uids(&self, folder: &str) -> Vec<u32> {
        self.lock()
            .folders
            .get(folder)
            .map(|f| f.messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    pub fn is_seen(&self, folder: &str, uid: u32) -> bool {
        self.lock()
            .folders
            .get(folder)
            .and_then(|f| f.messages.iter().find(|m| m.uid == uid))
            .is_some_and(|m| m.seen)
    }

    pub fn set_uidplus(&self, enabled: bool) {
        self.lock().uidplus = enabled;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn set_fail_copy(&self, fail: bool) {
        self.lock().fail_copy = fail;
    }

    pub fn set_fail_expunge(&self, fail: bool) {
        self.lock().fail_expunge = fail;
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }
}

#[async_trait]
impl MailConnector for FakeMailServer {
    async fn connect(&self) -> Result<Box<dyn MailSession>> {
        let mut state = self.lock();
        if state.fail_connect {
            bail!("connection refused");
        }
        state.connects += 1;
        state.open_sessions += 1;
        Ok(Box::new(FakeSession {
            server: self.clone(),
            selected: None,
            logged_out: false,
        }))
    }
}

struct FakeSession {
    server: FakeMailServer,
    selected: Option<(String, OpenMode)>,
    logged_out: bool,
}

impl FakeSession {
    fn selected_name(&self) -> Result<String> {
        self.selected
            .as_ref()
            .map(|(name, _)| name.clone())
            .ok_or_else(|| anyhow!("no folder selected"))
    }

    fn writable(&self) -> Result<String> {
        match &self.selected {
            Some((name, OpenMode::ReadWrite)) => Ok(name.clone()),
            Some((name, OpenMode::ReadOnly)) => bail!("{name} is read-only"),
            None => bail!("no folder selected"),
        }
    }

    fn with_selected<T>(&self, f: impl FnOnce(&FakeFolder) -> T) -> Result<T> {
        let name = self.selected_name()?;
        let state = self.server.lock();
        let folder = state
            .folders
            .get(&name)
            .ok_or_else(|| anyhow!("folder {name} vanished"))?;
        Ok(f(folder))
    }

    fn copy_into(&self, uid: u32, dest: &str) -> Result<u32> {
        let source = self.selected_name()?;
        let mut state = self.server.lock();
        if state.fail_copy {
            bail!("COPY failed");
        }
        let message = state
            .folders
            .get(&source)
            .and_then(|f| f.messages.iter().find(|m| m.uid == uid))
            .cloned()
            .ok_or_else(|| anyhow!("no UID {uid} in {source}"))?;
        let target = state
            .folders
            .get_mut(dest)
            .ok_or_else(|| anyhow!("[TRYCREATE] no folder {dest}"))?;
        let new_uid = target.uid_next;
        target.uid_next += 1;
        target.messages.push(FakeMessage {
            uid: new_uid,
            deleted: false,
            ..message
        });
        Ok(new_uid)
    }
}

fn to_remote(message: &FakeMessage, profile: FetchProfile) -> RemoteMessage {
    let header_end = message
        .raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
        .unwrap_or(message.raw.len());
    RemoteMessage {
        uid: message.uid,
        seen: message.seen,
        internal_date: message.internal_date,
        header: message.raw[..header_end].to_vec(),
        raw: match profile {
            FetchProfile::Envelope => None,
            FetchProfile::Full => Some(message.raw.clone()),
        },
    }
}

fn status_of(name: &str, folder: &FakeFolder) -> FolderStatus {
    FolderStatus {
        name: name.to_string(),
        exists: folder.messages.len() as u32,
        uid_next: Some(folder.uid_next),
        uid_validity: Some(1),
    }
}

#[async_trait]
impl MailSession for FakeSession {
    async fn folder_exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.server.lock().folders.contains_key(name))
    }

    async fn open(&mut self, name: &str, mode: OpenMode) -> Result<FolderStatus> {
        let status = {
            let state = self.server.lock();
            let folder = state
                .folders
                .get(name)
                .ok_or_else(|| anyhow!("NO no such folder {name}"))?;
            status_of(name, folder)
        };
        self.selected = Some((name.to_string(), mode));
        Ok(status)
    }

    async fn close(&mut self) -> Result<()> {
        self.selected = None;
        Ok(())
    }

    async fn status(&mut self, name: &str) -> Result<FolderStatus> {
        let state = self.server.lock();
        let folder = state
            .folders
            .get(name)
            .ok_or_else(|| anyhow!("NO no such folder {name}"))?;
        Ok(status_of(name, folder))
    }

    async fn fetch_by_uid(
        &mut self,
        uid: u32,
        profile: FetchProfile,
    ) -> Result<Option<RemoteMessage>> {
        self.with_selected(|f| {
            f.messages
                .iter()
                .find(|m| m.uid == uid)
                .map(|m| to_remote(m, profile))
        })
    }

    async fn fetch_sequence_range(
        &mut self,
        start: u32,
        end: u32,
        profile: FetchProfile,
    ) -> Result<Vec<RemoteMessage>> {
        self.with_selected(|f| {
            f.messages
                .iter()
                .enumerate()
                .filter(|(idx, _)| {
                    let seq = *idx as u32 + 1;
                    seq >= start && seq <= end
                })
                .map(|(_, m)| to_remote(m, profile))
                .collect()
        })
    }

    async fn fetch_uid_range(
        &mut self,
        from: u32,
        profile: FetchProfile,
    ) -> Result<Vec<RemoteMessage>> {
        self.with_selected(|f| {
            f.messages
                .iter()
                .filter(|m| m.uid >= from)
                .map(|m| to_remote(m, profile))
                .collect()
        })
    }

    async fn fetch_uids(
        &mut self,
        uids: &[u32],
        profile: FetchProfile,
    ) -> Result<Vec<RemoteMessage>> {
        self.with_selected(|f| {
            f.messages
                .iter()
                .filter(|m| uids.contains(&m.uid))
                .map(|m| to_remote(m, profile))
                .collect()
        })
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>> {
        self.with_selected(|f| {
            f.messages
                .iter()
                .filter(|m| !m.seen)
                .map(|m| m.uid)
                .collect()
        })
    }

    async fn copy_with_uid_mapping(&mut self, uid: u32, dest: &str) -> Result<Option<u32>> {
        let new_uid = self.copy_into(uid, dest)?;
        let uidplus = self.server.lock().uidplus;
        Ok(uidplus.then_some(new_uid))
    }

    async fn copy(&mut self, uid: u32, dest: &str) -> Result<()> {
        self.copy_into(uid, dest).map(|_| ())
    }

    async fn mark_deleted(&mut self, uid: u32) -> Result<()> {
        let name = self.writable()?;
        let mut state = self.server.lock();
        if let Some(message) = state
            .folders
            .get_mut(&name)
            .and_then(|f| f.messages.iter_mut().find(|m| m.uid == uid))
        {
            message.deleted = true;
        }
        Ok(())
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        let name = self.writable()?;
        let mut state = self.server.lock();
        if let Some(message) = state
            .folders
            .get_mut(&name)
            .and_then(|f| f.messages.iter_mut().find(|m| m.uid == uid))
        {
            message.seen = true;
        }
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        let name = self.writable()?;
        let mut state = self.server.lock();
        if state.fail_expunge {
            bail!("EXPUNGE failed");
        }
        if let Some(folder) = state.folders.get_mut(&name) {
            folder.messages.retain(|m| !m.deleted);
        }
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        if !self.logged_out {
            self.logged_out = true;
            self.server.lock().open_sessions -= 1;
        }
        Ok(())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

/// A plain-text message. `message_id` is left out of the headers when `None`.
pub fn raw_message(from: &str, to: &str, subject: &str, message_id: Option<&str>, body: &str) -> Vec<u8> {
    let mut raw = String::new();
    raw.push_str(&format!("From: {from}\r\n"));
    raw.push_str(&format!("To: {to}\r\n"));
    raw.push_str(&format!("Subject: {subject}\r\n"));
    raw.push_str("Date: Tue, 02 Jan 2024 09:30:00 +0000\r\n");
    if let Some(id) = message_id {
        raw.push_str(&format!("Message-ID: {id}\r\n"));
    }
    raw.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    raw.push_str("\r\n");
    raw.push_str(body);
    raw.push_str("\r\n");
    raw.into_bytes()
}

pub fn test_settings() -> Settings {
    Settings {
        imap: ImapSettings {
            host: "imap.example.com".into(),
            port: 993,
            tls: true,
            username: OWN_ADDRESS.into(),
            password: "secret".into(),
            connect_timeout: Duration::from_secs(5),
        },
        smtp: None,
        sync: SyncSettings::default(),
        storage: StorageSettings::default(),
        folders: FolderTable::default(),
    }
}

pub async fn memory_cache() -> OfflineCache {
    let db = Database::in_memory().await.expect("in-memory database");
    OfflineCache::new(&db)
}
