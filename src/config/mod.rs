use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::AppError;

/// Connection and behaviour settings. Built once at startup and shared read-only
/// by every operation; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub imap: ImapSettings,
    pub smtp: Option<SmtpSettings>,
    pub sync: SyncSettings,
    pub storage: StorageSettings,
    pub folders: FolderTable,
}

#[derive(Debug, Clone)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub fetch_batch_size: u32,
    pub sent_limit: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_batch_size: 100,
            sent_limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub preview_limit: u32,
    pub db_path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            preview_limit: 50,
            db_path: None,
        }
    }
}

/// Candidate folder names per logical role, in priority order.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FolderTable {
    pub trash: Vec<String>,
    pub inbox: Vec<String>,
    pub sent: Vec<String>,
    pub all_mail: Vec<String>,
}

impl Default for FolderTable {
    fn default() -> Self {
        Self {
            trash: strings(&["[Gmail]/Trash", "Trash", "Deleted Items", "Deleted"]),
            inbox: strings(&["INBOX"]),
            sent: strings(&["[Gmail]/Sent Mail", "Sent"]),
            all_mail: strings(&["[Gmail]/All Mail", "All Mail"]),
        }
    }
}

impl FolderTable {
    /// Order in which folders are searched for a message by UID.
    ///
    /// UIDs are only unique within one folder. When an inbox UID also exists in a
    /// trash folder, lookups by id find the trash message first: a fetch returns
    /// the trash copy and a trash move sees the message as already trashed.
    pub fn search_order(&self) -> Vec<String> {
        self.trash
            .iter()
            .chain(self.inbox.iter())
            .chain(self.sent.iter())
            .chain(self.all_mail.iter())
            .cloned()
            .collect()
    }

    pub fn inbox_name(&self) -> &str {
        self.inbox.first().map(String::as_str).unwrap_or("INBOX")
    }

    pub fn is_inbox(&self, name: &str) -> bool {
        self.inbox.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    imap: FileImap,
    smtp: Option<FileSmtp>,
    fetch_batch_size: Option<u32>,
    sent_limit: Option<u32>,
    preview_limit: Option<u32>,
    db_path: Option<PathBuf>,
    folders: Option<FolderTable>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileImap {
    host: Option<String>,
    port: Option<u16>,
    tls: Option<bool>,
    username: Option<String>,
    password: Option<String>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSmtp {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    from: Option<String>,
}

impl Settings {
    /// Defaults, then the TOML file named by `MAILMIRROR_CONFIG`, then env vars.
    pub fn load() -> Result<Self> {
        let file = match env::var("MAILMIRROR_CONFIG") {
            Ok(path) => read_file_config(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::from_file_and_env(file)?)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(raw).context("parsing config TOML")?;
        Ok(Self::from_file_and_env(file)?)
    }

    fn from_file_and_env(file: FileConfig) -> Result<Self, AppError> {
        let host = env_string("MAILMIRROR_IMAP_HOST").or(file.imap.host);
        let username = env_string("MAILMIRROR_IMAP_USERNAME").or(file.imap.username);
        let password = env_string("MAILMIRROR_IMAP_PASSWORD").or(file.imap.password);

        let imap = ImapSettings {
            host: require(host, "IMAP host")?,
            port: env_parse("MAILMIRROR_IMAP_PORT")
                .or(file.imap.port)
                .unwrap_or(993),
            tls: env_flag("MAILMIRROR_IMAP_TLS")
                .or(file.imap.tls)
                .unwrap_or(true),
            username: require(username, "IMAP username")?,
            password: require(password, "IMAP password")?,
            connect_timeout: Duration::from_secs(
                env_parse("MAILMIRROR_CONNECT_TIMEOUT_SECS")
                    .or(file.imap.connect_timeout_secs)
                    .unwrap_or(10),
            ),
        };

        let smtp_file = file.smtp.unwrap_or_default();
        let smtp = match env_string("MAILMIRROR_SMTP_HOST").or(smtp_file.host) {
            Some(host) => {
                let username = env_string("MAILMIRROR_SMTP_USERNAME")
                    .or(smtp_file.username)
                    .unwrap_or_else(|| imap.username.clone());
                Some(SmtpSettings {
                    host,
                    port: env_parse("MAILMIRROR_SMTP_PORT")
                        .or(smtp_file.port)
                        .unwrap_or(587),
                    password: env_string("MAILMIRROR_SMTP_PASSWORD")
                        .or(smtp_file.password)
                        .unwrap_or_else(|| imap.password.clone()),
                    from: env_string("MAILMIRROR_SMTP_FROM")
                        .or(smtp_file.from)
                        .unwrap_or_else(|| username.clone()),
                    username,
                })
            }
            None => None,
        };

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            fetch_batch_size: env_parse("MAILMIRROR_FETCH_BATCH_SIZE")
                .or(file.fetch_batch_size)
                .unwrap_or(defaults.fetch_batch_size)
                .max(1),
            sent_limit: env_parse("MAILMIRROR_SENT_LIMIT")
                .or(file.sent_limit)
                .unwrap_or(defaults.sent_limit)
                .max(1),
        };

        let storage = StorageSettings {
            preview_limit: env_parse("MAILMIRROR_PREVIEW_LIMIT")
                .or(file.preview_limit)
                .unwrap_or(StorageSettings::default().preview_limit),
            db_path: env_string("MAILMIRROR_DB_PATH")
                .map(PathBuf::from)
                .or(file.db_path),
        };

        Ok(Self {
            imap,
            smtp,
            sync,
            storage,
            folders: file.folders.unwrap_or_default(),
        })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

fn require(value: Option<String>, what: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Config(format!("{what} is not configured")))
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
