use anyhow::{Context, Result};
use dirs::home_dir;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::StorageSettings;

const DB_FILE_NAME: &str = "mailmirror.db";

#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        let db_path = match &settings.db_path {
            Some(path) => path.clone(),
            None => default_data_dir()?.join(DB_FILE_NAME),
        };
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("connecting to sqlite at {}", db_path.display()))?;

        let db = Database {
            pool,
            path: db_path,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database; a single connection so every query sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("opening in-memory sqlite")?;

        let db = Database {
            pool,
            path: PathBuf::from(":memory:"),
        };
        db.migrate().await?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_messages (
                id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                subject TEXT,
                received_at INTEGER,
                unread INTEGER NOT NULL DEFAULT 1,
                trashed INTEGER NOT NULL DEFAULT 0,
                raw BLOB
            );
            CREATE INDEX IF NOT EXISTS idx_email_messages_received_at ON email_messages(received_at DESC);
            CREATE INDEX IF NOT EXISTS idx_email_messages_trashed ON email_messages(trashed);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("running migrations")?;

        // Databases created before reconciliation tracking lack this column.
        if let Err(e) = sqlx::query(
            "ALTER TABLE email_messages ADD COLUMN reconcile_pending INTEGER NOT NULL DEFAULT 0;",
        )
        .execute(&self.pool)
        .await
        {
            if !e.to_string().contains("duplicate column name") {
                return Err(e).context("adding reconcile_pending column");
            }
            debug!("reconcile_pending column already present");
        }

        Ok(())
    }
}

pub(crate) fn default_data_dir() -> Result<PathBuf> {
    if let Ok(custom) = env::var("MAILMIRROR_DATA_DIR") {
        let path = PathBuf::from(custom);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating MAILMIRROR_DATA_DIR at {}", path.display()))?;
        return Ok(path);
    }

    if let Some(home) = home_dir() {
        let path = home.join(".mailmirror");
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        } else {
            warn!(
                "Unable to create {}/.mailmirror; falling back to workspace-local storage",
                home.display()
            );
        }
    }

    let cwd = env::current_dir().context("determining current directory")?;
    let path = cwd.join("mailmirror-data");
    std::fs::create_dir_all(&path)
        .with_context(|| format!("creating fallback data directory {}", path.display()))?;
    Ok(path)
}
