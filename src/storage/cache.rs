//! Local record of every message the client knows about.
//!
//! Nothing here returns an error: a failed statement is logged and reported as
//! `false`, `None` or an empty list. The server stays the source of truth for
//! content, so callers treat a cache miss the same way as a failure.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use super::Database;
use crate::types::{MessagePreview, StoredMessage};

#[derive(Clone, Debug)]
pub struct OfflineCache {
    pool: SqlitePool,
}

impl OfflineCache {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Inserts new rows as not trashed; existing rows keep their `trashed` flag.
    pub async fn upsert_batch(&self, messages: &[StoredMessage]) -> bool {
        if messages.is_empty() {
            return true;
        }
        settle(
            "upserting messages",
            self.try_upsert_batch(messages).await.map(|()| true),
            false,
        )
    }

    async fn try_upsert_batch(&self, messages: &[StoredMessage]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("beginning transaction")?;

        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO email_messages (id, sender, subject, received_at, unread, trashed, raw)
                VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    sender = excluded.sender,
                    subject = excluded.subject,
                    received_at = excluded.received_at,
                    unread = excluded.unread,
                    raw = excluded.raw;
                "#,
            )
            .bind(&message.id)
            .bind(&message.sender)
            .bind(&message.subject)
            .bind(message.received_at.map(|ts| ts.timestamp()))
            .bind(message.unread)
            .bind(&message.raw)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("upserting message {}", message.id))?;
        }

        tx.commit().await.context("committing batch transaction")?;
        debug!(count = messages.len(), "Upserted messages");
        Ok(())
    }

    /// Newest first with undated rows last; ties go to the higher id.
    pub async fn load_previews(&self, trashed: bool, limit: u32) -> Vec<MessagePreview> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender, subject, received_at, unread
            FROM email_messages
            WHERE trashed = ?1
            ORDER BY received_at DESC NULLS LAST, CAST(id AS INTEGER) DESC, id DESC
            LIMIT ?2;
            "#,
        )
        .bind(trashed)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("loading previews");

        let rows = settle("loading previews", rows, Vec::new());
        rows.iter()
            .map(|row| MessagePreview {
                id: row.get(0),
                sender: row.get(1),
                subject: row.get(2),
                received_at: from_epoch(row.get::<Option<i64>, _>(3)),
                unread: row.get::<bool, _>(4),
            })
            .collect()
    }

    pub async fn mark_trashed(&self, id: &str) -> bool {
        self.set_trashed(id, true).await
    }

    pub async fn unmark_trashed(&self, id: &str) -> bool {
        self.set_trashed(id, false).await
    }

    async fn set_trashed(&self, id: &str, trashed: bool) -> bool {
        let result = sqlx::query("UPDATE email_messages SET trashed = ?2 WHERE id = ?1")
            .bind(id)
            .bind(trashed)
            .execute(&self.pool)
            .await
            .with_context(|| format!("setting trashed={trashed} on {id}"));

        settle("updating trashed flag", result.map(|r| r.rows_affected() > 0), false)
    }

    /// Moves a row to a new id in place. Clears any pending reconciliation.
    pub async fn rebind_id(&self, old_id: &str, new_id: &str) -> bool {
        if old_id == new_id {
            return true;
        }

        let result = sqlx::query(
            "UPDATE email_messages SET id = ?2, reconcile_pending = 0 WHERE id = ?1",
        )
        .bind(old_id)
        .bind(new_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("rebinding {old_id} to {new_id}"));

        let rebound = settle("rebinding id", result.map(|r| r.rows_affected() > 0), false);
        if rebound {
            debug!(old_id = %old_id, new_id = %new_id, "Rebound cached message");
        } else {
            warn!(old_id = %old_id, new_id = %new_id, "No cached message to rebind");
        }
        rebound
    }

    pub async fn mark_read(&self, id: &str) -> bool {
        let result = sqlx::query("UPDATE email_messages SET unread = 0 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking {id} read"));

        settle("marking read", result.map(|r| r.rows_affected() > 0), false)
    }

    /// `false` for unknown ids as well.
    pub async fn is_trashed(&self, id: &str) -> bool {
        let result = sqlx::query("SELECT trashed FROM email_messages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("reading trashed flag of {id}"));

        settle(
            "reading trashed flag",
            result.map(|row| row.is_some_and(|r| r.get::<bool, _>(0))),
            false,
        )
    }

    pub async fn load_by_id(&self, id: &str) -> Option<StoredMessage> {
        let result = sqlx::query(
            r#"
            SELECT id, sender, subject, received_at, unread, trashed, raw, reconcile_pending
            FROM email_messages
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading message {id}"));

        settle("loading message", result, None).map(|row| stored_from_row(&row))
    }

    pub async fn permanently_delete(&self, id: &str) -> bool {
        let result = sqlx::query("DELETE FROM email_messages WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting message {id}"));

        settle("deleting message", result.map(|r| r.rows_affected() > 0), false)
    }

    pub async fn set_reconcile_pending(&self, id: &str, pending: bool) -> bool {
        let result =
            sqlx::query("UPDATE email_messages SET reconcile_pending = ?2 WHERE id = ?1")
                .bind(id)
                .bind(pending)
                .execute(&self.pool)
                .await
                .with_context(|| format!("setting reconcile_pending={pending} on {id}"));

        settle(
            "updating reconcile flag",
            result.map(|r| r.rows_affected() > 0),
            false,
        )
    }
}

fn stored_from_row(row: &SqliteRow) -> StoredMessage {
    StoredMessage {
        id: row.get(0),
        sender: row.get(1),
        subject: row.get(2),
        received_at: from_epoch(row.get::<Option<i64>, _>(3)),
        unread: row.get::<bool, _>(4),
        trashed: row.get::<bool, _>(5),
        raw: row.get::<Option<Vec<u8>>, _>(6),
        reconcile_pending: row.get::<bool, _>(7),
    }
}

fn from_epoch(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

fn settle<T>(what: &str, result: Result<T>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Cache operation failed: {what}");
            fallback
        }
    }
}
