use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::errors::AppError;
use crate::imap::ImapConnector;
use crate::mailbox::Mailbox;
use crate::mailer::SendRequest;
use crate::storage::{Database, OfflineCache};

pub async fn run(cli: Cli) -> Result<()> {
    let settings = Arc::new(Settings::load()?);
    let db = Database::open(&settings.storage)
        .await
        .map_err(|e| AppError::Database(format!("{e:#}")))?;
    info!(path = %db.path().display(), "Using SQLite store");

    let connector = Arc::new(ImapConnector::new(settings.imap.clone()));
    let mailbox = Mailbox::new(connector, settings.clone(), OfflineCache::new(&db));

    match cli.command {
        Command::Inbox => print_json(&mailbox.list_inbox().await),
        Command::Sent => print_json(&mailbox.list_sent().await),
        Command::TrashList => print_json(&mailbox.list_trash().await),
        Command::Show { id } => match mailbox.get_detail(&id).await {
            Some(detail) => print_json(&detail),
            None => anyhow::bail!("message {id} not found"),
        },
        Command::Trash { id } => report_move(mailbox.trash(&id).await),
        Command::Restore { id } => report_move(mailbox.restore(&id).await),
        Command::Purge { id } => report_flag(&id, mailbox.permanently_delete(&id).await),
        Command::Delete { id } => report_flag(&id, mailbox.delete(&id).await),
        Command::Send {
            to,
            cc,
            bcc,
            subject,
            body,
        } => {
            let request = SendRequest {
                to,
                cc,
                bcc,
                subject,
                body,
            };
            mailbox.send(&request).await?;
            print_json(&serde_json::json!({ "sent": true }))
        }
    }
}

fn report_move(outcome: crate::types::MoveOutcome) -> Result<()> {
    print_json(&outcome)?;
    if !outcome.success {
        anyhow::bail!("operation failed for {}", outcome.effective_id);
    }
    Ok(())
}

fn report_flag(id: &str, success: bool) -> Result<()> {
    print_json(&serde_json::json!({ "id": id, "success": success }))?;
    if !success {
        anyhow::bail!("operation failed for {id}");
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
