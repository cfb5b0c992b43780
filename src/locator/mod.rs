use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::imap::{FetchProfile, FolderStatus, MailSession, OpenMode, RemoteMessage};

/// What a candidate folder has to satisfy to be picked.
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    Exists,
    ContainsUid { uid: u32, profile: FetchProfile },
}

/// The chosen folder, left open in the requested mode.
#[derive(Debug)]
pub struct LocatedFolder {
    pub name: String,
    pub status: FolderStatus,
    pub message: Option<RemoteMessage>,
}

/// Tries each candidate in order and returns the first one that exists and passes
/// `probe`. Errors on a candidate only move the search on to the next name.
pub async fn locate(
    session: &mut dyn MailSession,
    candidates: &[String],
    mode: OpenMode,
    probe: Probe,
) -> AppResult<LocatedFolder> {
    for name in candidates {
        match try_candidate(session, name, mode, probe).await {
            Ok(Some(found)) => {
                debug!(folder = %name, "Located folder");
                return Ok(found);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(folder = %name, error = %format!("{e:#}"), "Skipping folder candidate");
            }
        }
    }

    Err(AppError::NotFound(match probe {
        Probe::Exists => format!("none of {candidates:?} exist"),
        Probe::ContainsUid { uid, .. } => format!("UID {uid} in any of {candidates:?}"),
    }))
}

async fn try_candidate(
    session: &mut dyn MailSession,
    name: &str,
    mode: OpenMode,
    probe: Probe,
) -> anyhow::Result<Option<LocatedFolder>> {
    if !session.folder_exists(name).await? {
        return Ok(None);
    }

    let status = session.open(name, mode).await?;

    let message = match probe {
        Probe::Exists => None,
        Probe::ContainsUid { uid, profile } => {
            let fetched = match session.fetch_by_uid(uid, profile).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    close_quietly(session, name).await;
                    return Err(e);
                }
            };
            match fetched {
                Some(message) => Some(message),
                None => {
                    close_quietly(session, name).await;
                    return Ok(None);
                }
            }
        }
    };

    Ok(Some(LocatedFolder {
        name: name.to_string(),
        status,
        message,
    }))
}

async fn close_quietly(session: &mut dyn MailSession, name: &str) {
    if let Err(e) = session.close().await {
        debug!(folder = %name, error = %e, "Closing folder failed");
    }
}

/// First candidate that exists, without opening it. The currently open folder
/// stays open.
pub async fn first_existing(session: &mut dyn MailSession, candidates: &[String]) -> Option<String> {
    for name in candidates {
        match session.folder_exists(name).await {
            Ok(true) => return Some(name.clone()),
            Ok(false) => {}
            Err(e) => debug!(folder = %name, error = %format!("{e:#}"), "Skipping folder candidate"),
        }
    }
    None
}
