//! IMAP session (LOGIN) using async-imap 0.11 with tokio-rustls.
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_imap::imap_proto::{Response, ResponseCode, UidSetMember};
use async_imap::types::{Fetch, Flag, Name, UnsolicitedResponse};
use async_imap::{Client, Session};
use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt, TryStreamExt};
use rustls_native_certs::load_native_certs;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tokio_util::either::Either;
use tracing::{debug, warn};

use super::{FetchProfile, FolderStatus, MailConnector, MailSession, OpenMode, RemoteMessage};
use crate::config::ImapSettings;

type ImapStream = Compat<Either<TlsStream<TcpStream>, TcpStream>>;
type ImapSession = Session<ImapStream>;

const ENVELOPE_QUERY: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[HEADER])";
const FULL_QUERY: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[])";

/// Opens a fresh connection per call; there is no pooling.
pub struct ImapConnector {
    settings: ImapSettings,
}

impl ImapConnector {
    pub fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }

    async fn open_stream(&self) -> Result<ImapStream> {
        let host = self.settings.host.as_str();
        let port = self.settings.port;

        let tcp = tokio::time::timeout(
            self.settings.connect_timeout,
            TcpStream::connect((host, port)),
        )
        .await
        .map_err(|_| anyhow!("connecting to {host}:{port} timed out"))?
        .with_context(|| format!("connecting to {host}:{port}"))?;

        if !self.settings.tls {
            return Ok(Either::Right(tcp).compat());
        }

        let mut root_store = RootCertStore::empty();
        for cert in load_native_certs().context("failed to load native certs")? {
            root_store
                .add(&Certificate(cert.0))
                .context("failed to add cert to root store")?;
        }

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host).context("invalid DNS name")?;
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .context("starting TLS for IMAP")?;

        Ok(Either::Left(tls_stream).compat())
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailSession>> {
        let stream = self.open_stream().await?;
        let mut client = Client::new(stream);

        let _greeting = client
            .read_response()
            .await
            .context("reading IMAP greeting")?
            .ok_or_else(|| anyhow!("unexpected end of stream, expected greeting"))?;

        let session = client
            .login(&self.settings.username, &self.settings.password)
            .await
            .map_err(|(err, _client)| err)
            .context("IMAP LOGIN")?;

        debug!(host = %self.settings.host, "IMAP session established");
        Ok(Box::new(ImapMailSession {
            session,
            selected: None,
        }))
    }
}

struct ImapMailSession {
    session: ImapSession,
    selected: Option<(String, OpenMode)>,
}

impl ImapMailSession {
    fn drain_unsolicited(&mut self) -> Vec<UnsolicitedResponse> {
        let mut drained = Vec::new();
        while let Ok(response) = self.session.unsolicited_responses.try_recv() {
            drained.push(response);
        }
        drained
    }

    fn require_selected(&self) -> Result<&str> {
        self.selected
            .as_ref()
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| anyhow!("no folder is open"))
    }
}

#[async_trait]
impl MailSession for ImapMailSession {
    async fn folder_exists(&mut self, name: &str) -> Result<bool> {
        let pattern = quote_mailbox(name);
        let names: Vec<Name> = self
            .session
            .list(Some(""), Some(&pattern))
            .await
            .with_context(|| format!("LIST {name}"))?
            .try_collect()
            .await
            .with_context(|| format!("reading LIST response for {name}"))?;

        Ok(names.iter().any(|n| same_mailbox(n.name(), name)))
    }

    async fn open(&mut self, name: &str, mode: OpenMode) -> Result<FolderStatus> {
        let mailbox = match mode {
            OpenMode::ReadOnly => self.session.examine(name).await,
            OpenMode::ReadWrite => self.session.select(name).await,
        }
        .with_context(|| format!("opening folder {name}"))?;

        self.selected = Some((name.to_string(), mode));
        Ok(FolderStatus {
            name: name.to_string(),
            exists: mailbox.exists,
            uid_next: mailbox.uid_next,
            uid_validity: mailbox.uid_validity,
        })
    }

    async fn close(&mut self) -> Result<()> {
        match self.selected.take() {
            None => Ok(()),
            // CLOSE would expunge anything flagged \Deleted; UNSELECT leaves it.
            Some((name, OpenMode::ReadWrite)) => self
                .session
                .run_command_and_check_ok("UNSELECT")
                .await
                .with_context(|| format!("unselecting {name}")),
            Some((name, OpenMode::ReadOnly)) => self
                .session
                .close()
                .await
                .with_context(|| format!("closing {name}")),
        }
    }

    async fn status(&mut self, name: &str) -> Result<FolderStatus> {
        let mailbox = self
            .session
            .status(name, "(MESSAGES UIDNEXT UIDVALIDITY)")
            .await
            .with_context(|| format!("STATUS {name}"))?;

        Ok(FolderStatus {
            name: name.to_string(),
            exists: mailbox.exists,
            uid_next: mailbox.uid_next,
            uid_validity: mailbox.uid_validity,
        })
    }

    async fn fetch_by_uid(
        &mut self,
        uid: u32,
        profile: FetchProfile,
    ) -> Result<Option<RemoteMessage>> {
        let found = self.fetch_uids(&[uid], profile).await?;
        Ok(found.into_iter().find(|m| m.uid == uid))
    }

    async fn fetch_sequence_range(
        &mut self,
        start: u32,
        end: u32,
        profile: FetchProfile,
    ) -> Result<Vec<RemoteMessage>> {
        let folder = self.require_selected()?.to_string();
        let stream = self
            .session
            .fetch(format!("{start}:{end}"), query_for(profile))
            .await
            .with_context(|| format!("FETCH {start}:{end} in {folder}"))?;
        Ok(collect_messages(stream).await)
    }

    async fn fetch_uid_range(
        &mut self,
        from: u32,
        profile: FetchProfile,
    ) -> Result<Vec<RemoteMessage>> {
        let folder = self.require_selected()?.to_string();
        let stream = self
            .session
            .uid_fetch(format!("{from}:*"), query_for(profile))
            .await
            .with_context(|| format!("UID FETCH {from}:* in {folder}"))?;
        // `n:*` always includes the highest UID, even when it is below `n`.
        let mut messages = collect_messages(stream).await;
        messages.retain(|m| m.uid >= from);
        Ok(messages)
    }

    async fn fetch_uids(
        &mut self,
        uids: &[u32],
        profile: FetchProfile,
    ) -> Result<Vec<RemoteMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let folder = self.require_selected()?.to_string();
        let uid_set = build_uid_sequence(uids);
        let stream = self
            .session
            .uid_fetch(&uid_set, query_for(profile))
            .await
            .with_context(|| format!("UID FETCH {uid_set} in {folder}"))?;
        Ok(collect_messages(stream).await)
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>> {
        let uids: HashSet<u32> = self
            .session
            .uid_search("UNSEEN")
            .await
            .context("UID SEARCH UNSEEN")?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn copy_with_uid_mapping(&mut self, uid: u32, dest: &str) -> Result<Option<u32>> {
        // Anything queued before the COPY belongs to earlier commands.
        let _ = self.drain_unsolicited();

        self.session
            .uid_copy(uid.to_string(), dest)
            .await
            .with_context(|| format!("UID COPY {uid} to {dest}"))?;

        let mapped = self
            .drain_unsolicited()
            .iter()
            .find_map(|response| match response {
                UnsolicitedResponse::Other(data) => copyuid_destination(data.parsed()),
                _ => None,
            });

        if mapped.is_none() {
            debug!(uid, dest = %dest, "Server did not report COPYUID");
        }
        Ok(mapped)
    }

    async fn copy(&mut self, uid: u32, dest: &str) -> Result<()> {
        self.session
            .uid_copy(uid.to_string(), dest)
            .await
            .with_context(|| format!("UID COPY {uid} to {dest}"))
    }

    async fn mark_deleted(&mut self, uid: u32) -> Result<()> {
        let _: Vec<Fetch> = self
            .session
            .uid_store(uid.to_string(), "+FLAGS.SILENT (\\Deleted)")
            .await
            .with_context(|| format!("flagging UID {uid} deleted"))?
            .try_collect()
            .await
            .with_context(|| format!("reading STORE response for UID {uid}"))?;
        Ok(())
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        let _: Vec<Fetch> = self
            .session
            .uid_store(uid.to_string(), "+FLAGS.SILENT (\\Seen)")
            .await
            .with_context(|| format!("flagging UID {uid} seen"))?
            .try_collect()
            .await
            .with_context(|| format!("reading STORE response for UID {uid}"))?;
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        let folder = self.require_selected()?.to_string();
        let expunged: Vec<u32> = self
            .session
            .expunge()
            .await
            .with_context(|| format!("EXPUNGE {folder}"))?
            .try_collect()
            .await
            .with_context(|| format!("reading EXPUNGE response for {folder}"))?;
        debug!(folder = %folder, count = expunged.len(), "Expunged messages");
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.session.logout().await.context("IMAP LOGOUT")
    }
}

/// UID assigned in the destination folder, from a tagged `OK [COPYUID ...]`.
pub fn copyuid_destination(response: &Response<'_>) -> Option<u32> {
    match response {
        Response::Done {
            code: Some(ResponseCode::CopyUid(_, _, dest)),
            ..
        } => dest.first().map(|member| match member {
            UidSetMember::Uid(uid) => *uid,
            UidSetMember::UidRange(range) => *range.start(),
        }),
        _ => None,
    }
}

async fn collect_messages<S>(mut stream: S) -> Vec<RemoteMessage>
where
    S: Stream<Item = async_imap::error::Result<Fetch>> + Unpin,
{
    let mut out = Vec::new();
    while let Some(fetch_result) = stream.next().await {
        let fetch = match fetch_result {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Failed to fetch message");
                continue;
            }
        };
        if let Some(message) = to_remote_message(&fetch) {
            out.push(message);
        }
    }
    out
}

fn to_remote_message(fetch: &Fetch) -> Option<RemoteMessage> {
    let uid = fetch.uid.filter(|uid| *uid > 0)?;
    let raw = fetch.body().map(<[u8]>::to_vec);
    let header = fetch
        .header()
        .map(<[u8]>::to_vec)
        .or_else(|| raw.clone())
        .unwrap_or_default();

    Some(RemoteMessage {
        uid,
        seen: fetch.flags().any(|f| matches!(f, Flag::Seen)),
        internal_date: fetch.internal_date().map(|dt| dt.with_timezone(&Utc)),
        header,
        raw,
    })
}

fn query_for(profile: FetchProfile) -> &'static str {
    match profile {
        FetchProfile::Envelope => ENVELOPE_QUERY,
        FetchProfile::Full => FULL_QUERY,
    }
}

fn build_uid_sequence(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn quote_mailbox(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

fn same_mailbox(listed: &str, wanted: &str) -> bool {
    if wanted.eq_ignore_ascii_case("INBOX") {
        return listed.eq_ignore_ascii_case("INBOX");
    }
    listed == wanted
}
