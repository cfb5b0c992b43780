mod common;

use std::sync::Arc;

use mailmirror::errors::AppError;
use mailmirror::sync::SyncEngine;

use common::{date, raw_message, test_settings, FakeMailServer};

fn engine(server: &FakeMailServer, batch: u32) -> SyncEngine {
    let mut settings = test_settings();
    settings.sync.fetch_batch_size = batch;
    SyncEngine::new(Arc::new(server.clone()), Arc::new(settings))
}

fn inbox_message(n: u32) -> Vec<u8> {
    raw_message(
        &format!("sender{n}@example.com"),
        "me@example.com",
        &format!("Message {n}"),
        Some(&format!("<m{n}@example.com>")),
        "body",
    )
}

#[tokio::test]
async fn unread_message_outside_window_is_included_once() {
    let server = FakeMailServer::standard();
    server.add_message("INBOX", inbox_message(1), false, Some(date(2024, 1, 1)));
    server.add_message("INBOX", inbox_message(2), true, Some(date(2024, 1, 2)));
    server.add_message("INBOX", inbox_message(3), false, Some(date(2024, 1, 3)));
    server.add_message("INBOX", inbox_message(4), true, Some(date(2024, 1, 4)));

    let messages = engine(&server, 2).sync_folder("INBOX").await.expect("sync");

    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["4", "3", "1"]);
    assert!(messages.iter().all(|m| m.raw.is_none()));
    assert!(messages.iter().find(|m| m.id == "1").is_some_and(|m| m.unread));
    assert_eq!(server.open_sessions(), 0);
}

#[tokio::test]
async fn message_in_window_and_unread_search_appears_once() {
    let server = FakeMailServer::standard();
    let x = server.add_message("INBOX", inbox_message(1), false, Some(date(2024, 1, 1)));
    server.add_message("INBOX", inbox_message(2), true, None);

    let messages = engine(&server, 100).sync_folder("INBOX").await.expect("sync");

    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages.iter().filter(|m| m.id == x.to_string()).count(),
        1
    );
    // Undated sorts last.
    assert_eq!(messages[1].id, "2");
}

#[tokio::test]
async fn non_inbox_folder_skips_unseen_search() {
    let server = FakeMailServer::standard();
    server.add_folder("Archive", 1);
    server.add_message("Archive", inbox_message(1), false, Some(date(2024, 1, 1)));
    server.add_message("Archive", inbox_message(2), true, Some(date(2024, 1, 2)));

    let messages = engine(&server, 1).sync_folder("Archive").await.expect("sync");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "2");
}

#[tokio::test]
async fn empty_folder_yields_nothing() {
    let server = FakeMailServer::standard();

    let messages = engine(&server, 100).sync_folder("INBOX").await.expect("sync");
    assert!(messages.is_empty());
    assert_eq!(server.open_sessions(), 0);
}

#[tokio::test]
async fn connect_failure_is_remote_unavailable() {
    let server = FakeMailServer::standard();
    server.set_fail_connect(true);

    let err = engine(&server, 100).sync_folder("INBOX").await.unwrap_err();
    assert!(matches!(err, AppError::RemoteUnavailable(_)));
}

#[tokio::test]
async fn missing_folder_fails_and_releases_connection() {
    let server = FakeMailServer::standard();

    let err = engine(&server, 100).sync_folder("Nope").await.unwrap_err();
    assert!(matches!(err, AppError::RemoteUnavailable(_)));
    assert_eq!(server.connects(), 1);
    assert_eq!(server.open_sessions(), 0);
}

#[tokio::test]
async fn sent_folder_lists_recipients_from_first_existing_candidate() {
    let server = FakeMailServer::standard();
    server.add_message(
        "Sent",
        raw_message("me@example.com", "Carol <carol@example.com>", "Report", None, "x"),
        true,
        Some(date(2024, 1, 5)),
    );

    let messages = engine(&server, 100).sync_sent_folder().await.expect("sent");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, "Carol <carol@example.com>");
    assert!(messages[0].raw.is_none());
    assert_eq!(server.open_sessions(), 0);
}

#[tokio::test]
async fn sent_folder_missing_everywhere_is_not_found() {
    let server = FakeMailServer::default();
    server.add_folder("INBOX", 1);

    let err = engine(&server, 100).sync_sent_folder().await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn fetch_message_searches_folders_and_marks_seen() {
    let server = FakeMailServer::standard();
    let uid = server.add_message("Sent", inbox_message(1), false, Some(date(2024, 1, 1)));

    let sync = engine(&server, 100);
    let fetched = sync
        .fetch_message(&uid.to_string(), true)
        .await
        .expect("fetch")
        .expect("found");

    assert!(fetched.has_raw());
    assert!(!fetched.unread);
    assert!(server.is_seen("Sent", uid));

    assert!(sync.fetch_message("999", false).await.expect("fetch").is_none());
    assert!(sync.fetch_message("not-a-uid", false).await.expect("fetch").is_none());
    assert_eq!(server.open_sessions(), 0);
}
