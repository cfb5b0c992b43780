use mailmirror::config::Settings;
use mailmirror::errors::AppError;

#[test]
fn file_values_fill_settings_and_defaults_apply() {
    let settings = Settings::from_toml_str(
        r#"
        fetch_batch_size = 25

        [imap]
        host = "imap.example.com"
        username = "me@example.com"
        password = "secret"

        [smtp]
        host = "smtp.example.com"

        [folders]
        trash = ["Papierkorb"]
        "#,
    )
    .expect("valid config");

    assert_eq!(settings.imap.host, "imap.example.com");
    assert_eq!(settings.imap.port, 993);
    assert!(settings.imap.tls);
    assert_eq!(settings.sync.fetch_batch_size, 25);
    assert_eq!(settings.sync.sent_limit, 50);
    assert_eq!(settings.storage.preview_limit, 50);

    let smtp = settings.smtp.expect("smtp section");
    assert_eq!(smtp.port, 587);
    assert_eq!(smtp.username, "me@example.com");
    assert_eq!(smtp.from, "me@example.com");

    assert_eq!(settings.folders.trash, vec!["Papierkorb".to_string()]);
    assert_eq!(settings.folders.inbox_name(), "INBOX");
    assert_eq!(settings.folders.search_order()[0], "Papierkorb");
}

#[test]
fn missing_credentials_are_a_config_error() {
    let err = Settings::from_toml_str(
        r#"
        [imap]
        host = "imap.example.com"
        "#,
    )
    .expect_err("no username");

    assert!(matches!(
        err.downcast_ref::<AppError>(),
        Some(AppError::Config(_))
    ));
}
