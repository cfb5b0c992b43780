pub mod app;
pub mod cli;
pub mod codec;
pub mod config;
pub mod errors;
pub mod imap;
pub mod lifecycle;
pub mod locator;
pub mod mailbox;
pub mod mailer;
pub mod storage;
pub mod sync;
pub mod types;
