use clap::{Parser, Subcommand};

/// Command-line options for mailmirror.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Refresh the inbox and list it
    Inbox,
    /// List the most recent sent messages (read from the server)
    Sent,
    /// List cached messages in the trash
    TrashList,
    /// Show one message, fetching it from the server if needed
    Show { id: String },
    /// Move a message to the trash
    Trash { id: String },
    /// Move a message from the trash back to the inbox
    Restore { id: String },
    /// Permanently delete a message that is already in the trash
    Purge { id: String },
    /// Delete a message without going through the trash view
    Delete { id: String },
    /// Send a message over SMTP
    Send {
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "")]
        cc: String,
        #[arg(long, default_value = "")]
        bcc: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
    },
}
