use crate::config::{DEFAULT_SETTINGS_PATH, Settings};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Applies JSON-defined rules to a Gmail mailbox.
#[derive(Debug, Parser)]
#[command(name = "gmail-rules", author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file.
    #[arg(long, env = "GMAIL_RULES_CONFIG", default_value = DEFAULT_SETTINGS_PATH)]
    pub config: PathBuf,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "GMAIL_RULES_LOG", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "GMAIL_RULES_DATABASE_URL")]
    pub database_url: Option<String>,

    /// OAuth client secret downloaded from the Google Cloud console.
    #[arg(long, env = "GMAIL_RULES_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    #[arg(long, env = "GMAIL_RULES_RULES")]
    pub rules: Option<PathBuf>,

    /// Gmail search query limiting what gets synced.
    #[arg(long, env = "GMAIL_RULES_QUERY")]
    pub query: Option<String>,

    #[arg(long, env = "GMAIL_RULES_MAX_RESULTS")]
    pub max_results: Option<u32>,

    #[arg(long, env = "GMAIL_RULES_INTERVAL_MINUTES")]
    pub interval_minutes: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Settings from the file with any flag or env override applied on top.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::load(&self.config);
        if let Some(url) = &self.database_url {
            settings.database_url = url.clone();
        }
        if let Some(path) = &self.credentials {
            settings.credentials_path = path.clone();
        }
        if let Some(path) = &self.rules {
            settings.rules_path = path.clone();
        }
        if let Some(query) = &self.query {
            settings.query = query.clone();
        }
        if let Some(n) = self.max_results {
            settings.max_results = n;
        }
        if let Some(n) = self.interval_minutes {
            settings.interval_minutes = n.max(1);
        }
        settings
    }

    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Run { once: false })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Sync and apply rules, repeating until interrupted.
    Run {
        /// Do a single sync and pass, then exit.
        #[arg(long)]
        once: bool,
    },
    /// Apply rules to stored messages without syncing.
    Apply,
    /// Write the default rules file.
    InitRules {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Load the rules file and report what each rule will do.
    CheckRules,
    /// List stored messages.
    Messages(MessagesArgs),
    /// Show which rules have been applied to a message.
    History { message_id: String },
    /// Forget the cached OAuth token.
    ResetToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct MessagesArgs {
    #[arg(long)]
    pub unread: bool,
    /// Label id or name.
    #[arg(long)]
    pub label: Option<String>,
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: i64,
    #[arg(long, default_value_t = 0)]
    pub offset: i64,
}
