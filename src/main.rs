mod actions;
mod auth;
mod cli;
mod config;
mod db;
mod engine;
mod error;
mod gmail;
mod models;
mod predicates;
mod rules;
mod source;
mod sync;
#[cfg(test)]
mod testing;

use crate::cli::{Cli, Command, MessagesArgs};
use crate::config::Settings;
use crate::db::Database;
use crate::engine::RuleEngine;
use crate::gmail::GmailClient;
use crate::models::MessageFilter;
use crate::rules::{ActionKind, MatchMode, RuleSet};
use anyhow::Context;
use chrono::Local;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const EXIT_STORE: u8 = 1;
const EXIT_AUTH: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    let settings = cli.settings();
    let command = cli.command();

    // Commands that touch neither the store nor Gmail.
    match &command {
        Command::InitRules { force } => return report(init_rules(&settings, *force)),
        Command::CheckRules => {
            check_rules(&settings);
            return ExitCode::SUCCESS;
        }
        Command::ResetToken => return report(reset_token().await),
        _ => {}
    }

    let db = match open_store(&settings.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open message store: {:#}", e);
            return ExitCode::from(EXIT_STORE);
        }
    };

    match &command {
        Command::Messages(args) => return report(list_messages(&db, args).await),
        Command::History { message_id } => return report(show_history(&db, message_id).await),
        _ => {}
    }

    let client = match connect(&settings).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to authenticate with Gmail: {:#}", e);
            return ExitCode::from(EXIT_AUTH);
        }
    };
    let engine = RuleEngine::new(db.clone(), client);

    match command {
        Command::Apply => {
            let rules = RuleSet::load(&settings.rules_path);
            engine.run_pass(&rules).await;
        }
        Command::Run { once } => run(&settings, &db, &engine, once).await,
        _ => {}
    }
    ExitCode::SUCCESS
}

fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn open_store(url: &str) -> anyhow::Result<Database> {
    let db = Database::new(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    db.run_migrations()
        .await
        .context("Failed to initialise schema")?;
    Ok(db)
}

async fn connect(settings: &Settings) -> anyhow::Result<GmailClient> {
    let secret = auth::Authenticator::load_secret(&settings.credentials_path).await?;
    let authenticator = auth::Authenticator::authenticate(secret).await?;
    authenticator
        .token(auth::SCOPES)
        .await
        .context("Failed to obtain an access token")?;
    info!("Authenticated with Gmail");
    GmailClient::new(authenticator)
}

/// Syncs and applies rules every `interval_minutes` until Ctrl-C. The rules
/// file is re-read on every tick so edits apply without a restart.
async fn run(settings: &Settings, db: &Database, engine: &RuleEngine<GmailClient>, once: bool) {
    let period = Duration::from_secs(settings.interval_minutes.max(1) * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }

        let rules = RuleSet::load(&settings.rules_path);
        let source = engine.dispatcher().source();
        if let Err(e) = sync::sync_messages(source, db, &settings.query, settings.max_results).await {
            error!("Sync failed: {}", e);
        }
        engine.run_pass(&rules).await;

        if once {
            break;
        }
        info!("Next run in {} minutes", settings.interval_minutes.max(1));
    }
}

fn init_rules(settings: &Settings, force: bool) -> anyhow::Result<()> {
    let path = &settings.rules_path;
    if rules::write_default_rules(path, force)? {
        println!("Wrote default rules to {}", path.display());
    } else {
        println!("{} already exists, use --force to overwrite", path.display());
    }
    Ok(())
}

fn check_rules(settings: &Settings) {
    let rules = RuleSet::load(&settings.rules_path);
    if rules.is_empty() {
        println!("No rules loaded from {}", settings.rules_path.display());
        return;
    }

    for rule in &rules {
        let mode = match &rule.mode {
            MatchMode::All => "all".to_string(),
            MatchMode::Any => "any".to_string(),
            MatchMode::Invalid(raw) => format!("'{}' (invalid, never matches)", raw),
        };
        println!("{} {:?}: match {}", rule.id, rule.name, mode);
        if rule.conditions.is_empty() {
            println!("  (no conditions, never matches)");
        }
        for condition in &rule.conditions {
            let flag = if condition.is_inert() { "!" } else { "-" };
            println!("  {} {}", flag, condition);
        }
        for action in &rule.actions {
            let flag = if matches!(action.kind, ActionKind::Unknown(_)) { "!" } else { "=>" };
            match &action.value {
                Some(value) => println!("  {} {} {}", flag, action.kind.as_str(), value),
                None => println!("  {} {}", flag, action.kind.as_str()),
            }
        }
    }
}

async fn reset_token() -> anyhow::Result<()> {
    if auth::RingStorage.clear_token().await? {
        println!("Token cleared. The next run will ask for consent again.");
    } else {
        println!("No cached token.");
    }
    Ok(())
}

async fn list_messages(db: &Database, args: &MessagesArgs) -> anyhow::Result<()> {
    let label_id = match &args.label {
        Some(label) => Some(db.find_label_id(label).await?.unwrap_or_else(|| {
            warn!("Unknown label '{}', matching it as an id", label);
            label.clone()
        })),
        None => None,
    };
    let filter = MessageFilter {
        from_contains: args.from.clone(),
        subject_contains: args.subject.clone(),
        is_read: args.unread.then_some(false),
        label_id,
    };

    let messages = db.query_by_filter(&filter, args.limit, args.offset).await?;
    for msg in &messages {
        println!(
            "{}  {}  {}  {:<30}  {}",
            msg.id,
            msg.received_at().with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            if msg.is_read { " " } else { "*" },
            msg.from_address.as_deref().unwrap_or("(unknown)"),
            msg.subject.as_deref().unwrap_or("(no subject)"),
        );
    }
    println!("{} messages", messages.len());
    Ok(())
}

async fn show_history(db: &Database, message_id: &str) -> anyhow::Result<()> {
    let records = db.executions_for_message(message_id).await?;
    if records.is_empty() {
        println!("No rules have been applied to {}", message_id);
        return Ok(());
    }
    for record in &records {
        println!(
            "{}  {}  {}",
            record.executed_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            record.rule_id,
            serde_json::to_string(&record.actions_taken)?,
        );
    }
    Ok(())
}
