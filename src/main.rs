use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;

use formstash::app::{App, SessionOutcome};
use formstash::clock::{to_datetime, SystemClock};
use formstash::config::Config;
use formstash::drafts::{self, DraftStatus};
use formstash::logging;
use formstash::persisted::{Persistence, StoredRecord};

#[derive(Parser)]
#[command(name = "formstash")]
#[command(about = "Business listing wizard with automatic draft recovery")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the listing wizard (default)
    Wizard,

    /// List stored drafts with their age and status
    List {
        /// Only show keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Print one stored record
    Show {
        /// Storage key, e.g. business_listing_data
        key: String,
    },

    /// Discard both records of a workflow
    Clear {
        /// Workflow form key, e.g. business_listing
        form_key: String,
    },

    /// Delete expired and corrupt drafts
    Sweep {
        /// Only sweep keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to this file (default: .formstash/config.toml)
        #[arg(short, long, num_args = 0..=1, default_missing_value = "")]
        write: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;

    let is_tui_mode = matches!(cli.command, None | Some(Commands::Wizard));

    // Initialize logging (file-based for TUI, stderr for CLI)
    let logging_handle = logging::init_logging(&config, is_tui_mode, cli.debug)?;

    match cli.command {
        None | Some(Commands::Wizard) => {
            run_tui(config, logging_handle.log_file())?;
        }
        Some(Commands::List { prefix }) => {
            cmd_list(&config, prefix.as_deref())?;
        }
        Some(Commands::Show { key }) => {
            cmd_show(&config, &key)?;
        }
        Some(Commands::Clear { form_key }) => {
            cmd_clear(&config, &form_key)?;
        }
        Some(Commands::Sweep { prefix }) => {
            cmd_sweep(&config, prefix.as_deref())?;
        }
        Some(Commands::Config { write }) => {
            cmd_config(&config, write.as_deref())?;
        }
    }

    Ok(())
}

fn open_persistence(config: &Config) -> Result<Persistence> {
    Persistence::from_config(config, Handle::current()).with_context(|| {
        format!(
            "Failed to open draft storage at {}",
            config.storage_path().display()
        )
    })
}

fn run_tui(config: Config, log_file: Option<&Path>) -> Result<()> {
    let persistence = open_persistence(&config)?;
    let mut app = App::new(config, &persistence)?;
    let result = app.run();

    // Print log file path on exit if logs were written
    if let Some(log_path) = log_file {
        if let Ok(metadata) = log_path.metadata() {
            if metadata.len() > 0 {
                eprintln!("Session log: {}", log_path.display());
            }
        }
    }

    match result? {
        SessionOutcome::Saved => println!("Draft saved. Run formstash again to continue."),
        SessionOutcome::Discarded => println!("Draft discarded."),
        SessionOutcome::Submitted(listing) => {
            println!("Listing submitted:");
            println!(
                "{}",
                serde_json::to_string_pretty(&listing).context("Failed to format listing")?
            );
        }
    }
    Ok(())
}

fn cmd_config(config: &Config, write: Option<&str>) -> Result<()> {
    print!("{}", config.to_toml()?);

    if let Some(target) = write {
        let path = if target.is_empty() {
            Config::project_config_path()
        } else {
            PathBuf::from(target)
        };
        config.save(&path)?;
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}

fn cmd_list(config: &Config, prefix: Option<&str>) -> Result<()> {
    let persistence = open_persistence(config)?;
    let summaries = drafts::inspect(
        persistence.storage().as_ref(),
        &SystemClock,
        config.drafts.expiration(),
        prefix,
    )?;

    if summaries.is_empty() {
        println!("No stored drafts");
        return Ok(());
    }

    println!("Stored drafts ({})", summaries.len());
    println!("{}", "─".repeat(72));

    for summary in &summaries {
        let saved = summary.saved_at.map_or_else(
            || "-".to_string(),
            |t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string(),
        );
        let status = match &summary.status {
            DraftStatus::Fresh { expires_in } => {
                format!("fresh ({}h left)", expires_in.as_secs() / 3600)
            }
            other => other.label().to_string(),
        };
        println!(
            "{:<32} {:<18} {:<17} {:>7} B",
            summary.key, status, saved, summary.bytes
        );
    }

    Ok(())
}

fn cmd_show(config: &Config, key: &str) -> Result<()> {
    let persistence = open_persistence(config)?;
    let Some(raw) = persistence.storage().get(key)? else {
        bail!("No draft stored under '{}'", key);
    };

    match serde_json::from_str::<StoredRecord<serde_json::Value>>(&raw) {
        Ok(record) => {
            let saved = to_datetime(record.timestamp)
                .map_or_else(|| record.timestamp.to_string(), |t| t.to_rfc3339());
            println!("Key:     {}", key);
            println!("Saved:   {}", saved);
            println!("Version: {}", record.version);
            println!("{}", serde_json::to_string_pretty(&record.data)?);
        }
        Err(e) => {
            eprintln!("Warning: record is not readable ({})", e);
            println!("{}", raw);
        }
    }
    Ok(())
}

fn cmd_clear(config: &Config, form_key: &str) -> Result<()> {
    let persistence = open_persistence(config)?;
    drafts::discard_workflow(persistence.storage().as_ref(), form_key)
        .with_context(|| format!("Failed to clear workflow '{}'", form_key))?;
    println!("Cleared draft for '{}'", form_key);
    Ok(())
}

fn cmd_sweep(config: &Config, prefix: Option<&str>) -> Result<()> {
    let persistence = open_persistence(config)?;
    let report = drafts::sweep(
        persistence.storage().as_ref(),
        &SystemClock,
        config.drafts.expiration(),
        prefix,
    )?;

    for key in &report.removed_expired {
        println!("removed (expired): {}", key);
    }
    for key in &report.removed_corrupt {
        println!("removed (corrupt): {}", key);
    }
    println!("{} removed, {} kept", report.removed(), report.kept);
    Ok(())
}
