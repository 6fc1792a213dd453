//! menucache - cafeteria menus from cache, scraped on demand.
//!
//! Serves menu days as JSON (or plain text with `--text`) and offers the
//! maintenance entry points a deployment needs: a cron-friendly cache reset
//! and a historical backfill.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use menucache_core::credentials::CredentialStore;
use menucache_core::dates::school_week_monday;
use menucache_core::{
    fetcher_from_config, Config, DayResult, Fetcher, MenuStore, ProviderConfig, RefreshOutcome, ScrapeProvider,
};

const LOG_FILE_PREFIX: &str = "menucache.log";

/// Cafeteria menu cache
#[derive(Parser)]
#[command(name = "menucache")]
#[command(about = "menucache - cafeteria menus from cache, scraped on demand", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $MENUCACHE_CONFIG, then ~/.config/menucache/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write a daily rolling log file into this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Print menus as plain text instead of JSON
    #[arg(long, global = true)]
    text: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Menu days for a date range, scraping the current or next month if needed
    Resolve {
        /// First date (YYYY-MM-DD)
        start: NaiveDate,

        /// Last date, inclusive (defaults to the first date)
        end: Option<NaiveDate>,
    },

    /// The next (or, with a negative count, previous) days that have menus
    Days {
        /// Number of days; negative walks backward
        #[arg(short = 'n', long, default_value_t = 5, allow_hyphen_values = true)]
        count: i32,

        /// Menu days to skip first
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i32,

        /// Start date (defaults to the current serving day)
        #[arg(long)]
        start: Option<NaiveDate>,
    },

    /// Plain-text menu for one date
    Wordify {
        /// Date (defaults to the next school day)
        date: Option<NaiveDate>,
    },

    /// Monday through Friday of one school week
    Week {
        /// Any date in the week; weekends pick the coming week (defaults to the next school day)
        date: Option<NaiveDate>,
    },

    /// Re-scrape the current month (and the next one near month end)
    #[command(name = "reset-cache")]
    ResetCache,

    /// Scrape every month touched by a date range
    Historical {
        start: NaiveDate,
        end: NaiveDate,
    },

    /// Store the Sage password in the OS keychain (read from stdin)
    #[command(name = "set-password")]
    SetPassword,
}

/// Initialize the tracing subscriber for logging
///
/// Use RUST_LOG to control the level (e.g., RUST_LOG=menucache_core=debug).
/// The returned guard flushes the log file on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config(explicit: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    match explicit {
        Some(path) => Ok((Config::load_from(&path)?, path)),
        None => Config::load(),
    }
}

fn print_days<S: MenuStore, P: ScrapeProvider>(fetcher: &Fetcher<S, P>, days: &[DayResult], text: bool) -> Result<()> {
    if text {
        let rendered = days
            .iter()
            .map(|day| fetcher.wordify(day))
            .collect::<Result<Vec<_>>>()?;
        println!("{}", rendered.join("\n\n"));
    } else {
        println!("{}", serde_json::to_string_pretty(days)?);
    }
    Ok(())
}

fn print_outcome(outcome: RefreshOutcome) {
    println!("Cached {} items across {} dates", outcome.items, outcome.dates);
}

fn set_password(config: &Config) -> Result<()> {
    let ProviderConfig::Sage { email, .. } = &config.provider else {
        anyhow::bail!("The configured provider does not use a password");
    };

    let mut password = String::new();
    io::stdin()
        .lock()
        .read_line(&mut password)
        .context("Failed to read password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("Empty password");
    }

    CredentialStore::store(email, password)?;
    println!("Stored password for {}", email);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    let (config, config_path) = load_config(cli.config)?;
    info!(config = %config_path.display(), "menucache starting");

    match cli.command {
        Commands::SetPassword => set_password(&config),
        command => run(command, &config, &config_path, cli.text).await,
    }
}

async fn run(command: Commands, config: &Config, config_path: &Path, text: bool) -> Result<()> {
    let mut fetcher = fetcher_from_config(config, config_path)?;

    match command {
        Commands::Resolve { start, end } => {
            let days = fetcher.resolve(start, end.unwrap_or(start)).await?;
            print_days(&fetcher, &days, text)?;
        }
        Commands::Days { count, offset, start } => {
            let days = fetcher.fetch_days(count, offset, start).await?;
            print_days(&fetcher, &days, text)?;
        }
        Commands::Wordify { date } => {
            let date = date.unwrap_or_else(|| fetcher.next_school_day());
            let days = fetcher.resolve(date, date).await?;
            let day = days
                .into_iter()
                .next()
                .unwrap_or_else(|| DayResult::not_available(date));
            println!("{}", fetcher.wordify(&day)?);
        }
        Commands::Week { date } => {
            let date = date.unwrap_or_else(|| fetcher.next_school_day());
            let days = fetcher.week(school_week_monday(date)).await?;
            print_days(&fetcher, &days, text)?;
        }
        Commands::ResetCache => print_outcome(fetcher.reset_cache().await?),
        Commands::Historical { start, end } => print_outcome(fetcher.historical_scrape(start, end).await?),
        Commands::SetPassword => set_password(config)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_negative_count() {
        let cli = Cli::parse_from(["menucache", "days", "--count", "-3", "--start", "2024-03-05"]);
        match cli.command {
            Commands::Days { count, offset, start } => {
                assert_eq!(count, -3);
                assert_eq!(offset, 0);
                assert_eq!(start, NaiveDate::from_ymd_opt(2024, 3, 5));
            }
            _ => panic!("expected days"),
        }
    }

    #[test]
    fn test_parse_resolve_range_with_global_flags() {
        let cli = Cli::parse_from(["menucache", "resolve", "2024-03-04", "2024-03-08", "--text"]);
        assert!(cli.text);
        match cli.command {
            Commands::Resolve { start, end } => {
                assert_eq!(start, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
                assert_eq!(end, NaiveDate::from_ymd_opt(2024, 3, 8));
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn test_parse_week_defaults_date() {
        let cli = Cli::parse_from(["menucache", "week"]);
        assert!(matches!(cli.command, Commands::Week { date: None }));
    }

    #[test]
    fn test_parse_rejects_bad_date() {
        assert!(Cli::try_parse_from(["menucache", "resolve", "03/04/2024"]).is_err());
    }
}
