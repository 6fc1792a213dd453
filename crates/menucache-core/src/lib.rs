//! menucache core library.
//!
//! Fetches cafeteria menus from an upstream provider (a legacy HTML month
//! calendar or the Sage REST API), normalizes them into one item shape,
//! caches them in SQLite and serves them grouped by day, meal and station.
//! Requests are answered from the cache whenever possible; a month is only
//! scraped when the request targets the current or the next month.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod dates;
pub mod error;
pub mod fetcher;
pub mod grouping;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod providers;
pub mod text;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

pub use cache::{MenuStore, SqliteStore};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, ProviderConfig};
pub use fetcher::{Fetcher, RefreshOutcome, ResolveState};
pub use models::{CanonicalMenuItem, DayResult, MenuDay};
pub use notify::{LogNotifier, Notifier};
pub use providers::{ConfiguredProvider, ScrapeProvider};
pub use text::{wordify, wordify_result};

/// Opens the configured store and provider and wires them into a fetcher.
pub fn fetcher_from_config(
    config: &Config,
    config_path: &Path,
) -> Result<Fetcher<SqliteStore, ConfiguredProvider>> {
    let store = SqliteStore::open(&config.database_path(config_path)?)?;
    let provider = ConfiguredProvider::from_config(&config.provider)?;
    let clock = SystemClock::from_offset_minutes(config.utc_offset_minutes);

    let fetcher = Fetcher::new(store, provider, clock, config.cutoff_hour);
    if config.notify_missing_menu {
        Ok(fetcher.with_notifier(Arc::new(LogNotifier)))
    } else {
        Ok(fetcher)
    }
}
