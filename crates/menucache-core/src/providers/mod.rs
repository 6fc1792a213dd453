//! Scrape providers: the upstream sources of menu data.
//!
//! Two implementations exist:
//! - `CalendarProvider`: the legacy HTML month calendar
//! - `SageProvider`: the Sage REST API with its repeating week cycle
//!
//! A provider turns a calendar month into one or more `Period`s (a month
//! page, or the cycle weeks overlapping the month), fetches each period's
//! payload and parses it into raw items. `scrape_month` ties the steps
//! together and hands back canonical items ready for the store.

pub mod html;
pub mod markup;
pub mod sage;

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::api::HttpClient;
use crate::config::ProviderConfig;
use crate::dates::{date_key, YearMonth};
use crate::models::{CanonicalMenuItem, RawItem};
use crate::normalize::normalize_batch;

pub use html::CalendarProvider;
pub use sage::{SageCredentials, SageProvider};

/// One unit of upstream data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    /// A calendar month page.
    Month(YearMonth),
    /// One week of a Sage cycle. `week` is the cycle-relative index sent
    /// upstream; `dates` are the real Sunday..Saturday it maps onto.
    CycleWeek {
        menu_id: i64,
        week: u32,
        dates: [NaiveDate; 7],
    },
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Month(month) => write!(f, "month {}", month),
            Period::CycleWeek { menu_id, week, dates } => write!(
                f,
                "menu {} week {} ({}..{})",
                menu_id,
                week,
                date_key(dates[0]),
                date_key(dates[6])
            ),
        }
    }
}

/// What a provider will fetch for a month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonthPlan {
    Periods(Vec<Period>),
    /// The configured menu does not exist upstream.
    MenuMissing,
}

/// Raw items parsed from one period's payload.
#[derive(Debug, Clone, Default)]
pub struct ParsedPeriod {
    pub items: Vec<RawItem>,
    /// The payload had no section for the configured menu.
    pub menu_missing: bool,
}

/// Canonical items produced by scraping one month.
#[derive(Debug, Clone, Default)]
pub struct ScrapeBatch {
    /// Dates the batch speaks for; stored data for these is replaced.
    pub dates: BTreeSet<NaiveDate>,
    pub items: Vec<CanonicalMenuItem>,
    /// Set when the configured menu could not be found upstream.
    pub missing_menu: Option<String>,
}

/// Drops entries that repeat the one right before them; the upstream
/// markup sometimes emits the same label twice in a row.
pub fn dedup_adjacent(mut items: Vec<RawItem>) -> Vec<RawItem> {
    items.dedup_by(|next, prev| next.dedup_key() == prev.dedup_key());
    items
}

#[allow(async_fn_in_trait)]
pub trait ScrapeProvider {
    /// Name of the configured menu, for missing-menu notices.
    fn menu_name(&self) -> String;

    async fn plan_month(&mut self, month: YearMonth) -> Result<MonthPlan>;

    /// Network I/O: the raw HTML or JSON payload for one period.
    async fn fetch(&mut self, period: &Period) -> Result<String>;

    fn parse(&self, period: &Period, payload: &str) -> Result<ParsedPeriod>;

    /// Plans, fetches and parses every period of `month`.
    ///
    /// A period that fails is logged and left out, so data already cached
    /// for it stays untouched; the month only fails if every period did.
    async fn scrape_month(&mut self, month: YearMonth) -> Result<ScrapeBatch> {
        let periods = match self.plan_month(month).await? {
            MonthPlan::Periods(periods) => periods,
            MonthPlan::MenuMissing => {
                return Ok(ScrapeBatch {
                    missing_menu: Some(self.menu_name()),
                    ..ScrapeBatch::default()
                })
            }
        };

        let mut raws = Vec::new();
        let mut menu_missing = false;
        let mut last_error = None;
        let mut succeeded = 0usize;

        for period in &periods {
            let parsed = match self.fetch(period).await {
                Ok(payload) => self.parse(period, &payload),
                Err(e) => Err(e),
            };
            match parsed {
                Ok(parsed) => {
                    debug!(period = %period, items = parsed.items.len(), "Parsed period");
                    succeeded += 1;
                    menu_missing |= parsed.menu_missing;
                    raws.extend(parsed.items);
                }
                Err(e) => {
                    warn!(period = %period, error = %e, "Failed to scrape period");
                    last_error = Some(e);
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let raws = dedup_adjacent(raws);
        let dates = raws.iter().map(|r| r.date).collect();
        Ok(ScrapeBatch {
            dates,
            items: normalize_batch(&raws),
            missing_menu: menu_missing.then(|| self.menu_name()),
        })
    }
}

/// Whichever provider the config selects.
pub enum ConfiguredProvider {
    Calendar(CalendarProvider),
    Sage(SageProvider),
}

impl ConfiguredProvider {
    /// Builds the configured provider, resolving Sage credentials up front.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let client = HttpClient::new()?;
        match config {
            ProviderConfig::Html { base_url, school, menu } => Ok(Self::Calendar(CalendarProvider::new(
                client, base_url, school, menu,
            ))),
            ProviderConfig::Sage {
                base_url,
                unit_id,
                menu_id,
                ..
            } => {
                let credentials = config
                    .sage_credentials()?
                    .ok_or_else(|| anyhow::anyhow!("Sage provider without credentials"))?;
                Ok(Self::Sage(SageProvider::new(
                    client,
                    base_url,
                    credentials,
                    *unit_id,
                    *menu_id,
                )))
            }
        }
    }
}

impl ScrapeProvider for ConfiguredProvider {
    fn menu_name(&self) -> String {
        match self {
            Self::Calendar(p) => p.menu_name(),
            Self::Sage(p) => p.menu_name(),
        }
    }

    async fn plan_month(&mut self, month: YearMonth) -> Result<MonthPlan> {
        match self {
            Self::Calendar(p) => p.plan_month(month).await,
            Self::Sage(p) => p.plan_month(month).await,
        }
    }

    async fn fetch(&mut self, period: &Period) -> Result<String> {
        match self {
            Self::Calendar(p) => p.fetch(period).await,
            Self::Sage(p) => p.fetch(period).await,
        }
    }

    fn parse(&self, period: &Period, payload: &str) -> Result<ParsedPeriod> {
        match self {
            Self::Calendar(p) => p.parse(period, payload),
            Self::Sage(p) => p.parse(period, payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn raw(date: u32, name: &str, station: i64) -> RawItem {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::from(name));
        fields.insert("meal".to_string(), json!(1));
        fields.insert("station".to_string(), json!(station));
        RawItem::new(NaiveDate::from_ymd_opt(2024, 3, date).unwrap(), fields)
    }

    #[test]
    fn test_dedup_adjacent_only() {
        let items = vec![
            raw(4, "Pizza", 0),
            raw(4, "Pizza", 0),
            raw(4, "Salad", 0),
            raw(4, "Pizza", 0),
            raw(4, "Pizza", 1),
            raw(5, "Pizza", 1),
        ];
        let names: Vec<_> = dedup_adjacent(items)
            .iter()
            .map(|r| r.get("name").and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Pizza", "Salad", "Pizza", "Pizza", "Pizza"]);
    }

    #[test]
    fn test_configured_calendar_provider() {
        let config = ProviderConfig::Html {
            base_url: html::DEFAULT_CALENDAR_BASE_URL.to_string(),
            school: "demo".to_string(),
            menu: "lunch".to_string(),
        };
        let provider = ConfiguredProvider::from_config(&config).unwrap();
        assert!(matches!(provider, ConfiguredProvider::Calendar(_)));
        assert_eq!(provider.menu_name(), "lunch");
    }

    #[test]
    fn test_period_display() {
        let month = YearMonth { year: 2024, month: 1 };
        assert_eq!(Period::Month(month).to_string(), "month 2024-01");
    }
}
