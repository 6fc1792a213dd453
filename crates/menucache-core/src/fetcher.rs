//! Fetch orchestration: decides, per request, whether cached menu data can
//! be served, whether a month must be scraped first, or whether the range
//! is simply not available.
//!
//! Ranges spanning several months are resolved one month at a time, each
//! with at most one scrape. Scrape failures never fail a request; they only
//! mean the range comes back as "not available".

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Datelike, Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::cache::MenuStore;
use crate::clock::Clock;
use crate::dates::{
    dates_between, month_range, next_school_day, resolve_current_day, split_by_month, YearMonth,
};
use crate::grouping::group_by_day_meal_station;
use crate::models::DayResult;
use crate::notify::{dispatch_missing_menu, Notifier};
use crate::providers::ScrapeProvider;
use crate::text::{self, KeywordTally, TALLY_KEYWORD};

/// Lunch service is over at 1pm; after that "today" means tomorrow.
pub const DEFAULT_CUTOFF_HOUR: u32 = 13;

/// When fewer days than this remain in the month, a cache reset also
/// scrapes the next month.
const NEXT_MONTH_LOOKAHEAD_DAYS: i64 = 8;

/// What to do with a single-month request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    ServeCached,
    /// The request is for next month; scrape it, then re-check.
    NeedNextPeriodFetch(YearMonth),
    /// The request is for this month but nothing is cached yet.
    NeedCurrentPeriodFetch(YearMonth),
    NotAvailable,
}

/// Result of scraping one month into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshOutcome {
    pub dates: usize,
    pub items: usize,
}

pub struct Fetcher<S, P> {
    store: S,
    provider: P,
    clock: Box<dyn Clock + Send + Sync>,
    cutoff_hour: u32,
    notifier: Option<Arc<dyn Notifier>>,
}

impl<S: MenuStore, P: ScrapeProvider> Fetcher<S, P> {
    pub fn new(store: S, provider: P, clock: impl Clock + Send + Sync + 'static, cutoff_hour: u32) -> Self {
        Self {
            store,
            provider,
            clock: Box::new(clock),
            cutoff_hour,
            notifier: None,
        }
    }

    /// Notify `notifier` whenever a scrape finds the configured menu missing.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The day whose menu is relevant right now.
    pub fn current_day(&self) -> NaiveDate {
        resolve_current_day(self.clock.now(), self.cutoff_hour)
    }

    /// The current serving day, moved off the weekend.
    pub fn next_school_day(&self) -> NaiveDate {
        next_school_day(self.clock.now(), self.cutoff_hour)
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    /// Classifies a request that lies within one calendar month.
    pub fn classify(&self, start: NaiveDate, end: NaiveDate) -> Result<ResolveState> {
        if self.store.has_range(start, end)? {
            return Ok(ResolveState::ServeCached);
        }

        let current = YearMonth::of(self.today());
        let requested = YearMonth::of(end);
        if requested.follows(current) {
            Ok(ResolveState::NeedNextPeriodFetch(requested))
        } else if YearMonth::of(start) != current {
            Ok(ResolveState::NotAvailable)
        } else {
            Ok(ResolveState::NeedCurrentPeriodFetch(current))
        }
    }

    /// Menu days for the inclusive range, scraping at most once per month.
    ///
    /// Dates with cached data come back as served days; a month that cannot
    /// be served yields one placeholder per date instead. An inverted range
    /// yields nothing.
    pub async fn resolve(&mut self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DayResult>> {
        let mut results = Vec::new();
        for (month, from, to) in split_by_month(start, end) {
            debug!(month = %month, from = %from, to = %to, "Resolving month");
            results.extend(self.resolve_month(from, to).await?);
        }
        Ok(results)
    }

    async fn resolve_month(&mut self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DayResult>> {
        let state = self.classify(start, end)?;
        debug!(start = %start, end = %end, state = ?state, "Classified request");

        match state {
            ResolveState::ServeCached => self.serve(start, end),
            ResolveState::NeedNextPeriodFetch(month) | ResolveState::NeedCurrentPeriodFetch(month) => {
                self.refresh(month).await?;
                if self.store.has_range(start, end)? {
                    self.serve(start, end)
                } else {
                    Ok(not_available(start, end))
                }
            }
            ResolveState::NotAvailable => Ok(not_available(start, end)),
        }
    }

    fn serve(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DayResult>> {
        let items = self.store.fetch_range(start, end)?;
        Ok(group_by_day_meal_station(items)
            .into_iter()
            .map(DayResult::Served)
            .collect())
    }

    /// Scrapes `month` and replaces its dates in the store.
    ///
    /// A failed scrape is logged and reported as an empty outcome; the store
    /// is left as it was.
    pub async fn refresh(&mut self, month: YearMonth) -> Result<RefreshOutcome> {
        let batch = match self.provider.scrape_month(month).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(month = %month, error = %format!("{:#}", e), "Scrape failed");
                return Ok(RefreshOutcome::default());
            }
        };

        if let (Some(menu), Some(notifier)) = (&batch.missing_menu, &self.notifier) {
            // Detached; nothing waits on it
            let _ = dispatch_missing_menu(Arc::clone(notifier), menu.clone());
        }

        if batch.dates.is_empty() {
            info!(month = %month, "Scrape returned no menu dates");
            return Ok(RefreshOutcome::default());
        }

        self.store.replace_dates(&batch.dates, &batch.items)?;
        info!(month = %month, dates = batch.dates.len(), items = batch.items.len(), "Cached scraped month");
        Ok(RefreshOutcome {
            dates: batch.dates.len(),
            items: batch.items.len(),
        })
    }

    /// `count` days that have menu data, starting at `start` (default: the
    /// current serving day) and skipping the first `|offset|` of them.
    /// A negative `count` walks backward from `start`.
    pub async fn fetch_days(&self, count: i32, offset: i32, start: Option<NaiveDate>) -> Result<Vec<DayResult>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let start = start.unwrap_or_else(|| self.current_day());
        let descending = count < 0;

        let dates: BTreeSet<NaiveDate> = self
            .store
            .fetch_valid_dates(count.unsigned_abs(), offset.unsigned_abs(), descending, start)?
            .into_iter()
            .collect();

        let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
            debug!(start = %start, count = count, "No menu dates available");
            return Ok(Vec::new());
        };

        let items = self
            .store
            .fetch_range(*first, *last)?
            .into_iter()
            .filter(|item| dates.contains(&item.date))
            .collect();

        Ok(group_by_day_meal_station(items)
            .into_iter()
            .map(DayResult::Served)
            .collect())
    }

    /// Re-scrapes the current month, and the next one too when the month is
    /// nearly over. Meant for a daily cron job.
    pub async fn reset_cache(&mut self) -> Result<RefreshOutcome> {
        let today = self.today();
        let current = YearMonth::of(today);

        let mut total = self.refresh(current).await?;
        if (current.last_day() - today).num_days() < NEXT_MONTH_LOOKAHEAD_DAYS {
            let next = self.refresh(current.next()).await?;
            total.dates += next.dates;
            total.items += next.items;
        }
        Ok(total)
    }

    /// Scrapes every month touched by the inclusive range, regardless of
    /// what is cached.
    pub async fn historical_scrape(&mut self, start: NaiveDate, end: NaiveDate) -> Result<RefreshOutcome> {
        let mut total = RefreshOutcome::default();
        for month in month_range(start, end) {
            let outcome = self.refresh(month).await?;
            total.dates += outcome.dates;
            total.items += outcome.items;
        }
        Ok(total)
    }

    /// Monday through Friday of the week starting at `monday`.
    pub async fn week(&mut self, monday: NaiveDate) -> Result<Vec<DayResult>> {
        self.resolve(monday, monday + Days::new(4)).await
    }

    /// Running count of this year's menu days, through `date`, that served
    /// the tally keyword. `None` when the day itself does not.
    pub fn keyword_tally(&self, result: &DayResult) -> Result<Option<KeywordTally>> {
        let DayResult::Served(day) = result else {
            return Ok(None);
        };
        if !text::mentions(day, TALLY_KEYWORD) {
            return Ok(None);
        }
        let Some(date) = day.items().next().map(|item| item.date) else {
            return Ok(None);
        };
        let Some(new_year) = NaiveDate::from_ymd_opt(date.year(), 1, 1) else {
            return Ok(None);
        };

        let count = self.store.count_dates_matching(TALLY_KEYWORD, new_year, date)?;
        Ok(Some(KeywordTally {
            keyword: TALLY_KEYWORD.to_string(),
            count,
        }))
    }

    /// Plain-text rendering of a result, with the keyword tally line.
    pub fn wordify(&self, result: &DayResult) -> Result<String> {
        let tally = self.keyword_tally(result)?;
        Ok(text::wordify_result(result, tally.as_ref()))
    }
}

fn not_available(start: NaiveDate, end: NaiveDate) -> Vec<DayResult> {
    dates_between(start, end)
        .into_iter()
        .map(DayResult::not_available)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::{json, Map, Value};

    use crate::cache::SqliteStore;
    use crate::clock::FixedClock;
    use crate::models::{RawItem, NOT_AVAILABLE_MESSAGE};
    use crate::providers::{MonthPlan, ParsedPeriod, Period};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn clock(date: NaiveDate, hour: u32) -> FixedClock {
        FixedClock(date.and_hms_opt(hour, 0, 0).unwrap())
    }

    fn raw(id: i64, date: NaiveDate, name: &str) -> RawItem {
        let mut fields = Map::new();
        fields.insert("id".to_string(), json!(id));
        fields.insert("day".to_string(), json!(0));
        fields.insert("week".to_string(), json!(0));
        fields.insert("meal".to_string(), json!(1));
        fields.insert("station".to_string(), json!(0));
        fields.insert("name".to_string(), Value::from(name));
        RawItem::new(date, fields)
    }

    /// Serves canned raw items per month through the default `scrape_month`.
    #[derive(Default)]
    struct FakeProvider {
        months: HashMap<YearMonth, Vec<RawItem>>,
        failing: bool,
        missing_menu: bool,
        calls: Vec<YearMonth>,
    }

    impl FakeProvider {
        fn with_month(mut self, month: YearMonth, items: Vec<RawItem>) -> Self {
            self.months.insert(month, items);
            self
        }
    }

    impl ScrapeProvider for FakeProvider {
        fn menu_name(&self) -> String {
            "lunch".to_string()
        }

        async fn plan_month(&mut self, month: YearMonth) -> Result<MonthPlan> {
            self.calls.push(month);
            if self.missing_menu {
                return Ok(MonthPlan::MenuMissing);
            }
            Ok(MonthPlan::Periods(vec![Period::Month(month)]))
        }

        async fn fetch(&mut self, period: &Period) -> Result<String> {
            if self.failing {
                anyhow::bail!("connection reset fetching {}", period);
            }
            Ok(String::new())
        }

        fn parse(&self, period: &Period, _payload: &str) -> Result<ParsedPeriod> {
            let Period::Month(month) = period else {
                anyhow::bail!("unexpected period");
            };
            Ok(ParsedPeriod {
                items: self.months.get(month).cloned().unwrap_or_default(),
                menu_missing: false,
            })
        }
    }

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth { year, month }
    }

    fn fetcher(provider: FakeProvider, now: FixedClock) -> Fetcher<SqliteStore, FakeProvider> {
        Fetcher::new(SqliteStore::open_in_memory().unwrap(), provider, now, DEFAULT_CUTOFF_HOUR)
    }

    fn served_dates(results: &[DayResult]) -> Vec<&str> {
        results
            .iter()
            .filter(|r| r.is_available())
            .map(|r| r.date())
            .collect()
    }

    #[tokio::test]
    async fn test_serves_cached_without_scraping() {
        let mut f = fetcher(FakeProvider::default(), clock(d(2024, 3, 1), 9));
        let day = d(2024, 3, 4);
        f.store
            .replace_dates(&BTreeSet::from([day]), &crate::normalize::normalize_batch(&[raw(1, day, "Soup")]))
            .unwrap();

        assert_eq!(f.classify(day, day).unwrap(), ResolveState::ServeCached);
        let results = f.resolve(day, day).await.unwrap();
        assert_eq!(served_dates(&results), vec!["2024-03-04"]);
        assert!(f.provider().calls.is_empty());
    }

    #[tokio::test]
    async fn test_scrapes_current_month_on_miss() {
        let provider = FakeProvider::default().with_month(
            ym(2024, 3),
            vec![raw(1, d(2024, 3, 4), "Soup"), raw(2, d(2024, 3, 5), "Tacos")],
        );
        let mut f = fetcher(provider, clock(d(2024, 3, 1), 9));

        assert_eq!(
            f.classify(d(2024, 3, 4), d(2024, 3, 5)).unwrap(),
            ResolveState::NeedCurrentPeriodFetch(ym(2024, 3))
        );
        let results = f.resolve(d(2024, 3, 4), d(2024, 3, 5)).await.unwrap();
        assert_eq!(served_dates(&results), vec!["2024-03-04", "2024-03-05"]);
        assert_eq!(f.provider().calls, vec![ym(2024, 3)]);
    }

    #[tokio::test]
    async fn test_scrapes_next_month_across_year_boundary() {
        let provider =
            FakeProvider::default().with_month(ym(2024, 1), vec![raw(1, d(2024, 1, 9), "Chili")]);
        let mut f = fetcher(provider, clock(d(2023, 12, 20), 9));

        assert_eq!(
            f.classify(d(2024, 1, 9), d(2024, 1, 9)).unwrap(),
            ResolveState::NeedNextPeriodFetch(ym(2024, 1))
        );
        let results = f.resolve(d(2024, 1, 9), d(2024, 1, 9)).await.unwrap();
        assert_eq!(served_dates(&results), vec!["2024-01-09"]);
        assert_eq!(f.provider().calls, vec![ym(2024, 1)]);
    }

    #[tokio::test]
    async fn test_far_range_is_not_available_and_untouched() {
        let mut f = fetcher(FakeProvider::default(), clock(d(2024, 3, 1), 9));

        let results = f.resolve(d(2024, 6, 3), d(2024, 6, 5)).await.unwrap();
        assert_eq!(results.len(), 3);
        let dates: Vec<_> = results.iter().map(|r| r.date()).collect();
        assert_eq!(dates, vec!["2024-06-03", "2024-06-04", "2024-06-05"]);
        for result in &results {
            match result {
                DayResult::NotAvailable { message, .. } => assert_eq!(message, NOT_AVAILABLE_MESSAGE),
                other => panic!("expected placeholder, got {:?}", other),
            }
        }
        assert_eq!(f.store().count().unwrap(), 0);
        assert!(f.provider().calls.is_empty());
    }

    #[tokio::test]
    async fn test_past_month_is_not_available() {
        let mut f = fetcher(FakeProvider::default(), clock(d(2024, 3, 1), 9));
        assert_eq!(
            f.classify(d(2024, 1, 9), d(2024, 1, 9)).unwrap(),
            ResolveState::NotAvailable
        );
    }

    #[tokio::test]
    async fn test_scrape_failure_falls_back_to_placeholders() {
        let provider = FakeProvider {
            failing: true,
            ..FakeProvider::default()
        };
        let mut f = fetcher(provider, clock(d(2024, 3, 1), 9));

        let results = f.resolve(d(2024, 3, 4), d(2024, 3, 4)).await.unwrap();
        assert_eq!(results, vec![DayResult::not_available(d(2024, 3, 4))]);
        assert_eq!(f.provider().calls.len(), 1);
    }

    #[tokio::test]
    async fn test_scrape_without_requested_dates_is_not_available() {
        let provider =
            FakeProvider::default().with_month(ym(2024, 3), vec![raw(1, d(2024, 3, 20), "Soup")]);
        let mut f = fetcher(provider, clock(d(2024, 3, 1), 9));

        let results = f.resolve(d(2024, 3, 4), d(2024, 3, 5)).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_available()));
        // The scraped data is still cached for later
        assert_eq!(f.store().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_multi_month_range_resolves_each_month() {
        let provider = FakeProvider::default().with_month(
            ym(2024, 3),
            vec![raw(1, d(2024, 3, 1), "Soup"), raw(2, d(2024, 3, 4), "Pizza")],
        );
        let mut f = fetcher(provider, clock(d(2024, 3, 1), 9));

        let results = f.resolve(d(2024, 2, 28), d(2024, 3, 4)).await.unwrap();
        let placeholders: Vec<_> = results.iter().filter(|r| !r.is_available()).map(|r| r.date()).collect();
        assert_eq!(placeholders, vec!["2024-02-28", "2024-02-29"]);
        assert_eq!(served_dates(&results), vec!["2024-03-01", "2024-03-04"]);
        assert_eq!(f.provider().calls, vec![ym(2024, 3)]);
    }

    #[tokio::test]
    async fn test_malformed_items_are_skipped() {
        let mut broken = raw(2, d(2024, 3, 4), "Broken");
        broken.fields.insert("meal".to_string(), json!("lunch"));
        let provider = FakeProvider::default()
            .with_month(ym(2024, 3), vec![raw(1, d(2024, 3, 4), "Soup"), broken]);
        let mut f = fetcher(provider, clock(d(2024, 3, 1), 9));

        let results = f.resolve(d(2024, 3, 4), d(2024, 3, 4)).await.unwrap();
        match &results[0] {
            DayResult::Served(day) => assert_eq!(day.item_count(), 1),
            other => panic!("expected served day, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_days_skips_gaps() {
        let provider = FakeProvider::default().with_month(
            ym(2024, 3),
            vec![
                raw(1, d(2024, 3, 1), "A"),
                raw(2, d(2024, 3, 4), "B"),
                raw(3, d(2024, 3, 5), "C"),
                raw(4, d(2024, 3, 6), "D"),
                raw(5, d(2024, 3, 8), "E"),
            ],
        );
        // Friday after the cutoff: the current serving day is Saturday
        let mut f = fetcher(provider, clock(d(2024, 3, 1), 14));
        f.refresh(ym(2024, 3)).await.unwrap();
        assert_eq!(f.current_day(), d(2024, 3, 2));

        let forward = f.fetch_days(3, 0, None).await.unwrap();
        assert_eq!(served_dates(&forward), vec!["2024-03-04", "2024-03-05", "2024-03-06"]);

        let offset = f.fetch_days(2, 1, None).await.unwrap();
        assert_eq!(served_dates(&offset), vec!["2024-03-05", "2024-03-06"]);

        let backward = f.fetch_days(-2, 0, Some(d(2024, 3, 5))).await.unwrap();
        assert_eq!(served_dates(&backward), vec!["2024-03-04", "2024-03-05"]);

        assert!(f.fetch_days(0, 0, None).await.unwrap().is_empty());
        assert!(f.fetch_days(3, 0, Some(d(2024, 4, 1))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_week_covers_monday_to_friday() {
        let provider = FakeProvider::default().with_month(
            ym(2024, 3),
            vec![
                raw(1, d(2024, 3, 4), "A"),
                raw(2, d(2024, 3, 8), "B"),
                raw(3, d(2024, 3, 9), "Weekend"),
            ],
        );
        let mut f = fetcher(provider, clock(d(2024, 3, 2), 9));
        assert_eq!(f.next_school_day(), d(2024, 3, 4));

        let monday = crate::dates::school_week_monday(f.next_school_day());
        let results = f.week(monday).await.unwrap();
        assert_eq!(served_dates(&results), vec!["2024-03-04", "2024-03-08"]);
    }

    #[tokio::test]
    async fn test_wordify_counts_keyword_days_this_year() {
        let provider = FakeProvider::default().with_month(
            ym(2024, 3),
            vec![
                raw(1, d(2024, 3, 4), "Chicken Tenders"),
                raw(2, d(2024, 3, 5), "Tacos"),
                raw(3, d(2024, 3, 6), "Chicken Soup"),
                raw(4, d(2024, 3, 6), "BBQ Chicken"),
                raw(5, d(2024, 3, 7), "Chicken Wrap"),
            ],
        );
        let mut f = fetcher(provider, clock(d(2024, 3, 1), 9));
        f.refresh(ym(2024, 3)).await.unwrap();

        let results = f.resolve(d(2024, 3, 6), d(2024, 3, 6)).await.unwrap();
        let text = f.wordify(&results[0]).unwrap();
        assert!(text.ends_with("This is the 2nd time we've had chicken this year."));

        let results = f.resolve(d(2024, 3, 5), d(2024, 3, 5)).await.unwrap();
        assert!(!f.wordify(&results[0]).unwrap().contains("time we've had"));
        assert_eq!(f.keyword_tally(&DayResult::not_available(d(2024, 3, 5))).unwrap(), None);
    }

    #[tokio::test]
    async fn test_reset_cache_near_month_end_scrapes_next_month() {
        let provider = FakeProvider::default()
            .with_month(ym(2024, 3), vec![raw(1, d(2024, 3, 28), "A")])
            .with_month(ym(2024, 4), vec![raw(2, d(2024, 4, 1), "B")]);
        let mut f = fetcher(provider, clock(d(2024, 3, 27), 9));

        let outcome = f.reset_cache().await.unwrap();
        assert_eq!(outcome, RefreshOutcome { dates: 2, items: 2 });
        assert_eq!(f.provider().calls, vec![ym(2024, 3), ym(2024, 4)]);
    }

    #[tokio::test]
    async fn test_reset_cache_mid_month_scrapes_once() {
        let mut f = fetcher(FakeProvider::default(), clock(d(2024, 3, 10), 9));
        f.reset_cache().await.unwrap();
        assert_eq!(f.provider().calls, vec![ym(2024, 3)]);
    }

    #[tokio::test]
    async fn test_historical_scrape_covers_month_span() {
        let mut f = fetcher(FakeProvider::default(), clock(d(2024, 3, 10), 9));
        f.historical_scrape(d(2023, 12, 15), d(2024, 1, 10)).await.unwrap();
        assert_eq!(f.provider().calls, vec![ym(2023, 12), ym(2024, 1)]);
    }

    struct ChannelNotifier(Mutex<mpsc::Sender<String>>);

    impl Notifier for ChannelNotifier {
        fn missing_menu(&self, menu: &str) -> Result<()> {
            self.0.lock().unwrap().send(menu.to_string())?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_menu_dispatches_notification() {
        let (tx, rx) = mpsc::channel();
        let provider = FakeProvider {
            missing_menu: true,
            ..FakeProvider::default()
        };
        let mut f = fetcher(provider, clock(d(2024, 3, 1), 9))
            .with_notifier(Arc::new(ChannelNotifier(Mutex::new(tx))));

        let results = f.resolve(d(2024, 3, 4), d(2024, 3, 4)).await.unwrap();
        assert!(!results[0].is_available());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "lunch");
    }
}
