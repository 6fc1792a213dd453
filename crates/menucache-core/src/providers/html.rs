//! Legacy HTML month-calendar provider.
//!
//! The calendar renders one cell per school day (`class="weekday month"`,
//! `this_date="MM/DD/YY"`). Each cell holds one section per menu
//! (`class="menu-{slug}"`) whose spans are meal headers (`month-period`),
//! station headers (`month-category`) or items (`month-item`). Items get
//! synthetic ids and integer meal/station codes from their position so they
//! normalize the same way Sage items do.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::markup::{self, Tag};
use super::{MonthPlan, ParsedPeriod, Period, ScrapeProvider};
use crate::api::{build_url, HttpClient};
use crate::dates::{parse_calendar_cell_date, YearMonth};
use crate::models::{RawItem, INFORMATION_NOT_FOUND};

/// Default host of the calendar pages.
pub const DEFAULT_CALENDAR_BASE_URL: &str = "https://myschooldining.com";

/// Ids shorter than this belong to padding cells, not real days.
const MIN_CELL_ID_LEN: usize = 5;

/// Room for item positions inside a date-derived id.
const ITEMS_PER_DAY: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fragment {
    Meal,
    Station,
    Item,
}

pub struct CalendarProvider {
    client: HttpClient,
    base_url: String,
    school: String,
    menu: String,
}

impl CalendarProvider {
    pub fn new(client: HttpClient, base_url: &str, school: &str, menu: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            school: school.to_string(),
            menu: menu.to_string(),
        }
    }

    /// Splits a calendar page into `(date, cell inner html)` pairs.
    fn cells<'a>(html: &'a str, tags: &[Tag<'a>]) -> Vec<(NaiveDate, &'a str)> {
        let mut cells = Vec::new();
        for (i, tag) in tags.iter().enumerate() {
            if !tag.is_open() || !is_day_cell(tag) {
                continue;
            }
            let Some(raw_date) = tag.attr("this_date") else {
                continue;
            };
            match parse_calendar_cell_date(raw_date) {
                Ok(date) => {
                    let (start, end) = markup::inner_range(tags, i, html.len());
                    cells.push((date, &html[start..end]));
                }
                Err(e) => warn!(this_date = raw_date, error = %e, "Unparseable calendar cell date"),
            }
        }
        cells
    }

    /// Meal, station and item fragments of this provider's menu in one
    /// cell, or `None` if the cell has no section for it.
    fn menu_fragments(&self, cell: &str) -> Option<Vec<(Fragment, String)>> {
        let wanted = format!("menu-{}", self.menu);
        let tags = markup::tags(cell);
        let open = tags
            .iter()
            .position(|t| t.is_open() && t.has_class(&wanted))?;
        let (section_start, section_end) = markup::inner_range(&tags, open, cell.len());

        let mut fragments: Vec<(Fragment, String)> = Vec::new();
        let mut cursor = section_start;
        for (i, tag) in tags.iter().enumerate() {
            if tag.start < cursor || tag.start >= section_end || !tag.is_open() || tag.name != "span" {
                continue;
            }
            let kind = if tag.has_class("month-period") {
                Fragment::Meal
            } else if tag.has_class("month-category") {
                Fragment::Station
            } else if tag.has_class("month-item") {
                Fragment::Item
            } else {
                continue;
            };

            let (start, end) = markup::inner_range(&tags, i, section_end);
            cursor = end;
            let text = markup::strip_tags(&cell[start..end]);
            if text.is_empty() {
                continue;
            }
            // The calendar sometimes prints the same label twice in a row
            if fragments.last().map(|(k, t)| *k == kind && *t == text).unwrap_or(false) {
                continue;
            }
            fragments.push((kind, text));
        }
        Some(fragments)
    }

    fn raw_items(&self, date: NaiveDate, fragments: &[(Fragment, String)]) -> Vec<RawItem> {
        let mut items = Vec::new();
        let mut meal: i64 = -1;
        let mut station: i64 = -1;
        let mut meal_name = String::new();
        let mut station_name = String::new();

        for (kind, text) in fragments {
            match kind {
                Fragment::Meal => {
                    meal += 1;
                    station = -1;
                    meal_name = text.clone();
                    station_name.clear();
                }
                Fragment::Station => {
                    station += 1;
                    station_name = text.clone();
                }
                Fragment::Item => {
                    let mut fields = base_fields(date, items.len() as i64, text);
                    fields.insert("meal".to_string(), json!(meal.max(0)));
                    fields.insert("station".to_string(), json!(station.max(0)));
                    fields.insert("mealName".to_string(), json!(meal_name));
                    fields.insert("stationName".to_string(), json!(station_name));
                    items.push(RawItem::new(date, fields));
                }
            }
        }
        items
    }

    fn not_found_item(date: NaiveDate) -> RawItem {
        let mut fields = base_fields(date, 0, INFORMATION_NOT_FOUND);
        fields.insert("meal".to_string(), json!(0));
        fields.insert("station".to_string(), json!(0));
        RawItem::new(date, fields)
    }
}

fn is_day_cell(tag: &Tag<'_>) -> bool {
    let mut classes: Vec<String> = tag.classes().iter().map(|c| c.to_ascii_lowercase()).collect();
    classes.sort();
    classes == ["month", "weekday"]
        && tag
            .attr("id")
            .map(|id| id.len() >= MIN_CELL_ID_LEN)
            .unwrap_or(false)
}

/// Fields shared by every calendar item: a date-derived id and the Sage
/// style day/week indices (day of week from Sunday, week of the month).
fn base_fields(date: NaiveDate, position: i64, name: &str) -> Map<String, Value> {
    let ymd = i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day());
    let first_weekday = YearMonth::of(date).first_day().weekday().num_days_from_sunday();
    let week_of_month = (date.day0() + first_weekday) / 7;

    let mut fields = Map::new();
    fields.insert("id".to_string(), json!(ymd * ITEMS_PER_DAY + position));
    fields.insert("day".to_string(), json!(date.weekday().num_days_from_sunday()));
    fields.insert("week".to_string(), json!(week_of_month));
    fields.insert("name".to_string(), json!(name));
    fields.insert("allergens".to_string(), json!([]));
    fields
}

impl ScrapeProvider for CalendarProvider {
    fn menu_name(&self) -> String {
        self.menu.clone()
    }

    async fn plan_month(&mut self, month: YearMonth) -> Result<MonthPlan> {
        Ok(MonthPlan::Periods(vec![Period::Month(month)]))
    }

    async fn fetch(&mut self, period: &Period) -> Result<String> {
        let Period::Month(month) = period else {
            anyhow::bail!("Calendar provider cannot fetch {}", period);
        };
        let url = build_url(&self.base_url, &format!("{}/calendarMonth", self.school));
        let query = [
            ("adj", "0".to_string()),
            ("current_month", format!("{}-01", month)),
        ];
        self.client
            .post_for_text(&url, &query)
            .await
            .with_context(|| format!("Failed to fetch calendar for {}", month))
    }

    fn parse(&self, period: &Period, payload: &str) -> Result<ParsedPeriod> {
        let tags = markup::tags(payload);
        let cells = Self::cells(payload, &tags);
        debug!(period = %period, cells = cells.len(), "Parsing calendar page");

        let mut parsed = ParsedPeriod::default();
        let mut found_any = false;
        for (date, cell) in &cells {
            match self.menu_fragments(cell) {
                Some(fragments) => {
                    found_any = true;
                    parsed.items.extend(self.raw_items(*date, &fragments));
                }
                None => parsed.items.push(Self::not_found_item(*date)),
            }
        }
        parsed.menu_missing = !cells.is_empty() && !found_any;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_batch;

    const PAGE: &str = r#"
<table>
  <tr>
    <td class="weekday month" id="pad"></td>
    <td class="month weekday" id="day-0304" this_date="03/04/24">
      <div class="menu-lunch">
        <span class="month-period">Lunch</span>
        <span class="month-category">Entrees</span>
        <span class="month-category">Entrees</span>
        <span class="month-item">Corn&nbsp;Chowder <span class="icon">V</span></span>
        <span class="month-item">Grilled Cheese</span>
        <span class="month-category">Sides</span>
        <span class="month-item">Apple</span>
      </div>
      <div class="menu-breakfast">
        <span class="month-item">Pancakes</span>
      </div>
    </td>
    <td class="weekday month" id="day-0305" this_date="03/05/24">
      <div class="menu-breakfast">
        <span class="month-item">Waffles</span>
      </div>
    </td>
    <td class="weekday month today" id="day-0306" this_date="03/06/24">
      <div class="menu-lunch"><span class="month-item">Skipped</span></div>
    </td>
  </tr>
</table>"#;

    fn provider(menu: &str) -> CalendarProvider {
        CalendarProvider::new(HttpClient::new().unwrap(), DEFAULT_CALENDAR_BASE_URL, "demo", menu)
    }

    fn period() -> Period {
        Period::Month(YearMonth { year: 2024, month: 3 })
    }

    #[test]
    fn test_parse_groups_fragments() {
        let parsed = provider("lunch").parse(&period(), PAGE).unwrap();
        assert!(!parsed.menu_missing);

        let items = normalize_batch(&parsed.items);
        let day: Vec<_> = items
            .iter()
            .filter(|i| i.date == NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
            .collect();
        let names: Vec<_> = day.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Corn Chowder V", "Grilled Cheese", "Apple"]);

        // Duplicate "Entrees" header does not open a second station
        assert_eq!(day[0].station, 0);
        assert_eq!(day[1].station, 0);
        assert_eq!(day[2].station, 1);
        assert_eq!(day[2].station_label(), "Sides");
        assert_eq!(day[0].meal_label(), "Lunch");
        assert_eq!(day[0].id, 20240304000);
        assert_eq!(day[1].id, 20240304001);
        assert_eq!(day[0].day, 1);
    }

    #[test]
    fn test_missing_section_yields_sentinel() {
        let parsed = provider("lunch").parse(&period(), PAGE).unwrap();
        let items = normalize_batch(&parsed.items);
        let tuesday: Vec<_> = items
            .iter()
            .filter(|i| i.date == NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
            .collect();
        assert_eq!(tuesday.len(), 1);
        assert_eq!(tuesday[0].name, INFORMATION_NOT_FOUND);
        assert!(tuesday[0].is_placeholder());
    }

    #[test]
    fn test_only_plain_weekday_cells_count() {
        let parsed = provider("lunch").parse(&period(), PAGE).unwrap();
        assert!(parsed
            .items
            .iter()
            .all(|i| i.date != NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()));
    }

    #[test]
    fn test_menu_missing_everywhere() {
        let parsed = provider("dinner").parse(&period(), PAGE).unwrap();
        assert!(parsed.menu_missing);
        assert_eq!(parsed.items.len(), 2);
    }

    #[test]
    fn test_empty_page_is_not_missing_menu() {
        let parsed = provider("lunch").parse(&period(), "<html></html>").unwrap();
        assert!(!parsed.menu_missing);
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn test_week_of_month() {
        // March 2024 starts on a Friday
        let fields = base_fields(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), 0, "x");
        assert_eq!(fields["week"], json!(1));
        let fields = base_fields(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(), 0, "x");
        assert_eq!(fields["week"], json!(0));
    }
}
