//! Plain-text rendering of menu days.

use chrono::NaiveDate;

use crate::dates::DATE_KEY_FORMAT;
use crate::models::{DayResult, MenuDay};

/// Dish whose running yearly count is appended to a day's text.
pub const TALLY_KEYWORD: &str = "chicken";

/// How many menu days this year, up to and including the rendered one,
/// served `keyword`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTally {
    pub keyword: String,
    pub count: u32,
}

/// Renders a day as human-readable text: a title line, then each meal and
/// station as headers with one line per item.
pub fn wordify(day: &MenuDay) -> String {
    let mut lines = vec![title(&day.date)];

    for meal in &day.meals {
        // Labels come from the first item; every item in the bucket shares the code
        let Some(first) = meal.stations.first().and_then(|s| s.items.first()) else {
            continue;
        };
        lines.push(String::new());
        lines.push(first.meal_label());

        for station in &meal.stations {
            let Some(first) = station.items.first() else {
                continue;
            };
            lines.push(format!("  {}", first.station_label()));
            for item in &station.items {
                lines.push(format!("    - {}", item.name));
            }
        }
    }

    lines.join("\n")
}

/// Renders a served day or a not-available placeholder, closing a served
/// day with the keyword tally line when one is given.
pub fn wordify_result(result: &DayResult, tally: Option<&KeywordTally>) -> String {
    match result {
        DayResult::Served(day) => match tally {
            Some(tally) => format!(
                "{}\n\nThis is the {} time we've had {} this year.",
                wordify(day),
                ordinal(tally.count),
                tally.keyword
            ),
            None => wordify(day),
        },
        DayResult::NotAvailable { date, message } => format!("{}\n{}", title(date), message),
    }
}

/// True if a real item of the day names `keyword`, ignoring case.
pub fn mentions(day: &MenuDay, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    day.items()
        .any(|item| !item.is_placeholder() && item.name.to_lowercase().contains(&keyword))
}

/// English ordinal: 1st, 2nd, 3rd, 4th, 11th, 12th, 13th, 21st...
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

fn title(date_key: &str) -> String {
    match NaiveDate::parse_from_str(date_key, DATE_KEY_FORMAT) {
        Ok(date) => format!("The menu for {}:", date.format("%A, %B %d, %Y")),
        Err(_) => format!("The menu for {}:", date_key),
    }
}
