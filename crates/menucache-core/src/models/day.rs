//! Derived, never-persisted views of the menu for a single day.

use chrono::NaiveDate;
use serde::Serialize;

use super::item::CanonicalMenuItem;
use crate::dates::date_key;

/// Message carried by every "not available" placeholder.
pub const NOT_AVAILABLE_MESSAGE: &str = "The requested menu data is not available now";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationGroup {
    /// Station code rendered as a string.
    pub station: String,
    pub items: Vec<CanonicalMenuItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealGroup {
    /// Meal code rendered as a string.
    pub meal: String,
    pub stations: Vec<StationGroup>,
}

impl MealGroup {
    pub fn station(&self, key: &str) -> Option<&StationGroup> {
        self.stations.iter().find(|s| s.station == key)
    }
}

/// One date with its items bucketed by meal, then station, in code order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuDay {
    /// `YYYY-MM-DD`
    pub date: String,
    pub meals: Vec<MealGroup>,
}

impl MenuDay {
    pub fn meal(&self, key: &str) -> Option<&MealGroup> {
        self.meals.iter().find(|m| m.meal == key)
    }

    pub fn items(&self) -> impl Iterator<Item = &CanonicalMenuItem> {
        self.meals
            .iter()
            .flat_map(|m| m.stations.iter())
            .flat_map(|s| s.items.iter())
    }

    pub fn item_count(&self) -> usize {
        self.items().count()
    }
}

/// Outcome for one requested date.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DayResult {
    Served(MenuDay),
    NotAvailable { date: String, message: String },
}

impl DayResult {
    pub fn not_available(date: NaiveDate) -> Self {
        DayResult::NotAvailable {
            date: date_key(date),
            message: NOT_AVAILABLE_MESSAGE.to_string(),
        }
    }

    pub fn date(&self) -> &str {
        match self {
            DayResult::Served(day) => &day.date,
            DayResult::NotAvailable { date, .. } => date,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, DayResult::Served(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_available_placeholder() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        let result = DayResult::not_available(date);
        assert_eq!(result.date(), "2024-01-09");
        assert!(!result.is_available());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "not_available");
        assert_eq!(json["message"], NOT_AVAILABLE_MESSAGE);
    }
}
