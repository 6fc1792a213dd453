use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the placeholder item emitted when a calendar cell has no section
/// for the configured menu.
pub const INFORMATION_NOT_FOUND: &str = "Information Not Found";

/// A provider-native item exactly as scraped, plus the date it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub date: NaiveDate,
    pub fields: Map<String, Value>,
}

impl RawItem {
    pub fn new(date: NaiveDate, fields: Map<String, Value>) -> Self {
        Self { date, fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Identity used to spot upstream markup that repeats the same entry twice.
    pub fn dedup_key(&self) -> (Option<&Value>, Option<&Value>, Option<&Value>, NaiveDate) {
        (
            self.get("name"),
            self.get("meal"),
            self.get("station"),
            self.date,
        )
    }
}

/// One served food item on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMenuItem {
    /// Provider-native identifier, unique across the store.
    pub id: i64,
    #[serde(rename = "menuId")]
    pub menu_id: i64,
    #[serde(rename = "recipeId")]
    pub recipe_id: i64,
    pub day: i64,
    pub week: i64,
    pub meal: i64,
    pub station: i64,
    pub name: String,
    #[serde(default)]
    pub allergens: Vec<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub misc: Map<String, Value>,
}

impl CanonicalMenuItem {
    /// Human label of the meal, from provider metadata when available.
    pub fn meal_label(&self) -> String {
        self.misc_str("mealName")
            .map(str::to_string)
            .unwrap_or_else(|| format!("Meal {}", self.meal))
    }

    /// Human label of the station, from provider metadata when available.
    pub fn station_label(&self) -> String {
        self.misc_str("stationName")
            .map(str::to_string)
            .unwrap_or_else(|| format!("Station {}", self.station))
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == INFORMATION_NOT_FOUND
    }

    fn misc_str(&self, key: &str) -> Option<&str> {
        self.misc
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(misc: Map<String, Value>) -> CanonicalMenuItem {
        CanonicalMenuItem {
            id: 1,
            menu_id: 0,
            recipe_id: 0,
            day: 1,
            week: 0,
            meal: 2,
            station: 3,
            name: "Corn Chowder".to_string(),
            allergens: vec![],
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            misc,
        }
    }

    #[test]
    fn test_labels_fall_back_to_codes() {
        let plain = item(Map::new());
        assert_eq!(plain.meal_label(), "Meal 2");
        assert_eq!(plain.station_label(), "Station 3");
    }

    #[test]
    fn test_labels_use_misc_names() {
        let mut misc = Map::new();
        misc.insert("mealName".to_string(), json!("Lunch"));
        misc.insert("stationName".to_string(), json!(""));
        let named = item(misc);
        assert_eq!(named.meal_label(), "Lunch");
        // Empty names are ignored
        assert_eq!(named.station_label(), "Station 3");
    }

    #[test]
    fn test_serializes_with_provider_field_names() {
        let value = serde_json::to_value(item(Map::new())).unwrap();
        assert_eq!(value["menuId"], json!(0));
        assert_eq!(value["date"], json!("2024-03-04"));
    }
}
