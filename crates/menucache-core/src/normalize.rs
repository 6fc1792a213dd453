//! Conversion of provider-native items into canonical menu items.
//!
//! Known fields are pulled out by name; whatever else the provider sent is
//! kept verbatim in `misc` so that upstream schema additions survive without
//! code changes.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::MalformedItemError;
use crate::models::{CanonicalMenuItem, RawItem};

/// Fields extracted into typed columns. Everything else lands in `misc`.
const KNOWN_FIELDS: [&str; 9] = [
    "id",
    "menuId",
    "recipeId",
    "day",
    "week",
    "meal",
    "station",
    "name",
    "allergens",
];

pub fn normalize_item(raw: &RawItem) -> Result<CanonicalMenuItem, MalformedItemError> {
    let fields = &raw.fields;

    let name = match fields.get("name") {
        Some(Value::String(name)) => name.clone(),
        Some(other) => return Err(MalformedItemError::invalid("name", other)),
        None => return Err(MalformedItemError::missing("name")),
    };

    let misc: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(CanonicalMenuItem {
        id: required_int(fields, "id")?,
        menu_id: optional_int(fields, "menuId")?,
        recipe_id: optional_int(fields, "recipeId")?,
        day: required_int(fields, "day")?,
        week: required_int(fields, "week")?,
        meal: required_int(fields, "meal")?,
        station: required_int(fields, "station")?,
        name,
        allergens: allergens(fields)?,
        date: raw.date,
        misc,
    })
}

/// Normalizes a batch, logging and skipping items that fail.
pub fn normalize_batch(raws: &[RawItem]) -> Vec<CanonicalMenuItem> {
    raws.iter()
        .filter_map(|raw| match normalize_item(raw) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(date = %raw.date, error = %e, "Skipping malformed menu item");
                None
            }
        })
        .collect()
}

fn required_int(fields: &Map<String, Value>, field: &'static str) -> Result<i64, MalformedItemError> {
    let value = fields
        .get(field)
        .ok_or_else(|| MalformedItemError::missing(field))?;
    coerce_int(value).ok_or_else(|| MalformedItemError::invalid(field, value))
}

fn optional_int(fields: &Map<String, Value>, field: &'static str) -> Result<i64, MalformedItemError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => coerce_int(value).ok_or_else(|| MalformedItemError::invalid(field, value)),
    }
}

/// Sage sends most integers as strings ("294260406").
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn allergens(fields: &Map<String, Value>) -> Result<Vec<String>, MalformedItemError> {
    let list = match fields.get("allergens") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(list)) => list,
        Some(other) => return Err(MalformedItemError::invalid("allergens", other)),
    };

    list.iter()
        .map(|entry| match entry {
            Value::Object(obj) => obj
                .get("id")
                .and_then(scalar_text)
                .ok_or_else(|| MalformedItemError::invalid("allergens", entry)),
            other => scalar_text(other).ok_or_else(|| MalformedItemError::invalid("allergens", other)),
        })
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
