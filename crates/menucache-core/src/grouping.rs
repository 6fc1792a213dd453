//! Grouping of flat canonical items into day → meal → station buckets.

use crate::dates::date_key;
use crate::models::{CanonicalMenuItem, MealGroup, MenuDay, StationGroup};

/// Groups items by date, then meal, then station.
///
/// Each level is a stable sort followed by a split on equal keys, so items
/// that share a station keep the relative order they arrived in. Keys are
/// rendered as strings (`YYYY-MM-DD`, integer codes) while ordering follows
/// the underlying values.
pub fn group_by_day_meal_station(items: Vec<CanonicalMenuItem>) -> Vec<MenuDay> {
    let mut items = items;
    items.sort_by_key(|item| item.date);

    split_runs(items, |item| item.date)
        .into_iter()
        .map(|(date, day_items)| MenuDay {
            date: date_key(date),
            meals: group_meals(day_items),
        })
        .collect()
}

fn group_meals(mut items: Vec<CanonicalMenuItem>) -> Vec<MealGroup> {
    items.sort_by_key(|item| item.meal);
    split_runs(items, |item| item.meal)
        .into_iter()
        .map(|(meal, meal_items)| MealGroup {
            meal: meal.to_string(),
            stations: group_stations(meal_items),
        })
        .collect()
}

fn group_stations(mut items: Vec<CanonicalMenuItem>) -> Vec<StationGroup> {
    items.sort_by_key(|item| item.station);
    split_runs(items, |item| item.station)
        .into_iter()
        .map(|(station, items)| StationGroup {
            station: station.to_string(),
            items,
        })
        .collect()
}

/// Splits an already-sorted vector into runs of equal keys.
fn split_runs<K, F>(items: Vec<CanonicalMenuItem>, key: F) -> Vec<(K, Vec<CanonicalMenuItem>)>
where
    K: PartialEq + Copy,
    F: Fn(&CanonicalMenuItem) -> K,
{
    let mut runs: Vec<(K, Vec<CanonicalMenuItem>)> = Vec::new();
    for item in items {
        let k = key(&item);
        match runs.last_mut() {
            Some((last, run)) if *last == k => run.push(item),
            _ => runs.push((k, vec![item])),
        }
    }
    runs
}
