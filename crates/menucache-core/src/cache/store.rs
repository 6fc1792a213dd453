use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::CanonicalMenuItem;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS menu_items (
    id INTEGER NOT NULL,
    menu_id INTEGER NOT NULL,
    recipe_id INTEGER NOT NULL,
    day INTEGER NOT NULL,
    week INTEGER NOT NULL,
    meal INTEGER NOT NULL,
    station INTEGER NOT NULL,
    name TEXT NOT NULL,
    allergens TEXT,
    date TEXT NOT NULL,
    misc TEXT,
    PRIMARY KEY (id, date)
);
CREATE INDEX IF NOT EXISTS idx_menu_items_date ON menu_items(date);
";

const SELECT_COLUMNS: &str =
    "SELECT id, menu_id, recipe_id, day, week, meal, station, name, allergens, date, misc FROM menu_items";

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT_SECS: u64 = 5;

/// Date-indexed persistence for canonical menu items.
pub trait MenuStore {
    /// True if at least one item is stored with a date in `[start, end]`.
    fn has_range(&self, start: NaiveDate, end: NaiveDate) -> Result<bool>;

    /// All items dated in `[start, end]`, in no particular order.
    fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CanonicalMenuItem>>;

    /// Deletes every item dated in `dates`, then inserts `items`, atomically.
    fn replace_dates(&mut self, dates: &BTreeSet<NaiveDate>, items: &[CanonicalMenuItem]) -> Result<()>;

    /// Distinct dates with data, walking from `start` (inclusive) forward, or
    /// backward when `descending`, skipping the first `offset` of them.
    fn fetch_valid_dates(
        &self,
        count: u32,
        offset: u32,
        descending: bool,
        start: NaiveDate,
    ) -> Result<Vec<NaiveDate>>;

    /// Number of distinct dates in `[start, end]` with an item whose name
    /// contains `keyword`, ignoring ASCII case.
    fn count_dates_matching(&self, keyword: &str, start: NaiveDate, end: NaiveDate) -> Result<u32>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) a menu database on disk.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cache directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open menu database: {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create menu_items schema")?;
        Ok(Self { conn })
    }

    /// Total number of stored items.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM menu_items", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn item_from_row(row: &Row) -> rusqlite::Result<CanonicalMenuItem> {
        let allergens: Option<String> = row.get(8)?;
        let misc: Option<String> = row.get(10)?;
        Ok(CanonicalMenuItem {
            id: row.get(0)?,
            menu_id: row.get(1)?,
            recipe_id: row.get(2)?,
            day: row.get(3)?,
            week: row.get(4)?,
            meal: row.get(5)?,
            station: row.get(6)?,
            name: row.get(7)?,
            allergens: parse_json_column::<Vec<String>>(8, allergens)?,
            date: row.get(9)?,
            misc: parse_json_column::<Map<String, Value>>(10, misc)?,
        })
    }
}

fn parse_json_column<T>(index: usize, text: Option<String>) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match text {
        None => Ok(T::default()),
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))),
    }
}

impl MenuStore for SqliteStore {
    fn has_range(&self, start: NaiveDate, end: NaiveDate) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM menu_items WHERE date BETWEEN ?1 AND ?2)",
            params![start, end],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CanonicalMenuItem>> {
        let sql = format!("{} WHERE date BETWEEN ?1 AND ?2", SELECT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![start, end], Self::item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read menu items for {}..{}", start, end))?;
        Ok(items)
    }

    fn replace_dates(&mut self, dates: &BTreeSet<NaiveDate>, items: &[CanonicalMenuItem]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut delete = tx.prepare("DELETE FROM menu_items WHERE date = ?1")?;
            for date in dates {
                delete.execute(params![date])?;
            }

            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO menu_items
                 (id, menu_id, recipe_id, day, week, meal, station, name, allergens, date, misc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for item in items {
                insert.execute(params![
                    item.id,
                    item.menu_id,
                    item.recipe_id,
                    item.day,
                    item.week,
                    item.meal,
                    item.station,
                    item.name,
                    serde_json::to_string(&item.allergens)?,
                    item.date,
                    serde_json::to_string(&item.misc)?,
                ])?;
            }
        }
        tx.commit().context("Failed to commit menu replacement")?;

        debug!(dates = dates.len(), items = items.len(), "Replaced cached menu dates");
        Ok(())
    }

    fn fetch_valid_dates(
        &self,
        count: u32,
        offset: u32,
        descending: bool,
        start: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let sql = if descending {
            "SELECT DISTINCT date FROM menu_items WHERE date <= ?1 ORDER BY date DESC LIMIT ?2"
        } else {
            "SELECT DISTINCT date FROM menu_items WHERE date >= ?1 ORDER BY date ASC LIMIT ?2"
        };
        let limit = i64::from(count) + i64::from(offset);

        let mut stmt = self.conn.prepare(sql)?;
        let dates = stmt
            .query_map(params![start, limit], |row| row.get::<_, NaiveDate>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read distinct menu dates")?;

        Ok(dates.into_iter().skip(offset as usize).collect())
    }

    fn count_dates_matching(&self, keyword: &str, start: NaiveDate, end: NaiveDate) -> Result<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(DISTINCT date) FROM menu_items
             WHERE date BETWEEN ?1 AND ?2 AND name LIKE ?3",
            params![start, end, format!("%{}%", keyword)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ============================================================================
// Tests
// ============================================================================
