//! Local caching module for menu data.
//!
//! This module provides the `MenuStore` contract and its SQLite-backed
//! implementation, `SqliteStore`. Menu items are keyed by date:
//! - presence checks answer "is anything cached for this range"
//! - re-scraped dates are replaced wholesale inside one transaction
//! - distinct-date queries page through days that actually have data

pub mod store;

pub use store::{MenuStore, SqliteStore};
