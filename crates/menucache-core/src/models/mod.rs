//! Data models for menu entities.
//!
//! - `RawItem`: a provider-native item paired with its calendar date
//! - `CanonicalMenuItem`: the normalized, persisted record
//! - `MenuDay`, `MealGroup`, `StationGroup`: the derived day → meal → station view
//! - `DayResult`: a served day or a "not available" placeholder

pub mod day;
pub mod item;

pub use day::{DayResult, MealGroup, MenuDay, StationGroup, NOT_AVAILABLE_MESSAGE};
pub use item::{CanonicalMenuItem, RawItem, INFORMATION_NOT_FOUND};
