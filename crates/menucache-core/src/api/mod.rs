//! HTTP plumbing shared by the scrape providers.
//!
//! This module provides the `HttpClient` wrapper (timeouts, URL joining,
//! status checking) and the `ApiError` taxonomy for upstream failures.
//! Sage uses bearer-token authentication obtained through its `/login`
//! endpoint; the legacy calendar is unauthenticated.

pub mod client;
pub mod error;

pub use client::{build_url, HttpClient};
pub use error::ApiError;
