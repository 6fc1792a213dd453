//! Sage REST API provider.
//!
//! Sage publishes each menu as a cycle of `cycleLength` weeks starting on
//! `menuFirstDate`. Items come back per cycle week with `day`/`week`
//! indices, which are pinned to real dates through a [`CycleDescriptor`].

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{MonthPlan, ParsedPeriod, Period, ScrapeProvider};
use crate::api::{build_url, ApiError, HttpClient};
use crate::dates::{parse_sage_first_date, CycleDescriptor, YearMonth};
use crate::models::RawItem;

/// Default base URL of the Sage customer app API.
pub const DEFAULT_SAGE_BASE_URL: &str = "https://sagedining.com/rest/SageRest/v1/public/customerapp";

#[derive(Debug, Clone)]
pub struct SageCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    grant: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
    credentials: Option<LoginCredentials>,
}

#[derive(Debug, Deserialize)]
struct LoginCredentials {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MenusResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    menus: Vec<SageMenu>,
}

/// Menu metadata from `/getmenus`.
#[derive(Debug, Clone, Deserialize)]
pub struct SageMenu {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    #[serde(rename = "cycleLength", deserialize_with = "lenient_i64")]
    pub cycle_length: i64,
    #[serde(rename = "menuFirstDate")]
    pub menu_first_date: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl SageMenu {
    pub fn cycle(&self) -> Result<CycleDescriptor> {
        let first = parse_sage_first_date(&self.menu_first_date)
            .with_context(|| format!("Invalid menuFirstDate {:?}", self.menu_first_date))?;
        Ok(CycleDescriptor::new(self.cycle_length.max(1) as u32, first))
    }
}

#[derive(Debug, Serialize)]
struct MenuItemsRequest {
    id: i64,
    week: u32,
}

#[derive(Debug, Deserialize)]
struct MenuItemsResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

/// Sage sends ids as strings or numbers depending on the endpoint.
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("not an integer: {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not an integer: {:?}", s))),
        other => Err(serde::de::Error::custom(format!("not an integer: {}", other))),
    }
}

fn upstream_error(what: &str, message: Option<String>) -> ApiError {
    ApiError::Upstream(format!(
        "{}: {}",
        what,
        message.unwrap_or_else(|| "no message".to_string())
    ))
}

pub struct SageProvider {
    client: HttpClient,
    base_url: String,
    credentials: SageCredentials,
    unit_id: i64,
    menu_id: i64,
}

impl SageProvider {
    pub fn new(
        client: HttpClient,
        base_url: &str,
        credentials: SageCredentials,
        unit_id: i64,
        menu_id: i64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            credentials,
            unit_id,
            menu_id,
        }
    }

    /// Logs in and returns the bearer token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let url = build_url(&self.base_url, "login");
        let response: LoginResponse = self
            .client
            .post_basic_auth(&url, email, password, &LoginRequest { grant: "password" })
            .await?;

        parse_login(response)
    }

    async fn ensure_logged_in(&mut self) -> Result<()> {
        if self.client.has_token() {
            return Ok(());
        }
        let token = self
            .login(&self.credentials.email, &self.credentials.password)
            .await
            .context("Failed to log in to Sage")?;
        self.client.set_token(token);
        info!(email = %self.credentials.email, "Logged in to Sage");
        Ok(())
    }

    /// The menu `menu_id` among the unit's menus, if it exists.
    pub async fn get_menu(&self, unit_id: i64, menu_id: i64) -> Result<Option<SageMenu>> {
        let url = build_url(&self.base_url, "getmenus");
        let response: MenusResponse = self
            .client
            .get_json(&url, &[("unitId", unit_id.to_string())])
            .await?;
        parse_menus(response, menu_id)
    }

    pub async fn get_menu_items(&self, menu_id: i64, week: u32) -> Result<String> {
        let url = build_url(&self.base_url, "getmenuitems");
        let response: Value = self
            .client
            .post_json(&url, &MenuItemsRequest { id: menu_id, week })
            .await?;
        Ok(response.to_string())
    }
}

fn parse_login(response: LoginResponse) -> Result<String> {
    if response.error {
        return Err(upstream_error("login", response.message).into());
    }
    response
        .credentials
        .map(|c| c.access_token)
        .ok_or_else(|| ApiError::InvalidResponse("login response without credentials".to_string()).into())
}

fn parse_menus(response: MenusResponse, menu_id: i64) -> Result<Option<SageMenu>> {
    if response.error {
        return Err(upstream_error("getmenus", response.message).into());
    }
    Ok(response.menus.into_iter().find(|m| m.id == menu_id))
}

/// Pins each item of a cycle week to its calendar date via its `day` index.
fn parse_menu_items(period: &Period, payload: &str) -> Result<ParsedPeriod> {
    let Period::CycleWeek { dates, .. } = period else {
        anyhow::bail!("Sage provider cannot parse {}", period);
    };
    let response: MenuItemsResponse =
        serde_json::from_str(payload).context("Failed to parse getmenuitems response")?;
    if response.error {
        return Err(upstream_error("getmenuitems", response.message).into());
    }

    let mut items = Vec::with_capacity(response.items.len());
    for fields in response.items {
        let day = fields.get("day").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        match day.and_then(|d| dates.get(d as usize)) {
            Some(date) => items.push(RawItem::new(*date, fields)),
            None => warn!(
                id = ?fields.get("id"),
                day = ?fields.get("day"),
                "Skipping Sage item with unusable day index"
            ),
        }
    }
    Ok(ParsedPeriod {
        items,
        menu_missing: false,
    })
}

impl ScrapeProvider for SageProvider {
    fn menu_name(&self) -> String {
        format!("Sage menu {} (unit {})", self.menu_id, self.unit_id)
    }

    async fn plan_month(&mut self, month: YearMonth) -> Result<MonthPlan> {
        self.ensure_logged_in().await?;

        let Some(menu) = self.get_menu(self.unit_id, self.menu_id).await? else {
            warn!(unit_id = self.unit_id, menu_id = self.menu_id, "Configured Sage menu not found");
            return Ok(MonthPlan::MenuMissing);
        };
        let cycle = menu.cycle()?;
        Ok(MonthPlan::Periods(cycle_weeks_for_month(&cycle, menu.id, month)))
    }

    async fn fetch(&mut self, period: &Period) -> Result<String> {
        let Period::CycleWeek { menu_id, week, .. } = period else {
            anyhow::bail!("Sage provider cannot fetch {}", period);
        };
        self.ensure_logged_in().await?;
        self.get_menu_items(*menu_id, *week)
            .await
            .with_context(|| format!("Failed to fetch {}", period))
    }

    fn parse(&self, period: &Period, payload: &str) -> Result<ParsedPeriod> {
        parse_menu_items(period, payload)
    }
}

/// The cycle weeks overlapping `month`. Days before the cycle's first
/// Sunday have no week and are left out.
fn cycle_weeks_for_month(cycle: &CycleDescriptor, menu_id: i64, month: YearMonth) -> Vec<Period> {
    let last = month.last_day();
    if last < cycle.start_sunday() {
        debug!(month = %month, "Month precedes the Sage cycle");
        return Vec::new();
    }
    let first = month.first_day().max(cycle.start_sunday());

    let (Ok(from), Ok(to)) = (cycle.calendar_to_cycle(first), cycle.calendar_to_cycle(last)) else {
        return Vec::new();
    };

    (from.week..=to.week)
        .map(|absolute| Period::CycleWeek {
            menu_id,
            week: cycle.cycle_week(absolute),
            dates: cycle.week_date_list(absolute),
        })
        .collect()
}
