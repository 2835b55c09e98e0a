//! Request and response shapes for travel plans. Everything here is
//! request-scoped: values live for one round trip and are never stored.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::AppError;
use crate::plan::chat_input::{parse_chat_input, ParsedChatInput};

pub const MAX_DESTINATION_CHARS: usize = 100;

/// Trip-length bounds taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct TripLimits {
    pub max_trip_days: u32,
    pub default_trip_days: u32,
}

/// Body of `POST /api/plan` and `POST /api/plan/generate`.
///
/// Either the structured fields, a free-form `message`, or both. Explicit
/// fields win over whatever is parsed out of the message.
#[derive(Debug, Default, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default, alias = "date", deserialize_with = "flexible_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "flexible_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `POST /api/plan/parse`.
#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripDates {
    Range { start: NaiveDate, end: NaiveDate },
    /// No dates given; the model picks a generic itinerary of this length.
    Unscheduled { days: u32 },
}

impl TripDates {
    pub fn day_count(&self) -> u32 {
        match self {
            TripDates::Range { start, end } => ((*end - *start).num_days() + 1) as u32,
            TripDates::Unscheduled { days } => *days,
        }
    }

    pub fn start(&self) -> Option<NaiveDate> {
        match self {
            TripDates::Range { start, .. } => Some(*start),
            TripDates::Unscheduled { .. } => None,
        }
    }

    pub fn end(&self) -> Option<NaiveDate> {
        match self {
            TripDates::Range { end, .. } => Some(*end),
            TripDates::Unscheduled { .. } => None,
        }
    }
}

/// A validated request, ready to be templated into a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRequest {
    pub destination: String,
    pub dates: TripDates,
}

impl PlanRequest {
    /// Merges the free-form message into the explicit fields and validates the result.
    pub fn resolve(self, today: NaiveDate, limits: TripLimits) -> Result<TripRequest, AppError> {
        let parsed = self
            .message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .map(|m| parse_chat_input(m, today))
            .unwrap_or_default();

        let destination = self
            .destination
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .or(parsed.destination.clone())
            .ok_or_else(|| AppError::Validation("destination is required".to_string()))?;

        if destination.chars().count() > MAX_DESTINATION_CHARS {
            return Err(AppError::Validation(format!(
                "destination must be at most {MAX_DESTINATION_CHARS} characters"
            )));
        }

        let dates = resolve_dates(
            self.start_date.or(parsed.start_date),
            self.end_date.or(parsed.end_date),
            &parsed,
            limits,
        )?;

        Ok(TripRequest { destination, dates })
    }
}

fn resolve_dates(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    parsed: &ParsedChatInput,
    limits: TripLimits,
) -> Result<TripDates, AppError> {
    let dates = match (start, end) {
        (Some(start), Some(end)) => TripDates::Range { start, end },
        (Some(start), None) => {
            let days = parsed.trip_days.unwrap_or(1).max(1);
            TripDates::Range {
                start,
                end: start + chrono::Duration::days(i64::from(days) - 1),
            }
        }
        (None, Some(end)) => TripDates::Range { start: end, end },
        (None, None) => TripDates::Unscheduled {
            days: parsed.trip_days.unwrap_or(limits.default_trip_days),
        },
    };

    if let TripDates::Range { start, end } = dates {
        if end < start {
            return Err(AppError::Validation(
                "end_date must not be before start_date".to_string(),
            ));
        }
    }

    let days = dates.day_count();
    if days == 0 || days > limits.max_trip_days {
        return Err(AppError::Validation(format!(
            "trips must be between 1 and {} days, got {days}",
            limits.max_trip_days
        )));
    }
    Ok(dates)
}

/// Accepts `YYYY-MM-DD`, an RFC 3339 timestamp (date taken in its own offset),
/// `null`, or an empty string.
fn flexible_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| Some(dt.date_naive()))
        .map_err(|_| {
            serde::de::Error::custom(format!("invalid date '{raw}': expected YYYY-MM-DD"))
        })
}

/// One scheduled stop within a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItineraryItem {
    pub time: String,
    pub activity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    /// 1-based day number within the trip.
    pub day: u32,
    pub date: Option<NaiveDate>,
    pub items: Vec<ItineraryItem>,
}

/// The itinerary shown to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelPlan {
    pub destination: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub days: Vec<DayPlan>,
}
