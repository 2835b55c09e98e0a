//! Turns the model's loosely shaped JSON into a `TravelPlan`.
//!
//! Models rename keys, nest days differently and sometimes return the
//! prototype's flat `[{time, activity}]` list. All of those are accepted.

use chrono::{Duration, NaiveDate};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm_client::extract_json;
use crate::plan::models::{DayPlan, ItineraryItem, TravelPlan, TripRequest};

const ITINERARY_KEYS: &[&str] = &["itinerary", "days", "plan", "schedule"];
const ITEM_LIST_KEYS: &[&str] = &["items", "activities", "schedule"];
const ACTIVITY_KEYS: &[&str] = &["activity", "description", "title", "name"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no JSON object found in model output")]
    NoJson,

    #[error("model output contains no usable itinerary")]
    NoItinerary,
}

/// Recovers a plan from raw model text, filling gaps from `trip`.
pub fn extract_plan(text: &str, trip: &TripRequest) -> Result<TravelPlan, ExtractError> {
    let value = extract_json(text).ok_or(ExtractError::NoJson)?;
    plan_from_value(value, trip)
}

/// Normalises an already-parsed JSON value.
pub fn plan_from_value(value: Value, trip: &TripRequest) -> Result<TravelPlan, ExtractError> {
    let Value::Object(root) = value else {
        return Err(ExtractError::NoJson);
    };

    let root = unwrap_single_wrapper(root);
    let start_date = date_field(&root, "start_date")
        .or_else(|| date_field(&root, "startDate"))
        .or(trip.dates.start());
    let end_date = date_field(&root, "end_date")
        .or_else(|| date_field(&root, "endDate"))
        .or(trip.dates.end());

    let raw_days = itinerary_days(&root);
    let max_day = trip.dates.day_count().max(raw_days.len() as u32);
    let days = raw_days
        .into_iter()
        .enumerate()
        .filter_map(|(index, day)| normalise_day(day, index, max_day, start_date))
        .collect::<Vec<_>>();

    if days.is_empty() {
        return Err(ExtractError::NoItinerary);
    }

    let destination = root
        .get("destination")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(&trip.destination)
        .to_string();

    Ok(TravelPlan {
        destination,
        start_date,
        end_date,
        days,
    })
}

/// `{"travel_plan": {...}}` → the inner object, when it is the only key.
fn unwrap_single_wrapper(root: Map<String, Value>) -> Map<String, Value> {
    if root.len() == 1 {
        if let Some(Value::Object(inner)) = root.values().next() {
            if ITINERARY_KEYS.iter().any(|k| inner.contains_key(*k)) {
                return inner.clone();
            }
        }
    }
    root
}

/// The list of day values. A flat item list becomes a single day.
fn itinerary_days(root: &Map<String, Value>) -> Vec<Value> {
    let Some(list) = ITINERARY_KEYS
        .iter()
        .find_map(|k| root.get(*k).and_then(Value::as_array))
    else {
        return Vec::new();
    };

    let looks_like_days = list.iter().any(|entry| {
        entry
            .as_object()
            .is_some_and(|o| ITEM_LIST_KEYS.iter().any(|k| o.get(*k).is_some_and(Value::is_array)))
    });

    if looks_like_days {
        list.clone()
    } else {
        vec![serde_json::json!({ "items": list })]
    }
}

/// Day numbers outside `1..=max_day` are replaced by the 1-based position.
fn normalise_day(
    day: Value,
    index: usize,
    max_day: u32,
    trip_start: Option<NaiveDate>,
) -> Option<DayPlan> {
    let Value::Object(day) = day else { return None };

    let number = day
        .get("day")
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(leading_number))
        })
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| (1..=max_day).contains(n))
        .unwrap_or(index as u32 + 1);

    let date = date_field(&day, "date").or_else(|| {
        trip_start.and_then(|start| {
            start.checked_add_signed(Duration::days(i64::from(number) - 1))
        })
    });

    let items: Vec<ItineraryItem> = ITEM_LIST_KEYS
        .iter()
        .find_map(|k| day.get(*k).and_then(Value::as_array))
        .map(|list| list.iter().filter_map(normalise_item).collect())
        .unwrap_or_default();

    if items.is_empty() {
        return None;
    }

    Some(DayPlan {
        day: number,
        date,
        items,
    })
}

fn normalise_item(item: &Value) -> Option<ItineraryItem> {
    match item {
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| ItineraryItem {
                time: String::new(),
                activity: text.to_string(),
            })
        }
        Value::Object(fields) => {
            let activity = ACTIVITY_KEYS
                .iter()
                .find_map(|k| fields.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|a| !a.is_empty())?;
            let time = fields
                .get("time")
                .and_then(|t| match t {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_default();
            Some(ItineraryItem {
                time,
                activity: activity.to_string(),
            })
        }
        _ => None,
    }
}

fn date_field(fields: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    let raw = fields.get(key)?.as_str()?.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// "Day 2" → 2
fn leading_number(s: &str) -> Option<u64> {
    s.split(|c: char| !c.is_ascii_digit())
        .find(|part| !part.is_empty())
        .and_then(|part| part.parse().ok())
}
