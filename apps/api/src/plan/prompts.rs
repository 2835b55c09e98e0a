// Prompt constants for travel planning.
// Builds on the cross-cutting fragments in llm_client::prompts.

use serde_json::Value;

use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::plan::models::{TripDates, TripRequest};

/// Role text prepended to `JSON_ONLY_SYSTEM`.
pub const PLANNER_ROLE: &str = "You are an experienced travel planner. \
    You build realistic day-by-day itineraries with concrete places, \
    sensible travel times between them, and meals at local restaurants.";

/// Itinerary prompt template. Replace `{destination}`, `{date_clause}`,
/// `{day_count}` and `{schema}` before sending.
pub const PLAN_PROMPT_TEMPLATE: &str = r#"Create a travel itinerary for {destination} {date_clause}.

The trip lasts {day_count} day(s). Return exactly {day_count} entries in "days".

Return a JSON object with this EXACT schema (no extra fields):
{schema}

Rules:
- "time" is 24-hour "HH:MM".
- Each day has 4 to 8 items in chronological order.
- "date" is "YYYY-MM-DD", or null when the trip has no dates.
- Write activity text in the same language as the destination name above."#;

/// Example of the wire shape the browser renders.
pub const PLAN_SCHEMA: &str = r#"{
  "destination": "Kyoto",
  "start_date": "2025-04-01",
  "end_date": "2025-04-02",
  "days": [
    {
      "day": 1,
      "date": "2025-04-01",
      "items": [
        {"time": "09:00", "activity": "Fushimi Inari Taisha"},
        {"time": "12:00", "activity": "Lunch at Nishiki Market"}
      ]
    }
  ]
}"#;

pub fn system_prompt() -> String {
    format!("{PLANNER_ROLE} {JSON_ONLY_SYSTEM}")
}

pub fn build_prompt(trip: &TripRequest) -> String {
    let date_clause = match trip.dates {
        TripDates::Range { start, end } if start == end => format!("on {start}"),
        TripDates::Range { start, end } => format!("from {start} to {end}"),
        TripDates::Unscheduled { .. } => "(unspecified dates)".to_string(),
    };

    // substituted last, as a JSON string literal
    let destination = Value::String(trip.destination.clone()).to_string();

    PLAN_PROMPT_TEMPLATE
        .replace("{date_clause}", &date_clause)
        .replace("{day_count}", &trip.dates.day_count().to_string())
        .replace("{schema}", PLAN_SCHEMA)
        .replace("{destination}", &destination)
}
