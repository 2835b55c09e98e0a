//! Axum route handlers for the Plan API.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{Local, NaiveDate};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::LlmError;
use crate::plan::chat_input::{parse_chat_input, ParsedChatInput};
use crate::plan::extract::{extract_plan, plan_from_value, ExtractError};
use crate::plan::models::{ParseRequest, PlanRequest, TravelPlan, TripRequest};
use crate::plan::prompts::{build_prompt, system_prompt};
use crate::state::AppState;

/// Text deltas buffered between the model stream and a slow browser.
const CHUNK_BUFFER: usize = 64;

type SseItem = Result<Event, axum::Error>;

#[derive(Serialize)]
struct ChunkPayload<'a> {
    text: &'a str,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// POST /api/plan
///
/// Relays the model's answer as server-sent events: one `chunk` event per
/// text delta, then a single `plan` or `error` event. Invalid input is
/// rejected with a plain JSON error before the stream opens.
pub async fn handle_plan_stream(
    State(state): State<AppState>,
    Json(request): Json<PlanRequest>,
) -> Result<Sse<impl Stream<Item = SseItem>>, AppError> {
    let trip = request.resolve(today(), state.config.trip_limits())?;

    let request_id = Uuid::new_v4();
    let span = info_span!("plan_stream", %request_id);
    info!(
        parent: &span,
        destination = %trip.destination,
        days = trip.dates.day_count(),
        "Streaming travel plan"
    );

    let (chunk_tx, chunk_rx) = mpsc::channel::<String>(CHUNK_BUFFER);
    let (done_tx, done_rx) = oneshot::channel::<SseItem>();

    let llm = state.llm.clone();
    tokio::spawn(
        async move {
            let prompt = build_prompt(&trip);
            let result = llm.stream(&prompt, &system_prompt(), chunk_tx).await;
            if let Some(event) = final_event(result, &trip) {
                // receiver is gone if the browser disconnected meanwhile
                let _ = done_tx.send(event);
            }
        }
        .instrument(span),
    );

    let chunks = ReceiverStream::new(chunk_rx)
        .map(|text| Event::default().event("chunk").json_data(ChunkPayload { text: &text }));
    let done = stream::once(done_rx).filter_map(|received| async move { received.ok() });

    Ok(Sse::new(chunks.chain(done)).keep_alive(KeepAlive::default()))
}

/// The closing event of a plan stream, or `None` when nobody is listening.
fn final_event(result: Result<String, LlmError>, trip: &TripRequest) -> Option<SseItem> {
    let outcome = match result {
        Ok(text) => extract_plan(&text, trip).map_err(extract_error),
        Err(LlmError::Cancelled) => {
            info!("Client disconnected, plan stream abandoned");
            return None;
        }
        Err(e) => Err(llm_error(e)),
    };

    let event = match outcome {
        Ok(plan) => {
            info!(days = plan.days.len(), "Travel plan streamed");
            Event::default().event("plan").json_data(&plan)
        }
        Err(err) => {
            warn!(code = err.code(), "Plan stream failed: {err}");
            Event::default().event("error").json_data(json!({
                "code": err.code(),
                "message": err.client_message(),
            }))
        }
    };
    Some(event)
}

/// POST /api/plan/generate
///
/// Non-streaming variant: waits for the whole answer and returns the plan.
pub async fn handle_generate(
    State(state): State<AppState>,
    Json(request): Json<PlanRequest>,
) -> Result<Json<TravelPlan>, AppError> {
    let trip = request.resolve(today(), state.config.trip_limits())?;

    let request_id = Uuid::new_v4();
    info!(
        %request_id,
        destination = %trip.destination,
        days = trip.dates.day_count(),
        "Generating travel plan"
    );

    let value: Value = state
        .llm
        .call_json(&build_prompt(&trip), &system_prompt())
        .await
        .map_err(llm_error)?;
    let plan = plan_from_value(value, &trip).map_err(extract_error)?;

    Ok(Json(plan))
}

/// POST /api/plan/parse
///
/// Pre-fills the form from a chat message. Nothing is validated beyond
/// the message being present; every returned field may be null.
pub async fn handle_parse(
    Json(request): Json<ParseRequest>,
) -> Result<Json<ParsedChatInput>, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::Validation("message cannot be empty".to_string()));
    }
    Ok(Json(parse_chat_input(&request.message, today())))
}

fn llm_error(e: LlmError) -> AppError {
    match e {
        LlmError::NoJson => AppError::UnprocessableEntity(
            "The AI model did not return an itinerary. Please try again.".to_string(),
        ),
        other => AppError::Llm(format!("Plan generation failed: {other}")),
    }
}

fn extract_error(e: ExtractError) -> AppError {
    match e {
        ExtractError::NoJson => AppError::UnprocessableEntity(
            "The AI model did not return an itinerary. Please try again.".to_string(),
        ),
        ExtractError::NoItinerary => AppError::UnprocessableEntity(
            "The AI model returned a plan without any activities. Please try again.".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::llm_client::test_support::{text_response, FakeGemini, Reply};
    use crate::routes::build_router;

    const PLAN_JSON: &str = r#"{"destination": "Kyoto", "days": [{"day": 1, "items": [{"time": "09:00", "activity": "Fushimi Inari"}]}]}"#;

    async fn app(replies: Vec<Reply>) -> (Router, FakeGemini) {
        let fake = FakeGemini::start(replies).await;
        let state = AppState {
            llm: fake.client(),
            config: Config::for_tests(&fake.base_url),
        };
        (build_router(state), fake)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn stream_event(text: &str) -> String {
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]}).to_string()
    }

    fn kyoto_request() -> Value {
        json!({"destination": "Kyoto", "start_date": "2030-04-01", "end_date": "2030-04-01"})
    }

    #[tokio::test]
    async fn test_stream_relays_chunks_then_plan() {
        let (head, tail) = PLAN_JSON.split_at(40);
        let (app, _fake) = app(vec![Reply::Sse(vec![stream_event(head), stream_event(tail)])]).await;

        let response = app
            .oneshot(post_json("/api/plan", kyoto_request()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let body = body_text(response).await;
        assert_eq!(body.matches("event: chunk").count(), 2);
        let chunk_at = body.find("event: chunk").unwrap();
        let plan_at = body.find("event: plan").unwrap();
        assert!(chunk_at < plan_at);
        assert!(body.contains(r#""activity":"Fushimi Inari""#));
        assert!(body.contains(r#""date":"2030-04-01""#));
        assert!(!body.contains("event: error"));
    }

    #[tokio::test]
    async fn test_stream_unparsable_answer_ends_with_error_event() {
        let (app, _fake) = app(vec![Reply::Sse(vec![stream_event("Sorry, no plan today.")])]).await;

        let response = app
            .oneshot(post_json("/api/plan", kyoto_request()))
            .await
            .unwrap();
        let body = body_text(response).await;
        assert!(body.contains("event: chunk"));
        assert!(body.contains("event: error"));
        assert!(body.contains("UNPROCESSABLE_ENTITY"));
        assert!(!body.contains("event: plan"));
    }

    #[tokio::test]
    async fn test_stream_answer_without_days_ends_with_error_event() {
        let (app, _fake) = app(vec![Reply::Sse(vec![stream_event(
            r#"{"destination": "Kyoto", "days": []}"#,
        )])])
        .await;

        let response = app
            .oneshot(post_json("/api/plan", kyoto_request()))
            .await
            .unwrap();
        let body = body_text(response).await;
        assert!(body.contains("event: error"));
        assert!(body.contains("UNPROCESSABLE_ENTITY"));
        assert!(body.contains("without any activities"));
        assert!(!body.contains("event: plan"));
    }

    #[tokio::test]
    async fn test_stream_upstream_failure_hides_detail() {
        let (app, fake) = app(vec![Reply::Json(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"code": 400, "message": "API key not valid"}}"#.to_string(),
        )])
        .await;

        let response = app
            .oneshot(post_json("/api/plan", kyoto_request()))
            .await
            .unwrap();
        let body = body_text(response).await;
        assert!(body.contains("event: error"));
        assert!(body.contains("LLM_ERROR"));
        assert!(!body.contains("API key"));
        assert_eq!(fake.hits(), 1);
    }

    #[tokio::test]
    async fn test_stream_rejects_invalid_request_before_calling_model() {
        let (app, fake) = app(vec![Reply::Sse(vec![stream_event(PLAN_JSON)])]).await;

        let response = app
            .oneshot(post_json("/api/plan", json!({"start_date": "2030-04-01"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(fake.hits(), 0);
    }

    #[tokio::test]
    async fn test_generate_returns_plan() {
        let fenced = format!("```json\n{PLAN_JSON}\n```");
        let (app, _fake) = app(vec![Reply::Json(StatusCode::OK, text_response(&fenced))]).await;

        let response = app
            .oneshot(post_json(
                "/api/plan/generate",
                json!({"message": "Kyoto from 2030-04-01 to 2030-04-02"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let plan: TravelPlan = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(plan.destination, "Kyoto");
        assert_eq!(plan.end_date, NaiveDate::from_ymd_opt(2030, 4, 2));
        assert_eq!(plan.days[0].items[0].time, "09:00");
    }

    #[tokio::test]
    async fn test_generate_without_json_is_unprocessable() {
        let (app, _fake) = app(vec![Reply::Json(
            StatusCode::OK,
            text_response("I cannot plan that trip."),
        )])
        .await;

        let response = app
            .oneshot(post_json("/api/plan/generate", kyoto_request()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_generate_upstream_outage_is_bad_gateway() {
        let (app, fake) = app(vec![Reply::Json(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error": {"code": 503, "message": "overloaded"}}"#.to_string(),
        )])
        .await;

        let response = app
            .oneshot(post_json("/api/plan/generate", kyoto_request()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(fake.hits(), 3);
    }

    #[tokio::test]
    async fn test_parse_message() {
        let (app, fake) = app(vec![]).await;

        let response = app
            .oneshot(post_json(
                "/api/plan/parse",
                json!({"message": "2030年4月1日から4月3日まで京都に行きたい"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let parsed: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(parsed["destination"], "京都");
        assert_eq!(parsed["start_date"], "2030-04-01");
        assert_eq!(parsed["end_date"], "2030-04-03");
        assert_eq!(fake.hits(), 0);
    }

    #[tokio::test]
    async fn test_parse_rejects_empty_message() {
        let (app, _fake) = app(vec![]).await;

        let response = app
            .oneshot(post_json("/api/plan/parse", json!({"message": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
