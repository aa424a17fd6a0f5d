use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::post,
};
use futures::StreamExt;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use vlchat::endpoint::{CompletionEnvelope, MODEL_HEADER, TRACE_HEADER};
use vlchat::text::sanitize;
use vlchat::{ConversationTurn, EndpointRequest, StreamEvent};

use crate::normalize::{ModelParams, normalize};
use crate::upstream::Upstream;

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<Upstream>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", post(handle_chat))
        .route("/api/stream", post(handle_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

fn decode(
    headers: &HeaderMap,
    req: &EndpointRequest,
    stream: bool,
) -> Result<(Vec<ConversationTurn>, ModelParams), (StatusCode, String)> {
    let turns = req
        .conversation()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid question: {}", e)))?;
    let params = req
        .generation_params()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid params: {}", e)))?;
    let params = normalize(&params, stream);

    info!(
        model = %header(headers, MODEL_HEADER),
        trace_id = %header(headers, TRACE_HEADER),
        session = %req.session_id.as_deref().unwrap_or("-"),
        turns = turns.len(),
        stream,
        thinking = params.enable_thinking,
        "generation request"
    );
    Ok((turns, params))
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EndpointRequest>,
) -> Result<Json<CompletionEnvelope>, (StatusCode, String)> {
    let (turns, params) = decode(&headers, &req, false)?;

    let mut completion = state
        .upstream
        .chat(req.image.as_deref(), &turns, &params)
        .await
        .map_err(|e| {
            error!(error = %e, "chat request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    completion.result = sanitize(&completion.result);

    Ok(Json(CompletionEnvelope { data: completion }))
}

async fn handle_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EndpointRequest>,
) -> Result<Response, (StatusCode, String)> {
    let (turns, params) = decode(&headers, &req, true)?;

    let events = state
        .upstream
        .chat_stream(req.image.as_deref(), &turns, &params)
        .await
        .map_err(|e| {
            error!(error = %e, "stream request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let sse_stream = events
        .scan(false, |done, event: StreamEvent| {
            if *done {
                return futures::future::ready(None);
            }
            *done = event.finished || event.error.is_some();
            if let Some(err) = &event.error {
                error!(error = %err, "stream ended with error");
            }
            futures::future::ready(Some(event))
        })
        .filter_map(|event| {
            let data = event.to_data().ok();
            futures::future::ready(data.map(|d| Ok::<_, Infallible>(Event::default().data(d))))
        });

    let response = Sse::new(sse_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    Ok(response.into_response())
}
