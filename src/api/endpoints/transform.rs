//! Transform endpoints.
//!
//! - `POST /api/transform`: run to completion, JSON result
//! - `POST /api/transform/stream`: server-sent events, one per pipeline event

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{self, Stream};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::pipeline::events::PipelineEvent;
use crate::pipeline::{PipelineResult, TransformRequest};

/// `POST /api/transform`
pub async fn transform(
    State(ctx): State<ApiContext>,
    payload: Result<Json<TransformRequest>, JsonRejection>,
) -> Result<Json<PipelineResult>, ApiError> {
    let Json(request) = payload?;
    let result = ctx.pipeline.execute(&request).await?;
    Ok(Json(result))
}

/// `POST /api/transform/stream`
///
/// Input errors are rejected with a JSON error before the stream opens.
/// Later failures arrive as a terminal `error` event.
pub async fn transform_stream(
    State(ctx): State<ApiContext>,
    payload: Result<Json<TransformRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = payload?;
    ctx.pipeline.check_input(&request)?;

    let rx = ctx.pipeline.stream(request);
    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse(&event)), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &PipelineEvent) -> Event {
    // SSE data lines cannot carry carriage returns.
    Event::default()
        .event(event.name())
        .data(event.data().replace('\r', ""))
}
