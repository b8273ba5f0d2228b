//! `text/event-stream` responses backed by an event channel.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream;
use shared_types::{encode_event, StreamEvent};
use tokio::sync::mpsc;

/// Stream events from `rx` until the sender side is dropped.
pub fn event_stream_response(rx: mpsc::UnboundedReceiver<StreamEvent>) -> Response {
    let body = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let frame = encode_event(&event).unwrap_or_else(|err| {
            tracing::error!(error = %err, event = event.type_tag(), "Failed to encode stream event");
            format!(
                "data: {}\n\n",
                serde_json::json!({ "type": "error", "error": err.to_string() })
            )
        });
        Some((Ok::<_, Infallible>(Bytes::from(frame)), rx))
    });

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
