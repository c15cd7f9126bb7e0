use axum::{
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use std::convert::Infallible;
use switchyard_mcp::session::{HttpReply, ReplyBody, SseEvent};

/// Render a session transport's reply as an axum response.
pub(crate) fn into_response(reply: HttpReply) -> Response {
    let HttpReply {
        status,
        headers,
        body,
    } = reply;

    let mut response = match body {
        ReplyBody::Empty => status.into_response(),
        ReplyBody::Text(text) => (status, text).into_response(),
        ReplyBody::Json(value) => (status, Json(value)).into_response(),
        ReplyBody::EventStream(stream) => {
            let events = stream.map(|event| Ok::<_, Infallible>(to_event(event)));
            let mut response = Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response();
            *response.status_mut() = status;
            response
        }
    };
    response.headers_mut().extend(headers);
    response
}

fn to_event(event: SseEvent) -> Event {
    let rendered = Event::default().data(event.data);
    match event.event {
        Some(name) => rendered.event(name),
        None => rendered,
    }
}
