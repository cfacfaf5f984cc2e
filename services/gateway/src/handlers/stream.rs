use crate::error::AppError;
use crate::models::DelayQuery;
use crate::state::AppState;
use axum::{
    extract::{
        Query, State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::{
        Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{self, Stream, StreamExt};
use live_state::events::StreamMessage;
use live_state::fanout::SubscriberHandle;
use std::convert::Infallible;
use std::time::Duration;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Server-Sent Events stream: an `initial` event followed by `update`
/// events. Ends when the broadcaster drops the subscriber.
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<DelayQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let delay_secs = state.check_delay(query.delay)?;
    let handle = state.live.subscribe(delay_secs)?;
    tracing::info!(subscriber_id = %handle.id(), delay_secs, "SSE stream opened");

    let events = stream::unfold(handle, |mut handle| async move {
        let message = handle.recv().await?;
        Some((sse_event(&message), handle))
    })
    .filter_map(|event| async move { event.map(Ok) });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}

fn sse_event(message: &StreamMessage) -> Option<Event> {
    let event = Event::default().event(message.event_name());
    let event = match message.sequence() {
        Some(sequence) => event.id(sequence.to_string()),
        None => event,
    };

    match message {
        StreamMessage::Raw { payload, .. } => Some(event.data(payload.as_str())),
        _ => match event.json_data(message.body()) {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unserializable event");
                None
            }
        },
    }
}

/// WebSocket stream of JSON `StreamMessage` text frames.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<DelayQuery>,
) -> Result<Response, AppError> {
    let delay_secs = state.check_delay(query.delay)?;
    // Subscribe before upgrading so limit errors reach the client as HTTP.
    let handle = state.live.subscribe(delay_secs)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, handle)))
}

async fn handle_socket(mut socket: WebSocket, mut handle: SubscriberHandle) {
    let id = handle.id();
    tracing::info!(subscriber_id = %id, view = ?handle.view(), "WebSocket stream opened");

    loop {
        tokio::select! {
            message = handle.recv() => {
                let Some(message) = message else {
                    // Dropped by the broadcaster (lagged or shutdown).
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(subscriber_id = %id, error = %err, "Skipping unserializable message");
                        continue;
                    }
                };
                if socket.send(Message::Text(Utf8Bytes::from(text))).await.is_err() {
                    break;
                }
            }
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                // Clients have nothing to say; pings are answered by axum.
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(subscriber_id = %id, "WebSocket stream closed");
}
