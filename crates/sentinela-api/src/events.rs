// Dashboard SSE route
//
// Bridges a hub client registration into an axum SSE response. The client
// unregisters automatically when the response stream is dropped.

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

use sentinela_notify::SseHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SseHub>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/events", get(stream_events))
        .with_state(state)
}

/// Unregisters the hub client when the SSE response is dropped
struct ClientGuard {
    hub: Arc<SseHub>,
    id: Uuid,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (id, rx) = state.hub.register();
    debug!(client_id = %id, "dashboard sse stream opened");
    let guard = ClientGuard {
        hub: state.hub.clone(),
        id,
    };

    let stream = ReceiverStream::new(rx).map(move |event| {
        // Owned by the stream: dropping the response unregisters the client
        let _ = &guard;
        Event::default().event(event.event_type.clone()).json_data(&event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinela_core::sse::SseEvent;
    use sentinela_core::{NotificationLog, Publisher, Subscriber};
    use sentinela_storage::memory::{InMemoryNotificationLog, InMemoryPubSub};

    fn hub() -> Arc<SseHub> {
        let bus = Arc::new(InMemoryPubSub::new());
        Arc::new(SseHub::new(
            bus.clone() as Arc<dyn Publisher>,
            bus as Arc<dyn Subscriber>,
            Arc::new(InMemoryNotificationLog::new()) as Arc<dyn NotificationLog>,
        ))
    }

    #[tokio::test]
    async fn test_stream_carries_hub_events_and_unregisters_on_drop() {
        let hub = hub();
        let state = AppState { hub: hub.clone() };

        let sse = stream_events(State(state)).await;
        assert_eq!(hub.stats().connected_clients, 1);

        drop(sse);
        // The guard lives inside the response stream
        assert_eq!(hub.stats().connected_clients, 0);
    }

    #[tokio::test]
    async fn test_event_serializes_to_wire_shape() {
        let event = SseEvent::heartbeat();
        let sse_event = Event::default()
            .event(event.event_type.clone())
            .json_data(&event)
            .unwrap();
        // json_data succeeded; the wire shape itself is covered by the core tests
        let _ = sse_event;
    }
}
