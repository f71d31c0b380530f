//! HTTP status/control surface.
//!
//! | Route | Method | Response |
//! |-------|--------|----------|
//! | `/api/status` | GET | [`StatusSnapshot`] as JSON |
//! | `/api/events` | GET | Server-Sent Events, one per [`CameraEvent`] |
//! | `/api/pause` | POST | 204 |
//! | `/api/resume` | POST | 204 |
//! | `/api/session/reset` | POST | 204 |

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::stream::{self, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::acquisition::{CameraService, StatusSnapshot};
use crate::camera::CameraGateway;
use crate::error::{Result, TetherError};
use crate::events::{CameraEvent, EventBus};

/// Shared state for handlers.
pub struct AppState<G: CameraGateway> {
    pub service: CameraService<G>,
    pub events: EventBus,
}

impl<G: CameraGateway> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            events: self.events.clone(),
        }
    }
}

pub fn router<G: CameraGateway>(state: AppState<G>) -> Router {
    Router::new()
        .route("/api/status", get(status::<G>))
        .route("/api/events", get(events::<G>))
        .route("/api/pause", post(pause::<G>))
        .route("/api/resume", post(resume::<G>))
        .route("/api/session/reset", post(reset_session::<G>))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<G, F>(state: AppState<G>, addr: &str, shutdown: F) -> Result<()>
where
    G: CameraGateway,
    F: Future<Output = ()> + Send + 'static,
{
    let failed = |reason: String| TetherError::WebServerFailed {
        addr: addr.to_string(),
        reason,
    };

    let addr: SocketAddr = addr.parse().map_err(|e| failed(format!("invalid address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| failed(e.to_string()))?;
    info!(%addr, "HTTP API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| failed(e.to_string()))
}

async fn status<G: CameraGateway>(State(state): State<AppState<G>>) -> Json<StatusSnapshot> {
    Json(state.service.status())
}

async fn pause<G: CameraGateway>(State(state): State<AppState<G>>) -> StatusCode {
    state.service.pause();
    StatusCode::NO_CONTENT
}

async fn resume<G: CameraGateway>(State(state): State<AppState<G>>) -> StatusCode {
    state.service.resume();
    StatusCode::NO_CONTENT
}

async fn reset_session<G: CameraGateway>(State(state): State<AppState<G>>) -> StatusCode {
    state.service.reset_session();
    StatusCode::NO_CONTENT
}

/// The stream opens with the current status, then relays the bus.
async fn events<G: CameraGateway>(
    State(state): State<AppState<G>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let current = CameraEvent::status(state.service.state());
    debug!(subscribers = state.events.subscriber_count(), "Event stream opened");

    let stream = stream::once(async move { current })
        .chain(relay(rx))
        .map(|event| Ok::<_, Infallible>(sse_event(&event)));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Subscriber stream that skips events it lagged behind on.
fn relay(rx: broadcast::Receiver<CameraEvent>) -> impl Stream<Item = CameraEvent> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged, skipping");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

fn sse_event(event: &CameraEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}
