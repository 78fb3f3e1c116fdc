// crates/server/src/routes/ws.rs
//! Live log stream for one job over WebSocket.
//!
//! `GET /bench/ws/{id}` joins the job's fan-out group and forwards every
//! line as a `{"job_id","line"}` text frame. Leaving the group happens when
//! the subscription is dropped at the end of the connection.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};

use crate::live::LogSubscription;
use crate::state::AppState;

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // join before the upgrade so no line published after the 101 is missed
    let subscription = state.hub.join(&job_id);
    ws.on_upgrade(move |socket| handle_socket(socket, subscription))
}

async fn handle_socket(socket: WebSocket, mut subscription: LogSubscription) {
    let (mut sink, mut stream) = socket.split();
    let job_id = subscription.job_id().to_string();
    tracing::debug!(job_id = %job_id, "Live log client connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if sink.send(Message::Text(event.to_json().into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                // pings are answered by axum; client text is ignored
                Some(Ok(_)) => {}
            },
        }
    }

    drop(subscription);
    tracing::debug!(job_id = %job_id, "Live log client disconnected");
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/bench/ws/{id}", get(ws_handler))
}
