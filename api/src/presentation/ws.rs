use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::application::ports::realtime_port::RealtimeError;
use crate::application::ports::user_repository::UserProfile;
use crate::application::session::Session;
use crate::application::session::protocol::error_frame;
use crate::bootstrap::app_context::AppContext;
use crate::infrastructure::realtime::{DynRealtimeSink, DynRealtimeStream};
use crate::presentation::http::auth;

#[derive(Debug, Deserialize, Clone)]
pub struct AuthQuery {
    pub token: Option<String>,
    pub access_token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/ws/documents/{id}",
    params(
        ("id" = String, Path, description = "Document ID"),
        ("token" = Option<String>, Query, description = "JWT access token"),
        ("Authorization" = Option<String>, Header, description = "Bearer token")
    ),
    responses(
        (status = 101, description = "Switching Protocols (WebSocket upgrade)"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown document")
    ),
    tag = "Realtime"
)]
pub async fn axum_ws_entry(
    Path(doc_id): Path<String>,
    ws: WebSocketUpgrade,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    State(ctx): State<AppContext>,
) -> Result<impl IntoResponse, StatusCode> {
    let token = query
        .token
        .or(query.access_token)
        .filter(|t| !t.trim().is_empty())
        .or_else(|| auth::token_from_headers(&headers))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let user = auth::authorize_document(&ctx, &token, &doc_id).await?;

    Ok(ws.on_upgrade(move |socket| peer_axum(doc_id, user, socket, ctx)))
}

fn map_poll<E>(poll: Poll<Result<(), E>>) -> Poll<Result<(), RealtimeError>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    poll.map(|r| r.map_err(RealtimeError::new))
}

// WebSocket <-> text frame sink adapter
struct WsTextSink {
    inner: SplitSink<WebSocket, AxumMessage>,
}

impl Sink<String> for WsTextSink {
    type Error = RealtimeError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        map_poll(Pin::new(&mut self.inner).poll_ready(cx))
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(AxumMessage::Text(item))
            .map_err(RealtimeError::new)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        map_poll(Pin::new(&mut self.inner).poll_flush(cx))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        map_poll(Pin::new(&mut self.inner).poll_close(cx))
    }
}

// WebSocket -> text frame stream adapter
struct WsTextStream {
    inner: SplitStream<WebSocket>,
}

impl Stream for WsTextStream {
    type Item = Result<String, RealtimeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(AxumMessage::Text(text)))) => {
                    return Poll::Ready(Some(Ok(text)));
                }
                Poll::Ready(Some(Ok(AxumMessage::Binary(bytes)))) => match String::from_utf8(bytes)
                {
                    Ok(text) => return Poll::Ready(Some(Ok(text))),
                    Err(_) => {
                        tracing::debug!("ws_binary_frame_not_utf8");
                        continue;
                    }
                },
                Poll::Ready(Some(Ok(AxumMessage::Ping(_)))) => continue,
                Poll::Ready(Some(Ok(AxumMessage::Pong(_)))) => continue,
                Poll::Ready(Some(Ok(AxumMessage::Close(_)))) => return Poll::Ready(None),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(RealtimeError::new(e))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

async fn peer_axum(doc_id: String, user: UserProfile, ws: WebSocket, ctx: AppContext) {
    tracing::debug!(document_id = %doc_id, user_id = %user.id, "ws_peer_upgraded");
    let (sink_raw, stream_raw) = ws.split();
    let sink_box: Pin<Box<dyn Sink<String, Error = RealtimeError> + Send>> =
        Box::pin(WsTextSink { inner: sink_raw });
    let sink: DynRealtimeSink = Arc::new(Mutex::new(sink_box));
    let stream: DynRealtimeStream = Box::pin(WsTextStream { inner: stream_raw });

    match Session::open(ctx.session_deps(), user, doc_id.clone(), sink.clone()).await {
        Ok(session) => {
            session.run(stream).await;
            tracing::info!(document_id = %doc_id, "ws_connection_closed");
        }
        Err(err) => {
            tracing::warn!(document_id = %doc_id, error = %err, "ws_session_open_failed");
            let mut sink = sink.lock().await;
            if let Err(e) = sink.send(error_frame(&err.to_string())).await {
                tracing::debug!(document_id = %doc_id, error = %e, "ws_error_frame_failed");
            }
            if let Err(e) = sink.close().await {
                tracing::debug!(document_id = %doc_id, error = %e, "ws_close_failed");
            }
        }
    }
}
