//! HTTP + WebSocket transport front-ends.
//!
//! Two listeners run concurrently, AppHttp and MsHttp, each exposing the
//! same command dispatcher. A WebSocket connection is simultaneously a
//! broadcast subscriber (it receives every bus event) and a request/response
//! channel (text frames are dispatched and the result written back to the
//! same socket). A plain HTTP request is treated as a single command: the
//! request target, minus its leading slash, is the command URL.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, RawQuery, Request, State};
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::SharedBus;
use crate::dispatcher::Dispatcher;

const APP_HTTP_PORT: u16 = 7091;
const MS_HTTP_PORT: u16 = 7095;

const APP_HTTP_BANNER: &str =
    "LWSS V 16.1.10.01 | ~API:1.6~ | Session-Token: 8WahwAfULwEQce9Yu0qIE9L7QMkXFHbi0M9ch9vKcgYArPPojXHpSiNcq0fT3lqL";

fn ms_http_banner(mac_id: &str) -> String {
    format!(
        "MINISERVER V LWSS V 16.1.10.01 {mac_id} | ~API:1.6~ | Session-Token: 8WahwAfULwEQce9Yu0qIE9L7QMkXFHbi0M9ch9vKcgYArPPojXHpSiNcq0fT3lqL"
    )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Listener {
    AppHttp,
    MsHttp,
}

#[derive(Clone)]
struct ListenerState {
    dispatcher: Arc<Dispatcher>,
    bus: SharedBus,
    listener: Listener,
    shutdown: CancellationToken,
}

/// Command portion of a request target: leading slash stripped, query
/// string reattached as `<path>?<query>` since command handlers expect
/// base64 payloads and alert options inline rather than as a separate
/// query component.
fn command_from_uri(uri: &Uri, query: Option<&str>) -> String {
    let path = uri.path().trim_start_matches('/');
    match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}

async fn http_handler(
    State(state): State<ListenerState>,
    RawQuery(query): RawQuery,
    uri: Uri,
) -> impl IntoResponse {
    let command = command_from_uri(&uri, query.as_deref());
    state.dispatcher.dispatch(&command).await
}

async fn ws_upgrade_handler(
    State(state): State<ListenerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ListenerState) {
    let (mut sender, mut receiver) = socket.split();
    let (peer_id, mut bus_rx) = state.bus.register().await;

    let banner = match state.listener {
        Listener::AppHttp => APP_HTTP_BANNER.to_string(),
        Listener::MsHttp => ms_http_banner(&state.dispatcher.config.cached_mac_id()),
    };
    if sender.send(Message::Text(banner.into())).await.is_err() {
        state.bus.unregister(peer_id).await;
        return;
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: 1000,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }
            outgoing = bus_rx.recv() => {
                match outgoing {
                    Some(line) => {
                        if sender.send(Message::Text(line.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let command = text.trim_start_matches('/').to_string();
                        let response = state.dispatcher.dispatch(&command).await;
                        if sender.send(Message::Text(response.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // binary/ping/pong frames carry no command semantics here
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.bus.unregister(peer_id).await;
}

fn router(listener: Listener, dispatcher: Arc<Dispatcher>, bus: SharedBus, shutdown: CancellationToken) -> Router {
    let state = ListenerState { dispatcher, bus, listener, shutdown };
    Router::new()
        .fallback(ws_or_http)
        .with_state(state)
}

async fn ws_or_http(State(state): State<ListenerState>, req: Request) -> axum::response::Response {
    let (mut parts, _body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => ws_upgrade_handler(State(state), upgrade).await.into_response(),
        Err(_) => {
            let query = parts.uri.query().map(|q| q.to_string());
            let uri = parts.uri.clone();
            http_handler(State(state), RawQuery(query), uri)
                .await
                .into_response()
        }
    }
}

async fn serve_listener(
    bind_addr: &str,
    port: u16,
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    bus: SharedBus,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{bind_addr}:{port}").parse()?;
    let app = router(listener, dispatcher, bus, shutdown.clone());
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "transport listener bound");
    axum::serve(tcp, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Runs both AppHttp and MsHttp listeners until `shutdown` is cancelled.
/// Returns once both have stopped accepting connections.
pub async fn serve(
    bind_addr: &str,
    dispatcher: Arc<Dispatcher>,
    bus: SharedBus,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app_http = serve_listener(
        bind_addr,
        APP_HTTP_PORT,
        Listener::AppHttp,
        dispatcher.clone(),
        bus.clone(),
        shutdown.clone(),
    );
    let ms_http = serve_listener(bind_addr, MS_HTTP_PORT, Listener::MsHttp, dispatcher, bus, shutdown);

    let (app_result, ms_result) = tokio::join!(app_http, ms_http);
    app_result?;
    ms_result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_from_uri_strips_leading_slash_and_reattaches_query() {
        let uri: Uri = "/audio/7/volume/-5".parse().unwrap();
        assert_eq!(command_from_uri(&uri, None), "audio/7/volume/-5");

        let uri: Uri = "/audio/grouped/alarm/1,2".parse().unwrap();
        assert_eq!(
            command_from_uri(&uri, Some("q&abc")),
            "audio/grouped/alarm/1,2?q&abc"
        );
    }

    #[test]
    fn ms_http_banner_embeds_mac_id() {
        let banner = ms_http_banner("504F94FF1BB3");
        assert!(banner.starts_with("MINISERVER V LWSS V 16.1.10.01 504F94FF1BB3"));
    }
}
