//! WebSocket listener.
//!
//! Every upgrade, on any path, becomes one [`ClientSession`]. Each
//! connection runs a reader loop feeding the session and a writer task
//! draining the session's outbound queue; the writer closes the socket once
//! the session handle is closed and the queue is empty.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::relay::Relay;
use crate::session::{ClientSession, Frame};
use crate::util::sanitize;

/// Bounds for how often idle VPN networks are swept.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn router(relay: Arc<Relay>) -> Router {
    Router::new().fallback(upgrade).with_state(relay)
}

/// Serve WebSocket clients on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, relay: Arc<Relay>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweeper = relay
        .config()
        .vpn_idle_expiry_secs
        .map(|secs| spawn_vpn_sweeper(Arc::clone(&relay), Duration::from_secs(secs)));

    let app = router(relay);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("WebSocket server failed");

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    result
}

/// Client IP chain: `X-Forwarded-For` hops in order, then the TCP peer.
pub fn extract_ip_chain(headers: &HeaderMap, peer: SocketAddr) -> Vec<String> {
    let mut chain: Vec<String> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|hop| sanitize(hop.trim()))
        .filter(|hop| !hop.is_empty())
        .collect();
    chain.push(peer.ip().to_string());
    chain
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
) -> Response {
    let ip_chain = extract_ip_chain(&headers, peer);
    ws.on_upgrade(move |socket| serve_connection(relay, socket, ip_chain))
}

async fn serve_connection(relay: Arc<Relay>, socket: WebSocket, ip_chain: Vec<String>) {
    let (session, outbound) = relay.open_session(ip_chain);
    let span = client_span(&session);
    run_session(session, socket, outbound).instrument(span).await;
}

/// Span for everything logged on behalf of `session`, opened with the
/// line tying the client's address to its id.
fn client_span(session: &ClientSession) -> Span {
    let span = info_span!("client", id = session.id());
    span.in_scope(|| info!("New client from {}", session.ip_chain().join(", ")));
    span
}

async fn run_session(
    mut session: ClientSession,
    socket: WebSocket,
    mut outbound: UnboundedReceiver<Frame>,
) {
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(
        async move {
            while let Some(frame) = outbound.recv().await {
                let message = match frame {
                    Frame::Text(text) => Message::Text(text.into()),
                    Frame::Binary(data) => Message::Binary(data.into()),
                };
                if let Err(e) = sink.send(message).await {
                    debug!("write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        }
        .in_current_span(),
    );

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => session.on_frame(Frame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(data)) => session.on_frame(Frame::Binary(data.to_vec())),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Error: {e}");
                break;
            }
        }
        if session.is_closed() {
            break;
        }
    }

    info!("disconnected");
    session.close();
    let _ = writer.await;
}

fn spawn_vpn_sweeper(relay: Arc<Relay>, max_idle: Duration) -> JoinHandle<()> {
    let period = (max_idle / 4).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL);
    info!("VPN networks expire after {max_idle:?} without endpoints");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = relay.vpns().evict_idle(max_idle);
            if evicted > 0 {
                info!(
                    "expired {evicted} idle VPN networks, {} remain",
                    relay.vpns().len()
                );
            }
        }
    })
}
