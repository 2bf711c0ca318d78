//! Realtime socket
//!
//! The client pushes `{"channels": [fq-id, ...]}` frames; each frame
//! replaces its whole subscription. The server pushes `Event` frames. The
//! same endpoint serves peer domains, which subscribe to the channels
//! their users watch here.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, warn};

use crate::model::ChannelRequest;
use crate::server::AppState;

type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

pub async fn handle_upgrade(
    state: Arc<AppState>,
    mut req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Full::new(Bytes::from("websocket upgrade required")))
            .unwrap_or_default();
    }

    match hyper_tungstenite::upgrade(&mut req, None) {
        Ok((response, websocket)) => {
            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => run_socket(state, ws).await,
                    Err(e) => error!("websocket handshake failed: {}", e),
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("websocket upgrade error: {}", e);
            Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Full::new(Bytes::from(format!("upgrade failed: {e}"))))
                .unwrap_or_default()
        }
    }
}

async fn run_socket(state: Arc<AppState>, ws: HyperWebSocket) {
    let (mut sink, mut stream) = ws.split();

    let (request_tx, request_rx) = mpsc::channel::<Vec<String>>(4);
    // unbuffered hand-off: a slow socket blocks only its own pump
    let (response_tx, mut response_rx) = mpsc::channel(1);

    let timeline = state.timeline.clone();
    let pump = tokio::spawn(async move {
        timeline.realtime(request_rx, response_tx).await;
    });

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ChannelRequest>(&text) {
                            Ok(request) => {
                                debug!(channels = request.channels.len(), "subscription updated");
                                if request_tx.send(request.channels).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "ignoring malformed subscription frame"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if sink.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("websocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            event = response_rx.recv() => {
                let Some(event) = event else { break };
                let Ok(frame) = serde_json::to_string(&event) else { continue };
                if sink.send(WsMessage::Text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    // closing the request channel terminates the pump; abort is the
    // backstop for a pump stuck mid-forward
    drop(request_tx);
    pump.abort();
}
