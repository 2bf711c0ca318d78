//! Peer connection agent
//!
//! Every ten seconds: list the channels with live subscribers, group them
//! by suffix domain, and keep exactly one WebSocket open to every peer
//! domain somebody here is watching. Each tick re-sends the full channel
//! list for that peer; events read back are republished locally on the
//! same channel names. A dial or write failure drops the connection so the
//! next tick re-dials.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::Args;
use crate::model::{ChannelRequest, Event};
use crate::pubsub::EventHub;

const TICK_INTERVAL: Duration = Duration::from_secs(10);

type PeerSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

struct PeerConnection {
    sink: PeerSink,
    reader: JoinHandle<()>,
}

impl PeerConnection {
    fn close(self) {
        self.reader.abort();
    }
}

pub fn spawn_peer_connector(hub: Arc<EventHub>, config: Args) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut connections: HashMap<String, PeerConnection> = HashMap::new();
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            update_connections(&hub, &config, &mut connections).await;
        }
    })
}

async fn update_connections(
    hub: &Arc<EventHub>,
    config: &Args,
    connections: &mut HashMap<String, PeerConnection>,
) {
    let summarized = summarize(hub.channels());

    for (peer, channels) in &summarized {
        if *peer == config.fqdn {
            continue;
        }

        if !connections.contains_key(peer) {
            match dial(hub.clone(), peer).await {
                Ok(connection) => {
                    info!(peer = peer.as_str(), "peer connection established");
                    connections.insert(peer.clone(), connection);
                }
                Err(e) => {
                    warn!(peer = peer.as_str(), error = %e, "peer dial failed");
                    continue;
                }
            }
        }

        let request = ChannelRequest {
            channels: channels.clone(),
        };
        let Ok(frame) = serde_json::to_string(&request) else {
            continue;
        };
        let mut send_failed = false;
        if let Some(connection) = connections.get_mut(peer) {
            if let Err(e) = connection.sink.send(WsMessage::Text(frame)).await {
                warn!(peer = peer.as_str(), error = %e, "peer send failed, dropping");
                send_failed = true;
            }
        }
        if send_failed {
            if let Some(connection) = connections.remove(peer) {
                connection.close();
            }
        }
    }

    // nobody is watching these peers anymore
    let stale: Vec<String> = connections
        .keys()
        .filter(|peer| !summarized.contains_key(*peer))
        .cloned()
        .collect();
    for peer in stale {
        if let Some(connection) = connections.remove(&peer) {
            info!(peer = peer.as_str(), "peer connection closed");
            connection.close();
        }
    }
}

async fn dial(hub: Arc<EventHub>, peer: &str) -> Result<PeerConnection, String> {
    let url = format!("wss://{peer}/api/v1/socket");
    let (ws, _) = connect_async(&url).await.map_err(|e| e.to_string())?;
    let (sink, mut stream) = ws.split();

    let peer_name = peer.to_string();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<Event>(&text) {
                    Ok(event) => hub.publish(event),
                    Err(e) => {
                        warn!(peer = peer_name.as_str(), error = %e, "malformed peer event")
                    }
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(peer = peer_name.as_str(), "peer read error: {}", e);
                    break;
                }
            }
        }
        // reader exit leaves the stale sink behind; the next failed send
        // prunes it and the tick after that re-dials
    });

    Ok(PeerConnection { sink, reader })
}

/// Group fully-qualified channel names by their suffix domain.
fn summarize(channels: Vec<String>) -> HashMap<String, Vec<String>> {
    let mut summary: HashMap<String, Vec<String>> = HashMap::new();
    for channel in channels {
        let Some((_, domain)) = channel.rsplit_once('@') else {
            continue;
        };
        summary.entry(domain.to_string()).or_default().push(channel);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_groups_by_suffix_domain() {
        let summary = summarize(vec![
            "ta@x.example".into(),
            "tb@x.example".into(),
            "sem@con1user@y.example".into(),
            "malformed".into(),
        ]);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary["x.example"].len(), 2);
        assert_eq!(summary["y.example"], vec!["sem@con1user@y.example"]);
    }
}
