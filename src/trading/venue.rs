//! Transport to the venue.
//!
//! A [`VenueLink`] is a pair of channels: text frames out, text frames (or a
//! terminal close) in. The websocket connector pumps a real socket through
//! that pair; tests plug an in-process endpoint into the same shape.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::TradeError;

const LINK_BUFFER: usize = 256;
const KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Text(String),
    /// Terminal: the transport is gone. Carries the reason when known.
    Closed(Option<String>),
}

pub struct VenueLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// The far side of an in-process link.
pub struct VenueEndpoint {
    pub requests: mpsc::Receiver<String>,
    pub events: mpsc::Sender<LinkEvent>,
}

impl VenueLink {
    pub fn pair(buffer: usize) -> (VenueLink, VenueEndpoint) {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        (
            VenueLink { outbound: out_tx, inbound: in_rx },
            VenueEndpoint { requests: out_rx, events: in_tx },
        )
    }

    pub async fn send(&self, frame: String) -> Result<(), TradeError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TradeError::Connection("link closed".into()))
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<VenueLink, TradeError>;
}

// ─────────────────────────────────────────────────────────
// WebSocket connector
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self { url: url.into(), connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<VenueLink, TradeError> {
        debug!(url = %self.url, "connecting venue WS");
        let (ws, response) = match tokio::time::timeout(self.connect_timeout, connect_async(&self.url)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(TradeError::Connection(format!("WS connect error: {e}"))),
            Err(_) => return Err(TradeError::Connection("WS connection timeout".into())),
        };
        info!(status = ?response.status(), "venue WS connected");

        let (link, mut endpoint) = VenueLink::pair(LINK_BUFFER);
        let (mut write, mut read) = ws.split();

        tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(KEEPALIVE);
            keepalive.tick().await;

            let reason = loop {
                tokio::select! {
                    out = endpoint.requests.recv() => match out {
                        Some(frame) => {
                            if let Err(e) = write.send(Message::Text(frame)).await {
                                break Some(format!("send failed: {e}"));
                            }
                        }
                        // Session dropped its link: close politely and stop pumping.
                        None => {
                            let _ = write.close().await;
                            return;
                        }
                    },
                    _ = keepalive.tick() => {
                        if let Err(e) = write.send(Message::Text(r#"{"ping":1}"#.to_string())).await {
                            break Some(format!("keepalive failed: {e}"));
                        }
                    }
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if endpoint.events.send(LinkEvent::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break Some(frame.map(|f| f.reason.to_string()).unwrap_or_else(|| "closed by server".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break None,
                    },
                }
            };

            warn!(?reason, "venue WS ended");
            let _ = endpoint.events.send(LinkEvent::Closed(reason)).await;
        });

        Ok(link)
    }
}
