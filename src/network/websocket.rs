//! WebSocket transport over `tokio-tungstenite`

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::NetworkError;
use crate::network::transport::{Connector, EventSender, LinkId, TransportEvent, TransportLink};

/// Path the session server accepts WebSocket connections on
pub const SESSION_PATH: &str = "/ws";

/// Derive the session endpoint from the URL of the hosting page.
///
/// The WebSocket scheme mirrors the page scheme: `https` pages connect
/// over `wss`, `http` pages over `ws`. Only host and port carry over.
pub fn endpoint_for_page(page_url: &str) -> Result<String, NetworkError> {
    let invalid = || NetworkError::InvalidEndpoint(page_url.to_string());

    let page = Url::parse(page_url).map_err(|_| invalid())?;
    let scheme = match page.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return Err(invalid()),
    };
    let host = page.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;

    let mut endpoint =
        Url::parse(&format!("{}://{}", scheme, host)).map_err(|_| invalid())?;
    endpoint.set_port(page.port()).map_err(|_| invalid())?;
    endpoint.set_path(SESSION_PATH);
    Ok(endpoint.into())
}

/// Opens WebSocket links to a fixed endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn open(&mut self, id: LinkId, events: EventSender) -> Box<dyn TransportLink> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(self.url.clone(), id, events, rx));
        Box::new(WsLink { outgoing: tx })
    }
}

enum Outgoing {
    Text(String),
    Close,
}

struct WsLink {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl TransportLink for WsLink {
    fn send_text(&mut self, frame: String) -> Result<(), String> {
        self.outgoing
            .send(Outgoing::Text(frame))
            .map_err(|e| match e.0 {
                Outgoing::Text(frame) => frame,
                Outgoing::Close => String::new(),
            })
    }

    fn close(&mut self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

async fn run_link(
    url: String,
    id: LinkId,
    events: EventSender,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let connect = connect_async(url.as_str());
    tokio::pin!(connect);

    // A close requested while the handshake is in flight abandons it
    let ws = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws, _)) => break ws,
                Err(e) => {
                    report(&events, id, NetworkError::ConnectionFailed(e.to_string()));
                    finish(&events, id, &mut outgoing, None);
                    return;
                }
            },
            cmd = outgoing.recv() => match cmd {
                Some(Outgoing::Close) | None => {
                    finish(&events, id, &mut outgoing, None);
                    return;
                }
                // Frames are only handed to open links
                Some(Outgoing::Text(_)) => {}
            },
        }
    };

    tracing::debug!("Link {} open to {}", id, url);
    let _ = events.send((id, TransportEvent::Opened));

    let (mut sink, mut stream) = ws.split();
    let mut failed = None;

    loop {
        tokio::select! {
            cmd = outgoing.recv() => match cmd {
                Some(Outgoing::Text(frame)) => {
                    if let Err(e) = sink.send(Message::Text(frame.clone().into())).await {
                        report(&events, id, NetworkError::SendFailed(e.to_string()));
                        failed = Some(frame);
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send((id, TransportEvent::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send((id, TransportEvent::Binary(data.to_vec())));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report(&events, id, NetworkError::ReceiveFailed(e.to_string()));
                    break;
                }
            },
        }
    }

    tracing::debug!("Link {} closed", id);
    finish(&events, id, &mut outgoing, failed);
}

fn report(events: &EventSender, id: LinkId, error: NetworkError) {
    let _ = events.send((id, TransportEvent::Error(error.to_string())));
}

/// Hand back every frame the link accepted but never wrote, then report
/// the close
fn finish(
    events: &EventSender,
    id: LinkId,
    outgoing: &mut mpsc::UnboundedReceiver<Outgoing>,
    failed: Option<String>,
) {
    let unsent = drain_unsent(outgoing, failed);
    if !unsent.is_empty() {
        let _ = events.send((id, TransportEvent::Unsent(unsent)));
    }
    let _ = events.send((id, TransportEvent::Closed));
}

/// Stop accepting frames and collect the ones still queued, oldest first
fn drain_unsent(
    outgoing: &mut mpsc::UnboundedReceiver<Outgoing>,
    failed: Option<String>,
) -> Vec<String> {
    // Later send_text calls now fail and the manager keeps those frames
    outgoing.close();

    let mut unsent: Vec<String> = failed.into_iter().collect();
    while let Ok(cmd) = outgoing.try_recv() {
        if let Outgoing::Text(frame) = cmd {
            unsent.push(frame);
        }
    }
    unsent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_mirrors_page_scheme() {
        assert_eq!(
            endpoint_for_page("https://karaoke.local/control").unwrap(),
            "wss://karaoke.local/ws"
        );
        assert_eq!(
            endpoint_for_page("http://192.168.1.20:8000/").unwrap(),
            "ws://192.168.1.20:8000/ws"
        );
        assert_eq!(
            endpoint_for_page("http://localhost:5173?display=1").unwrap(),
            "ws://localhost:5173/ws"
        );
    }

    #[test]
    fn test_endpoint_normalises_page_url() {
        assert_eq!(
            endpoint_for_page("HTTPS://Karaoke.Local/").unwrap(),
            "wss://karaoke.local/ws"
        );
        // Credentials, path and fragment never reach the endpoint
        assert_eq!(
            endpoint_for_page("http://user:pw@host:8000/room#top").unwrap(),
            "ws://host:8000/ws"
        );
        // Default ports are implied by the new scheme
        assert_eq!(
            endpoint_for_page("https://karaoke.local:443/").unwrap(),
            "wss://karaoke.local/ws"
        );
        assert_eq!(
            endpoint_for_page("http://[::1]:8000/").unwrap(),
            "ws://[::1]:8000/ws"
        );
    }

    #[test]
    fn test_endpoint_rejects_other_schemes() {
        assert!(endpoint_for_page("ftp://host/").is_err());
        assert!(endpoint_for_page("https://").is_err());
        assert!(endpoint_for_page("karaoke.local").is_err());
        assert!(endpoint_for_page("http://host name/").is_err());
    }

    #[tokio::test]
    async fn test_refused_handshake_reports_connection_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (events, mut rx) = mpsc::unbounded_channel();
        let (_tx, outgoing) = mpsc::unbounded_channel();
        run_link(format!("ws://{}/ws", addr), 7, events, outgoing).await;

        match rx.recv().await {
            Some((7, TransportEvent::Error(e))) => {
                assert!(e.starts_with("Connection failed"), "{}", e)
            }
            other => panic!("expected an error, got {:?}", other),
        }
        assert_eq!(rx.recv().await, Some((7, TransportEvent::Closed)));
    }

    #[test]
    fn test_drain_returns_unsent_frames_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Outgoing::Text("b".into())).unwrap();
        tx.send(Outgoing::Close).unwrap();
        tx.send(Outgoing::Text("c".into())).unwrap();

        let unsent = drain_unsent(&mut rx, Some("a".into()));
        assert_eq!(unsent, vec!["a", "b", "c"]);

        // A frame handed over after the drain bounces back to the sender
        let mut link = WsLink { outgoing: tx };
        assert_eq!(link.send_text("d".into()), Err("d".to_string()));
    }
}
