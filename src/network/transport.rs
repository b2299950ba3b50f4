//! Transport seam between the connection manager and the wire
//!
//! A [`Connector`] opens links; each link reports its lifecycle through
//! [`TransportEvent`]s tagged with the [`LinkId`] it was opened with. A link
//! emits at most one `Opened`, any number of frames and errors, and exactly
//! one final `Closed`. Frames the link accepted but never wrote are handed
//! back in one `Unsent` just before `Closed`.

use tokio::sync::mpsc;

/// Identifies one transport link for the lifetime of a manager
pub type LinkId = u64;

/// Lifecycle and traffic events reported by a link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Text(String),
    Binary(Vec<u8>),
    Error(String),
    /// Accepted frames that never reached the wire, oldest first
    Unsent(Vec<String>),
    Closed,
}

/// Channel a link reports its events on
pub type EventSender = mpsc::UnboundedSender<(LinkId, TransportEvent)>;

/// Opens transport links
pub trait Connector: Send + 'static {
    /// Start opening a link. Must not block; completion is reported
    /// through `events`.
    fn open(&mut self, id: LinkId, events: EventSender) -> Box<dyn TransportLink>;
}

/// An open (or opening) transport link
pub trait TransportLink: Send {
    /// Queue one text frame. Hands the frame back when the link is gone.
    fn send_text(&mut self, frame: String) -> Result<(), String>;

    /// Close the link. Events emitted afterwards may be ignored by the owner.
    fn close(&mut self);
}
