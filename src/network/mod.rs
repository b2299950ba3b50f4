//! Session connection: transport seam, WebSocket link and connection manager

pub mod manager;
pub mod subscribers;
pub mod transport;
pub mod websocket;

pub use manager::{ConnectionManager, ConnectionState, ManagerStats, WeakConnectionManager};
pub use subscribers::{Subscribers, Subscription};
pub use transport::{Connector, LinkId, TransportEvent, TransportLink};
pub use websocket::{endpoint_for_page, WsConnector};
