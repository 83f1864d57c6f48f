//! WebSocket layer: envelope, connection registry, upgrade handler and the
//! status subscriber.

pub mod connection;
pub mod handler;
pub mod messages;

pub use connection::ConnectionManager;
pub use handler::{run_status_subscriber, ws_handler};
pub use messages::{ClientMessage, ServerMessage};
