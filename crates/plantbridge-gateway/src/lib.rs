//! HTTP + WebSocket gateway in front of the session manager.

pub mod connection;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use connection::{ClientConnection, ConnectionConfig, Farewell};
pub use protocol::{AckFor, ClientMessage, ServerMessage};
pub use registry::ClientRegistry;
pub use server::{build_router, start, ApiError, AppState, GatewayConfig, ServerHandle};
pub use shutdown::ShutdownCoordinator;
