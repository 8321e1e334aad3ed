pub mod connection;
pub mod groups;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod signaling;
pub mod transport;

pub use relay::{Relay, RelayStatus};
pub use server::{shutdown_signal, start, ServerConfig, ServerError, ServerHandle};
pub use transport::{ClientRegistry, Transport};
