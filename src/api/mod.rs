//! The library's client-facing API: configuration and wiring.
mod options;
mod wiring;

pub use options::ChatOptions;
pub use wiring::try_create_client;
pub use wiring::try_create_server;
pub use wiring::ClientConfig;
pub use wiring::CreateClientError;
pub use wiring::CreateServerError;
pub use wiring::DiscoveryConfig;
pub use wiring::ServerConfig;
pub use wiring::ServerHandle;

pub(crate) use options::ChatOptionsValidated;
