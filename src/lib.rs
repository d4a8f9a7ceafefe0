mod actor;
mod api;
mod client;
mod clock;
mod detector;
mod election;
mod membership;
mod server;
mod sync;
mod transport;
mod wire;

pub use api::try_create_client;
pub use api::try_create_server;
pub use api::ChatOptions;
pub use api::ClientConfig;
pub use api::CreateClientError;
pub use api::CreateServerError;
pub use api::DiscoveryConfig;
pub use api::ServerConfig;
pub use api::ServerHandle;
pub use client::ChatClient;
pub use client::ChatMessage;
pub use client::MessageStream;
pub use client::ProbeError;
pub use client::RegisterError;
pub use client::SendError;
pub use clock::LamportClock;
pub use membership::ServerRecord;
pub use membership::SubnetFilter;
pub use wire::Frame;
pub use wire::FrameError;
pub use wire::LeaderAnnouncement;
pub use wire::MessageId;
