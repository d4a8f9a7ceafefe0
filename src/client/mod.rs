mod delivery;
mod inbound;
mod waiters;

pub use delivery::ChatClient;
pub use delivery::ProbeError;
pub use delivery::RegisterError;
pub use delivery::SendError;
pub use inbound::ChatMessage;
pub use inbound::MessageStream;

pub(crate) use inbound::run_receive_loop;
pub(crate) use waiters::AckTable;
pub(crate) use waiters::ControlReply;
pub(crate) use waiters::ControlWaiter;
