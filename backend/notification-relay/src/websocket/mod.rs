/// Push connections
///
/// Architecture:
/// 1. TransportChannel: one framed connection to a client (WebSocket or in-memory)
/// 2. ConnectionRegistry: the set of open channels and their termination signals
/// 3. PushFrame: the JSON frames written to clients, answered with `received`

pub mod channel;
pub mod memory;
pub mod messages;
pub mod registry;
pub mod ws_channel;

pub use channel::{send_and_await_ack, ChannelError, ChannelId, TransportChannel};
pub use messages::{PushFrame, ACK_PAYLOAD};
pub use registry::{
    own_connection, CloseReason, ConnectionRegistry, ControlHandle, ControlSignal, Registration,
    RegistrationEntry, RegistryError, SharedChannel,
};
pub use ws_channel::{InboundPump, WsChannel};
