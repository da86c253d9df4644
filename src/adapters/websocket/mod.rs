//! WebSocket transport: wire protocol, connection registry, upgrade handler.

mod handler;
mod protocol;
mod registry;
mod session;

pub use handler::{router, AuthParams};
pub use protocol::{
    parse_frame, AckCache, ClientError, ClientEvent, ErrorKind, InboundFrame, ServerEvent,
};
pub use registry::{ConnectionRegistry, Registration, Unregistration};
pub use session::Session;
