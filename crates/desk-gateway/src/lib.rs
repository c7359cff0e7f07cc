//! HTTP and WebSocket gateway: search, indexing control, session inspection, realtime chat.

mod error;
mod handlers;
mod indexing;
mod protocol;
mod router;
mod server;
mod ws;

pub use error::{ApiError, GatewayError};
pub use indexing::IndexJob;
pub use protocol::{InboundFrame, OutboundFrame, OutboundSource};
pub use router::build_router;
pub use server::{AppState, GatewayServer};
