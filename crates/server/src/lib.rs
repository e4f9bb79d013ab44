//! Telephony server
//!
//! Wires the voice pipeline to the outside world: the webhook that answers
//! the PBX, the media WebSocket each call streams over, the organization
//! context cache, the append-only event sink, and the process entrypoint.

pub mod appointments;
pub mod http;
pub mod metrics;
pub mod org_provider;
pub mod sink;
pub mod state;
pub mod ws;

pub use appointments::InMemoryAppointments;
pub use http::create_router;
pub use org_provider::{CachedOrgProvider, StaticOrgProvider};
pub use sink::ChannelEventSink;
pub use state::AppState;
