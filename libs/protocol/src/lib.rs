//! Wire types and validation shared between the directory service and the
//! node runtime. Kept dependency-light: no `axum`, no `tokio` — just the
//! structures both sides serialize and the rules both sides must agree on.

mod peer;
mod validate;
mod vip;

pub use peer::{
    ErrorResponse, HeartbeatRequest, MetricsResponse, PeerInfo, PeersResponse, RegisterRequest,
    RegisterResponse,
};
pub use validate::{ValidationError, validate_endpoint_port, validate_id, validate_public_key};
pub use vip::virtual_ip;
