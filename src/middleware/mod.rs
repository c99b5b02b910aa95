//! Request-scoped middleware and extractors.

pub mod client_ip;
pub mod request_id;

pub use client_ip::ClientIp;
pub use request_id::{request_id_layer, RequestIdExt};
