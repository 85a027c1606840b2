//! PostgREST-style HTTP adapter for the remote gateway port.

mod http_gateway;

pub use http_gateway::RestGateway;
