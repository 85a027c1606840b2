//! Domain ports for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod remote_gateway;

#[cfg(test)]
pub use remote_gateway::MockRemoteGateway;
pub use remote_gateway::{GatewayError, RemoteGateway};
