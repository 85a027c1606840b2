//! Outbound adapters implementing the domain's gateway port.

pub mod memory;
pub mod rest;
