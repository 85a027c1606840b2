//! Local-first domain store for the expense and mileage tracker.
//!
//! The [`domain`] module holds the store, its reference cache, and the
//! gateway port. [`outbound`] provides the HTTP and in-memory adapters, and
//! [`settings`] wires them up from configuration.

pub mod domain;
pub mod outbound;
pub mod settings;
