//! Boundary traits adapters implement to feed the domain.

pub mod data_port;
