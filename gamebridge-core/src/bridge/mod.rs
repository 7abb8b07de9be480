//! Session server, registry, and test client

pub mod client;
pub mod registry;
pub mod server;
pub mod session;
