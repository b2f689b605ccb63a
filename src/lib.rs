pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod render;
pub mod server;
pub mod session;
pub mod shell;
pub mod transport;
