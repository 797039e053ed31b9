pub mod framing;
pub mod handlers;
pub mod message;
pub mod server;
pub mod wire;
