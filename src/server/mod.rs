//! Server endpoint: listening, admission control and passive handshakes.

mod accept;
mod tsap;

pub use tsap::*;
