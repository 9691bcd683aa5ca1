//! Real-time layer: channel presence, chat relay, and call signaling.
//!
//! Each connection runs an independent task pair reading from the socket and
//! draining an outbound channel; all shared state lives in [`ChatHub`].

mod handler;
mod hub;
mod protocol;
mod relay;
mod signaling;

pub use handler::handle_chat_ws;
pub use hub::ChatHub;
