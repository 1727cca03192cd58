//! WebSocket progress streaming.

pub mod progress;

pub use progress::progress_ws;
