//! Event-stream connectivity: orders, positions, and quotes.
//!
//! Each stream is a long-lived `tokio-tungstenite` connection managed by
//! [`manager::spawn_stream`] with its own [`ReconnectPolicy`]. Parsing the
//! raw text frames into typed events is handled by [`codec`]; callers
//! (reconciler, tracker) own interpreting those events.

mod codec;
mod manager;
mod reconnect;
mod types;

pub use codec::{parse_order_event, parse_position_event, parse_quote_event, OrderEvent, PositionEvent, QuoteEvent};
pub use manager::{spawn_stream, StreamHandle};
pub use reconnect::ReconnectPolicy;
pub use types::{StreamConfig, StreamError, StreamState};
