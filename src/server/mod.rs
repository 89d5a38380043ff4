//! Operator control/status HTTP surface.

mod http;

pub use http::{create_router, ControlServer};
