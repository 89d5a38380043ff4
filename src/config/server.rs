//! HTTP control/status surface bind address.

/// Spec §6 names no environment variable for the control surface's bind
/// address; `CONTROL_SERVER_BIND_ADDR` is this repo's addition, defaulting
/// to loopback so the operator surface isn't exposed unless configured.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the axum control/status router binds to.
    pub bind_addr: String,
}

impl ServerConfig {
    /// Loads from `CONTROL_SERVER_BIND_ADDR`, defaulting to
    /// `127.0.0.1:8090`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            bind_addr: super::env_or("CONTROL_SERVER_BIND_ADDR", "127.0.0.1:8090"),
        }
    }
}
