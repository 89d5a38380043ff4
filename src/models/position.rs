//! Open position state, as observed through the positions stream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open (or just-closed) position in a symbol.
///
/// Identity key is `symbol`. A position update with `quantity == 0` is a
/// position-closed event: the caller removes the stop-limit repository
/// entry and resets tracker progress for the symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Underlying symbol. Identity key for this record.
    pub symbol: String,
    /// Current share quantity. Zero means the position is closed.
    pub quantity: Decimal,
    /// Average entry price. Only meaningful while `quantity > 0`.
    pub average_price: Decimal,
    /// When this record was last updated.
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// True when the position has no shares open.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.quantity.is_zero()
    }
}
