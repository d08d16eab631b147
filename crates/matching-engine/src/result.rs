//! Result types for matching operations

use common::Trade;
use settlement::Fill;

/// Result of matching one incoming order
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// The incoming order as committed after the last fill
    pub order: Trade,
    /// Fills settled during this pass, in execution order
    pub fills: Vec<Fill>,
    /// Counterparties skipped because they belong to the same customer
    pub self_trades_skipped: u32,
}

impl MatchResult {
    pub(crate) fn new(order: Trade) -> Self {
        Self {
            order,
            fills: Vec::new(),
            self_trades_skipped: 0,
        }
    }

    /// Check if any fills were settled
    pub fn has_fills(&self) -> bool {
        !self.fills.is_empty()
    }

    /// Total quantity filled during this pass
    pub fn filled_quantity(&self) -> u32 {
        self.fills.iter().map(|f| f.quantity).sum()
    }
}
