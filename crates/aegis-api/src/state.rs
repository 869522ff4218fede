//! Application state shared across handlers
//!
//! One `App` is built at start-up and passed to every handler; there is
//! no module-level state anywhere in the server.

use std::sync::Arc;

use aegis_clearing::ClearingCore;
use aegis_types::{Address, Amount};
use aegis_x402::Facilitator;

/// Shared application state
pub struct App {
    pub core: Arc<ClearingCore>,
    pub facilitator: Arc<dyn Facilitator>,
    /// Network tag for payment requirements
    pub network: String,
    pub asset_address: Address,
    pub agent_address: Address,
    pub credit_manager_address: Address,
    pub min_stake: Amount,
    pub slash_bond: Amount,
}
