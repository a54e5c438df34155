//! Reserved-range port selection.
//!
//! Concurrent orchestrations sharing a host pool each draw a port
//! pseudo-randomly from a fixed range. Collision is an accepted
//! low-probability race; there is no locking and no bind-retry loop.

use rand::Rng;

/// First port of the reserved range (inclusive).
pub const PORT_RANGE_START: u16 = 8000;

/// Last port of the reserved range (inclusive).
pub const PORT_RANGE_END: u16 = 8999;

/// Draw a port from the reserved range.
pub fn choose_port<R: Rng>(rng: &mut R) -> u16 {
    rng.random_range(PORT_RANGE_START..=PORT_RANGE_END)
}
