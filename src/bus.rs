//! Exclusive ownership of the shared radio bus.
//!
//! A [`Bus`] stands for one physical radio link (the serial line the modem
//! hangs off). Anyone holding a clone can try to claim it; only one
//! [`BusClaim`] can exist at a time. Claims are released explicitly or on drop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::AcquireError;

/// Handle to a shared radio bus.
#[derive(Clone)]
pub struct Bus {
    name: Arc<str>,
    claimed: Arc<AtomicBool>,
}

impl Bus {
    pub fn new(name: &str) -> Self {
        Bus {
            name: Arc::from(name),
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim the bus without waiting.
    pub fn try_claim(&self) -> Result<BusClaim, AcquireError> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(bus = %self.name, "bus already claimed");
            return Err(AcquireError::BusUnavailable);
        }
        trace!(bus = %self.name, "bus claimed");
        Ok(BusClaim {
            bus: self.clone(),
            held: true,
        })
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("claimed", &self.is_claimed())
            .finish()
    }
}

/// Proof of exclusive bus ownership.
#[derive(Debug)]
pub struct BusClaim {
    bus: Bus,
    held: bool,
}

impl BusClaim {
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Give the bus back. Idempotent.
    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.bus.claimed.store(false, Ordering::Release);
            trace!(bus = %self.bus.name, "bus released");
        }
    }
}

impl Drop for BusClaim {
    fn drop(&mut self) {
        self.release();
    }
}
