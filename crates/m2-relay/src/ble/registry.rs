//! Peripheral bookkeeping for the btleplug driver
//!
//! Kept generic over the peripheral handle so the rules can be tested
//! without an adapter.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Advertisers remembered while scanning
pub const MAX_DISCOVERED: usize = 64;

/// Peripherals advertised during the current scan
///
/// Bounded: once `capacity` distinct addresses are held, the next new
/// address starts the cache over.
pub struct DiscoveryCache<P> {
    entries: Mutex<HashMap<String, P>>,
    capacity: usize,
}

impl<P> DiscoveryCache<P> {
    /// Create an empty cache
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Remember the peripheral behind an advertisement
    pub fn insert(&self, address: String, peripheral: P) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&address) {
            entries.clear();
        }
        entries.insert(address, peripheral);
    }

    /// Take the peripheral at `address` and forget the rest
    pub fn take(&self, address: &str) -> Option<P> {
        let mut entries = self.entries.lock();
        let peripheral = entries.remove(address);
        entries.clear();
        peripheral
    }

    /// Forget everything
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of peripherals held
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

struct SlotState<P> {
    generation: u64,
    current: Option<P>,
}

/// The connected peripheral, plus a generation that invalidates
/// connection attempts still in flight when the link is released
pub struct ConnectionSlot<P> {
    state: Mutex<SlotState<P>>,
}

impl<P: Clone> ConnectionSlot<P> {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                generation: 0,
                current: None,
            }),
        }
    }

    /// Ticket for a connection attempt starting now
    pub fn begin(&self) -> u64 {
        self.state.lock().generation
    }

    /// Store the peripheral of a finished attempt
    ///
    /// Hands the peripheral back if the slot was released after `ticket`
    /// was issued.
    pub fn claim(&self, ticket: u64, peripheral: P) -> Result<(), P> {
        let mut state = self.state.lock();
        if state.generation != ticket {
            return Err(peripheral);
        }
        state.current = Some(peripheral);
        Ok(())
    }

    /// Abandon attempts in flight and take the current peripheral
    pub fn release(&self) -> Option<P> {
        let mut state = self.state.lock();
        state.generation += 1;
        state.current.take()
    }

    /// Take the current peripheral if it matches
    pub fn take_if(&self, matches: impl FnOnce(&P) -> bool) -> Option<P> {
        let mut state = self.state.lock();
        match state.current.as_ref() {
            Some(peripheral) if matches(peripheral) => state.current.take(),
            _ => None,
        }
    }

    /// Clone of the current peripheral
    pub fn current(&self) -> Option<P> {
        self.state.lock().current.clone()
    }
}

impl<P: Clone> Default for ConnectionSlot<P> {
    fn default() -> Self {
        Self::new()
    }
}
