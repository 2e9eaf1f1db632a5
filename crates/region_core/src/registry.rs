use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{RegionError, Result};

/// Index of an occupied registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub usize);

#[derive(Debug, Clone, Copy)]
struct Entry {
    address: usize,
    len: usize,
}

/// Fixed-capacity table of outstanding plaintext buffers.
///
/// Maps a buffer's start address to its length so release can wipe exactly
/// the right number of bytes. It tracks memory, it does not own it. All
/// operations take one short-lived lock around a scan of at most `capacity`
/// slots; no I/O or crypto runs under it.
#[derive(Debug)]
pub struct AllocationRegistry {
    slots: Mutex<Vec<Option<Entry>>>,
}

impl AllocationRegistry {
    /// Create a registry with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    fn table(&self) -> MutexGuard<'_, Vec<Option<Entry>>> {
        // Every update is a single slot write, so a poisoned table is still consistent
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.table().len()
    }

    /// Number of occupied slots
    pub fn outstanding(&self) -> usize {
        self.table().iter().filter(|slot| slot.is_some()).count()
    }

    /// Record `address` in the first free slot.
    ///
    /// Fails with [`RegionError::RegistryExhausted`] when every slot is taken,
    /// and with [`RegionError::InvalidInput`] if `address` is already tracked.
    pub(crate) fn register(&self, address: usize, len: usize) -> Result<SlotId> {
        let mut table = self.table();

        let mut free = None;
        for (index, slot) in table.iter().enumerate() {
            match slot {
                Some(entry) if entry.address == address => {
                    return Err(RegionError::invalid("address is already registered"));
                }
                None if free.is_none() => free = Some(index),
                _ => {}
            }
        }

        let index = free.ok_or(RegionError::RegistryExhausted {
            capacity: table.len(),
        })?;
        table[index] = Some(Entry { address, len });
        Ok(SlotId(index))
    }

    /// Clear the slot holding `address`, returning the recorded length.
    ///
    /// `None` means the address is not tracked: never registered, or already
    /// released.
    pub(crate) fn unregister(&self, address: usize) -> Option<usize> {
        let mut table = self.table();
        let slot = table
            .iter_mut()
            .find(|slot| matches!(slot, Some(entry) if entry.address == address))?;
        slot.take().map(|entry| entry.len)
    }

    /// Recorded length for `address`, without removing it
    pub fn lookup(&self, address: usize) -> Option<usize> {
        self.table()
            .iter()
            .flatten()
            .find(|entry| entry.address == address)
            .map(|entry| entry.len)
    }
}
