// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Pool of CPort OUT transfers.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use core::cell::RefCell;

use heapless::Vec;

use crate::config::NUM_CPORT_OUT;
use crate::transfer::{Transfer, TransferId};

type RawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
type BlockingMutex<T> =
    embassy_sync::blocking_mutex::Mutex<RawMutex, RefCell<T>>;

/// Where an outbound transfer came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SlotRef {
    /// Index into the fixed pool
    Pool(usize),
    /// Allocated when the pool was exhausted, freed on completion
    Overflow,
}

#[derive(Debug)]
enum Slot {
    Free(Transfer),
    /// Submitted with this ID
    Busy(TransferId),
}

#[derive(Debug)]
struct PoolInner {
    slots: Vec<Slot, NUM_CPORT_OUT>,
    // In-flight overflow transfers, so that teardown can kill them
    overflow: std::vec::Vec<TransferId>,
    closed: bool,
}

/// Fixed pool of outbound transfers.
///
/// The lock is only held for slot bookkeeping, never over a device call
/// or a handler callback.
pub(crate) struct OutPool {
    inner: BlockingMutex<PoolInner>,
}

impl OutPool {
    pub fn new() -> Self {
        Self {
            inner: BlockingMutex::new(RefCell::new(PoolInner {
                slots: Vec::new(),
                overflow: std::vec::Vec::new(),
                closed: false,
            })),
        }
    }

    /// Adds a transfer to the pool.
    ///
    /// Returns the slot index, or the transfer if the pool is full.
    pub fn add(&self, transfer: Transfer) -> Result<usize, Transfer> {
        self.inner.lock(|p| {
            let mut p = p.borrow_mut();
            let idx = p.slots.len();
            p.slots
                .push(Slot::Free(transfer))
                .map_err(|s| match s {
                    Slot::Free(t) => t,
                    Slot::Busy(_) => unreachable!(),
                })?;
            Ok(idx)
        })
    }

    /// Takes a free transfer, marking its slot busy with `id`.
    ///
    /// Returns `Ok(None)` when all slots are busy, and
    /// `Err(NoDevice)` once the pool is closed.
    pub fn acquire(
        &self,
        id: TransferId,
    ) -> greybus::Result<Option<(SlotRef, Transfer)>> {
        self.inner.lock(|p| {
            let mut p = p.borrow_mut();
            if p.closed {
                return Err(greybus::Error::NoDevice);
            }

            let Some(idx) =
                p.slots.iter().position(|s| matches!(s, Slot::Free(_)))
            else {
                return Ok(None);
            };

            let Slot::Free(t) =
                core::mem::replace(&mut p.slots[idx], Slot::Busy(id))
            else {
                unreachable!()
            };
            Ok(Some((SlotRef::Pool(idx), t)))
        })
    }

    /// Records an overflow transfer as in flight.
    pub fn track_overflow(&self, id: TransferId) -> greybus::Result<()> {
        self.inner.lock(|p| {
            let mut p = p.borrow_mut();
            if p.closed {
                return Err(greybus::Error::NoDevice);
            }
            p.overflow.push(id);
            Ok(())
        })
    }

    /// Returns a transfer after completion or a failed submission.
    ///
    /// Pool transfers go back to their slot, overflow transfers are freed.
    /// After [`close()`](Self::close) everything is freed.
    pub fn release(&self, slot: SlotRef, transfer: Transfer) {
        let id = transfer.id();
        // Dropped outside the lock
        let freed = self.inner.lock(|p| {
            let mut p = p.borrow_mut();
            match slot {
                SlotRef::Overflow => {
                    let pos = p.overflow.iter().position(|o| *o == id);
                    if let Some(pos) = pos {
                        p.overflow.swap_remove(pos);
                    }
                    Some(transfer)
                }
                SlotRef::Pool(_) if p.closed => Some(transfer),
                SlotRef::Pool(idx) => {
                    let Some(s) = p.slots.get_mut(idx) else {
                        debug_assert!(false, "bad pool index");
                        return Some(transfer);
                    };
                    debug_assert!(
                        matches!(s, Slot::Busy(b) if *b == id),
                        "release of non-busy slot"
                    );
                    *s = Slot::Free(transfer);
                    None
                }
            }
        });
        drop(freed);
    }

    /// Closes the pool.
    ///
    /// Free transfers are dropped. Returns the IDs of in-flight transfers,
    /// both pool and overflow, which the caller should kill.
    pub fn close(&self) -> std::vec::Vec<TransferId> {
        let (slots, mut busy) = self.inner.lock(|p| {
            let mut p = p.borrow_mut();
            p.closed = true;
            let overflow = core::mem::take(&mut p.overflow);
            (core::mem::take(&mut p.slots), overflow)
        });

        for s in slots {
            if let Slot::Busy(id) = s {
                busy.push(id)
            }
        }
        trace!("pool closed, {} in flight", busy.len());
        busy
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock(|p| p.borrow().closed)
    }

    /// Number of busy pool slots
    pub fn busy(&self) -> usize {
        self.inner.lock(|p| {
            p.borrow()
                .slots
                .iter()
                .filter(|s| matches!(s, Slot::Busy(_)))
                .count()
        })
    }

    /// Number of in-flight overflow transfers
    pub fn overflow(&self) -> usize {
        self.inner.lock(|p| p.borrow().overflow.len())
    }

    /// Returns `true` if `id` is an in-flight send from this pool,
    /// including overflow transfers.
    pub fn owns(&self, id: TransferId) -> bool {
        self.inner.lock(|p| {
            let p = p.borrow();
            p.slots.iter().any(|s| matches!(s, Slot::Busy(b) if *b == id))
                || p.overflow.contains(&id)
        })
    }
}
