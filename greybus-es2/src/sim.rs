// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! A simulated ES2 bridge.
//!
//! [`SimBridge`] queues submitted transfers in memory. Tests and demos
//! complete them explicitly, standing in for the USB host controller.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use core::cell::RefCell;
use std::collections::VecDeque;

use greybus::{Error, Result, TransferStatus};

use crate::transfer::{
    ControlSetup, EndpointDescriptor, Rejected, Transfer, TransferId,
    TransferType, UsbDevice,
};

type RawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
type BlockingMutex<T> =
    embassy_sync::blocking_mutex::Mutex<RawMutex, RefCell<T>>;

/// SVC interrupt IN endpoint of [`SimBridge::new`]
pub const SIM_SVC_IN: u8 = 0x81;
/// CPort bulk IN endpoint of [`SimBridge::new`]
pub const SIM_CPORT_IN: u8 = 0x82;
/// CPort bulk OUT endpoint of [`SimBridge::new`]
pub const SIM_CPORT_OUT: u8 = 0x02;

#[derive(Debug, Default)]
struct SimState {
    queued: VecDeque<Transfer>,
    disconnected: bool,
    // Successful submits remaining before an injected failure
    fail_after: Option<usize>,
    hang_control: bool,
    short_control: bool,
    control_log: Vec<(ControlSetup, Vec<u8>)>,
    submitted: usize,
    completed: usize,
}

/// An in-memory bridge device.
pub struct SimBridge {
    endpoints: Vec<EndpointDescriptor>,
    state: BlockingMutex<SimState>,
}

impl SimBridge {
    /// A bridge with the ES2 endpoint layout.
    pub fn new() -> Self {
        Self::with_endpoints(&[
            EndpointDescriptor {
                address: SIM_SVC_IN,
                transfer_type: TransferType::Interrupt,
                max_packet_size: 64,
                interval: 4,
            },
            EndpointDescriptor {
                address: SIM_CPORT_IN,
                transfer_type: TransferType::Bulk,
                max_packet_size: 512,
                interval: 0,
            },
            EndpointDescriptor {
                address: SIM_CPORT_OUT,
                transfer_type: TransferType::Bulk,
                max_packet_size: 512,
                interval: 0,
            },
        ])
    }

    pub fn with_endpoints(endpoints: &[EndpointDescriptor]) -> Self {
        Self {
            endpoints: endpoints.to_vec(),
            state: BlockingMutex::new(RefCell::new(SimState::default())),
        }
    }

    /// Unplug the device.
    ///
    /// Queued transfers complete with [`TransferStatus::Shutdown`] and
    /// later submissions fail with [`Error::NoDevice`].
    pub fn disconnect(&self) {
        let gone = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.disconnected = true;
            let q = core::mem::take(&mut s.queued);
            s.completed += q.len();
            q
        });
        debug!("sim disconnect, {} in flight", gone.len());
        for t in gone {
            t.give_back(TransferStatus::Shutdown);
        }
    }

    /// Fail a later submission with [`Error::TxFailure`].
    ///
    /// The submission after the next `n` successful ones is rejected,
    /// once.
    pub fn fail_submit_after(&self, n: usize) {
        self.state.lock(|s| s.borrow_mut().fail_after = Some(n))
    }

    /// Control transfers never complete while set.
    pub fn hang_control(&self, hang: bool) {
        self.state.lock(|s| s.borrow_mut().hang_control = hang)
    }

    /// Control transfers report one byte short while set.
    pub fn short_control(&self, short: bool) {
        self.state.lock(|s| s.borrow_mut().short_control = short)
    }

    /// Number of transfers queued on `endpoint`
    pub fn armed(&self, endpoint: u8) -> usize {
        self.state.lock(|s| {
            s.borrow()
                .queued
                .iter()
                .filter(|t| t.endpoint() == endpoint)
                .count()
        })
    }

    /// Number of transfers queued on any endpoint
    pub fn in_flight(&self) -> usize {
        self.state.lock(|s| s.borrow().queued.len())
    }

    /// Total accepted submissions
    pub fn submitted(&self) -> usize {
        self.state.lock(|s| s.borrow().submitted)
    }

    /// Total transfers given back
    pub fn completed(&self) -> usize {
        self.state.lock(|s| s.borrow().completed)
    }

    /// Control transfers sent so far.
    pub fn control_messages(&self) -> Vec<(ControlSetup, Vec<u8>)> {
        self.state.lock(|s| s.borrow().control_log.clone())
    }

    fn endpoint_where(
        &self,
        f: impl Fn(&EndpointDescriptor) -> bool,
    ) -> Option<u8> {
        self.endpoints.iter().find(|&e| f(e)).map(|e| e.address)
    }

    /// Removes the oldest transfer queued on `endpoint`.
    fn take(&self, endpoint: u8) -> Option<Transfer> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let pos = s.queued.iter().position(|t| t.endpoint() == endpoint)?;
            let t = s.queued.remove(pos);
            if t.is_some() {
                s.completed += 1;
            }
            t
        })
    }

    /// Completes the oldest CPort OUT transfer with `status`.
    ///
    /// Returns the frame it carried, or `None` if nothing was queued.
    pub fn complete_out(&self, status: TransferStatus) -> Option<Vec<u8>> {
        let ep = self.endpoint_where(EndpointDescriptor::is_bulk_out)?;
        let mut t = self.take(ep)?;
        let frame = t.buffer().to_vec();
        if status.is_ok() {
            t.set_actual_length(frame.len());
        }
        t.give_back(status);
        Some(frame)
    }

    /// Completes the oldest CPort IN transfer with `frame`.
    ///
    /// Returns `false` if no transfer was armed.
    pub fn deliver_cport(&self, status: TransferStatus, frame: &[u8]) -> bool {
        self.endpoint_where(EndpointDescriptor::is_bulk_in)
            .is_some_and(|ep| self.deliver(ep, status, frame))
    }

    /// Completes the armed SVC transfer with `msg`.
    ///
    /// Returns `false` if no transfer was armed.
    pub fn deliver_svc(&self, status: TransferStatus, msg: &[u8]) -> bool {
        self.endpoint_where(EndpointDescriptor::is_int_in)
            .is_some_and(|ep| self.deliver(ep, status, msg))
    }

    fn deliver(&self, ep: u8, mut status: TransferStatus, data: &[u8]) -> bool {
        let Some(mut t) = self.take(ep) else {
            return false;
        };
        let buf = t.buffer_mut();
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        if len < data.len() && status.is_ok() {
            // babble
            status = TransferStatus::Overflow;
        }
        t.set_actual_length(len);
        t.give_back(status);
        true
    }

    /// Echoes queued CPort OUT frames back as CPort IN data.
    ///
    /// Returns the number of frames echoed. Stops when either direction
    /// runs out of transfers.
    pub fn loopback(&self) -> usize {
        let mut n = 0;
        while self.armed_in() > 0 {
            let Some(frame) = self.complete_out(TransferStatus::Completed)
            else {
                break;
            };
            if self.deliver_cport(TransferStatus::Completed, &frame) {
                n += 1;
            }
        }
        n
    }

    fn armed_in(&self) -> usize {
        self.endpoint_where(EndpointDescriptor::is_bulk_in)
            .map_or(0, |ep| self.armed(ep))
    }
}

impl Default for SimBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbDevice for SimBridge {
    fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    fn submit(&self, transfer: Transfer) -> core::result::Result<(), Rejected> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.disconnected {
                return Err(Rejected {
                    transfer,
                    error: Error::NoDevice,
                });
            }
            match s.fail_after {
                Some(0) => {
                    s.fail_after = None;
                    return Err(Rejected {
                        transfer,
                        error: Error::TxFailure,
                    });
                }
                Some(n) => s.fail_after = Some(n - 1),
                None => (),
            }
            trace!("sim submit {transfer:?}");
            s.queued.push_back(transfer);
            s.submitted += 1;
            Ok(())
        })
    }

    fn kill(&self, id: TransferId) {
        let killed = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let pos = s.queued.iter().position(|t| t.id() == id)?;
            let t = s.queued.remove(pos);
            if t.is_some() {
                s.completed += 1;
            }
            t
        });
        // Given back outside the lock
        if let Some(t) = killed {
            t.give_back(TransferStatus::Killed);
        }
    }

    async fn control_out(
        &self,
        setup: ControlSetup,
        data: &[u8],
    ) -> Result<usize> {
        let r = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.disconnected {
                return Some(Err(Error::NoDevice));
            }
            if s.hang_control {
                return None;
            }
            s.control_log.push((setup, data.to_vec()));
            let len = if s.short_control {
                data.len().saturating_sub(1)
            } else {
                data.len()
            };
            Some(Ok(len))
        });

        match r {
            Some(r) => r,
            None => smol::future::pending().await,
        }
    }
}
