// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! SVC messages over the default control pipe.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use core::sync::atomic::Ordering;

use smol::future::FutureExt;
use smol::Timer;

use greybus::{Error, HostHandler, Result, SvcMsg};

use crate::config::{CONTROL_TIMEOUT, CONTROL_TIMEOUT_MS};
use crate::host::HostInner;
use crate::transfer::{ControlSetup, UsbDevice};

const USB_DIR_OUT: u8 = 0x00;
const USB_TYPE_VENDOR: u8 = 0x40;
const USB_RECIP_INTERFACE: u8 = 0x01;

/// `bmRequestType` for AP to SVC messages
pub const SVC_REQUEST_TYPE: u8 =
    USB_DIR_OUT | USB_TYPE_VENDOR | USB_RECIP_INTERFACE;

/// Vendor request carrying a SVC message
pub const REQUEST_SVC: u8 = 0x01;

pub(crate) fn svc_setup() -> ControlSetup {
    ControlSetup {
        request_type: SVC_REQUEST_TYPE,
        request: REQUEST_SVC,
        value: 0,
        index: 0,
    }
}

impl<D: UsbDevice, H: HostHandler + 'static> HostInner<D, H> {
    /// Sends `msg` to the SVC, blocking until done or timed out.
    pub(crate) fn submit_svc(&self, msg: &SvcMsg) -> Result<()> {
        if self.detached.load(Ordering::Acquire) {
            return Err(Error::NoDevice);
        }

        let data = msg.to_bytes();
        trace!(
            "svc out: function {:#04x} type {:#04x}, {} byte body",
            msg.function,
            msg.typ,
            msg.body().len()
        );

        let r = self.dev.control_out(svc_setup(), &data).or(async {
            Timer::after(CONTROL_TIMEOUT).await;
            Err(Error::TimedOut)
        });

        match smol::block_on(r) {
            Ok(len) if len == data.len() => Ok(()),
            Ok(len) => {
                error!("svc out: short write, {len} of {} bytes", data.len());
                Err(Error::TxFailure)
            }
            Err(Error::TimedOut) => {
                error!("svc out: no response in {CONTROL_TIMEOUT_MS}ms");
                Err(Error::TimedOut)
            }
            Err(e) => {
                error!("svc out: failed to send message: {e}");
                Err(e)
            }
        }
    }
}
