// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Greybus ES2 USB bridge host driver
//!
//! The ES2 bridge carries Greybus CPort traffic between an AP and a
//! UniPro network over USB. CPort data is multiplexed over one bulk
//! endpoint in each direction, prefixed with a single CPort ID byte.
//! SVC messages arrive on an interrupt endpoint and are sent with a
//! vendor request on the default control pipe.
//!
//! An [`Es2Host`] is attached to a [`UsbDevice`] and passes received data
//! up to a [`HostHandler`](greybus::HostHandler). It implements
//! [`HostDriver`](greybus::HostDriver) for the Greybus core to send with.
//!
//! [`sim::SimBridge`] is an in-memory device for tests.

#![forbid(unsafe_code)]

#[allow(unused)]
use log::{debug, error, info, trace, warn};

pub mod config;
pub mod control;
mod endpoint;
mod host;
mod inbound;
mod pool;
pub mod sim;
pub mod transfer;

pub use endpoint::{EndpointRole, Endpoints};
pub use host::{Es2Host, HostStats};
pub use transfer::{
    ControlSetup, EndpointDescriptor, Rejected, Transfer, TransferId,
    TransferType, UsbDevice,
};
