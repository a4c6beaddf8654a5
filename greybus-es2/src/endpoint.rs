// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Endpoint discovery.
//!
//! The ES2 bridge has four endpoints:
//! - the default control pipe, for AP to SVC messages
//! - an interrupt IN endpoint, for SVC to AP messages
//! - a bulk IN endpoint, for CPort data in
//! - a bulk OUT endpoint, for CPort data out

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use enumset::{EnumSet, EnumSetType};
use greybus::{Error, Result};

use crate::transfer::{EndpointDescriptor, USB_EP0};

/// The role an endpoint plays for the bridge.
#[derive(EnumSetType, Debug)]
pub enum EndpointRole {
    /// AP to SVC messages, on the default pipe
    ControlOut,
    /// SVC to AP messages
    SvcIn,
    /// CPort data from the device
    CPortIn,
    /// CPort data to the device
    CPortOut,
}

impl EndpointRole {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ControlOut => "control",
            Self::SvcIn => "interrupt in",
            Self::CPortIn => "bulk in",
            Self::CPortOut => "bulk out",
        }
    }
}

/// Bound endpoint addresses for an attached bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub control: u8,
    pub svc_in: u8,
    /// Polling interval of the SVC interrupt endpoint
    pub svc_interval: u8,
    pub cport_in: u8,
    pub cport_out: u8,
}

impl Endpoints {
    /// Binds each role from the device's endpoint list.
    ///
    /// Unknown endpoint types are ignored. If an endpoint type appears more
    /// than once the first is used. Fails with
    /// [`Error::MissingEndpoint`] if a role has no endpoint.
    pub fn discover(descriptors: &[EndpointDescriptor]) -> Result<Self> {
        let mut eps = Self {
            control: USB_EP0,
            svc_in: 0,
            svc_interval: 0,
            cport_in: 0,
            cport_out: 0,
        };
        // The default pipe always exists
        let mut found = EnumSet::only(EndpointRole::ControlOut);

        for ep in descriptors {
            let role = if ep.is_int_in() {
                EndpointRole::SvcIn
            } else if ep.is_bulk_in() {
                EndpointRole::CPortIn
            } else if ep.is_bulk_out() {
                EndpointRole::CPortOut
            } else {
                warn!(
                    "Unknown endpoint type found, address {:#04x}",
                    ep.address
                );
                continue;
            };

            if found.contains(role) {
                warn!(
                    "Extra {} endpoint {:#04x} ignored",
                    role.name(),
                    ep.address
                );
                continue;
            }
            found |= role;

            match role {
                EndpointRole::SvcIn => {
                    eps.svc_in = ep.address;
                    eps.svc_interval = ep.interval;
                }
                EndpointRole::CPortIn => eps.cport_in = ep.address,
                EndpointRole::CPortOut => eps.cport_out = ep.address,
                EndpointRole::ControlOut => unreachable!(),
            }
        }

        let missing = EnumSet::all() - found;
        if let Some(role) = missing.iter().next() {
            error!("Not enough endpoints found in device, missing {missing:?}");
            return Err(Error::MissingEndpoint(role.name()));
        }
        debug!("bound endpoints {eps:x?}");
        Ok(eps)
    }
}
