// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! Allen-Bradley EtherNet/IP backends
//!
//! layering, bottom up: [`eip`] frames TCP into EIP encapsulation packets,
//! [`cip`] builds and parses CIP service requests (including connection
//! management and the Multiple Service Packet), [`pccc`] handles the legacy
//! PCCC command set for PLC/5, SLC and MicroLogix. [`tag`] and [`pccc_tag`]
//! are the per-tag backends driving those codecs.

pub(crate) mod cip;
pub(crate) mod eip;
pub(crate) mod pccc;
pub(crate) mod pccc_tag;
pub(crate) mod tag;

/// vendor id reported in ForwardOpen and PCCC Execute request ids
pub(crate) const VENDOR_ID: u16 = 0xF33D;
