// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

use core::convert::From;
use std::sync::atomic::{AtomicU8, Ordering};

/// provides debugging output when enabled
#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum DebugLevel {
    /// 0 - disables debugging output
    None,
    /// 1 - only output errors. Generally these are fatal to the functioning of the library
    Error,
    /// 2 - outputs warnings such as error found when checking a malformed tag attribute string or when unexpected problems are reported from the PLC
    Warn,
    /// 3 - outputs diagnostic information about the internal calls within the library. Includes some packet dumps
    Info,
    /// 4 - outputs detailed diagnostic information about the code executing within the library including packet dumps
    Detail,
    /// 5 - outputs extremely detailed information. Do not use this unless you are trying to debug detailed information about every mutex lock and release. Will output many lines of output per millisecond. You have been warned!
    Spew,
}

impl From<u8> for DebugLevel {
    #[inline]
    fn from(val: u8) -> DebugLevel {
        match val {
            0 => DebugLevel::None,
            1 => DebugLevel::Error,
            2 => DebugLevel::Warn,
            3 => DebugLevel::Info,
            4 => DebugLevel::Detail,
            5 => DebugLevel::Spew,
            _ => DebugLevel::None,
        }
    }
}

static DEBUG_LEVEL: AtomicU8 = AtomicU8::new(0);

/// set the library debug level; messages are emitted through crate `log`
#[inline]
pub fn set_debug_level(level: DebugLevel) {
    DEBUG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// retrieve the library debug level
#[inline]
pub fn get_debug_level() -> DebugLevel {
    DEBUG_LEVEL.load(Ordering::Relaxed).into()
}

/// true when packet dumps should be emitted
#[inline]
pub(crate) fn dump_packets() -> bool {
    get_debug_level() >= DebugLevel::Detail
}

/// hex-format a byte slice for packet dump logging
pub(crate) fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(if i % 16 == 0 { '\n' } else { ' ' });
        }
        out.push_str(&format!("{:02x}", b));
    }
    out
}
