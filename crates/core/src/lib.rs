// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

/*!
# plctag-core

a pure-rust plc tag engine: one tag model over EtherNet/IP CIP
(ControlLogix, CompactLogix, Micro800, Omron NJ/NX), PCCC (PLC/5, SLC 500,
MicroLogix, Logix in PCCC mode, DH+ bridging) and Modbus TCP.

## How to use

create a [`RawTag`] from an attribute string, then read, write and access
the buffer through the typed accessors:

```rust,no_run
use plctag_core::RawTag;

let path = "protocol=ab_eip&plc=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1";
let tag = RawTag::new(path, 100).unwrap();
let status = tag.read(100);
assert!(status.is_ok());
let value: u32 = tag.get_u32(0).unwrap();
println!("tag value: {}", value);
```

PLC connections are pooled per `(gateway, path, connection_group_id,
protocol family)` and run on their own threads; a background tickler
drives auto-sync reads/writes and dispatches tag events.

## Logging

the engine logs through crate `log`. the `debug` attribute (or
[`set_debug_level`]) additionally gates packet dumps.

## License

MIT
*/
#![warn(missing_docs)]

extern crate byteorder;
#[macro_use]
extern crate log;
extern crate once_cell;
extern crate parking_lot;
extern crate rand;

mod ab;
mod attr;
#[cfg(feature = "builder")]
pub mod builder;
mod byte_order;
mod debug;
mod event;
mod mb;
mod plc;
mod raw;
mod registry;
mod session;
mod sock;
mod status;
mod system;
mod tag;
#[cfg(feature = "value")]
mod value;

/// plctag result
pub type Result<T> = std::result::Result<T, Status>;

pub use byte_order::ByteOrder;
pub use debug::{get_debug_level, set_debug_level, DebugLevel};
pub use event::Event;
pub use raw::RawTag;
pub use registry::shutdown;
pub use status::{ErrorCode, Status, STATUS_OK, STATUS_PENDING};
pub use tag::TagId;

#[cfg(feature = "value")]
pub use value::{Decode, Encode};

/// library version triple, from the crate version
pub fn lib_version() -> (u32, u32, u32) {
    let mut parts = env!("CARGO_PKG_VERSION")
        .split('.')
        .map(|p| p.parse().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
