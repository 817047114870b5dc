// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

/*!
# plctag-rs

a pure-rust plc tag engine speaking EtherNet/IP CIP, PCCC and Modbus TCP,
with rust style APIs and useful extensions.

## Features

- one tag model over ControlLogix/CompactLogix, Micro800, Omron NJ/NX,
  PLC/5, SLC 500, MicroLogix (including DH+ bridging) and Modbus TCP
- pooled PLC connections with automatic reconnect and ForwardOpen payload
  negotiation
- synchronous and asynchronous APIs, tag events, auto-sync read/write
- typed value access through `Decode`/`Encode`, with derive macros

## crates

- [`plctag-core`](plctag_core): the engine and the sync API
- [`plctag-async`]: tokio wrapper, behind the `async` feature
- [`plctag-derive`]: `Decode`/`Encode` derive macros, behind the `derive`
  feature

## Examples

```rust,no_run
use plctag::RawTag;

let path = "protocol=ab_eip&plc=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1";
let tag = RawTag::new(path, 100).unwrap();
let status = tag.read(100);
assert!(status.is_ok());
let value: u32 = tag.get_u32(0).unwrap();
println!("tag value: {}", value);
```

## License

MIT
*/

#[doc(inline)]
pub use plctag_core::*;
#[cfg(feature = "derive")]
#[doc(inline)]
pub use plctag_derive::{Decode, Encode};

#[cfg(feature = "async")]
#[doc(inline)]
pub use plctag_async as futures;
