// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

use plctag_core::RawTag;
use plctag_derive::{Decode, Encode};

#[derive(Debug, Default, Decode, Encode)]
struct LibVersion {
    #[tag(offset = 0)]
    major: u32,
    #[tag(offset = 4)]
    minor: u32,
    #[tag(offset = 8)]
    patch: u32,
}

#[test]
fn test_derive() {
    let tag = RawTag::new("make=system&family=library&name=version", 100).unwrap();
    let res = tag.read(100);
    assert!(res.is_ok());
    let version: LibVersion = tag.get_value(0).unwrap();
    let (major, minor, patch) = plctag_core::lib_version();
    assert_eq!(version.major, major);
    assert_eq!(version.minor, minor);
    assert_eq!(version.patch, patch);
}
