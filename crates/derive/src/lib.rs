// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

/*!
# plctag-derive

macros for `plctag-core`, deriving `Decode`/`Encode` for structs of
`#[tag(offset = N)]` fields.

## Usage

please use it with [plctag](https://crates.io/crates/plctag)

```rust,ignore
use plctag_core::RawTag;
use plctag_derive::{Decode, Encode};

#[derive(Debug, Default, Decode, Encode)]
struct MyUDT {
    #[tag(offset = 0)]
    a: u32,
    #[tag(offset = 4)]
    b: u32,
}

let tag = RawTag::new("make=system&family=library&name=debug", 100).unwrap();
let udt: MyUDT = tag.get_value(0).unwrap();
```

## License

MIT
*/
#![warn(missing_docs)]

extern crate proc_macro;

mod decode_derive;
mod encode_derive;
mod shared;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// the macro derives `plctag_core::Decode` for you automatically.
///
/// ```rust,ignore
/// use plctag_core::RawTag;
/// use plctag_derive::{Decode, Encode};
///
/// #[derive(Debug, Default, Decode)]
/// struct MyUDT {
///    #[tag(offset = 0)]
///    a: u32,
///    #[tag(offset = 4)]
///    b: u32,
/// }
/// ```
#[proc_macro_derive(Decode, attributes(tag))]
pub fn decode_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    decode_derive::expand_tag_derive(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// the macro derives `plctag_core::Encode` for you automatically.
///
/// ```rust,ignore
/// use plctag_core::RawTag;
/// use plctag_derive::{Decode, Encode};
///
/// #[derive(Debug, Default, Encode)]
/// struct MyUDT {
///    #[tag(offset = 0)]
///    a: u32,
///    #[tag(offset = 4)]
///    b: u32,
/// }
/// ```
#[proc_macro_derive(Encode, attributes(tag))]
pub fn encode_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    encode_derive::expand_tag_derive(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
