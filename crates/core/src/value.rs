// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

use crate::{RawTag, Result};
use paste::paste;

macro_rules! value_impl {
    ($type: ident) => {
        paste! {
            impl Decode for $type {
                #[inline]
                fn decode(tag: &RawTag, offset: u32) -> Result<Self> {
                    let v = tag.[<get_ $type>](offset)?;
                    Ok(v)
                }
            }
            impl Encode for $type {
                #[inline]
                fn encode(&self, tag: &RawTag, offset: u32) -> Result<()> {
                    tag.[<set_ $type>](offset, *self)
                }
            }
        }
    };
}

/// this trait abstracts tag value.
/// you can use the trait to implement your UDT.
///
/// # Examples
/// with this trait, you can simply get or set tag value
/// ```rust,ignore
/// use plctag_core::{RawTag, Decode, Encode};
/// let timeout = 100;//ms
/// let path="protocol=ab_eip&plc=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1&elem_count=1";// YOUR TAG DEFINITION
/// let tag = RawTag::new(path, timeout).unwrap();
///
/// //read tag
/// tag.read(timeout);
/// let offset = 0;
/// let value:u16 = tag.get_value(offset).unwrap();
/// println!("tag value: {}", value);
///
/// let value = value + 10;
/// tag.set_value(offset, value).unwrap();
///
/// //write tag
/// tag.write(timeout);
/// println!("write done!");
/// ```
///
/// # UDT
/// ```rust,ignore
/// use plctag_core::{Decode, Encode, RawTag, Result};
///
/// // define your UDT
/// #[derive(Default)]
/// struct MyUDT {
///     v1: u16,
///     v2: u16,
/// }
/// impl Decode for MyUDT {
///     fn decode(tag: &RawTag, offset: u32) -> Result<Self> {
///         let v1 = u16::decode(tag, offset)?;
///         let v2 = u16::decode(tag, offset + 2)?;
///         Ok(MyUDT { v1, v2 })
///     }
/// }
/// impl Encode for MyUDT {
///     fn encode(&self, tag: &RawTag, offset: u32) -> Result<()> {
///         self.v1.encode(tag, offset)?;
///         self.v2.encode(tag, offset + 2)?;
///         Ok(())
///     }
/// }
/// ```
///
/// Note:
/// Do not perform expensive operations when you derive [`Decode`] or [`Encode`].
pub trait Decode: Sized {
    /// get value at specified byte offset
    fn decode(tag: &RawTag, offset: u32) -> Result<Self>;

    #[doc(hidden)]
    fn decode_in_place(tag: &RawTag, offset: u32, place: &mut Self) -> Result<()> {
        *place = Decode::decode(tag, offset)?;
        Ok(())
    }
}

/// see [`Decode`]
pub trait Encode {
    /// set value at specified byte offset
    fn encode(&self, tag: &RawTag, offset: u32) -> Result<()>;
}

value_impl!(bool);
value_impl!(i8);
value_impl!(u8);
value_impl!(i16);
value_impl!(u16);
value_impl!(i32);
value_impl!(u32);
value_impl!(i64);
value_impl!(u64);
value_impl!(f32);
value_impl!(f64);

impl<T: Decode> Decode for Option<T> {
    #[inline]
    fn decode(tag: &RawTag, offset: u32) -> Result<Self> {
        let v = T::decode(tag, offset)?;
        Ok(Some(v))
    }
}

impl<T: Encode> Encode for Option<T> {
    #[inline]
    fn encode(&self, tag: &RawTag, offset: u32) -> Result<()> {
        if let Some(ref v) = self {
            v.encode(tag, offset)?;
        }
        Ok(())
    }
}

impl Encode for String {
    #[inline]
    fn encode(&self, tag: &RawTag, offset: u32) -> Result<()> {
        tag.set_string(offset, self)
    }
}

impl Decode for String {
    #[inline]
    fn decode(tag: &RawTag, offset: u32) -> Result<Self> {
        tag.get_string(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_roundtrip_on_system_tag() {
        let tag = RawTag::new("make=system&family=library&name=debug", 100).unwrap();
        tag.set_value(0, 2u32).unwrap();
        let v: u32 = tag.get_value(0).unwrap();
        assert_eq!(v, 2);
        let v: Option<u32> = tag.get_value(0).unwrap();
        assert_eq!(v, Some(2));
        crate::debug::set_debug_level(crate::DebugLevel::None);
    }
}
