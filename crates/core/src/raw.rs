// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

use crate::event::{Event, EventCallback};
use crate::tag::{self, TagId};
use crate::{registry, ErrorCode, Result, Status};
use std::thread;
use std::time::{Duration, Instant};

/// the tag handle
///
/// create one from an attribute string, then read, write and access the
/// tag buffer through the typed accessors. dropping the handle destroys
/// the tag: it is removed from the registry, any in-flight operation is
/// aborted and the `Destroyed` event fires last.
///
/// # Examples
/// ```rust,no_run
/// use plctag_core::RawTag;
///
/// let path = "protocol=ab_eip&plc=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1&elem_count=1";
/// let tag = RawTag::new(path, 100).unwrap();
/// let status = tag.status();
/// assert!(status.is_ok());
/// ```
#[derive(Debug)]
pub struct RawTag {
    tag_id: TagId,
}

impl RawTag {
    /// create a new tag from an attribute string.
    /// - blocking create (initial read included) if `timeout > 0`
    /// - non-blocking create if `timeout = 0`; poll [`status`](RawTag::status)
    pub fn new(path: impl AsRef<str>, timeout: u32) -> Result<Self> {
        let tag_id = tag::create(path.as_ref(), None, timeout)?;
        Ok(Self { tag_id })
    }

    /// create a new tag with an event callback installed before the
    /// initial read fires, so `Created` and the first `Read*` events are
    /// observable
    pub fn new_with_callback<F>(path: impl AsRef<str>, timeout: u32, callback: F) -> Result<Self>
    where
        F: FnMut(TagId, Event, Status) + Send + 'static,
    {
        let cb: EventCallback = Box::new(callback);
        let tag_id = tag::create(path.as_ref(), Some(cb), timeout)?;
        Ok(Self { tag_id })
    }

    /// tag id
    #[inline(always)]
    pub fn id(&self) -> TagId {
        self.tag_id
    }

    /// perform a read operation.
    /// - blocking read if timeout > 0
    /// - non-blocking read if timeout = 0
    #[inline(always)]
    pub fn read(&self, timeout: u32) -> Status {
        match registry::get(self.tag_id) {
            Some(core) => core.read(timeout),
            None => Status::Err(ErrorCode::NotFound),
        }
    }

    /// perform a write operation
    /// - blocking write if timeout > 0
    /// - non-blocking write if timeout = 0
    #[inline(always)]
    pub fn write(&self, timeout: u32) -> Status {
        match registry::get(self.tag_id) {
            Some(core) => core.write(timeout),
            None => Status::Err(ErrorCode::NotFound),
        }
    }

    /// abort the in-flight operation, if any
    #[inline(always)]
    pub fn abort(&self) -> Result<()> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.abort();
        Ok(())
    }

    /// poll tag status
    #[inline(always)]
    pub fn status(&self) -> Status {
        match registry::get(self.tag_id) {
            Some(core) => core.status(),
            None => Status::Err(ErrorCode::NotFound),
        }
    }

    /// wait until not pending, blocking
    /// # Note
    /// only for simple use cases
    pub fn wait(&self, timeout: Option<Duration>) -> Status {
        let start = Instant::now();
        loop {
            if let Some(v) = timeout {
                if start.elapsed() > v {
                    return Status::err_timeout();
                }
            }
            let status = self.status();
            if !status.is_pending() {
                return status;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// tag size in bytes
    #[inline(always)]
    pub fn size(&self) -> Result<u32> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        Ok(core.with_state(|state| state.data.len() as u32))
    }

    /// resize the tag buffer, returns the old size. mostly useful for
    /// `@raw` tags before a pass-through request
    pub fn set_size(&self, size: u32) -> Result<u32> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        Ok(core.with_state(|state| {
            let old = state.data.len() as u32;
            state.data.resize(size as usize, 0);
            old
        }))
    }

    /// element size
    #[inline(always)]
    pub fn elem_size(&self) -> Result<i32> {
        self.get_attr("elem_size", 0)
    }

    /// element count
    #[inline(always)]
    pub fn elem_count(&self) -> Result<i32> {
        self.get_attr("elem_count", 0)
    }

    /// get tag attribute
    pub fn get_attr(&self, attr: impl AsRef<str>, default_value: i32) -> Result<i32> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        Ok(core.get_int_attr(attr.as_ref()).unwrap_or(default_value))
    }

    /// set tag attribute
    pub fn set_attr(&self, attr: impl AsRef<str>, value: i32) -> Result<()> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.set_int_attr(attr.as_ref(), value)
    }

    /// lock the tag for a client-side compound operation; pair with
    /// [`unlock`](RawTag::unlock)
    pub fn lock(&self) -> Result<()> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.lock_external();
        Ok(())
    }

    /// release the client-side lock
    pub fn unlock(&self) -> Result<()> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.unlock_external()
    }

    /// install the event callback, replacing any previous one
    pub fn register_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(TagId, Event, Status) + Send + 'static,
    {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.set_callback(Some(Box::new(callback)));
        Ok(())
    }

    /// remove the event callback
    pub fn unregister_callback(&self) -> Result<()> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.set_callback(None);
        Ok(())
    }

    /// get bit value. on a bit-selected tag the tag's own bit is read and
    /// `bit_offset` is ignored
    pub fn get_bit(&self, bit_offset: u32) -> Result<bool> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let bit = state.bit.map(|b| b as u32).unwrap_or(bit_offset) as usize;
            let byte = state
                .data
                .get(bit / 8)
                .copied()
                .ok_or(Status::Err(ErrorCode::OutOfBounds))?;
            Ok(byte & (1 << (bit % 8)) != 0)
        })
    }

    /// set bit value. on a bit-selected tag the tag's own bit is written
    pub fn set_bit(&self, bit_offset: u32, value: bool) -> Result<()> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let bit = state.bit.map(|b| b as u32).unwrap_or(bit_offset) as usize;
            let byte = state
                .data
                .get_mut(bit / 8)
                .ok_or(Status::Err(ErrorCode::OutOfBounds))?;
            if value {
                *byte |= 1 << (bit % 8);
            } else {
                *byte &= !(1 << (bit % 8));
            }
            state.dirty = true;
            Ok(())
        })
    }

    /// get bool value
    #[inline(always)]
    pub fn get_bool(&self, byte_offset: u32) -> Result<bool> {
        let value = self.get_u8(byte_offset)?;
        Ok(value > 0)
    }

    /// set bool value
    #[inline(always)]
    pub fn set_bool(&self, byte_offset: u32, value: bool) -> Result<()> {
        self.set_u8(byte_offset, if value { 1 } else { 0 })
    }

    /// copy out raw bytes starting at `byte_offset`; returns the number
    /// of bytes copied
    pub fn get_bytes(&self, byte_offset: u32, buf: &mut [u8]) -> Result<usize> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let offset = byte_offset as usize;
            if offset > state.data.len() {
                return Err(Status::Err(ErrorCode::OutOfBounds));
            }
            let n = buf.len().min(state.data.len() - offset);
            buf[..n].copy_from_slice(&state.data[offset..offset + n]);
            Ok(n)
        })
    }

    /// copy raw bytes into the tag buffer starting at `byte_offset`
    pub fn set_bytes(&self, byte_offset: u32, buf: &[u8]) -> Result<()> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let offset = byte_offset as usize;
            if offset + buf.len() > state.data.len() {
                return Err(Status::Err(ErrorCode::OutOfBounds));
            }
            state.data[offset..offset + buf.len()].copy_from_slice(buf);
            state.dirty = true;
            Ok(())
        })
    }

    /// string character count at `byte_offset`
    pub fn get_string_length(&self, byte_offset: u32) -> Result<u32> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let order = state.byte_order.clone();
            order
                .string_length(&state.data, byte_offset as usize)
                .map(|v| v as u32)
        })
    }

    /// string character capacity at `byte_offset`
    pub fn get_string_capacity(&self, byte_offset: u32) -> Result<u32> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let order = state.byte_order.clone();
            order
                .string_capacity(&state.data, byte_offset as usize)
                .map(|v| v as u32)
        })
    }

    /// full on-wire string footprint at `byte_offset`
    pub fn get_string_total_length(&self, byte_offset: u32) -> Result<u32> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let order = state.byte_order.clone();
            order
                .string_total_length(&state.data, byte_offset as usize)
                .map(|v| v as u32)
        })
    }

    /// extract the string at `byte_offset`
    pub fn get_string(&self, byte_offset: u32) -> Result<String> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let order = state.byte_order.clone();
            let bytes = order.get_string(&state.data, byte_offset as usize)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
    }

    /// store a string at `byte_offset`
    pub fn set_string(&self, byte_offset: u32, value: impl AsRef<str>) -> Result<()> {
        let core = registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
        core.with_state(|state| {
            let order = state.byte_order.clone();
            order.set_string(&mut state.data, byte_offset as usize, value.as_ref().as_bytes())?;
            state.dirty = true;
            Ok(())
        })
    }
}

macro_rules! accessor_impl {
    ($get:ident, $set:ident, $ty:ty) => {
        impl RawTag {
            /// get scalar value at `byte_offset`, honoring the tag byte order
            #[inline(always)]
            pub fn $get(&self, byte_offset: u32) -> Result<$ty> {
                let core =
                    registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
                core.with_state(|state| {
                    let order = state.byte_order.clone();
                    order.$get(&state.data, byte_offset as usize)
                })
            }

            /// set scalar value at `byte_offset`, honoring the tag byte order
            #[inline(always)]
            pub fn $set(&self, byte_offset: u32, value: $ty) -> Result<()> {
                let core =
                    registry::get(self.tag_id).ok_or(Status::Err(ErrorCode::NotFound))?;
                core.with_state(|state| {
                    let order = state.byte_order.clone();
                    order.$set(&mut state.data, byte_offset as usize, value)?;
                    state.dirty = true;
                    Ok(())
                })
            }
        }
    };
}

accessor_impl!(get_i8, set_i8, i8);
accessor_impl!(get_u8, set_u8, u8);
accessor_impl!(get_i16, set_i16, i16);
accessor_impl!(get_u16, set_u16, u16);
accessor_impl!(get_i32, set_i32, i32);
accessor_impl!(get_u32, set_u32, u32);
accessor_impl!(get_i64, set_i64, i64);
accessor_impl!(get_u64, set_u64, u64);
accessor_impl!(get_f32, set_f32, f32);
accessor_impl!(get_f64, set_f64, f64);

#[cfg(feature = "value")]
impl RawTag {
    /// get value at `byte_offset` through the [`Decode`](crate::Decode) trait
    #[inline]
    pub fn get_value<T: crate::Decode>(&self, byte_offset: u32) -> Result<T> {
        T::decode(self, byte_offset)
    }

    /// set value at `byte_offset` through the [`Encode`](crate::Encode) trait
    #[inline]
    pub fn set_value<T: crate::Encode>(&self, byte_offset: u32, value: T) -> Result<()> {
        value.encode(self, byte_offset)
    }
}

impl Drop for RawTag {
    fn drop(&mut self) {
        if let Err(e) = tag::destroy(self.tag_id) {
            log::warn!("destroy of tag {} failed: {}", self.tag_id.value(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_debug_tag() {
        let tag = RawTag::new("make=system&family=library&name=debug&debug=4", 100).unwrap();
        let status = tag.status();
        assert!(status.is_ok());
        assert!(tag.read(100).is_ok());
        assert_eq!(tag.get_u32(0).unwrap(), 4);

        tag.set_u32(0, 1).unwrap();
        assert!(tag.write(100).is_ok());
        assert!(tag.read(100).is_ok());
        assert_eq!(tag.get_u32(0).unwrap(), 1);
        crate::debug::set_debug_level(crate::DebugLevel::None);
    }

    #[test]
    fn test_system_version_tag() {
        let tag = RawTag::new("make=system&family=library&name=version", 100).unwrap();
        assert!(tag.read(100).is_ok());
        let (major, _, _) = crate::lib_version();
        assert_eq!(tag.get_u32(0).unwrap(), major);
        assert_eq!(tag.size().unwrap(), 12);
        assert_eq!(tag.elem_count().unwrap(), 3);
        // read-only
        assert!(tag.write(100).is_err());
    }

    #[test]
    fn test_unknown_tag_id() {
        let tag = RawTag {
            tag_id: TagId(0x0FFF_FFF0),
        };
        assert!(tag.status().is_err());
        assert!(tag.read(10).is_err());
        std::mem::forget(tag);
    }

    #[test]
    fn test_lock_unlock() {
        let tag = RawTag::new("make=system&family=library&name=debug", 100).unwrap();
        tag.lock().unwrap();
        tag.unlock().unwrap();
        // double unlock reports an error
        assert!(tag.unlock().is_err());
    }

    #[test]
    fn test_bad_config_rejected() {
        assert!(RawTag::new("protocol=nope&name=x", 100).is_err());
        assert!(RawTag::new("protocol=ab_eip&name=x", 100).is_err()); // no plc/gateway
        assert!(RawTag::new("make=system&family=library&name=nope", 100).is_err());
    }
}
