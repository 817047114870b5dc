// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! numeric and string byte-order descriptors
//!
//! every scalar accessor on a tag goes through a [`ByteOrder`] record.
//! permutation arrays give, for each buffer position, which byte of the
//! little-endian value lives there; `[0,1]` is plain little-endian and
//! `[1,0]` big-endian. string layout is described by the `str_*` fields.
//! each PLC family ships a default descriptor; attribute strings may
//! override individual pieces per tag.

use crate::attr::AttributeMap;
use crate::{ErrorCode, Result, Status};

/// byte-order descriptor for scalars and strings on one tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteOrder {
    pub(crate) int16: [u8; 2],
    pub(crate) int32: [u8; 4],
    pub(crate) int64: [u8; 8],
    pub(crate) float32: [u8; 4],
    pub(crate) float64: [u8; 8],

    pub(crate) str_is_defined: bool,
    pub(crate) str_is_counted: bool,
    pub(crate) str_is_fixed_length: bool,
    pub(crate) str_is_zero_terminated: bool,
    /// odd/even character swap within 16-bit words (PLC/5 strings)
    pub(crate) str_is_byte_swapped: bool,
    /// width of the leading count word: 0, 1, 2, 4 or 8 bytes
    pub(crate) str_count_word_bytes: usize,
    /// maximum character capacity; 0 means bounded only by the buffer
    pub(crate) str_max_capacity: usize,
    /// full on-wire footprint for fixed-length strings; 0 if dynamic
    pub(crate) str_total_length: usize,
    /// trailing pad bytes after the character data
    pub(crate) str_pad_bytes: usize,
}

/// Logix-class default: little-endian scalars, 82-char counted+padded strings
pub(crate) const LOGIX: ByteOrder = ByteOrder {
    int16: [0, 1],
    int32: [0, 1, 2, 3],
    int64: [0, 1, 2, 3, 4, 5, 6, 7],
    float32: [0, 1, 2, 3],
    float64: [0, 1, 2, 3, 4, 5, 6, 7],
    str_is_defined: true,
    str_is_counted: true,
    str_is_fixed_length: true,
    str_is_zero_terminated: false,
    str_is_byte_swapped: false,
    str_count_word_bytes: 4,
    str_max_capacity: 82,
    str_total_length: 88,
    str_pad_bytes: 2,
};

/// PLC/5, SLC and MicroLogix default: word-swapped floats, byte-swapped strings
pub(crate) const PCCC: ByteOrder = ByteOrder {
    int16: [0, 1],
    int32: [0, 1, 2, 3],
    int64: [0, 1, 2, 3, 4, 5, 6, 7],
    float32: [2, 3, 0, 1],
    float64: [0, 1, 2, 3, 4, 5, 6, 7],
    str_is_defined: true,
    str_is_counted: true,
    str_is_fixed_length: true,
    str_is_zero_terminated: false,
    str_is_byte_swapped: true,
    str_count_word_bytes: 2,
    str_max_capacity: 82,
    str_total_length: 84,
    str_pad_bytes: 0,
};

/// Omron NJ/NX default: little-endian, zero-terminated counted strings
pub(crate) const OMRON: ByteOrder = ByteOrder {
    int16: [0, 1],
    int32: [0, 1, 2, 3],
    int64: [0, 1, 2, 3, 4, 5, 6, 7],
    float32: [0, 1, 2, 3],
    float64: [0, 1, 2, 3, 4, 5, 6, 7],
    str_is_defined: true,
    str_is_counted: true,
    str_is_fixed_length: false,
    str_is_zero_terminated: true,
    str_is_byte_swapped: false,
    str_count_word_bytes: 2,
    str_max_capacity: 0,
    str_total_length: 0,
    str_pad_bytes: 0,
};

/// Modbus default: straight big-endian registers
pub(crate) const MODBUS: ByteOrder = ByteOrder {
    int16: [1, 0],
    int32: [3, 2, 1, 0],
    int64: [7, 6, 5, 4, 3, 2, 1, 0],
    float32: [3, 2, 1, 0],
    float64: [7, 6, 5, 4, 3, 2, 1, 0],
    str_is_defined: false,
    str_is_counted: false,
    str_is_fixed_length: false,
    str_is_zero_terminated: false,
    str_is_byte_swapped: false,
    str_count_word_bytes: 0,
    str_max_capacity: 0,
    str_total_length: 0,
    str_pad_bytes: 0,
};

/// in-process system tags: host-native layout
pub(crate) const HOST: ByteOrder = ByteOrder {
    int16: [0, 1],
    int32: [0, 1, 2, 3],
    int64: [0, 1, 2, 3, 4, 5, 6, 7],
    float32: [0, 1, 2, 3],
    float64: [0, 1, 2, 3, 4, 5, 6, 7],
    str_is_defined: false,
    str_is_counted: false,
    str_is_fixed_length: false,
    str_is_zero_terminated: false,
    str_is_byte_swapped: false,
    str_count_word_bytes: 0,
    str_max_capacity: 0,
    str_total_length: 0,
    str_pad_bytes: 0,
};

fn parse_permutation<const N: usize>(value: &str) -> Result<[u8; N]> {
    let bytes = value.as_bytes();
    if bytes.len() != N {
        log::warn!("byte order \"{}\" must have {} digits", value, N);
        return Err(Status::Err(ErrorCode::BadParam));
    }
    let mut out = [0u8; N];
    let mut seen = [false; N];
    for (i, b) in bytes.iter().enumerate() {
        let digit = b.wrapping_sub(b'0') as usize;
        if digit >= N || seen[digit] {
            log::warn!("byte order \"{}\" is not a permutation of 0..{}", value, N);
            return Err(Status::Err(ErrorCode::BadParam));
        }
        seen[digit] = true;
        out[i] = digit as u8;
    }
    Ok(out)
}

#[inline]
fn check_bounds(buf: &[u8], offset: usize, width: usize) -> Result<()> {
    if offset + width > buf.len() {
        return Err(Status::Err(ErrorCode::OutOfBounds));
    }
    Ok(())
}

fn decode<const N: usize>(perm: &[u8; N], buf: &[u8], offset: usize) -> Result<[u8; N]> {
    check_bounds(buf, offset, N)?;
    let mut le = [0u8; N];
    for i in 0..N {
        le[perm[i] as usize] = buf[offset + i];
    }
    Ok(le)
}

fn encode<const N: usize>(perm: &[u8; N], buf: &mut [u8], offset: usize, le: [u8; N]) -> Result<()> {
    check_bounds(buf, offset, N)?;
    for i in 0..N {
        buf[offset + i] = le[perm[i] as usize];
    }
    Ok(())
}

macro_rules! scalar_impl {
    ($get:ident, $set:ident, $ty:ty, $perm:ident) => {
        pub(crate) fn $get(&self, buf: &[u8], offset: usize) -> Result<$ty> {
            let le = decode(&self.$perm, buf, offset)?;
            Ok(<$ty>::from_le_bytes(le))
        }

        pub(crate) fn $set(&self, buf: &mut [u8], offset: usize, value: $ty) -> Result<()> {
            encode(&self.$perm, buf, offset, value.to_le_bytes())
        }
    };
}

impl ByteOrder {
    /// apply attribute-string overrides on top of a family default.
    /// returns the (possibly identical) effective descriptor.
    pub(crate) fn from_attrs(base: &ByteOrder, attrs: &AttributeMap) -> Result<ByteOrder> {
        let mut order = base.clone();
        if let Some(v) = attrs.get("int16_byte_order") {
            order.int16 = parse_permutation(v)?;
        }
        if let Some(v) = attrs.get("int32_byte_order") {
            order.int32 = parse_permutation(v)?;
        }
        if let Some(v) = attrs.get("int64_byte_order") {
            order.int64 = parse_permutation(v)?;
        }
        if let Some(v) = attrs.get("float32_byte_order") {
            order.float32 = parse_permutation(v)?;
        }
        if let Some(v) = attrs.get("float64_byte_order") {
            order.float64 = parse_permutation(v)?;
        }
        let mut str_touched = false;
        if attrs.get("str_is_counted").is_some() {
            order.str_is_counted = attrs.get_bool("str_is_counted", false)?;
            str_touched = true;
        }
        if attrs.get("str_is_fixed_length").is_some() {
            order.str_is_fixed_length = attrs.get_bool("str_is_fixed_length", false)?;
            str_touched = true;
        }
        if attrs.get("str_is_zero_terminated").is_some() {
            order.str_is_zero_terminated = attrs.get_bool("str_is_zero_terminated", false)?;
            str_touched = true;
        }
        if attrs.get("str_is_byte_swapped").is_some() {
            order.str_is_byte_swapped = attrs.get_bool("str_is_byte_swapped", false)?;
            str_touched = true;
        }
        if attrs.get("str_count_word_bytes").is_some() {
            let v: usize = attrs.get_int("str_count_word_bytes", 0usize)?;
            if !matches!(v, 0 | 1 | 2 | 4 | 8) {
                log::warn!("str_count_word_bytes must be one of 0,1,2,4,8, got {}", v);
                return Err(Status::Err(ErrorCode::BadParam));
            }
            order.str_count_word_bytes = v;
            str_touched = true;
        }
        if attrs.get("str_max_capacity").is_some() {
            order.str_max_capacity = attrs.get_int("str_max_capacity", 0usize)?;
            str_touched = true;
        }
        if attrs.get("str_total_length").is_some() {
            order.str_total_length = attrs.get_int("str_total_length", 0usize)?;
            str_touched = true;
        }
        if attrs.get("str_pad_bytes").is_some() {
            order.str_pad_bytes = attrs.get_int("str_pad_bytes", 0usize)?;
            str_touched = true;
        }
        if str_touched {
            order.str_is_defined = true;
            if order.str_is_counted && order.str_count_word_bytes == 0 {
                log::warn!("counted strings need str_count_word_bytes > 0");
                return Err(Status::Err(ErrorCode::BadParam));
            }
        }
        Ok(order)
    }

    scalar_impl!(get_i16, set_i16, i16, int16);
    scalar_impl!(get_u16, set_u16, u16, int16);
    scalar_impl!(get_i32, set_i32, i32, int32);
    scalar_impl!(get_u32, set_u32, u32, int32);
    scalar_impl!(get_i64, set_i64, i64, int64);
    scalar_impl!(get_u64, set_u64, u64, int64);
    scalar_impl!(get_f32, set_f32, f32, float32);
    scalar_impl!(get_f64, set_f64, f64, float64);

    pub(crate) fn get_u8(&self, buf: &[u8], offset: usize) -> Result<u8> {
        check_bounds(buf, offset, 1)?;
        Ok(buf[offset])
    }

    pub(crate) fn set_u8(&self, buf: &mut [u8], offset: usize, value: u8) -> Result<()> {
        check_bounds(buf, offset, 1)?;
        buf[offset] = value;
        Ok(())
    }

    pub(crate) fn get_i8(&self, buf: &[u8], offset: usize) -> Result<i8> {
        Ok(self.get_u8(buf, offset)? as i8)
    }

    pub(crate) fn set_i8(&self, buf: &mut [u8], offset: usize, value: i8) -> Result<()> {
        self.set_u8(buf, offset, value as u8)
    }

    fn require_string(&self) -> Result<()> {
        if !self.str_is_defined {
            return Err(Status::Err(ErrorCode::Unsupported));
        }
        Ok(())
    }

    /// read the count word, sized per `str_count_word_bytes`
    fn read_count_word(&self, buf: &[u8], offset: usize) -> Result<usize> {
        let v = match self.str_count_word_bytes {
            1 => self.get_u8(buf, offset)? as usize,
            2 => self.get_u16(buf, offset)? as usize,
            4 => self.get_u32(buf, offset)? as usize,
            8 => self.get_u64(buf, offset)? as usize,
            _ => 0,
        };
        Ok(v)
    }

    fn write_count_word(&self, buf: &mut [u8], offset: usize, count: usize) -> Result<()> {
        match self.str_count_word_bytes {
            1 => self.set_u8(buf, offset, count as u8),
            2 => self.set_u16(buf, offset, count as u16),
            4 => self.set_u32(buf, offset, count as u32),
            8 => self.set_u64(buf, offset, count as u64),
            _ => Ok(()),
        }
    }

    /// character capacity of a string at `offset`
    pub(crate) fn string_capacity(&self, buf: &[u8], offset: usize) -> Result<usize> {
        self.require_string()?;
        if self.str_max_capacity > 0 {
            return Ok(self.str_max_capacity);
        }
        let used = offset + self.str_count_word_bytes;
        if used > buf.len() {
            return Err(Status::Err(ErrorCode::OutOfBounds));
        }
        let mut cap = buf.len() - used;
        if self.str_is_zero_terminated {
            cap = cap.saturating_sub(1);
        }
        Ok(cap)
    }

    /// current character count of a string at `offset`
    pub(crate) fn string_length(&self, buf: &[u8], offset: usize) -> Result<usize> {
        self.require_string()?;
        let cap = self.string_capacity(buf, offset)?;
        if self.str_is_counted {
            let count = self.read_count_word(buf, offset)?;
            return Ok(count.min(cap));
        }
        // zero-terminated or capacity-bounded
        let start = offset + self.str_count_word_bytes;
        let mut len = 0;
        while len < cap {
            let b = self.get_u8(buf, start + len)?;
            if self.str_is_zero_terminated && b == 0 {
                break;
            }
            len += 1;
        }
        Ok(len)
    }

    /// full on-wire footprint of the string at `offset`
    pub(crate) fn string_total_length(&self, buf: &[u8], offset: usize) -> Result<usize> {
        self.require_string()?;
        if self.str_is_fixed_length && self.str_total_length > 0 {
            return Ok(self.str_total_length);
        }
        let len = self.string_length(buf, offset)?;
        let term = if self.str_is_zero_terminated { 1 } else { 0 };
        Ok(self.str_count_word_bytes + len + term + self.str_pad_bytes)
    }

    #[inline]
    fn swapped_index(&self, i: usize) -> usize {
        if self.str_is_byte_swapped {
            i ^ 1
        } else {
            i
        }
    }

    /// extract string characters at `offset`
    pub(crate) fn get_string(&self, buf: &[u8], offset: usize) -> Result<Vec<u8>> {
        let len = self.string_length(buf, offset)?;
        let start = offset + self.str_count_word_bytes;
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(self.get_u8(buf, start + self.swapped_index(i))?);
        }
        Ok(out)
    }

    /// store string characters at `offset`, zero-filling up to capacity
    pub(crate) fn set_string(&self, buf: &mut [u8], offset: usize, value: &[u8]) -> Result<()> {
        let cap = self.string_capacity(buf, offset)?;
        if value.len() > cap {
            return Err(Status::Err(ErrorCode::TooLarge));
        }
        if self.str_is_counted {
            self.write_count_word(buf, offset, value.len())?;
        }
        let start = offset + self.str_count_word_bytes;
        // fill the whole capacity so stale characters and the terminator
        // are always consistent
        let fill = cap.min(buf.len().saturating_sub(start));
        for i in 0..fill {
            let b = if i < value.len() { value[i] } else { 0 };
            self.set_u8(buf, start + self.swapped_index(i), b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_validation() {
        assert_eq!(parse_permutation::<2>("10").unwrap(), [1, 0]);
        assert_eq!(parse_permutation::<4>("2301").unwrap(), [2, 3, 0, 1]);
        assert!(parse_permutation::<2>("12").is_err());
        assert!(parse_permutation::<2>("00").is_err());
        assert!(parse_permutation::<4>("012").is_err());
        assert!(parse_permutation::<8>("01234567").is_ok());
    }

    #[test]
    fn test_scalar_roundtrip_le() {
        let order = LOGIX.clone();
        let mut buf = vec![0u8; 16];
        order.set_i32(&mut buf, 0, -123456).unwrap();
        assert_eq!(order.get_i32(&buf, 0).unwrap(), -123456);
        order.set_f64(&mut buf, 4, 3.25f64).unwrap();
        assert_eq!(order.get_f64(&buf, 4).unwrap(), 3.25);
        assert_eq!(&buf[0..4], &(-123456i32).to_le_bytes());
    }

    #[test]
    fn test_scalar_big_endian() {
        let order = MODBUS.clone();
        let mut buf = vec![0u8; 4];
        order.set_u16(&mut buf, 0, 0x1234).unwrap();
        assert_eq!(buf[0], 0x12);
        assert_eq!(buf[1], 0x34);
        assert_eq!(order.get_u16(&buf, 0).unwrap(), 0x1234);
    }

    #[test]
    fn test_plc5_float_word_swap() {
        let order = PCCC.clone();
        let mut buf = vec![0u8; 4];
        order.set_f32(&mut buf, 0, 1.5f32).unwrap();
        let le = 1.5f32.to_le_bytes();
        assert_eq!(buf, vec![le[2], le[3], le[0], le[1]]);
        assert_eq!(order.get_f32(&buf, 0).unwrap(), 1.5);
    }

    #[test]
    fn test_permuted_roundtrip_bit_for_bit() {
        let attrs = crate::attr::AttributeMap::parse(
            "int16_byte_order=10&int32_byte_order=3210&float32_byte_order=2301",
        )
        .unwrap();
        let order = ByteOrder::from_attrs(&LOGIX, &attrs).unwrap();
        let mut buf = vec![0u8; 8];
        for v in [0i32, -1, i32::MAX, i32::MIN] {
            order.set_i32(&mut buf, 0, v).unwrap();
            assert_eq!(order.get_i32(&buf, 0).unwrap(), v);
        }
        let f = f32::from_bits(0xdead_beef);
        order.set_f32(&mut buf, 4, f).unwrap();
        assert_eq!(order.get_f32(&buf, 4).unwrap().to_bits(), 0xdead_beef);
    }

    #[test]
    fn test_out_of_bounds() {
        let order = LOGIX.clone();
        let buf = vec![0u8; 3];
        assert!(order.get_i32(&buf, 0).is_err());
        assert!(order.get_i16(&buf, 2).is_err());
        assert!(order.get_i16(&buf, 1).is_ok());
    }

    #[test]
    fn test_logix_string() {
        let order = LOGIX.clone();
        let mut buf = vec![0u8; 88];
        order.set_string(&mut buf, 0, b"HELLO").unwrap();
        assert_eq!(order.string_length(&buf, 0).unwrap(), 5);
        assert_eq!(order.string_capacity(&buf, 0).unwrap(), 82);
        assert_eq!(order.string_total_length(&buf, 0).unwrap(), 88);
        assert_eq!(order.get_string(&buf, 0).unwrap(), b"HELLO");
        assert_eq!(order.get_u32(&buf, 0).unwrap(), 5);
    }

    #[test]
    fn test_plc5_byte_swapped_string() {
        let order = PCCC.clone();
        let mut buf = vec![0u8; 84];
        order.set_string(&mut buf, 0, b"AB").unwrap();
        // characters swap within 16-bit words
        assert_eq!(buf[2], b'B');
        assert_eq!(buf[3], b'A');
        assert_eq!(order.get_string(&buf, 0).unwrap(), b"AB");
    }

    #[test]
    fn test_string_too_large() {
        let order = LOGIX.clone();
        let mut buf = vec![0u8; 88];
        let long = vec![b'x'; 83];
        assert!(order.set_string(&mut buf, 0, &long).is_err());
    }

    #[test]
    fn test_undefined_string_rejected() {
        let order = MODBUS.clone();
        let buf = vec![0u8; 8];
        assert!(order.get_string(&buf, 0).is_err());
    }
}
