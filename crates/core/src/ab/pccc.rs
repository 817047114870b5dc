// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! PCCC logical addressing and commands
//!
//! addresses have the shape `<Type><File>:<Element>[.<Sub>][/<Bit>]`, e.g.
//! `N7:0`, `T4:0.acc`, `B3:2/5`. two physical encodings exist: the PLC/5
//! "levels" form and the SLC/MicroLogix logical form. commands ride in a
//! PCCC frame `[CMD, STS, TNSW, FNC, body]` wrapped in CIP Execute PCCC.

use crate::{ErrorCode, Result, Status};
use byteorder::{ByteOrder, LittleEndian};

/// PCCC data file types with their wire codes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub(crate) enum FileType {
    Status = 0x84,
    Bit = 0x85,
    Timer = 0x86,
    Counter = 0x87,
    Control = 0x88,
    Int = 0x89,
    Float = 0x8A,
    Output = 0x8B,
    Input = 0x8C,
    String = 0x8D,
    Ascii = 0x8E,
    Bcd = 0x8F,
    Sfc = 0x90,
    Long = 0x91,
    Message = 0x92,
    Pid = 0x93,
    BlockTransfer = 0x94,
}

impl FileType {
    /// size of one element in bytes
    pub(crate) fn elem_size(&self) -> usize {
        match self {
            FileType::Ascii => 1,
            FileType::Status
            | FileType::Bit
            | FileType::Int
            | FileType::Output
            | FileType::Input
            | FileType::Bcd => 2,
            FileType::Float | FileType::Long => 4,
            FileType::Timer | FileType::Counter | FileType::Control | FileType::Sfc
            | FileType::BlockTransfer => 6,
            FileType::String => 84,
            FileType::Message => 112,
            FileType::Pid => 164,
        }
    }

    #[cfg(test)]
    fn from_code(code: u16) -> Option<FileType> {
        Some(match code {
            0x84 => FileType::Status,
            0x85 => FileType::Bit,
            0x86 => FileType::Timer,
            0x87 => FileType::Counter,
            0x88 => FileType::Control,
            0x89 => FileType::Int,
            0x8A => FileType::Float,
            0x8B => FileType::Output,
            0x8C => FileType::Input,
            0x8D => FileType::String,
            0x8E => FileType::Ascii,
            0x8F => FileType::Bcd,
            0x90 => FileType::Sfc,
            0x91 => FileType::Long,
            0x92 => FileType::Message,
            0x93 => FileType::Pid,
            0x94 => FileType::BlockTransfer,
            _ => return None,
        })
    }
}

/// a parsed PCCC logical address
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Address {
    pub file_type: FileType,
    pub file_num: u16,
    pub element: u16,
    pub sub_element: Option<u16>,
    /// bit selected by `/N` or a bit-valued mnemonic
    pub bit: Option<u8>,
}

/// sub-element mnemonics for the structured file types:
/// `(mnemonic, sub_element_index, is_bit, bit_no)`
fn sub_element_table(file_type: FileType) -> &'static [(&'static str, u16, bool, u8)] {
    match file_type {
        FileType::Timer => &[
            ("con", 0, false, 0),
            ("en", 0, true, 15),
            ("tt", 0, true, 14),
            ("dn", 0, true, 13),
            ("pre", 1, false, 0),
            ("acc", 2, false, 0),
        ],
        FileType::Counter => &[
            ("con", 0, false, 0),
            ("cu", 0, true, 15),
            ("cd", 0, true, 14),
            ("dn", 0, true, 13),
            ("ov", 0, true, 12),
            ("un", 0, true, 11),
            ("pre", 1, false, 0),
            ("acc", 2, false, 0),
        ],
        FileType::Control => &[
            ("con", 0, false, 0),
            ("en", 0, true, 15),
            ("eu", 0, true, 14),
            ("dn", 0, true, 13),
            ("em", 0, true, 12),
            ("er", 0, true, 11),
            ("ul", 0, true, 10),
            ("in", 0, true, 9),
            ("fd", 0, true, 8),
            ("len", 1, false, 0),
            ("pos", 2, false, 0),
        ],
        _ => &[],
    }
}

impl Address {
    /// parse a logical address string
    pub(crate) fn parse(name: &str) -> Result<Address> {
        let bad = || {
            log::warn!("malformed PCCC address \"{}\"", name);
            Status::Err(ErrorCode::BadParam)
        };
        let bytes = name.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let letters = name[..pos].to_ascii_uppercase();
        let file_type = match letters.as_str() {
            "A" => FileType::Ascii,
            "B" => FileType::Bit,
            "BT" => FileType::BlockTransfer,
            "C" => FileType::Counter,
            "D" => FileType::Bcd,
            "F" => FileType::Float,
            "I" => FileType::Input,
            "L" => FileType::Long,
            "MG" => FileType::Message,
            "N" => FileType::Int,
            "O" => FileType::Output,
            "PD" => FileType::Pid,
            "R" => FileType::Control,
            "S" => FileType::Status,
            "SC" => FileType::Sfc,
            "ST" => FileType::String,
            "T" => FileType::Timer,
            _ => return Err(bad()),
        };
        let rest = &name[pos..];
        let (file_part, rest) = match rest.split_once(':') {
            Some((f, r)) => (f, r),
            None => return Err(bad()),
        };
        // I/O and status files have well-known default numbers
        let file_num: u16 = if file_part.is_empty() {
            match file_type {
                FileType::Output => 0,
                FileType::Input => 1,
                FileType::Status => 2,
                _ => return Err(bad()),
            }
        } else {
            file_part.parse().map_err(|_| bad())?
        };

        // split off /bit then .sub
        let (rest, bit_part) = match rest.split_once('/') {
            Some((r, b)) => (r, Some(b)),
            None => (rest, None),
        };
        let (elem_part, sub_part) = match rest.split_once('.') {
            Some((e, s)) => (e, Some(s)),
            None => (rest, None),
        };
        let element: u16 = elem_part.parse().map_err(|_| bad())?;

        let mut sub_element = None;
        let mut bit = None;
        if let Some(sub) = sub_part {
            if sub.bytes().all(|b| b.is_ascii_digit()) {
                sub_element = Some(sub.parse().map_err(|_| bad())?);
            } else {
                let mnemonic = sub.to_ascii_lowercase();
                let entry = sub_element_table(file_type)
                    .iter()
                    .find(|(m, _, _, _)| *m == mnemonic)
                    .ok_or_else(bad)?;
                sub_element = Some(entry.1);
                if entry.2 {
                    bit = Some(entry.3);
                }
            }
        }
        if let Some(bit_part) = bit_part {
            if bit.is_some() {
                return Err(bad());
            }
            let n: u8 = bit_part.parse().map_err(|_| bad())?;
            // trailing /N only addresses a bit within a 16-bit word
            if n > 15 || self_elem_size(file_type, sub_element) != 2 {
                return Err(bad());
            }
            bit = Some(n);
        }
        Ok(Address {
            file_type,
            file_num,
            element,
            sub_element,
            bit,
        })
    }

    /// size in bytes of the addressed unit
    pub(crate) fn elem_size(&self) -> usize {
        self_elem_size(self.file_type, self.sub_element)
    }

    /// PLC/5 "levels" encoding: a flag byte for the present levels
    /// followed by variable-length encoded values
    pub(crate) fn encode_plc5(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        let mut levels = 0x02 | 0x04; // file + element
        if self.sub_element.is_some() {
            levels |= 0x08;
        }
        out.push(levels);
        encode_varint(&mut out, self.file_num);
        encode_varint(&mut out, self.element);
        if let Some(sub) = self.sub_element {
            encode_varint(&mut out, sub);
        }
        out
    }

    /// SLC/MicroLogix logical encoding: file number, file type, element
    /// and sub-element, each variable-length encoded
    pub(crate) fn encode_slc(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        encode_varint(&mut out, self.file_num);
        encode_varint(&mut out, self.file_type as u16);
        encode_varint(&mut out, self.element);
        encode_varint(&mut out, self.sub_element.unwrap_or(0));
        out
    }

    /// inverse of [`encode_plc5`], for address verification
    #[cfg(test)]
    pub(crate) fn decode_plc5(buf: &[u8], file_type: FileType) -> Result<Address> {
        let mut pos = 0;
        let levels = read_u8(buf, &mut pos)?;
        if levels & 0x06 != 0x06 {
            return Err(Status::Err(ErrorCode::BadData));
        }
        let file_num = decode_varint(buf, &mut pos)?;
        let element = decode_varint(buf, &mut pos)?;
        let sub_element = if levels & 0x08 != 0 {
            Some(decode_varint(buf, &mut pos)?)
        } else {
            None
        };
        Ok(Address {
            file_type,
            file_num,
            element,
            sub_element,
            bit: None,
        })
    }

    /// inverse of [`encode_slc`], for address verification
    #[cfg(test)]
    pub(crate) fn decode_slc(buf: &[u8]) -> Result<Address> {
        let mut pos = 0;
        let file_num = decode_varint(buf, &mut pos)?;
        let type_code = decode_varint(buf, &mut pos)?;
        let file_type =
            FileType::from_code(type_code).ok_or(Status::Err(ErrorCode::BadData))?;
        let element = decode_varint(buf, &mut pos)?;
        let sub_element = match decode_varint(buf, &mut pos)? {
            0 => None,
            v => Some(v),
        };
        Ok(Address {
            file_type,
            file_num,
            element,
            sub_element,
            bit: None,
        })
    }
}

fn self_elem_size(file_type: FileType, sub_element: Option<u16>) -> usize {
    if sub_element.is_some() {
        // structured sub-elements are individual 16-bit words
        2
    } else {
        file_type.elem_size()
    }
}

/// one byte if the value fits under 255, else `0xFF` plus two LE bytes
fn encode_varint(out: &mut Vec<u8>, value: u16) {
    if value <= 254 {
        out.push(value as u8);
    } else {
        out.push(0xFF);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8> {
    let v = *buf.get(*pos).ok_or(Status::Err(ErrorCode::TooSmall))?;
    *pos += 1;
    Ok(v)
}

#[cfg(test)]
fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u16> {
    let first = read_u8(buf, pos)?;
    if first != 0xFF {
        return Ok(first as u16);
    }
    if *pos + 2 > buf.len() {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let v = LittleEndian::read_u16(&buf[*pos..*pos + 2]);
    *pos += 2;
    Ok(v)
}

// commands
pub(crate) const CMD_TYPED: u8 = 0x0F;
/// reply bit or-ed onto the command byte
pub(crate) const CMD_REPLY_MASK: u8 = 0x40;
/// STS value indicating an extended status byte follows
const STS_EXTENDED: u8 = 0xF0;

pub(crate) const FUNC_PLC5_READ: u8 = 0x67;
pub(crate) const FUNC_PLC5_WRITE: u8 = 0x68;
pub(crate) const FUNC_SLC_READ: u8 = 0xA2;
pub(crate) const FUNC_SLC_WRITE: u8 = 0xAA;
pub(crate) const FUNC_SLC_WRITE_MASK: u8 = 0xAB;

fn frame(tnsw: u16, func: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.push(CMD_TYPED);
    out.push(0x00); // STS
    out.extend_from_slice(&tnsw.to_le_bytes());
    out.push(func);
    out
}

/// PLC/5 typed read: packet offset, total transaction elements, address
pub(crate) fn plc5_read_request(tnsw: u16, addr: &Address, elem_count: u16) -> Vec<u8> {
    let mut out = frame(tnsw, FUNC_PLC5_READ);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&elem_count.to_le_bytes());
    out.extend_from_slice(&addr.encode_plc5());
    out
}

/// PLC/5 typed write
pub(crate) fn plc5_write_request(tnsw: u16, addr: &Address, elem_count: u16, data: &[u8]) -> Vec<u8> {
    let mut out = frame(tnsw, FUNC_PLC5_WRITE);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&elem_count.to_le_bytes());
    out.extend_from_slice(&addr.encode_plc5());
    out.extend_from_slice(data);
    out
}

/// SLC protected typed logical read with 3 address fields
pub(crate) fn slc_read_request(tnsw: u16, addr: &Address, byte_count: u8) -> Vec<u8> {
    let mut out = frame(tnsw, FUNC_SLC_READ);
    out.push(byte_count);
    out.extend_from_slice(&addr.encode_slc());
    out
}

/// SLC protected typed logical write
pub(crate) fn slc_write_request(tnsw: u16, addr: &Address, data: &[u8]) -> Vec<u8> {
    let mut out = frame(tnsw, FUNC_SLC_WRITE);
    out.push(data.len() as u8);
    out.extend_from_slice(&addr.encode_slc());
    out.extend_from_slice(data);
    out
}

/// SLC protected typed logical write with mask, for bit writes
pub(crate) fn slc_write_mask_request(tnsw: u16, addr: &Address, mask: u16, value: u16) -> Vec<u8> {
    let mut out = frame(tnsw, FUNC_SLC_WRITE_MASK);
    out.push(2);
    out.extend_from_slice(&addr.encode_slc());
    out.extend_from_slice(&mask.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
    out
}

/// a parsed PCCC reply frame
#[derive(Debug, Clone)]
pub(crate) struct PcccReply<'a> {
    pub tnsw: u16,
    pub sts: u8,
    pub ext_sts: u8,
    pub data: &'a [u8],
}

impl PcccReply<'_> {
    pub(crate) fn status(&self) -> Status {
        translate_sts(self.sts, self.ext_sts)
    }
}

/// parse `[CMD|0x40, STS, TNSW, (EXT-STS), data...]`
pub(crate) fn parse_reply(buf: &[u8]) -> Result<PcccReply<'_>> {
    if buf.len() < 4 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    if buf[0] & CMD_REPLY_MASK == 0 {
        return Err(Status::Err(ErrorCode::BadReply));
    }
    let sts = buf[1];
    let tnsw = LittleEndian::read_u16(&buf[2..4]);
    let (ext_sts, data) = if sts == STS_EXTENDED {
        if buf.len() < 5 {
            return Err(Status::Err(ErrorCode::TooSmall));
        }
        (buf[4], &buf[5..])
    } else {
        (0, &buf[4..])
    };
    Ok(PcccReply {
        tnsw,
        sts,
        ext_sts,
        data,
    })
}

/// translate the PCCC STS/EXT-STS pair into a library status
pub(crate) fn translate_sts(sts: u8, ext_sts: u8) -> Status {
    match sts & 0xF0 {
        0x00 => Status::Ok,
        0x10 => Status::Err(ErrorCode::Unsupported),
        0x20 | 0x30 => Status::Err(ErrorCode::BadDevice),
        0x40 => Status::Err(ErrorCode::BadDevice),
        0x50 => Status::Err(ErrorCode::NotFound),
        0x60 => Status::Err(ErrorCode::NotAllowed),
        0x70 => Status::Err(ErrorCode::Busy),
        0xF0 => match ext_sts {
            0x05 | 0x06 | 0x07 => Status::Err(ErrorCode::NotFound),
            0x0E | 0x12 => Status::Err(ErrorCode::OutOfBounds),
            0x0B => Status::Err(ErrorCode::TooLarge),
            _ => Status::Err(ErrorCode::RemoteErr),
        },
        _ => Status::Err(ErrorCode::RemoteErr),
    }
}

/// wrap a PCCC frame in a CIP Execute PCCC request; the request id carries
/// our vendor id and a per-session serial number
pub(crate) fn execute_pccc_request(pccc: &[u8], vendor_id: u16, vendor_serial: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(13 + pccc.len());
    out.push(super::cip::SERVICE_PCCC_EXECUTE);
    out.push(0x02);
    out.extend_from_slice(&[0x20, 0x67, 0x24, 0x01]); // PCCC object class
    out.push(0x07); // request id length
    out.extend_from_slice(&vendor_id.to_le_bytes());
    out.extend_from_slice(&vendor_serial.to_le_bytes());
    out.extend_from_slice(pccc);
    out
}

/// strip the request id echo from an Execute PCCC reply payload, leaving
/// the PCCC frame
pub(crate) fn unwrap_execute_pccc_reply(payload: &[u8]) -> Result<&[u8]> {
    if payload.is_empty() {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let id_len = payload[0] as usize;
    if id_len < 1 || payload.len() < id_len {
        return Err(Status::Err(ErrorCode::BadReply));
    }
    Ok(&payload[id_len..])
}

/// DH+ routing words around a PCCC frame in a connected send:
/// destination link/node then source link/node
pub(crate) fn dhp_wrap(dest_node: u8, src_node: u8, pccc: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + pccc.len());
    out.extend_from_slice(&0u16.to_le_bytes()); // dest link
    out.extend_from_slice(&(dest_node as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // src link
    out.extend_from_slice(&(src_node as u16).to_le_bytes());
    out.extend_from_slice(pccc);
    out
}

/// strip the DH+ routing words off a connected PCCC reply
pub(crate) fn dhp_unwrap(payload: &[u8]) -> Result<&[u8]> {
    if payload.len() < 8 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    Ok(&payload[8..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer_file() {
        let addr = Address::parse("N7:0").unwrap();
        assert_eq!(addr.file_type, FileType::Int);
        assert_eq!(addr.file_num, 7);
        assert_eq!(addr.element, 0);
        assert_eq!(addr.sub_element, None);
        assert_eq!(addr.bit, None);
        assert_eq!(addr.elem_size(), 2);
    }

    #[test]
    fn test_parse_timer_mnemonics() {
        let acc = Address::parse("T4:2.acc").unwrap();
        assert_eq!(acc.file_type, FileType::Timer);
        assert_eq!(acc.sub_element, Some(2));
        assert_eq!(acc.bit, None);
        let dn = Address::parse("T4:2.DN").unwrap();
        assert_eq!(dn.sub_element, Some(0));
        assert_eq!(dn.bit, Some(13));
        let pre = Address::parse("T4:2.pre").unwrap();
        assert_eq!(pre.sub_element, Some(1));
    }

    #[test]
    fn test_parse_bit_selector() {
        let addr = Address::parse("B3:2/5").unwrap();
        assert_eq!(addr.bit, Some(5));
        // bit out of range
        assert!(Address::parse("B3:2/16").is_err());
        // bit selector on a 4-byte element
        assert!(Address::parse("F8:0/3").is_err());
        // bit on a sub-element word is fine
        assert!(Address::parse("T4:0.acc/3").is_ok());
    }

    #[test]
    fn test_parse_io_defaults() {
        assert_eq!(Address::parse("O:0").unwrap().file_num, 0);
        assert_eq!(Address::parse("I:0").unwrap().file_num, 1);
        assert_eq!(Address::parse("S:1").unwrap().file_num, 2);
        assert!(Address::parse("N:0").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Address::parse("Q7:0").is_err());
        assert!(Address::parse("N7").is_err());
        assert!(Address::parse("N7:x").is_err());
        assert!(Address::parse("T4:0.bogus").is_err());
    }

    #[test]
    fn test_plc5_roundtrip() {
        for name in ["N7:0", "F8:12", "T4:2.acc", "N255:300", "ST9:1"] {
            let addr = Address::parse(name).unwrap();
            let encoded = addr.encode_plc5();
            let mut want = addr.clone();
            want.bit = None;
            assert_eq!(Address::decode_plc5(&encoded, addr.file_type).unwrap(), want);
        }
    }

    #[test]
    fn test_slc_roundtrip() {
        for name in ["N7:0", "F8:12", "C5:3.acc", "B300:255", "L20:1000"] {
            let addr = Address::parse(name).unwrap();
            let encoded = addr.encode_slc();
            let mut want = addr.clone();
            want.bit = None;
            assert_eq!(Address::decode_slc(&encoded).unwrap(), want);
        }
    }

    #[test]
    fn test_varint_boundary() {
        let mut out = Vec::new();
        encode_varint(&mut out, 254);
        assert_eq!(out, vec![254]);
        out.clear();
        encode_varint(&mut out, 255);
        assert_eq!(out, vec![0xFF, 0xFF, 0x00]);
        out.clear();
        encode_varint(&mut out, 300);
        assert_eq!(out, vec![0xFF, 0x2C, 0x01]);
    }

    #[test]
    fn test_command_frames() {
        let addr = Address::parse("N7:0").unwrap();
        let read = plc5_read_request(0x1234, &addr, 1);
        assert_eq!(read[0], CMD_TYPED);
        assert_eq!(read[1], 0x00);
        assert_eq!(u16::from_le_bytes([read[2], read[3]]), 0x1234);
        assert_eq!(read[4], FUNC_PLC5_READ);

        let read = slc_read_request(0x4242, &addr, 2);
        assert_eq!(read[4], FUNC_SLC_READ);
        assert_eq!(read[5], 2); // byte count
        assert_eq!(&read[6..], &addr.encode_slc()[..]);

        let write = slc_write_mask_request(1, &addr, 0x0008, 0x0008);
        assert_eq!(write[4], FUNC_SLC_WRITE_MASK);
    }

    #[test]
    fn test_reply_parse_and_sts() {
        // good reply echoing TNSW with 2 data bytes
        let buf = [CMD_TYPED | CMD_REPLY_MASK, 0x00, 0x34, 0x12, 0xAB, 0xCD];
        let reply = parse_reply(&buf).unwrap();
        assert_eq!(reply.tnsw, 0x1234);
        assert!(reply.status().is_ok());
        assert_eq!(reply.data, &[0xAB, 0xCD]);

        // extended status
        let buf = [CMD_TYPED | CMD_REPLY_MASK, 0xF0, 0x34, 0x12, 0x0E];
        let reply = parse_reply(&buf).unwrap();
        assert_eq!(reply.ext_sts, 0x0E);
        assert_eq!(reply.status(), Status::Err(ErrorCode::OutOfBounds));

        // addressing problem
        assert_eq!(translate_sts(0x50, 0), Status::Err(ErrorCode::NotFound));
        assert_eq!(translate_sts(0x10, 0), Status::Err(ErrorCode::Unsupported));
    }

    #[test]
    fn test_execute_pccc_wrapper() {
        let addr = Address::parse("N7:0").unwrap();
        let pccc = plc5_read_request(1, &addr, 1);
        let out = execute_pccc_request(&pccc, 0xF33D, 0xDEADBEEF);
        assert_eq!(out[0], 0x4B);
        assert_eq!(&out[1..6], &[0x02, 0x20, 0x67, 0x24, 0x01]);
        assert_eq!(out[6], 0x07);
        assert_eq!(&out[13..], &pccc[..]);

        // reply unwrap skips the echoed request id
        let mut payload = vec![0x07, 0x3D, 0xF3, 0xEF, 0xBE, 0xAD, 0xDE];
        payload.extend_from_slice(&[CMD_TYPED | CMD_REPLY_MASK, 0, 1, 0]);
        let frame = unwrap_execute_pccc_reply(&payload).unwrap();
        assert_eq!(frame[0], CMD_TYPED | CMD_REPLY_MASK);
    }

    #[test]
    fn test_dhp_wrap() {
        let pccc = [CMD_TYPED, 0, 1, 0, FUNC_PLC5_READ];
        let wrapped = dhp_wrap(7, 5, &pccc);
        assert_eq!(wrapped.len(), 8 + pccc.len());
        assert_eq!(u16::from_le_bytes([wrapped[2], wrapped[3]]), 7);
        assert_eq!(u16::from_le_bytes([wrapped[6], wrapped[7]]), 5);
        assert_eq!(dhp_unwrap(&wrapped).unwrap(), &pccc);
    }
}
