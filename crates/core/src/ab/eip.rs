// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! EIP encapsulation framing
//!
//! every packet starts with a 24-byte header; the interesting commands are
//! RegisterSession/UnregisterSession for session setup and
//! SendRRData/SendUnitData carrying unconnected and connected CIP payloads
//! inside a Common Packet Format item list. all fields are little-endian.

use crate::{ErrorCode, Result, Status};
use byteorder::{ByteOrder, LittleEndian};

/// encapsulation header size on the wire
pub(crate) const HEADER_SIZE: usize = 24;

pub(crate) const REGISTER_SESSION: u16 = 0x0065;
pub(crate) const UNREGISTER_SESSION: u16 = 0x0066;
pub(crate) const SEND_RR_DATA: u16 = 0x006F;
pub(crate) const SEND_UNIT_DATA: u16 = 0x0070;

/// CPF item types
const ITEM_NULL_ADDRESS: u16 = 0x0000;
const ITEM_CONNECTED_ADDRESS: u16 = 0x00A1;
const ITEM_CONNECTED_DATA: u16 = 0x00B1;
const ITEM_UNCONNECTED_DATA: u16 = 0x00B2;

/// interface handle + router timeout prefix inside SendRRData/SendUnitData
const CPF_PREFIX_SIZE: usize = 6;
/// router timeout, seconds
const ROUTER_TIMEOUT: u16 = 5;

/// decoded 24-byte encapsulation header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub command: u16,
    pub length: u16,
    pub session_handle: u32,
    pub status: u32,
    pub sender_context: u64,
    pub options: u32,
}

impl Header {
    pub(crate) fn parse(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_SIZE {
            return Err(Status::Err(ErrorCode::TooSmall));
        }
        Ok(Header {
            command: LittleEndian::read_u16(&buf[0..2]),
            length: LittleEndian::read_u16(&buf[2..4]),
            session_handle: LittleEndian::read_u32(&buf[4..8]),
            status: LittleEndian::read_u32(&buf[8..12]),
            sender_context: LittleEndian::read_u64(&buf[12..20]),
            options: LittleEndian::read_u32(&buf[20..24]),
        })
    }
}

fn header(out: &mut Vec<u8>, command: u16, session_handle: u32, sender_context: u64) {
    out.extend_from_slice(&command.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // length, patched by finish()
    out.extend_from_slice(&session_handle.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // status, zero in requests
    out.extend_from_slice(&sender_context.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // options
}

fn finish(mut out: Vec<u8>) -> Vec<u8> {
    let length = (out.len() - HEADER_SIZE) as u16;
    LittleEndian::write_u16(&mut out[2..4], length);
    out
}

/// RegisterSession request: protocol version 1, options 0
pub(crate) fn register_session(sender_context: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + 4);
    header(&mut out, REGISTER_SESSION, 0, sender_context);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    finish(out)
}

pub(crate) fn unregister_session(session_handle: u32, sender_context: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    header(&mut out, UNREGISTER_SESSION, session_handle, sender_context);
    finish(out)
}

/// SendRRData: CPF with a null address item and an unconnected data item
pub(crate) fn send_rr_data(session_handle: u32, sender_context: u64, cip: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + CPF_PREFIX_SIZE + 10 + cip.len());
    header(&mut out, SEND_RR_DATA, session_handle, sender_context);
    out.extend_from_slice(&0u32.to_le_bytes()); // interface handle
    out.extend_from_slice(&ROUTER_TIMEOUT.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // item count
    out.extend_from_slice(&ITEM_NULL_ADDRESS.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&ITEM_UNCONNECTED_DATA.to_le_bytes());
    out.extend_from_slice(&(cip.len() as u16).to_le_bytes());
    out.extend_from_slice(cip);
    finish(out)
}

/// SendUnitData: CPF with a connected address item and a connected data item
/// whose payload leads with the 16-bit connection sequence number
pub(crate) fn send_unit_data(
    session_handle: u32,
    sender_context: u64,
    connection_id: u32,
    conn_seq: u16,
    cip: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + CPF_PREFIX_SIZE + 14 + cip.len());
    header(&mut out, SEND_UNIT_DATA, session_handle, sender_context);
    out.extend_from_slice(&0u32.to_le_bytes()); // interface handle
    out.extend_from_slice(&ROUTER_TIMEOUT.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // item count
    out.extend_from_slice(&ITEM_CONNECTED_ADDRESS.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&connection_id.to_le_bytes());
    out.extend_from_slice(&ITEM_CONNECTED_DATA.to_le_bytes());
    out.extend_from_slice(&(cip.len() as u16 + 2).to_le_bytes());
    out.extend_from_slice(&conn_seq.to_le_bytes());
    out.extend_from_slice(cip);
    finish(out)
}

/// pull the session handle out of a RegisterSession reply
pub(crate) fn parse_register_session_reply(header: &Header) -> Result<u32> {
    if header.command != REGISTER_SESSION {
        log::warn!(
            "unexpected EIP command {:#06x} waiting for RegisterSession",
            header.command
        );
        return Err(Status::Err(ErrorCode::BadReply));
    }
    if header.status != 0 {
        log::warn!("RegisterSession rejected, EIP status {:#x}", header.status);
        return Err(Status::Err(ErrorCode::RemoteErr));
    }
    Ok(header.session_handle)
}

/// unwrap the unconnected data item of a SendRRData reply body
pub(crate) fn unwrap_unconnected(body: &[u8]) -> Result<&[u8]> {
    if body.len() < CPF_PREFIX_SIZE + 2 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let item_count = LittleEndian::read_u16(&body[CPF_PREFIX_SIZE..CPF_PREFIX_SIZE + 2]) as usize;
    let mut pos = CPF_PREFIX_SIZE + 2;
    let mut data = None;
    for _ in 0..item_count {
        if pos + 4 > body.len() {
            return Err(Status::Err(ErrorCode::TooSmall));
        }
        let item_type = LittleEndian::read_u16(&body[pos..pos + 2]);
        let item_len = LittleEndian::read_u16(&body[pos + 2..pos + 4]) as usize;
        pos += 4;
        if pos + item_len > body.len() {
            return Err(Status::Err(ErrorCode::TooSmall));
        }
        if item_type == ITEM_UNCONNECTED_DATA {
            data = Some(&body[pos..pos + item_len]);
        }
        pos += item_len;
    }
    data.ok_or(Status::Err(ErrorCode::BadReply))
}

/// unwrap a SendUnitData reply body into (connection id, conn sequence, CIP)
pub(crate) fn unwrap_connected(body: &[u8]) -> Result<(u32, u16, &[u8])> {
    if body.len() < CPF_PREFIX_SIZE + 2 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let item_count = LittleEndian::read_u16(&body[CPF_PREFIX_SIZE..CPF_PREFIX_SIZE + 2]) as usize;
    let mut pos = CPF_PREFIX_SIZE + 2;
    let mut conn_id = None;
    let mut data = None;
    for _ in 0..item_count {
        if pos + 4 > body.len() {
            return Err(Status::Err(ErrorCode::TooSmall));
        }
        let item_type = LittleEndian::read_u16(&body[pos..pos + 2]);
        let item_len = LittleEndian::read_u16(&body[pos + 2..pos + 4]) as usize;
        pos += 4;
        if pos + item_len > body.len() {
            return Err(Status::Err(ErrorCode::TooSmall));
        }
        match item_type {
            ITEM_CONNECTED_ADDRESS if item_len == 4 => {
                conn_id = Some(LittleEndian::read_u32(&body[pos..pos + 4]));
            }
            ITEM_CONNECTED_DATA => {
                if item_len < 2 {
                    return Err(Status::Err(ErrorCode::TooSmall));
                }
                let seq = LittleEndian::read_u16(&body[pos..pos + 2]);
                data = Some((seq, &body[pos + 2..pos + item_len]));
            }
            _ => {}
        }
        pos += item_len;
    }
    match (conn_id, data) {
        (Some(id), Some((seq, cip))) => Ok((id, seq, cip)),
        _ => Err(Status::Err(ErrorCode::BadReply)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_session_frame() {
        let frame = register_session(0x1122334455667788);
        assert_eq!(frame.len(), 28);
        assert_eq!(&frame[0..2], &[0x65, 0x00]);
        assert_eq!(&frame[2..4], &[0x04, 0x00]);
        assert_eq!(&frame[4..8], &[0; 4]); // no session handle yet
        assert_eq!(&frame[24..28], &[0x01, 0x00, 0x00, 0x00]);
        let header = Header::parse(&frame).unwrap();
        assert_eq!(header.command, REGISTER_SESSION);
        assert_eq!(header.length, 4);
        assert_eq!(header.sender_context, 0x1122334455667788);
    }

    #[test]
    fn test_send_rr_data_roundtrip() {
        let cip = [0x4C, 0x02, 0x91, 0x02, b'h', b'i', 0x01, 0x00];
        let frame = send_rr_data(0xdeadbeef, 42, &cip);
        let header = Header::parse(&frame).unwrap();
        assert_eq!(header.command, SEND_RR_DATA);
        assert_eq!(header.session_handle, 0xdeadbeef);
        assert_eq!(header.length as usize, frame.len() - HEADER_SIZE);
        let body = &frame[HEADER_SIZE..];
        let inner = unwrap_unconnected(body).unwrap();
        assert_eq!(inner, &cip);
    }

    #[test]
    fn test_send_unit_data_roundtrip() {
        let cip = [0x4C, 0x02, 0x91, 0x02, b'h', b'i', 0x01, 0x00];
        let frame = send_unit_data(0xdeadbeef, 0, 0xcafe_f00d, 0x1234, &cip);
        let header = Header::parse(&frame).unwrap();
        assert_eq!(header.command, SEND_UNIT_DATA);
        let (conn_id, seq, inner) = unwrap_connected(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(conn_id, 0xcafe_f00d);
        assert_eq!(seq, 0x1234);
        assert_eq!(inner, &cip);
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(Header::parse(&[0u8; 10]).is_err());
        assert!(unwrap_unconnected(&[0u8; 4]).is_err());
    }
}
