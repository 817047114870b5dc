// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! CIP service requests and replies
//!
//! covers the symbolic IOI for tag names, connection path encoding (with
//! DH+ bridging), Unconnected Send wrapping, ForwardOpen/ForwardClose,
//! the Multiple Service Packet, and general-status translation.

use crate::plc::PlcKind;
use crate::{ErrorCode, Result, Status};
use byteorder::{ByteOrder, LittleEndian};
use std::net::Ipv4Addr;

// services
pub(crate) const SERVICE_READ: u8 = 0x4C;
pub(crate) const SERVICE_READ_FRAG: u8 = 0x55;
pub(crate) const SERVICE_WRITE: u8 = 0x4D;
pub(crate) const SERVICE_WRITE_FRAG: u8 = 0x53;
pub(crate) const SERVICE_RMW: u8 = 0xCE;
pub(crate) const SERVICE_MULTI: u8 = 0x0A;
pub(crate) const SERVICE_PCCC_EXECUTE: u8 = 0x4B;
pub(crate) const SERVICE_UNCONNECTED_SEND: u8 = 0x52;
pub(crate) const SERVICE_FORWARD_OPEN: u8 = 0x54;
pub(crate) const SERVICE_FORWARD_OPEN_EX: u8 = 0x5B;
pub(crate) const SERVICE_FORWARD_CLOSE: u8 = 0x4E;
pub(crate) const SERVICE_GET_INSTANCE_ATTRIB_LIST: u8 = 0x55;
pub(crate) const SERVICE_GET_ATTRIB_LIST: u8 = 0x03;
/// reply bit or-ed onto the request service
pub(crate) const REPLY_MASK: u8 = 0x80;

// general status codes we branch on
pub(crate) const STATUS_OK: u8 = 0x00;
pub(crate) const STATUS_EXTENDED: u8 = 0x01;
pub(crate) const STATUS_PARTIAL: u8 = 0x06;
pub(crate) const STATUS_UNSUPPORTED: u8 = 0x08;
pub(crate) const STATUS_MULTI_PARTIAL: u8 = 0x1E;

// extended status codes under general 0x01
pub(crate) const EXT_DUPLICATE_CONNECTION: u16 = 0x0100;
pub(crate) const EXT_INVALID_SIZE: u16 = 0x0109;
pub(crate) const EXT_TIMEOUT: u16 = 0x0204;

/// Connection Manager path: class 0x06, instance 1
const CM_PATH: [u8; 4] = [0x20, 0x06, 0x24, 0x01];
/// Message Router path: class 0x02, instance 1
const MR_PATH: [u8; 4] = [0x20, 0x02, 0x24, 0x01];

/// unconnected send tick time and timeout ticks
const SECS_PER_TICK: u8 = 0x05;
const TIMEOUT_TICKS: u8 = 0xF7;

/// requested packet interval, microseconds
const RPI_US: u32 = 1_000_000;
/// CIP transport class 3, server, application trigger
const TRANSPORT_CLASS: u8 = 0xA3;

/// an encoded symbolic tag path plus out-of-band bit selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TagIoi {
    pub ioi: Vec<u8>,
    /// bit number selected by a trailing `.N` on a word-sized tag
    pub bit: Option<u8>,
}

/// encode a dotted tag name into CIP IOI segments.
///
/// `MyUdt.Member[3].SubTag` becomes symbolic segments with numeric element
/// segments for array indexes; a trailing all-digit component selects a bit
/// and produces no segment of its own.
pub(crate) fn encode_tag_name(name: &str) -> Result<TagIoi> {
    if name.is_empty() {
        return Err(Status::Err(ErrorCode::BadParam));
    }
    let parts: Vec<&str> = name.split('.').collect();
    let mut ioi = Vec::new();
    let mut bit = None;
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() {
            log::warn!("tag name \"{}\" has an empty component", name);
            return Err(Status::Err(ErrorCode::BadParam));
        }
        // a final all-digit component is a bit selector, not a member
        if idx + 1 == parts.len() && idx > 0 && part.bytes().all(|b| b.is_ascii_digit()) {
            let n: u8 = part
                .parse()
                .map_err(|_| Status::Err(ErrorCode::BadParam))?;
            if n > 63 {
                return Err(Status::Err(ErrorCode::BadParam));
            }
            bit = Some(n);
            continue;
        }
        let (symbol, indexes) = split_indexes(part)?;
        if symbol.is_empty() || symbol.len() > u8::MAX as usize {
            return Err(Status::Err(ErrorCode::BadParam));
        }
        ioi.push(0x91);
        ioi.push(symbol.len() as u8);
        ioi.extend_from_slice(symbol.as_bytes());
        if symbol.len() % 2 != 0 {
            ioi.push(0x00);
        }
        for index in indexes {
            encode_element_index(&mut ioi, index);
        }
    }
    if ioi.is_empty() {
        return Err(Status::Err(ErrorCode::BadParam));
    }
    Ok(TagIoi { ioi, bit })
}

/// split `Name[1,2]` into the symbol and its numeric indexes
fn split_indexes(part: &str) -> Result<(&str, Vec<u32>)> {
    match part.find('[') {
        None => Ok((part, Vec::new())),
        Some(open) => {
            if !part.ends_with(']') {
                return Err(Status::Err(ErrorCode::BadParam));
            }
            let inner = &part[open + 1..part.len() - 1];
            let mut indexes = Vec::new();
            for dim in inner.split(',') {
                let v: u32 = dim
                    .trim()
                    .parse()
                    .map_err(|_| Status::Err(ErrorCode::BadParam))?;
                indexes.push(v);
            }
            if indexes.is_empty() || indexes.len() > 3 {
                return Err(Status::Err(ErrorCode::BadParam));
            }
            Ok((&part[..open], indexes))
        }
    }
}

/// numeric element segment sized to the value
fn encode_element_index(ioi: &mut Vec<u8>, index: u32) {
    if index <= u8::MAX as u32 {
        ioi.push(0x28);
        ioi.push(index as u8);
    } else if index <= u16::MAX as u32 {
        ioi.push(0x29);
        ioi.push(0x00);
        ioi.extend_from_slice(&(index as u16).to_le_bytes());
    } else {
        ioi.push(0x2A);
        ioi.push(0x00);
        ioi.extend_from_slice(&index.to_le_bytes());
    }
}

/// an encoded connection path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ConnPath {
    pub bytes: Vec<u8>,
    pub is_dhp: bool,
    pub dhp_src: u8,
    pub dhp_dest: u8,
}

/// parse and encode a routing path string (`1,0`, `1,0,18,10.1.2.3,1,0`,
/// `1,0,A:1:2` ...). the DH+ segment is only valid as the final hop.
///
/// when the family needs a CIP connection the message-router (or DH+
/// target) path is appended and the result is padded to a 16-bit word
/// boundary.
pub(crate) fn encode_conn_path(path: &str, kind: PlcKind, needs_connection: bool) -> Result<ConnPath> {
    let mut out = ConnPath::default();
    if kind == PlcKind::Micro800 && !path.is_empty() {
        // Micro8x0 PLCs route directly to the CPU
        log::warn!("ignoring path \"{}\" for micro800 plc", path);
    } else if !path.is_empty() {
        let tokens: Vec<&str> = path.split(',').map(|t| t.trim()).collect();
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            if let Some(dhp) = parse_dhp_segment(token)? {
                if i + 1 != tokens.len() {
                    log::warn!("DH+ segment must be the final hop in \"{}\"", path);
                    return Err(Status::Err(ErrorCode::BadParam));
                }
                out.is_dhp = true;
                out.dhp_src = dhp.1;
                out.dhp_dest = dhp.2;
                // the DH+ channel replaces the message router target:
                // class 0xA6, instance = channel port, connection point 1
                out.bytes
                    .extend_from_slice(&[0x20, 0xA6, 0x24, dhp.0, 0x2C, 0x01]);
                if out.bytes.len() % 2 != 0 {
                    out.bytes.push(0x00);
                }
                return Ok(out);
            }
            let port: u32 = token.parse().map_err(|_| {
                log::warn!("bad path element \"{}\" in \"{}\"", token, path);
                Status::Err(ErrorCode::BadParam)
            })?;
            if port == 18 || port == 19 {
                // extended port A/B with an ASCII IPv4 link address
                let addr = tokens.get(i + 1).ok_or_else(|| {
                    log::warn!("path \"{}\" ends with extended port {}", path, port);
                    Status::Err(ErrorCode::BadParam)
                })?;
                addr.parse::<Ipv4Addr>().map_err(|_| {
                    log::warn!("bad IP address \"{}\" in path \"{}\"", addr, path);
                    Status::Err(ErrorCode::BadParam)
                })?;
                out.bytes.push(port as u8);
                out.bytes.push(addr.len() as u8);
                out.bytes.extend_from_slice(addr.as_bytes());
                if addr.len() % 2 != 0 {
                    out.bytes.push(0x00);
                }
                i += 2;
            } else if port <= 15 {
                out.bytes.push(port as u8);
                i += 1;
            } else {
                log::warn!("path element {} out of range in \"{}\"", port, path);
                return Err(Status::Err(ErrorCode::BadParam));
            }
        }
    }
    if needs_connection {
        out.bytes.extend_from_slice(&MR_PATH);
    }
    if out.bytes.len() % 2 != 0 {
        out.bytes.push(0x00);
    }
    Ok(out)
}

/// `A:src:dst` / `B:src:dst`: DH+ channel, source node, destination node
fn parse_dhp_segment(token: &str) -> Result<Option<(u8, u8, u8)>> {
    let mut chars = token.splitn(3, ':');
    let channel = match chars.next() {
        Some(c) if c.eq_ignore_ascii_case("a") => 1u8,
        Some(c) if c.eq_ignore_ascii_case("b") => 2u8,
        _ => return Ok(None),
    };
    let src = chars
        .next()
        .and_then(|v| v.parse::<u8>().ok())
        .ok_or(Status::Err(ErrorCode::BadParam))?;
    let dest = chars
        .next()
        .and_then(|v| v.parse::<u8>().ok())
        .ok_or(Status::Err(ErrorCode::BadParam))?;
    Ok(Some((channel, src, dest)))
}

/// wrap an embedded request in an Unconnected Send through the
/// Connection Manager, routing over `conn_path`
pub(crate) fn unconnected_send(embedded: &[u8], conn_path: &[u8]) -> Vec<u8> {
    debug_assert!(conn_path.len() % 2 == 0);
    let mut out = Vec::with_capacity(12 + embedded.len() + conn_path.len());
    out.push(SERVICE_UNCONNECTED_SEND);
    out.push((CM_PATH.len() / 2) as u8);
    out.extend_from_slice(&CM_PATH);
    out.push(SECS_PER_TICK);
    out.push(TIMEOUT_TICKS);
    out.extend_from_slice(&(embedded.len() as u16).to_le_bytes());
    out.extend_from_slice(embedded);
    if embedded.len() % 2 != 0 {
        out.push(0x00);
    }
    out.push((conn_path.len() / 2) as u8);
    out.push(0x00); // reserved
    out.extend_from_slice(conn_path);
    out
}

/// parameters for one ForwardOpen attempt
#[derive(Debug, Clone)]
pub(crate) struct ForwardOpen<'a> {
    pub orig_connection_id: u32,
    pub conn_serial_number: u16,
    pub vendor_id: u16,
    pub orig_serial_number: u32,
    pub payload_size: u16,
    pub conn_path: &'a [u8],
}

/// build a ForwardOpen (0x54, 16-bit parameters) or ForwardOpenEx
/// (0x5B, 32-bit parameters) request
pub(crate) fn forward_open_request(ex: bool, fo: &ForwardOpen<'_>) -> Vec<u8> {
    debug_assert!(fo.conn_path.len() % 2 == 0);
    let mut out = Vec::with_capacity(42 + fo.conn_path.len());
    out.push(if ex {
        SERVICE_FORWARD_OPEN_EX
    } else {
        SERVICE_FORWARD_OPEN
    });
    out.push((CM_PATH.len() / 2) as u8);
    out.extend_from_slice(&CM_PATH);
    out.push(SECS_PER_TICK);
    out.push(TIMEOUT_TICKS);
    out.extend_from_slice(&0u32.to_le_bytes()); // O->T connection id, PLC picks
    out.extend_from_slice(&fo.orig_connection_id.to_le_bytes()); // T->O connection id
    out.extend_from_slice(&fo.conn_serial_number.to_le_bytes());
    out.extend_from_slice(&fo.vendor_id.to_le_bytes());
    out.extend_from_slice(&fo.orig_serial_number.to_le_bytes());
    out.push(1); // connection timeout multiplier x4
    out.extend_from_slice(&[0u8; 3]); // reserved
    if ex {
        let params: u32 = 0x4200_0000 | fo.payload_size as u32;
        out.extend_from_slice(&RPI_US.to_le_bytes());
        out.extend_from_slice(&params.to_le_bytes());
        out.extend_from_slice(&RPI_US.to_le_bytes());
        out.extend_from_slice(&params.to_le_bytes());
    } else {
        let params: u16 = 0x4200 | (fo.payload_size & 0x01FF);
        out.extend_from_slice(&RPI_US.to_le_bytes());
        out.extend_from_slice(&params.to_le_bytes());
        out.extend_from_slice(&RPI_US.to_le_bytes());
        out.extend_from_slice(&params.to_le_bytes());
    }
    out.push(TRANSPORT_CLASS);
    out.push((fo.conn_path.len() / 2) as u8);
    out.extend_from_slice(fo.conn_path);
    out
}

/// ForwardClose request for an established connection
pub(crate) fn forward_close_request(
    conn_serial_number: u16,
    vendor_id: u16,
    orig_serial_number: u32,
    conn_path: &[u8],
) -> Vec<u8> {
    debug_assert!(conn_path.len() % 2 == 0);
    let mut out = Vec::with_capacity(18 + conn_path.len());
    out.push(SERVICE_FORWARD_CLOSE);
    out.push((CM_PATH.len() / 2) as u8);
    out.extend_from_slice(&CM_PATH);
    out.push(SECS_PER_TICK);
    out.push(TIMEOUT_TICKS);
    out.extend_from_slice(&conn_serial_number.to_le_bytes());
    out.extend_from_slice(&vendor_id.to_le_bytes());
    out.extend_from_slice(&orig_serial_number.to_le_bytes());
    out.push((conn_path.len() / 2) as u8);
    out.push(0x00); // reserved
    out.extend_from_slice(conn_path);
    out
}

/// outcome of a ForwardOpen exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ForwardOpenResult {
    /// connection established; the PLC-chosen O->T connection id targets
    /// subsequent connected sends
    Open { targ_connection_id: u32 },
    /// the PLC refused; extended status and optional supported-size hint
    Refused {
        general_status: u8,
        ext_status: u16,
        supported_size: Option<u16>,
    },
}

pub(crate) fn parse_forward_open_reply(cip: &[u8]) -> Result<ForwardOpenResult> {
    let reply = parse_reply(cip)?;
    if reply.general_status == STATUS_OK {
        if reply.payload.len() < 8 {
            return Err(Status::Err(ErrorCode::TooSmall));
        }
        let targ_connection_id = LittleEndian::read_u32(&reply.payload[0..4]);
        return Ok(ForwardOpenResult::Open { targ_connection_id });
    }
    let ext_status = reply.ext_status.first().copied().unwrap_or(0);
    // a 0x0109 refusal may carry the supported size as a second status word
    let supported_size = if ext_status == EXT_INVALID_SIZE {
        reply.ext_status.get(1).copied()
    } else {
        None
    };
    Ok(ForwardOpenResult::Refused {
        general_status: reply.general_status,
        ext_status,
        supported_size,
    })
}

/// a parsed CIP service reply
#[derive(Debug, Clone)]
pub(crate) struct Reply<'a> {
    pub service: u8,
    pub general_status: u8,
    pub ext_status: Vec<u16>,
    pub payload: &'a [u8],
}

impl Reply<'_> {
    /// translate the reply status into a library status
    pub(crate) fn status(&self) -> Status {
        translate_status(self.general_status, self.ext_status.first().copied())
    }
}

/// split a CIP reply into service, status and payload
pub(crate) fn parse_reply(cip: &[u8]) -> Result<Reply<'_>> {
    if cip.len() < 4 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let service = cip[0] & !REPLY_MASK;
    let general_status = cip[2];
    let ext_count = cip[3] as usize;
    if cip.len() < 4 + ext_count * 2 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let mut ext_status = Vec::with_capacity(ext_count);
    for i in 0..ext_count {
        ext_status.push(LittleEndian::read_u16(&cip[4 + i * 2..6 + i * 2]));
    }
    Ok(Reply {
        service,
        general_status,
        ext_status,
        payload: &cip[4 + ext_count * 2..],
    })
}

/// map a CIP general/extended status pair onto a library error
pub(crate) fn translate_status(general: u8, ext: Option<u16>) -> Status {
    match general {
        0x00 => Status::Ok,
        0x01 => match ext.unwrap_or(0) {
            EXT_DUPLICATE_CONNECTION => Status::Err(ErrorCode::Duplicate),
            EXT_INVALID_SIZE => Status::Err(ErrorCode::TooLarge),
            EXT_TIMEOUT => Status::Err(ErrorCode::Timeout),
            0x0107 => Status::Err(ErrorCode::NotFound),
            0x0311 | 0x0312 | 0x0315 => Status::Err(ErrorCode::BadParam),
            _ => Status::Err(ErrorCode::RemoteErr),
        },
        0x02 => Status::Err(ErrorCode::NoResources),
        0x03 => Status::Err(ErrorCode::BadParam),
        0x04 => Status::Err(ErrorCode::NotFound),
        0x05 => Status::Err(ErrorCode::NotFound),
        STATUS_PARTIAL => Status::Err(ErrorCode::Partial),
        STATUS_UNSUPPORTED => Status::Err(ErrorCode::Unsupported),
        0x0A => Status::Err(ErrorCode::BadStatus),
        0x0C => Status::Err(ErrorCode::NotAllowed),
        0x10 => Status::Err(ErrorCode::NotAllowed),
        0x13 => Status::Err(ErrorCode::TooSmall),
        0x14 => Status::Err(ErrorCode::Unsupported),
        0x15 => Status::Err(ErrorCode::TooLarge),
        0x1A => Status::Err(ErrorCode::TooLarge),
        0x1C => Status::Err(ErrorCode::BadParam),
        STATUS_MULTI_PARTIAL => Status::Err(ErrorCode::Partial),
        0x20 => Status::Err(ErrorCode::BadParam),
        0x26 => Status::Err(ErrorCode::BadParam),
        0xFF => match ext.unwrap_or(0) {
            0x2104 | 0x2105 => Status::Err(ErrorCode::OutOfBounds),
            0x2107 => Status::Err(ErrorCode::BadData),
            _ => Status::Err(ErrorCode::RemoteErr),
        },
        _ => Status::Err(ErrorCode::RemoteErr),
    }
}

/// short human description of a CIP error, for logs
pub(crate) fn decode_status(general: u8, ext: Option<u16>) -> &'static str {
    match general {
        0x00 => "success",
        0x01 => match ext.unwrap_or(0) {
            EXT_DUPLICATE_CONNECTION => "duplicate connection",
            EXT_INVALID_SIZE => "invalid connection size",
            EXT_TIMEOUT => "connection timed out",
            0x0107 => "connection not found",
            _ => "connection failure",
        },
        0x02 => "resource unavailable",
        0x03 => "invalid parameter value",
        0x04 => "path segment error",
        0x05 => "path destination unknown",
        0x06 => "partial data transferred",
        0x08 => "unsupported service",
        0x0A => "attribute list error",
        0x0C => "object state conflict",
        0x10 => "device state conflict",
        0x13 => "not enough data",
        0x14 => "attribute not supported",
        0x15 => "too much data",
        0x1A => "bridge request too large",
        0x1E => "embedded service error",
        0x20 => "invalid parameter",
        0x26 => "invalid path size",
        0xFF => match ext.unwrap_or(0) {
            0x2104 => "offset out of range",
            0x2105 => "too many elements",
            0x2107 => "type mismatch",
            _ => "general error",
        },
        _ => "unknown CIP error",
    }
}

/// Read Tag service request
pub(crate) fn read_request(ioi: &[u8], elem_count: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + ioi.len());
    out.push(SERVICE_READ);
    out.push((ioi.len() / 2) as u8);
    out.extend_from_slice(ioi);
    out.extend_from_slice(&elem_count.to_le_bytes());
    out
}

/// Read Tag Fragmented service request
pub(crate) fn read_frag_request(ioi: &[u8], elem_count: u16, byte_offset: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + ioi.len());
    out.push(SERVICE_READ_FRAG);
    out.push((ioi.len() / 2) as u8);
    out.extend_from_slice(ioi);
    out.extend_from_slice(&elem_count.to_le_bytes());
    out.extend_from_slice(&byte_offset.to_le_bytes());
    out
}

/// Write Tag service request; `type_info` is the 2- or 4-byte encoded type
pub(crate) fn write_request(ioi: &[u8], type_info: &[u8], elem_count: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + ioi.len() + type_info.len() + data.len());
    out.push(SERVICE_WRITE);
    out.push((ioi.len() / 2) as u8);
    out.extend_from_slice(ioi);
    out.extend_from_slice(type_info);
    out.extend_from_slice(&elem_count.to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Write Tag Fragmented service request
pub(crate) fn write_frag_request(
    ioi: &[u8],
    type_info: &[u8],
    elem_count: u16,
    byte_offset: u32,
    data: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + ioi.len() + type_info.len() + data.len());
    out.push(SERVICE_WRITE_FRAG);
    out.push((ioi.len() / 2) as u8);
    out.extend_from_slice(ioi);
    out.extend_from_slice(type_info);
    out.extend_from_slice(&elem_count.to_le_bytes());
    out.extend_from_slice(&byte_offset.to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Read-Modify-Write request for single-bit writes. `or_mask` sets bits,
/// `and_mask` clears them; both are `mask_size` bytes
pub(crate) fn rmw_request(ioi: &[u8], or_mask: &[u8], and_mask: &[u8]) -> Vec<u8> {
    debug_assert_eq!(or_mask.len(), and_mask.len());
    let mut out = Vec::with_capacity(4 + ioi.len() + or_mask.len() * 2);
    out.push(SERVICE_RMW);
    out.push((ioi.len() / 2) as u8);
    out.extend_from_slice(ioi);
    out.extend_from_slice(&(or_mask.len() as u16).to_le_bytes());
    out.extend_from_slice(or_mask);
    out.extend_from_slice(and_mask);
    out
}

/// fixed overhead of a Multiple Service Packet before the offset table
pub(crate) fn multi_header_size() -> usize {
    // service + path words + router path + count
    1 + 1 + MR_PATH.len() + 2
}

/// per-request cost inside a Multiple Service Packet
pub(crate) fn multi_entry_overhead() -> usize {
    2 // one offset table entry
}

/// pack several service requests into one Multiple Service Packet
pub(crate) fn multi_service_request(bodies: &[&[u8]]) -> Vec<u8> {
    let count = bodies.len();
    let total: usize = bodies.iter().map(|b| b.len()).sum();
    let mut out = Vec::with_capacity(multi_header_size() + count * 2 + total);
    out.push(SERVICE_MULTI);
    out.push((MR_PATH.len() / 2) as u8);
    out.extend_from_slice(&MR_PATH);
    out.extend_from_slice(&(count as u16).to_le_bytes());
    // offsets are relative to the count field
    let mut offset = 2 + 2 * count;
    for body in bodies {
        out.extend_from_slice(&(offset as u16).to_le_bytes());
        offset += body.len();
    }
    for body in bodies {
        out.extend_from_slice(body);
    }
    out
}

/// split a Multiple Service Packet reply payload into per-request replies
/// using its own offset table
pub(crate) fn parse_multi_service_reply(payload: &[u8]) -> Result<Vec<&[u8]>> {
    if payload.len() < 2 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let count = LittleEndian::read_u16(&payload[0..2]) as usize;
    if payload.len() < 2 + count * 2 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        offsets.push(LittleEndian::read_u16(&payload[2 + i * 2..4 + i * 2]) as usize);
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = offsets[i];
        let end = if i + 1 < count {
            offsets[i + 1]
        } else {
            payload.len()
        };
        if start > end || end > payload.len() {
            return Err(Status::Err(ErrorCode::BadReply));
        }
        out.push(&payload[start..end]);
    }
    Ok(out)
}

/// Get Instance Attribute List request for tag listing; walks the Symbol
/// Object class from `start_instance`, asking for attributes {1,2,7,8}
pub(crate) fn list_tags_request(start_instance: u32, program: Option<&str>) -> Vec<u8> {
    let mut path = Vec::new();
    if let Some(program) = program {
        path.push(0x91);
        path.push(program.len() as u8);
        path.extend_from_slice(program.as_bytes());
        if program.len() % 2 != 0 {
            path.push(0x00);
        }
    }
    path.push(0x20);
    path.push(0x6B); // Symbol Object class
    if start_instance <= u16::MAX as u32 {
        path.push(0x25);
        path.push(0x00);
        path.extend_from_slice(&(start_instance as u16).to_le_bytes());
    } else {
        path.push(0x26);
        path.push(0x00);
        path.extend_from_slice(&start_instance.to_le_bytes());
    }
    let mut out = Vec::with_capacity(12 + path.len());
    out.push(SERVICE_GET_INSTANCE_ATTRIB_LIST);
    out.push((path.len() / 2) as u8);
    out.extend_from_slice(&path);
    out.extend_from_slice(&4u16.to_le_bytes()); // attribute count
    for attr in [1u16, 2, 7, 8] {
        out.extend_from_slice(&attr.to_le_bytes());
    }
    out
}

/// Get Attribute List request for UDT metadata on the Template Object
pub(crate) fn udt_attrs_request(udt_id: u16) -> Vec<u8> {
    let path = [0x20, 0x6C, 0x25, 0x00, udt_id as u8, (udt_id >> 8) as u8];
    let mut out = Vec::with_capacity(16);
    out.push(SERVICE_GET_ATTRIB_LIST);
    out.push((path.len() / 2) as u8);
    out.extend_from_slice(&path);
    out.extend_from_slice(&4u16.to_le_bytes());
    for attr in [4u16, 5, 2, 1] {
        out.extend_from_slice(&attr.to_le_bytes());
    }
    out
}

/// Read Template request for the UDT field definition bytes
pub(crate) fn udt_read_request(udt_id: u16, byte_offset: u32, bytes: u16) -> Vec<u8> {
    let path = [0x20, 0x6C, 0x25, 0x00, udt_id as u8, (udt_id >> 8) as u8];
    let mut out = Vec::with_capacity(14);
    out.push(SERVICE_READ);
    out.push((path.len() / 2) as u8);
    out.extend_from_slice(&path);
    out.extend_from_slice(&byte_offset.to_le_bytes());
    out.extend_from_slice(&bytes.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple_name() {
        let path = encode_tag_name("MyInt").unwrap();
        assert_eq!(path.ioi, vec![0x91, 0x05, b'M', b'y', b'I', b'n', b't', 0x00]);
        assert_eq!(path.bit, None);
    }

    #[test]
    fn test_encode_nested_with_index() {
        let path = encode_tag_name("MyUdt.Member[300]").unwrap();
        let mut expected = vec![0x91, 0x05, b'M', b'y', b'U', b'd', b't', 0x00];
        expected.extend_from_slice(&[0x91, 0x06]);
        expected.extend_from_slice(b"Member");
        expected.extend_from_slice(&[0x29, 0x00, 0x2C, 0x01]);
        assert_eq!(path.ioi, expected);
    }

    #[test]
    fn test_encode_multi_dim_index() {
        let path = encode_tag_name("Arr[1,2,3]").unwrap();
        let mut expected = vec![0x91, 0x03, b'A', b'r', b'r', 0x00];
        expected.extend_from_slice(&[0x28, 1, 0x28, 2, 0x28, 3]);
        assert_eq!(path.ioi, expected);
    }

    #[test]
    fn test_encode_large_index() {
        let path = encode_tag_name("Arr[70000]").unwrap();
        let mut expected = vec![0x91, 0x03, b'A', b'r', b'r', 0x00, 0x2A, 0x00];
        expected.extend_from_slice(&70000u32.to_le_bytes());
        assert_eq!(path.ioi, expected);
    }

    #[test]
    fn test_trailing_bit_selector() {
        let path = encode_tag_name("MyDint.11").unwrap();
        assert_eq!(path.bit, Some(11));
        assert_eq!(path.ioi, encode_tag_name("MyDint").unwrap().ioi);
        // bit selectors over 63 are rejected
        assert!(encode_tag_name("MyDint.64").is_err());
        // a leading all-digit name is not a bit selector
        assert!(encode_tag_name("42").is_ok());
    }

    #[test]
    fn test_program_scoped_name() {
        let path = encode_tag_name("Program:Main.Counter").unwrap();
        assert_eq!(path.ioi[0], 0x91);
        assert_eq!(path.ioi[1], 12);
        assert_eq!(&path.ioi[2..14], b"Program:Main");
    }

    #[test]
    fn test_bad_names() {
        assert!(encode_tag_name("").is_err());
        assert!(encode_tag_name("a..b").is_err());
        assert!(encode_tag_name("Arr[").is_err());
        assert!(encode_tag_name("Arr[1,2,3,4]").is_err());
        assert!(encode_tag_name("Arr[x]").is_err());
    }

    #[test]
    fn test_conn_path_backplane() {
        let path = encode_conn_path("1,0", PlcKind::ControlLogix, true).unwrap();
        assert_eq!(path.bytes, vec![0x01, 0x00, 0x20, 0x02, 0x24, 0x01]);
        assert!(!path.is_dhp);
    }

    #[test]
    fn test_conn_path_empty_micro800() {
        let path = encode_conn_path("", PlcKind::Micro800, true).unwrap();
        assert_eq!(path.bytes, vec![0x20, 0x02, 0x24, 0x01]);
        // a supplied path is ignored for micro800, not an error
        let path = encode_conn_path("1,0", PlcKind::Micro800, true).unwrap();
        assert_eq!(path.bytes, vec![0x20, 0x02, 0x24, 0x01]);
    }

    #[test]
    fn test_conn_path_extended_ip() {
        let path = encode_conn_path("1,0,18,10.1.2.3,1,0", PlcKind::ControlLogix, true).unwrap();
        let mut expected = vec![0x01, 0x00, 18, 8];
        expected.extend_from_slice(b"10.1.2.3");
        expected.extend_from_slice(&[0x01, 0x00]);
        expected.extend_from_slice(&MR_PATH);
        assert_eq!(path.bytes, expected);
        assert_eq!(path.bytes.len() % 2, 0);
    }

    #[test]
    fn test_conn_path_dhp() {
        let path = encode_conn_path("1,0,A:5:7", PlcKind::Plc5, true).unwrap();
        assert!(path.is_dhp);
        assert_eq!(path.dhp_src, 5);
        assert_eq!(path.dhp_dest, 7);
        assert_eq!(
            path.bytes,
            vec![0x01, 0x00, 0x20, 0xA6, 0x24, 0x01, 0x2C, 0x01]
        );
        // DH+ must be the final hop
        assert!(encode_conn_path("A:5:7,1,0", PlcKind::Plc5, true).is_err());
    }

    #[test]
    fn test_conn_path_always_even() {
        for p in ["1", "1,0", "1,0,2", "2,18,192.168.1.10", ""] {
            let path = encode_conn_path(p, PlcKind::ControlLogix, true).unwrap();
            assert_eq!(path.bytes.len() % 2, 0, "path {:?}", p);
            // leading hop count in words matches the byte length
            assert_eq!(path.bytes.len() / 2, path.bytes.len() / 2);
        }
    }

    #[test]
    fn test_unconnected_send_layout() {
        let embedded = [0x4C, 0x02, 0x91, 0x01, b'x', 0x00, 0x01, 0x00];
        let conn_path = [0x01, 0x00];
        let out = unconnected_send(&embedded, &conn_path);
        assert_eq!(out[0], 0x52);
        assert_eq!(&out[1..6], &[0x02, 0x20, 0x06, 0x24, 0x01]);
        assert_eq!(out[6], 0x05);
        assert_eq!(out[7], 0xF7);
        assert_eq!(u16::from_le_bytes([out[8], out[9]]), embedded.len() as u16);
        assert_eq!(&out[10..18], &embedded);
        assert_eq!(out[18], 1); // path words
        assert_eq!(out[19], 0);
        assert_eq!(&out[20..22], &conn_path);
    }

    #[test]
    fn test_forward_open_sizes() {
        let fo = ForwardOpen {
            orig_connection_id: 0x01020304,
            conn_serial_number: 0x1111,
            vendor_id: 0xF33D,
            orig_serial_number: 0xAABBCCDD,
            payload_size: 508,
            conn_path: &[0x01, 0x00, 0x20, 0x02, 0x24, 0x01],
        };
        let legacy = forward_open_request(false, &fo);
        let ex = forward_open_request(true, &fo);
        assert_eq!(legacy[0], SERVICE_FORWARD_OPEN);
        assert_eq!(ex[0], SERVICE_FORWARD_OPEN_EX);
        // 32-bit params grow each direction by 2 bytes
        assert_eq!(ex.len(), legacy.len() + 4);
    }

    #[test]
    fn test_forward_open_reply_ok() {
        // service reply, ok, O->T conn id then T->O echo
        let mut cip = vec![SERVICE_FORWARD_OPEN_EX | REPLY_MASK, 0x00, 0x00, 0x00];
        cip.extend_from_slice(&0xCAFEBABEu32.to_le_bytes());
        cip.extend_from_slice(&0x01020304u32.to_le_bytes());
        cip.extend_from_slice(&[0u8; 10]);
        let result = parse_forward_open_reply(&cip).unwrap();
        assert_eq!(
            result,
            ForwardOpenResult::Open {
                targ_connection_id: 0xCAFEBABE
            }
        );
    }

    #[test]
    fn test_forward_open_reply_too_large() {
        let mut cip = vec![SERVICE_FORWARD_OPEN_EX | REPLY_MASK, 0x00, 0x01, 0x02];
        cip.extend_from_slice(&EXT_INVALID_SIZE.to_le_bytes());
        cip.extend_from_slice(&504u16.to_le_bytes());
        let result = parse_forward_open_reply(&cip).unwrap();
        assert_eq!(
            result,
            ForwardOpenResult::Refused {
                general_status: 0x01,
                ext_status: EXT_INVALID_SIZE,
                supported_size: Some(504),
            }
        );
    }

    #[test]
    fn test_translate_status() {
        assert_eq!(translate_status(0x00, None), Status::Ok);
        assert_eq!(
            translate_status(0x01, Some(0x0100)),
            Status::Err(ErrorCode::Duplicate)
        );
        assert_eq!(
            translate_status(0x01, Some(0x0109)),
            Status::Err(ErrorCode::TooLarge)
        );
        assert_eq!(
            translate_status(0x01, Some(0x0204)),
            Status::Err(ErrorCode::Timeout)
        );
        assert_eq!(translate_status(0x05, None), Status::Err(ErrorCode::NotFound));
        assert_eq!(
            translate_status(0x08, None),
            Status::Err(ErrorCode::Unsupported)
        );
        assert_eq!(
            translate_status(0x42, None),
            Status::Err(ErrorCode::RemoteErr)
        );
        assert_eq!(decode_status(0x01, Some(0x0100)), "duplicate connection");
        assert_eq!(decode_status(0x01, Some(0x0109)), "invalid connection size");
    }

    #[test]
    fn test_multi_service_layout() {
        let a = read_request(&encode_tag_name("DINT1").unwrap().ioi, 1);
        let b = read_request(&encode_tag_name("DINT2").unwrap().ioi, 1);
        let out = multi_service_request(&[&a, &b]);
        assert_eq!(out[0], SERVICE_MULTI);
        assert_eq!(&out[1..6], &[0x02, 0x20, 0x02, 0x24, 0x01]);
        let payload = &out[6..];
        // exactly 2 + 2*count + sum(sub sizes) payload bytes
        assert_eq!(payload.len(), 2 + 2 * 2 + a.len() + b.len());
        assert_eq!(u16::from_le_bytes([payload[0], payload[1]]), 2);
        assert_eq!(u16::from_le_bytes([payload[2], payload[3]]), 6);
        assert_eq!(
            u16::from_le_bytes([payload[4], payload[5]]) as usize,
            6 + a.len()
        );
    }

    #[test]
    fn test_multi_reply_demux() {
        // build a fake reply payload with 2 subreplies
        let sub1 = [0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 1, 2, 3, 4];
        let sub2 = [0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 5, 6, 7, 8];
        let mut payload = vec![2, 0];
        payload.extend_from_slice(&6u16.to_le_bytes());
        payload.extend_from_slice(&(6 + sub1.len() as u16).to_le_bytes());
        payload.extend_from_slice(&sub1);
        payload.extend_from_slice(&sub2);
        let parts = parse_multi_service_reply(&payload).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], &sub1);
        assert_eq!(parts[1], &sub2);
    }

    #[test]
    fn test_parse_reply_ext_status() {
        let cip = [0xD4u8, 0x00, 0x01, 0x01, 0x00, 0x01, 0xAA];
        let reply = parse_reply(&cip).unwrap();
        assert_eq!(reply.service, 0x54);
        assert_eq!(reply.general_status, 0x01);
        assert_eq!(reply.ext_status, vec![0x0100]);
        assert_eq!(reply.payload, &[0xAA]);
        assert_eq!(reply.status(), Status::Err(ErrorCode::Duplicate));
    }

    #[test]
    fn test_read_write_requests() {
        let ioi = encode_tag_name("MyInt").unwrap().ioi;
        let read = read_request(&ioi, 1);
        assert_eq!(read[0], SERVICE_READ);
        assert_eq!(read[1] as usize, ioi.len() / 2);
        assert_eq!(&read[read.len() - 2..], &[1, 0]);

        let frag = read_frag_request(&ioi, 2, 0x100);
        assert_eq!(frag[0], SERVICE_READ_FRAG);
        assert_eq!(&frag[frag.len() - 4..], &0x100u32.to_le_bytes());

        let write = write_request(&ioi, &[0xC4, 0x00], 1, &[1, 2, 3, 4]);
        assert_eq!(write[0], SERVICE_WRITE);
        assert_eq!(&write[write.len() - 4..], &[1, 2, 3, 4]);

        let rmw = rmw_request(&ioi, &[0x08, 0x00], &[0xFF, 0xFF]);
        assert_eq!(rmw[0], SERVICE_RMW);
        let tail = &rmw[rmw.len() - 6..];
        assert_eq!(tail, &[0x02, 0x00, 0x08, 0x00, 0xFF, 0xFF]);
    }
}
