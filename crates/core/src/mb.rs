// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! Modbus TCP framing and the Modbus tag backend
//!
//! the MBAP header is big-endian `(transaction, protocol=0, length, unit)`;
//! the tag backend auto-fragments large operations into multiple PDUs and
//! matches exceptions onto library errors. register names use the `co`,
//! `di`, `hr` and `ir` prefixes with a zero-based register number.

use crate::attr::AttributeMap;
use crate::session::Request;
use crate::tag::{TagContext, TagOps, TagState};
use crate::{ErrorCode, Result, Status};
use byteorder::{BigEndian, ByteOrder};
use std::sync::Arc;

/// hard cap on one MBAP frame
pub(crate) const MAX_FRAME: usize = 300;
/// payload caps per request/response PDU
const MAX_REQUEST_PAYLOAD: usize = 246;
const MAX_RESPONSE_PAYLOAD: usize = 250;
/// register/bit counts that fit the payload caps
const MAX_REGS_PER_READ: usize = MAX_RESPONSE_PAYLOAD / 2;
const MAX_REGS_PER_WRITE: usize = MAX_REQUEST_PAYLOAD / 2;
const MAX_BITS_PER_READ: usize = (MAX_RESPONSE_PAYLOAD - 2) * 8;
const MAX_BITS_PER_WRITE: usize = (MAX_REQUEST_PAYLOAD - 2) * 8;

const FC_READ_COILS: u8 = 0x01;
const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
const FC_READ_INPUT_REGISTERS: u8 = 0x04;
const FC_WRITE_SINGLE_COIL: u8 = 0x05;
const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// wrap a PDU in an MBAP header
pub(crate) fn mbap_frame(tid: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + pdu.len());
    out.extend_from_slice(&tid.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // protocol id
    out.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
    out.push(unit_id);
    out.extend_from_slice(pdu);
    out
}

/// one complete frame located at the head of the receive buffer
pub(crate) struct MbapFrame {
    pub tid: u16,
    #[allow(dead_code)]
    pub unit_id: u8,
    pub pdu_start: usize,
    pub frame_len: usize,
}

/// frame the receive buffer: `Ok(None)` while incomplete, `Err` on a
/// length that violates the 300-byte cap
pub(crate) fn parse_mbap(buf: &[u8]) -> Result<Option<MbapFrame>> {
    if buf.len() < 7 {
        return Ok(None);
    }
    let tid = BigEndian::read_u16(&buf[0..2]);
    let protocol = BigEndian::read_u16(&buf[2..4]);
    let length = BigEndian::read_u16(&buf[4..6]) as usize;
    if protocol != 0 || length < 2 || 6 + length > MAX_FRAME {
        log::warn!("bad MBAP header (protocol {}, length {})", protocol, length);
        return Err(Status::Err(ErrorCode::BadReply));
    }
    if buf.len() < 6 + length {
        return Ok(None);
    }
    Ok(Some(MbapFrame {
        tid,
        unit_id: buf[6],
        pdu_start: 7,
        frame_len: 6 + length,
    }))
}

fn read_request(fc: u8, start: u16, quantity: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(fc);
    out.extend_from_slice(&start.to_be_bytes());
    out.extend_from_slice(&quantity.to_be_bytes());
    out
}

fn write_single_request(fc: u8, address: u16, value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(fc);
    out.extend_from_slice(&address.to_be_bytes());
    out.extend_from_slice(&value.to_be_bytes());
    out
}

fn write_multiple_request(fc: u8, start: u16, quantity: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + payload.len());
    out.push(fc);
    out.extend_from_slice(&start.to_be_bytes());
    out.extend_from_slice(&quantity.to_be_bytes());
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    out
}

/// translate a Modbus exception code
fn exception_status(code: u8) -> Status {
    match code {
        0x01 => Status::Err(ErrorCode::Unsupported),
        0x02 => Status::Err(ErrorCode::NotFound),
        0x03 => Status::Err(ErrorCode::BadParam),
        0x04 => Status::Err(ErrorCode::RemoteErr),
        0x05 => Status::Err(ErrorCode::Partial),
        0x06 => Status::Err(ErrorCode::Busy),
        0x08 => Status::Err(ErrorCode::RemoteErr),
        _ => Status::Err(ErrorCode::RemoteErr),
    }
}

/// check a reply PDU against the request function code and peel it
fn parse_pdu(expected_fc: u8, pdu: &[u8]) -> Result<&[u8]> {
    if pdu.is_empty() {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let fc = pdu[0];
    if fc == expected_fc | 0x80 {
        let code = pdu.get(1).copied().unwrap_or(0);
        log::warn!("modbus exception {:#04x} for fc {:#04x}", code, expected_fc);
        return Err(exception_status(code));
    }
    if fc != expected_fc {
        return Err(Status::Err(ErrorCode::BadReply));
    }
    Ok(&pdu[1..])
}

/// the four Modbus register spaces
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum RegType {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegType {
    fn is_bit(&self) -> bool {
        matches!(self, RegType::Coil | RegType::DiscreteInput)
    }

    fn writable(&self) -> bool {
        matches!(self, RegType::Coil | RegType::HoldingRegister)
    }

    fn read_fc(&self) -> u8 {
        match self {
            RegType::Coil => FC_READ_COILS,
            RegType::DiscreteInput => FC_READ_DISCRETE_INPUTS,
            RegType::HoldingRegister => FC_READ_HOLDING_REGISTERS,
            RegType::InputRegister => FC_READ_INPUT_REGISTERS,
        }
    }
}

/// in-flight operation progress
struct MbOp {
    writing: bool,
    /// units transferred so far: registers for register spaces, bits for
    /// coil spaces
    done: usize,
    total: usize,
    expected_fc: u8,
    request: Option<Arc<Request>>,
}

/// Modbus tag backend
pub(crate) struct ModbusTag {
    reg_type: RegType,
    base: u16,
    op: Option<MbOp>,
}

impl ModbusTag {
    /// parse `co42` / `di22` / `hr66` / `ir64000` and size the tag buffer
    pub(crate) fn parse(
        name: &str,
        elem_count: u16,
        attrs: &AttributeMap,
        state: &mut TagState,
    ) -> Result<ModbusTag> {
        if name.len() < 3 {
            log::warn!("malformed modbus register name \"{}\"", name);
            return Err(Status::Err(ErrorCode::BadParam));
        }
        let (prefix, number) = name.split_at(2);
        let reg_type = match prefix.to_ascii_lowercase().as_str() {
            "co" => RegType::Coil,
            "di" => RegType::DiscreteInput,
            "hr" => RegType::HoldingRegister,
            "ir" => RegType::InputRegister,
            _ => {
                log::warn!("unknown modbus register type in \"{}\"", name);
                return Err(Status::Err(ErrorCode::BadParam));
            }
        };
        let base: u16 = number.parse().map_err(|_| {
            log::warn!("bad modbus register number in \"{}\"", name);
            Status::Err(ErrorCode::BadParam)
        })?;
        if reg_type.is_bit() {
            // one element per bit, packed 8 to a byte
            state.elem_size = 1;
            state.data = vec![0u8; (elem_count as usize + 7) / 8];
        } else {
            let elem_size: usize = attrs.get_int("elem_size", 2usize)?;
            if elem_size == 0 || elem_size % 2 != 0 {
                log::warn!("modbus elem_size must be a multiple of 2, got {}", elem_size);
                return Err(Status::Err(ErrorCode::BadParam));
            }
            state.elem_size = elem_size;
            state.data = vec![0u8; elem_size * elem_count as usize];
        }
        Ok(ModbusTag {
            reg_type,
            base,
            op: None,
        })
    }

    fn total_units(&self, state: &TagState) -> usize {
        if self.reg_type.is_bit() {
            state.elem_count
        } else {
            state.data.len() / 2
        }
    }

    /// build and enqueue the next fragment of the running operation
    fn issue_next(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
        let op = self.op.as_mut().ok_or(Status::Err(ErrorCode::BadStatus))?;
        let remaining = op.total - op.done;
        let start = self.base as usize + op.done;
        if start + remaining > u16::MAX as usize + 1 {
            return Err(Status::Err(ErrorCode::OutOfBounds));
        }
        let pdu = if op.writing {
            match self.reg_type {
                RegType::HoldingRegister => {
                    if op.total == 1 {
                        let value = BigEndian::read_u16(&state.data[0..2]);
                        op.expected_fc = FC_WRITE_SINGLE_REGISTER;
                        write_single_request(FC_WRITE_SINGLE_REGISTER, start as u16, value)
                    } else {
                        let count = remaining.min(MAX_REGS_PER_WRITE);
                        let bytes = &state.data[op.done * 2..(op.done + count) * 2];
                        op.expected_fc = FC_WRITE_MULTIPLE_REGISTERS;
                        write_multiple_request(
                            FC_WRITE_MULTIPLE_REGISTERS,
                            start as u16,
                            count as u16,
                            bytes,
                        )
                    }
                }
                RegType::Coil => {
                    if op.total == 1 {
                        let on = state.data[0] & 0x01 != 0;
                        op.expected_fc = FC_WRITE_SINGLE_COIL;
                        write_single_request(
                            FC_WRITE_SINGLE_COIL,
                            start as u16,
                            if on { 0xFF00 } else { 0x0000 },
                        )
                    } else {
                        // keep fragments byte aligned in the tag buffer
                        let count = remaining.min(MAX_BITS_PER_WRITE);
                        let count = if count < remaining { count & !7 } else { count };
                        let first = op.done / 8;
                        let bytes = &state.data[first..first + (count + 7) / 8];
                        op.expected_fc = FC_WRITE_MULTIPLE_COILS;
                        write_multiple_request(
                            FC_WRITE_MULTIPLE_COILS,
                            start as u16,
                            count as u16,
                            bytes,
                        )
                    }
                }
                _ => return Err(Status::Err(ErrorCode::NotAllowed)),
            }
        } else {
            let fc = self.reg_type.read_fc();
            op.expected_fc = fc;
            let count = if self.reg_type.is_bit() {
                let count = remaining.min(MAX_BITS_PER_READ);
                if count < remaining {
                    count & !7
                } else {
                    count
                }
            } else {
                remaining.min(MAX_REGS_PER_READ)
            };
            read_request(fc, start as u16, count as u16)
        };
        let req = Request::new(ctx.id, pdu, false, true);
        op.request = Some(Arc::clone(&req));
        session.enqueue(req);
        session.wake();
        Ok(())
    }

    fn finish(&mut self, state: &mut TagState, status: Status, writing: bool) {
        self.op = None;
        state.status = status;
        if writing {
            state.write_complete = true;
        } else {
            state.read_complete = true;
        }
    }

    /// consume one reply PDU; returns true when the operation continues
    fn apply_response(&mut self, state: &mut TagState, pdu: &[u8]) -> Result<bool> {
        let op = self.op.as_mut().ok_or(Status::Err(ErrorCode::BadStatus))?;
        let body = parse_pdu(op.expected_fc, pdu)?;
        if op.writing {
            let advanced = match op.expected_fc {
                FC_WRITE_SINGLE_REGISTER => 1,
                FC_WRITE_SINGLE_COIL => 1,
                FC_WRITE_MULTIPLE_REGISTERS | FC_WRITE_MULTIPLE_COILS => {
                    if body.len() < 4 {
                        return Err(Status::Err(ErrorCode::TooSmall));
                    }
                    BigEndian::read_u16(&body[2..4]) as usize
                }
                _ => return Err(Status::Err(ErrorCode::BadReply)),
            };
            op.done += advanced;
        } else {
            // read replies: byte count then data
            if body.is_empty() {
                return Err(Status::Err(ErrorCode::TooSmall));
            }
            let byte_count = body[0] as usize;
            let data = &body[1..];
            if data.len() < byte_count {
                return Err(Status::Err(ErrorCode::TooSmall));
            }
            if self.reg_type.is_bit() {
                let first = op.done / 8;
                let end = (first + byte_count).min(state.data.len());
                state.data[first..end].copy_from_slice(&data[..end - first]);
                let bits = (byte_count * 8).min(op.total - op.done);
                op.done += bits;
            } else {
                let first = op.done * 2;
                let end = (first + byte_count).min(state.data.len());
                state.data[first..end].copy_from_slice(&data[..end - first]);
                op.done += byte_count / 2;
            }
        }
        Ok(op.done < op.total)
    }
}

impl TagOps for ModbusTag {
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        let total = self.total_units(state);
        if total == 0 {
            return Err(Status::Err(ErrorCode::BadParam));
        }
        self.op = Some(MbOp {
            writing: false,
            done: 0,
            total,
            expected_fc: 0,
            request: None,
        });
        self.issue_next(ctx, state)
    }

    fn start_write(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        if !self.reg_type.writable() {
            log::warn!("write to read-only modbus register type");
            return Err(Status::Err(ErrorCode::NotAllowed));
        }
        let total = self.total_units(state);
        if total == 0 {
            return Err(Status::Err(ErrorCode::BadParam));
        }
        self.op = Some(MbOp {
            writing: true,
            done: 0,
            total,
            expected_fc: 0,
            request: None,
        });
        self.issue_next(ctx, state)
    }

    fn abort(&mut self) {
        if let Some(op) = self.op.take() {
            if let Some(req) = op.request {
                req.abort();
            }
        }
    }

    fn tick(&mut self, ctx: &TagContext<'_>, state: &mut TagState) {
        let Some(op) = self.op.as_mut() else {
            return;
        };
        let writing = op.writing;
        let Some(req) = op.request.as_ref() else {
            return;
        };
        let Some((status, pdu)) = req.take_response() else {
            return;
        };
        op.request = None;
        if status.is_err() {
            self.finish(state, status, writing);
            return;
        }
        match self.apply_response(state, &pdu) {
            Ok(true) => {
                if let Err(status) = self.issue_next(ctx, state) {
                    self.finish(state, status, writing);
                }
            }
            Ok(false) => self.finish(state, Status::Ok, writing),
            Err(status) => self.finish(state, status, writing),
        }
    }

    fn get_int_attr(&self, _state: &TagState, name: &str) -> Option<i32> {
        match name {
            "register" => Some(self.base as i32),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbap_frame_layout() {
        // spec scenario: hr10, 4 registers on unit 1
        let pdu = read_request(FC_READ_HOLDING_REGISTERS, 10, 4);
        let frame = mbap_frame(1, 1, &pdu);
        assert_eq!(
            frame,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x0A, 0x00, 0x04]
        );
    }

    #[test]
    fn test_parse_mbap_incremental() {
        let pdu = [0x03u8, 0x02, 0xAA, 0xBB];
        let frame = mbap_frame(7, 1, &pdu);
        for cut in 0..frame.len() {
            assert!(parse_mbap(&frame[..cut]).unwrap().is_none());
        }
        let parsed = parse_mbap(&frame).unwrap().unwrap();
        assert_eq!(parsed.tid, 7);
        assert_eq!(parsed.unit_id, 1);
        assert_eq!(&frame[parsed.pdu_start..parsed.frame_len], &pdu);
    }

    #[test]
    fn test_parse_mbap_cap() {
        let mut bad = vec![0, 1, 0, 0, 0x02, 0xFF, 1];
        bad.extend_from_slice(&[0; 8]);
        assert!(parse_mbap(&bad).is_err());
    }

    #[test]
    fn test_exception_translation() {
        let pdu = [FC_READ_HOLDING_REGISTERS | 0x80, 0x02];
        let err = parse_pdu(FC_READ_HOLDING_REGISTERS, &pdu).unwrap_err();
        assert_eq!(err, Status::Err(ErrorCode::NotFound));
        let pdu = [FC_READ_HOLDING_REGISTERS | 0x80, 0x01];
        assert_eq!(
            parse_pdu(FC_READ_HOLDING_REGISTERS, &pdu).unwrap_err(),
            Status::Err(ErrorCode::Unsupported)
        );
        let pdu = [FC_READ_HOLDING_REGISTERS | 0x80, 0x03];
        assert_eq!(
            parse_pdu(FC_READ_HOLDING_REGISTERS, &pdu).unwrap_err(),
            Status::Err(ErrorCode::BadParam)
        );
    }

    #[test]
    fn test_register_name_parse() {
        let attrs = AttributeMap::parse("").unwrap();
        let mut state = test_state();
        let tag = ModbusTag::parse("hr66", 1, &attrs, &mut state).unwrap();
        assert_eq!(tag.reg_type, RegType::HoldingRegister);
        assert_eq!(tag.base, 66);
        assert_eq!(state.data.len(), 2);

        let mut state = test_state();
        let tag = ModbusTag::parse("co21", 10, &attrs, &mut state).unwrap();
        assert_eq!(tag.reg_type, RegType::Coil);
        // ceil(10/8) data bytes for 10 coils
        assert_eq!(state.data.len(), 2);

        let mut state = test_state();
        assert!(ModbusTag::parse("xx1", 1, &attrs, &mut state).is_err());
        assert!(ModbusTag::parse("hr", 1, &attrs, &mut state).is_err());
    }

    #[test]
    fn test_read_response_copies_registers() {
        let attrs = AttributeMap::parse("").unwrap();
        let mut state = test_state();
        state.elem_count = 2;
        let mut tag = ModbusTag::parse("hr0", 2, &attrs, &mut state).unwrap();
        state.data = vec![0u8; 4];
        tag.op = Some(MbOp {
            writing: false,
            done: 0,
            total: 2,
            expected_fc: FC_READ_HOLDING_REGISTERS,
            request: None,
        });
        let pdu = [FC_READ_HOLDING_REGISTERS, 4, 0x12, 0x34, 0x56, 0x78];
        let more = tag.apply_response(&mut state, &pdu).unwrap();
        assert!(!more);
        assert_eq!(state.data, vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_coil_read_bit_layout() {
        let attrs = AttributeMap::parse("").unwrap();
        let mut state = test_state();
        state.elem_count = 10;
        let mut tag = ModbusTag::parse("co0", 10, &attrs, &mut state).unwrap();
        tag.op = Some(MbOp {
            writing: false,
            done: 0,
            total: 10,
            expected_fc: FC_READ_COILS,
            request: None,
        });
        // bits 0 and 9 on
        let pdu = [FC_READ_COILS, 2, 0b0000_0001, 0b0000_0010];
        tag.apply_response(&mut state, &pdu).unwrap();
        assert_eq!(state.data, vec![0b0000_0001, 0b0000_0010]);
    }

    fn test_state() -> TagState {
        use crate::byte_order;
        crate::tag::TagState::new(Arc::new(byte_order::MODBUS.clone()))
    }
}
