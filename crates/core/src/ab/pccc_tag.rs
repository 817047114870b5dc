// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! PCCC tag backends
//!
//! [`Plc5Tag`] speaks PLC/5 typed read/write, continuing large transfers
//! through the packet-offset field. [`SlcTag`] speaks SLC/MicroLogix
//! protected typed logical commands (also used for Logix in PCCC
//! compatibility mode). [`DhpTag`] is the PLC/5 command set bridged over a
//! connected CIP send with DH+ routing words. every request wraps the
//! PCCC frame in CIP Execute PCCC, except on the DH+ channel where the
//! frame rides the connection directly.

use crate::ab::{pccc, VENDOR_ID};
use crate::session::Request;
use crate::tag::{TagContext, TagOps, TagState};
use crate::{ErrorCode, Result, Status};
use std::sync::Arc;

/// the SLC protected typed commands carry at most this many data bytes
const MAX_SLC_BYTES: usize = 236;
/// elements per PLC/5 typed transfer window
const MAX_PLC5_BYTES: usize = 220;

/// progress of one PCCC operation
struct PcccOp {
    writing: bool,
    /// elements transferred so far (PLC/5 window continuation)
    done_elems: u16,
    tnsw: u16,
    request: Option<Arc<Request>>,
}

/// shared bones of the three PCCC backends
struct PcccCore {
    addr: pccc::Address,
    elem_count: u16,
    op: Option<PcccOp>,
}

impl PcccCore {
    fn parse(name: &str, elem_count: u16, state: &mut TagState) -> Result<PcccCore> {
        let addr = pccc::Address::parse(name)?;
        state.bit = addr.bit.map(|b| b as u8);
        state.elem_size = addr.elem_size();
        state.data = vec![0u8; state.elem_size * elem_count as usize];
        Ok(PcccCore {
            addr,
            elem_count,
            op: None,
        })
    }

    fn abort(&mut self) {
        if let Some(op) = self.op.take() {
            if let Some(req) = op.request {
                req.abort();
            }
        }
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

    /// take a landed response, check the TNSW echo and hand back the
    /// PCCC data bytes
    fn take_pccc_reply(
        &mut self,
        frame: &[u8],
    ) -> std::result::Result<Vec<u8>, Status> {
        let reply = pccc::parse_reply(frame)?;
        let op = self.op.as_ref().ok_or(Status::Err(ErrorCode::BadStatus))?;
        if reply.tnsw != op.tnsw {
            log::warn!(
                "PCCC reply TNSW {:#06x} does not match request {:#06x}",
                reply.tnsw,
                op.tnsw
            );
            return Err(Status::Err(ErrorCode::BadReply));
        }
        let status = reply.status();
        if status.is_err() {
            return Err(status);
        }
        Ok(reply.data.to_vec())
    }
}

/// build the CIP Execute PCCC request body for a frame
fn execute_body(ctx: &TagContext<'_>, frame: &[u8]) -> Result<Vec<u8>> {
    let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
    Ok(pccc::execute_pccc_request(
        frame,
        VENDOR_ID,
        session.vendor_serial(),
    ))
}

fn enqueue(ctx: &TagContext<'_>, body: Vec<u8>, unconnected: bool) -> Result<Arc<Request>> {
    let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
    let req = Request::new(ctx.id, body, false, unconnected);
    session.enqueue(Arc::clone(&req));
    session.wake();
    Ok(req)
}

/// unwrap a CIP Execute PCCC reply down to the PCCC frame
fn unwrap_execute_reply(bytes: &[u8]) -> std::result::Result<Vec<u8>, Status> {
    let reply = crate::ab::cip::parse_reply(bytes)?;
    if reply.general_status != 0 {
        return Err(reply.status());
    }
    Ok(pccc::unwrap_execute_pccc_reply(reply.payload)?.to_vec())
}

// ----------------------------------------------------------------------
// PLC/5
// ----------------------------------------------------------------------

/// native PLC/5 tag over EIP
pub(crate) struct Plc5Tag {
    core: PcccCore,
}

impl Plc5Tag {
    pub(crate) fn parse(name: &str, elem_count: u16, state: &mut TagState) -> Result<Plc5Tag> {
        Ok(Plc5Tag {
            core: PcccCore::parse(name, elem_count, state)?,
        })
    }

    fn issue_next(&mut self, ctx: &TagContext<'_>, state: &TagState) -> Result<()> {
        let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
        let tnsw = session.next_tnsw();
        let op = self
            .core
            .op
            .as_mut()
            .ok_or(Status::Err(ErrorCode::BadStatus))?;
        op.tnsw = tnsw;
        let elem_size = state.elem_size.max(1);
        let frame = if op.writing {
            let elems_per_window = (MAX_PLC5_BYTES / elem_size).max(1) as u16;
            let remaining = self.core.elem_count - op.done_elems;
            let count = remaining.min(elems_per_window);
            let start = op.done_elems as usize * elem_size;
            let end = start + count as usize * elem_size;
            let mut addr = self.core.addr.clone();
            addr.element += op.done_elems;
            op.done_elems += count;
            pccc::plc5_write_request(tnsw, &addr, count, &state.data[start..end])
        } else {
            let mut addr = self.core.addr.clone();
            addr.element += op.done_elems;
            let remaining = self.core.elem_count - op.done_elems;
            pccc::plc5_read_request(tnsw, &addr, remaining)
        };
        let body = execute_body(ctx, &frame)?;
        op.request = Some(enqueue(ctx, body, !session.use_connected())?);
        Ok(())
    }
}

impl TagOps for Plc5Tag {
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        self.core.op = Some(PcccOp {
            writing: false,
            done_elems: 0,
            tnsw: 0,
            request: None,
        });
        self.issue_next(ctx, state)
    }

    fn start_write(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        self.core.op = Some(PcccOp {
            writing: true,
            done_elems: 0,
            tnsw: 0,
            request: None,
        });
        self.issue_next(ctx, state)
    }

    fn abort(&mut self) {
        self.core.abort();
    }

    fn tick(&mut self, ctx: &TagContext<'_>, state: &mut TagState) {
        let Some(op) = self.core.op.as_ref() else {
            return;
        };
        let writing = op.writing;
        let Some(req) = op.request.as_ref() else {
            return;
        };
        let Some((transport, bytes)) = req.take_response() else {
            return;
        };
        if let Some(op) = self.core.op.as_mut() {
            op.request = None;
        }
        if transport.is_err() {
            self.core.finish(state, transport, writing);
            return;
        }
        let frame = match unwrap_execute_reply(&bytes) {
            Ok(frame) => frame,
            Err(status) => {
                self.core.finish(state, status, writing);
                return;
            }
        };
        let data = match self.core.take_pccc_reply(&frame) {
            Ok(data) => data,
            Err(status) => {
                self.core.finish(state, status, writing);
                return;
            }
        };
        let elem_size = state.elem_size.max(1);
        if writing {
            let done = self
                .core
                .op
                .as_ref()
                .map(|op| op.done_elems >= self.core.elem_count)
                .unwrap_or(true);
            if done {
                self.core.finish(state, Status::Ok, true);
            } else if let Err(status) = self.issue_next(ctx, state) {
                self.core.finish(state, status, true);
            }
            return;
        }
        // reads: the PLC answers some prefix of the remaining window
        let Some(op) = self.core.op.as_mut() else {
            return;
        };
        let start = op.done_elems as usize * elem_size;
        let end = (start + data.len()).min(state.data.len());
        state.data[start..end].copy_from_slice(&data[..end - start]);
        op.done_elems += ((end - start) / elem_size) as u16;
        if op.done_elems >= self.core.elem_count || end - start == 0 {
            if op.done_elems < self.core.elem_count {
                self.core.finish(state, Status::Err(ErrorCode::TooSmall), false);
            } else {
                self.core.finish(state, Status::Ok, false);
            }
        } else if let Err(status) = self.issue_next(ctx, state) {
            self.core.finish(state, status, false);
        }
    }
}

// ----------------------------------------------------------------------
// SLC / MicroLogix / Logix-PCCC
// ----------------------------------------------------------------------

/// protected typed logical read/write backend
pub(crate) struct SlcTag {
    core: PcccCore,
}

impl SlcTag {
    pub(crate) fn parse(name: &str, elem_count: u16, state: &mut TagState) -> Result<SlcTag> {
        let core = PcccCore::parse(name, elem_count, state)?;
        if state.data.len() > MAX_SLC_BYTES {
            log::warn!(
                "SLC transfer of {} bytes exceeds the {}-byte command limit",
                state.data.len(),
                MAX_SLC_BYTES
            );
            return Err(Status::Err(ErrorCode::TooLarge));
        }
        Ok(SlcTag { core })
    }

    fn issue(&mut self, ctx: &TagContext<'_>, state: &TagState, writing: bool) -> Result<()> {
        let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
        let tnsw = session.next_tnsw();
        let frame = if writing {
            if let Some(bit) = state.bit {
                // masked word write flips just the addressed bit
                let mask = 1u16 << bit;
                let word = state
                    .byte_order
                    .get_u16(&state.data, 0)
                    .unwrap_or_default();
                pccc::slc_write_mask_request(tnsw, &self.core.addr, mask, word & mask)
            } else {
                pccc::slc_write_request(tnsw, &self.core.addr, &state.data)
            }
        } else {
            pccc::slc_read_request(tnsw, &self.core.addr, state.data.len() as u8)
        };
        let body = execute_body(ctx, &frame)?;
        let op = PcccOp {
            writing,
            done_elems: 0,
            tnsw,
            request: Some(enqueue(ctx, body, !session.use_connected())?),
        };
        self.core.op = Some(op);
        Ok(())
    }
}

impl TagOps for SlcTag {
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        self.issue(ctx, state, false)
    }

    fn start_write(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        self.issue(ctx, state, true)
    }

    fn abort(&mut self) {
        self.core.abort();
    }

    fn tick(&mut self, _ctx: &TagContext<'_>, state: &mut TagState) {
        let Some(op) = self.core.op.as_ref() else {
            return;
        };
        let writing = op.writing;
        let Some(req) = op.request.as_ref() else {
            return;
        };
        let Some((transport, bytes)) = req.take_response() else {
            return;
        };
        if let Some(op) = self.core.op.as_mut() {
            op.request = None;
        }
        if transport.is_err() {
            self.core.finish(state, transport, writing);
            return;
        }
        let result = unwrap_execute_reply(&bytes)
            .and_then(|frame| self.core.take_pccc_reply(&frame));
        match result {
            Ok(data) => {
                if !writing {
                    let n = data.len().min(state.data.len());
                    state.data[..n].copy_from_slice(&data[..n]);
                    if n < state.data.len() {
                        self.core.finish(state, Status::Err(ErrorCode::TooSmall), false);
                        return;
                    }
                }
                self.core.finish(state, Status::Ok, writing);
            }
            Err(status) => self.core.finish(state, status, writing),
        }
    }
}

// ----------------------------------------------------------------------
// DH+ bridge
// ----------------------------------------------------------------------

/// PLC/5 command set bridged over a connected CIP send with DH+ routing
pub(crate) struct DhpTag {
    core: PcccCore,
}

impl DhpTag {
    pub(crate) fn parse(name: &str, elem_count: u16, state: &mut TagState) -> Result<DhpTag> {
        let core = PcccCore::parse(name, elem_count, state)?;
        if state.data.len() > MAX_PLC5_BYTES {
            log::warn!(
                "DH+ transfer of {} bytes exceeds one window of {} bytes",
                state.data.len(),
                MAX_PLC5_BYTES
            );
            return Err(Status::Err(ErrorCode::TooLarge));
        }
        Ok(DhpTag { core })
    }

    fn issue(&mut self, ctx: &TagContext<'_>, state: &TagState, writing: bool) -> Result<()> {
        let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
        let tnsw = session.next_tnsw();
        let frame = if writing {
            pccc::plc5_write_request(tnsw, &self.core.addr, self.core.elem_count, &state.data)
        } else {
            pccc::plc5_read_request(tnsw, &self.core.addr, self.core.elem_count)
        };
        let (src, dest) = session.dhp_nodes();
        let body = pccc::dhp_wrap(dest, src, &frame);
        // DH+ frames only travel the connected channel
        let op = PcccOp {
            writing,
            done_elems: 0,
            tnsw,
            request: Some(enqueue(ctx, body, false)?),
        };
        self.core.op = Some(op);
        Ok(())
    }
}

impl TagOps for DhpTag {
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        self.issue(ctx, state, false)
    }

    fn start_write(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        self.issue(ctx, state, true)
    }

    fn abort(&mut self) {
        self.core.abort();
    }

    fn tick(&mut self, _ctx: &TagContext<'_>, state: &mut TagState) {
        let Some(op) = self.core.op.as_ref() else {
            return;
        };
        let writing = op.writing;
        let Some(req) = op.request.as_ref() else {
            return;
        };
        let Some((transport, bytes)) = req.take_response() else {
            return;
        };
        if let Some(op) = self.core.op.as_mut() {
            op.request = None;
        }
        if transport.is_err() {
            self.core.finish(state, transport, writing);
            return;
        }
        let result = pccc::dhp_unwrap(&bytes)
            .map(|frame| frame.to_vec())
            .and_then(|frame| self.core.take_pccc_reply(&frame).map_err(|s| s));
        match result {
            Ok(data) => {
                if !writing {
                    let n = data.len().min(state.data.len());
                    state.data[..n].copy_from_slice(&data[..n]);
                    if n < state.data.len() {
                        self.core.finish(state, Status::Err(ErrorCode::TooSmall), false);
                        return;
                    }
                }
                self.core.finish(state, Status::Ok, writing);
            }
            Err(status) => self.core.finish(state, status, writing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_order;

    fn test_state() -> TagState {
        TagState::new(Arc::new(byte_order::PCCC.clone()))
    }

    #[test]
    fn test_parse_sizes_buffer() {
        let mut state = test_state();
        let _tag = Plc5Tag::parse("N7:0", 4, &mut state).unwrap();
        assert_eq!(state.elem_size, 2);
        assert_eq!(state.data.len(), 8);

        let mut state = test_state();
        let _tag = SlcTag::parse("F8:3", 2, &mut state).unwrap();
        assert_eq!(state.elem_size, 4);
        assert_eq!(state.data.len(), 8);
    }

    #[test]
    fn test_bit_address_sets_state() {
        let mut state = test_state();
        let _tag = SlcTag::parse("B3:2/5", 1, &mut state).unwrap();
        assert_eq!(state.bit, Some(5));
        assert_eq!(state.elem_size, 2);
    }

    #[test]
    fn test_slc_rejects_oversize() {
        let mut state = test_state();
        // 200 integers = 400 bytes, beyond one protected typed command
        assert!(SlcTag::parse("N7:0", 200, &mut state).is_err());
    }

    #[test]
    fn test_tnsw_mismatch_detected() {
        let mut state = test_state();
        let mut tag = Plc5Tag::parse("N7:0", 1, &mut state).unwrap();
        tag.core.op = Some(PcccOp {
            writing: false,
            done_elems: 0,
            tnsw: 0x1111,
            request: None,
        });
        let reply = [
            pccc::CMD_TYPED | pccc::CMD_REPLY_MASK,
            0x00,
            0x22,
            0x22,
            0xAB,
            0xCD,
        ];
        let err = tag.core.take_pccc_reply(&reply).unwrap_err();
        assert_eq!(err, Status::Err(ErrorCode::BadReply));
        let reply = [
            pccc::CMD_TYPED | pccc::CMD_REPLY_MASK,
            0x00,
            0x11,
            0x11,
            0xAB,
            0xCD,
        ];
        assert_eq!(tag.core.take_pccc_reply(&reply).unwrap(), vec![0xAB, 0xCD]);
    }
}
