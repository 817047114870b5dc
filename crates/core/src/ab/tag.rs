// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! CIP tag backends: plain tags, `@raw` pass-through, `@tags` listing and
//! `@udt/<id>` template metadata
//!
//! element size and type are discovered from the first read reply (the
//! leading two to six bytes are the encoded type) and cached for writes.
//! reads larger than the negotiated payload continue with Read Tag
//! Fragmented; Omron only ever uses the plain service.

use crate::ab::cip;
use crate::attr::AttributeMap;
use crate::byte_order::ByteOrder;
use crate::plc::PlcKind;
use crate::session::{Request, Session};
use crate::tag::{TagContext, TagOps, TagState};
use crate::{ErrorCode, Result, Status};
use byteorder::{ByteOrder as _, LittleEndian};
use std::sync::Arc;

/// CIP elementary type codes
const TYPE_BOOL: u8 = 0xC1;
const TYPE_SINT: u8 = 0xC2;
const TYPE_INT: u8 = 0xC3;
const TYPE_DINT: u8 = 0xC4;
const TYPE_LINT: u8 = 0xC5;
const TYPE_USINT: u8 = 0xC6;
const TYPE_UINT: u8 = 0xC7;
const TYPE_UDINT: u8 = 0xC8;
const TYPE_ULINT: u8 = 0xC9;
const TYPE_REAL: u8 = 0xCA;
const TYPE_LREAL: u8 = 0xCB;
const TYPE_BOOL_ARRAY: u8 = 0xD3;
/// marker pair for structured types: `A0 02` then a 2-byte handle
const TYPE_STRUCT_LO: u8 = 0xA0;
const TYPE_STRUCT_HI: u8 = 0x02;

/// rough per-request overhead reserved out of the payload budget
const REQUEST_OVERHEAD: usize = 16;

fn elem_size_for_type(code: u8) -> Option<usize> {
    Some(match code {
        TYPE_BOOL | TYPE_SINT | TYPE_USINT => 1,
        TYPE_INT | TYPE_UINT => 2,
        TYPE_DINT | TYPE_UDINT | TYPE_REAL | TYPE_BOOL_ARRAY => 4,
        TYPE_LINT | TYPE_ULINT | TYPE_LREAL => 8,
        _ => return None,
    })
}

/// map the `elem_type` attribute onto `(elem_size, encoded type)`
fn parse_elem_type(value: &str, order: &ByteOrder) -> Result<(usize, Vec<u8>)> {
    let v = value.to_ascii_lowercase();
    let (size, code) = match v.as_str() {
        "bool" => (1, TYPE_BOOL),
        "sint" => (1, TYPE_SINT),
        "usint" => (1, TYPE_USINT),
        "int" => (2, TYPE_INT),
        "uint" => (2, TYPE_UINT),
        "dint" => (4, TYPE_DINT),
        "udint" => (4, TYPE_UDINT),
        "lint" => (8, TYPE_LINT),
        "ulint" => (8, TYPE_ULINT),
        "real" => (4, TYPE_REAL),
        "lreal" => (8, TYPE_LREAL),
        "bool array" => (4, TYPE_BOOL_ARRAY),
        "string" => {
            if order.str_total_length == 0 {
                log::warn!("elem_type=string needs a defined string total length");
                return Err(Status::Err(ErrorCode::BadParam));
            }
            return Ok((order.str_total_length, Vec::new()));
        }
        "short string" => {
            let capacity = if order.str_max_capacity > 0 {
                order.str_max_capacity
            } else {
                81
            };
            return Ok((1 + capacity, Vec::new()));
        }
        _ => {
            log::warn!("unknown elem_type \"{}\"", value);
            return Err(Status::Err(ErrorCode::BadParam));
        }
    };
    Ok((size, vec![code, 0x00]))
}

/// split the type prefix off a read reply payload
fn split_type_info(payload: &[u8]) -> Result<(&[u8], &[u8])> {
    if payload.len() < 2 {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    let type_len = if payload[0] == TYPE_STRUCT_LO && payload[1] == TYPE_STRUCT_HI {
        4
    } else {
        2
    };
    if payload.len() < type_len {
        return Err(Status::Err(ErrorCode::TooSmall));
    }
    Ok((&payload[..type_len], &payload[type_len..]))
}

fn enqueue(
    ctx: &TagContext<'_>,
    body: Vec<u8>,
    allow_packing: bool,
    unconnected: bool,
) -> Result<Arc<Request>> {
    let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
    let req = Request::new(ctx.id, body, allow_packing, unconnected);
    session.enqueue(Arc::clone(&req));
    session.wake();
    Ok(req)
}

/// backend for ordinary CIP tags
pub(crate) struct CipTag {
    ioi: Vec<u8>,
    kind: PlcKind,
    use_connected: bool,
    allow_packing: bool,
    /// encoded type from the first read (or `elem_type`); required for
    /// writes
    type_info: Vec<u8>,
    /// byte offset of the running fragmented operation
    offset: usize,
    writing: bool,
    request: Option<Arc<Request>>,
}

impl CipTag {
    pub(crate) fn parse(
        name: &str,
        attrs: &AttributeMap,
        kind: PlcKind,
        use_connected: bool,
        allow_packing: bool,
        state: &mut TagState,
    ) -> Result<CipTag> {
        let tag_ioi = cip::encode_tag_name(name)?;
        state.bit = tag_ioi.bit;
        let mut type_info = Vec::new();
        if let Some(et) = attrs.get("elem_type") {
            let (size, info) = parse_elem_type(et, &state.byte_order)?;
            state.elem_size = size;
            type_info = info;
        } else if let Some(_es) = attrs.get("elem_size") {
            state.elem_size = attrs.get_int("elem_size", 0usize)?;
        }
        state.data = vec![0u8; state.elem_size * state.elem_count];
        Ok(CipTag {
            ioi: tag_ioi.ioi,
            kind,
            use_connected,
            allow_packing,
            type_info,
            offset: 0,
            writing: false,
            request: None,
        })
    }

    fn budget(&self, session: &Arc<Session>) -> usize {
        session
            .max_payload()
            .saturating_sub(self.ioi.len() + REQUEST_OVERHEAD)
    }

    fn issue_read(&mut self, ctx: &TagContext<'_>, state: &TagState) -> Result<()> {
        let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
        let count = state.elem_count as u16;
        let known = state.elem_size * state.elem_count;
        let body = if self.offset == 0 {
            if known > 0 && known > self.budget(session) && self.kind.supports_fragmented_read() {
                cip::read_frag_request(&self.ioi, count, 0)
            } else {
                cip::read_request(&self.ioi, count)
            }
        } else {
            if !self.kind.supports_fragmented_read() {
                log::warn!("tag needs fragmented reads which this family lacks");
                return Err(Status::Err(ErrorCode::TooLarge));
            }
            cip::read_frag_request(&self.ioi, count, self.offset as u32)
        };
        self.request = Some(enqueue(ctx, body, self.allow_packing, !self.use_connected)?);
        Ok(())
    }

    fn issue_write(&mut self, ctx: &TagContext<'_>, state: &TagState) -> Result<()> {
        let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
        if let Some(bit) = state.bit {
            // single-bit writes go through Read-Modify-Write
            let width = state.elem_size.max(1).min(8);
            if (bit as usize) >= width * 8 {
                return Err(Status::Err(ErrorCode::OutOfBounds));
            }
            let set = state
                .data
                .get(bit as usize / 8)
                .map(|b| b & (1 << (bit % 8)) != 0)
                .unwrap_or(false);
            let mut or_mask = vec![0u8; width];
            let mut and_mask = vec![0xFFu8; width];
            if set {
                or_mask[bit as usize / 8] |= 1 << (bit % 8);
            } else {
                and_mask[bit as usize / 8] &= !(1 << (bit % 8));
            }
            let body = cip::rmw_request(&self.ioi, &or_mask, &and_mask);
            self.request = Some(enqueue(ctx, body, self.allow_packing, !self.use_connected)?);
            return Ok(());
        }
        if self.type_info.is_empty() {
            log::warn!("tag type unknown; read the tag once or set elem_type before writing");
            return Err(Status::Err(ErrorCode::BadParam));
        }
        let total = state.data.len();
        let budget = self.budget(session).saturating_sub(self.type_info.len() + 8);
        let count = state.elem_count as u16;
        let body = if total <= budget && self.offset == 0 {
            self.offset = total;
            cip::write_request(&self.ioi, &self.type_info, count, &state.data)
        } else {
            // fragment on element boundaries
            let elem = state.elem_size.max(1);
            let mut chunk = budget.min(total - self.offset);
            if chunk > elem {
                chunk -= chunk % elem;
            }
            if chunk == 0 {
                return Err(Status::Err(ErrorCode::TooLarge));
            }
            let start = self.offset;
            self.offset += chunk;
            cip::write_frag_request(
                &self.ioi,
                &self.type_info,
                count,
                start as u32,
                &state.data[start..start + chunk],
            )
        };
        self.request = Some(enqueue(ctx, body, self.allow_packing, !self.use_connected)?);
        Ok(())
    }

    fn finish(&mut self, state: &mut TagState, status: Status) {
        let writing = self.writing;
        self.request = None;
        self.offset = 0;
        state.status = status;
        if writing {
            state.write_complete = true;
        } else {
            state.read_complete = true;
        }
    }

    fn handle_read_reply(
        &mut self,
        ctx: &TagContext<'_>,
        state: &mut TagState,
        reply: cip::Reply<'_>,
    ) {
        let status = reply.status();
        let partial = reply.general_status == cip::STATUS_PARTIAL;
        if status.is_err() && !partial {
            log::warn!(
                "read of tag {} failed: {}",
                ctx.id.value(),
                cip::decode_status(reply.general_status, reply.ext_status.first().copied())
            );
            self.finish(state, status);
            return;
        }
        let (type_info, data) = match split_type_info(reply.payload) {
            Ok(parts) => parts,
            Err(status) => {
                self.finish(state, status);
                return;
            }
        };
        if self.type_info.is_empty() || self.offset == 0 {
            self.type_info = type_info.to_vec();
            if state.elem_size == 0 {
                if let Some(size) = elem_size_for_type(type_info[0]) {
                    state.elem_size = size;
                }
            }
        }
        if state.data.len() < self.offset + data.len() {
            state.data.resize(self.offset + data.len(), 0);
        }
        state.data[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();
        if partial {
            if let Err(status) = self.issue_read(ctx, state) {
                self.finish(state, status);
            }
            return;
        }
        // the PLC is authoritative for the full size
        let total = self.offset;
        state.data.truncate(total);
        if state.elem_size == 0 && state.elem_count > 0 && total % state.elem_count == 0 {
            state.elem_size = total / state.elem_count;
        }
        self.finish(state, Status::Ok);
    }

    fn handle_write_reply(
        &mut self,
        ctx: &TagContext<'_>,
        state: &mut TagState,
        reply: cip::Reply<'_>,
    ) {
        let status = reply.status();
        if status.is_err() {
            log::warn!(
                "write of tag {} failed: {}",
                ctx.id.value(),
                cip::decode_status(reply.general_status, reply.ext_status.first().copied())
            );
            self.finish(state, status);
            return;
        }
        if state.bit.is_none() && self.offset < state.data.len() {
            if let Err(status) = self.issue_write(ctx, state) {
                self.finish(state, status);
            }
            return;
        }
        self.finish(state, Status::Ok);
    }
}

impl TagOps for CipTag {
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        self.writing = false;
        self.offset = 0;
        self.issue_read(ctx, state)
    }

    fn start_write(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        self.writing = true;
        self.offset = 0;
        self.issue_write(ctx, state)
    }

    fn abort(&mut self) {
        if let Some(req) = self.request.take() {
            req.abort();
        }
        self.offset = 0;
    }

    fn tick(&mut self, ctx: &TagContext<'_>, state: &mut TagState) {
        let Some(req) = self.request.as_ref() else {
            return;
        };
        let Some((transport, bytes)) = req.take_response() else {
            return;
        };
        self.request = None;
        if transport.is_err() {
            self.finish(state, transport);
            return;
        }
        let reply = match cip::parse_reply(&bytes) {
            Ok(reply) => reply,
            Err(status) => {
                self.finish(state, status);
                return;
            }
        };
        if self.writing {
            self.handle_write_reply(ctx, state, reply);
        } else {
            self.handle_read_reply(ctx, state, reply);
        }
    }

    fn get_int_attr(&self, _state: &TagState, name: &str) -> Option<i32> {
        match name {
            "elem_type" => {
                if self.type_info.len() >= 2 {
                    Some(LittleEndian::read_u16(&self.type_info[..2]) as i32)
                } else {
                    Some(0)
                }
            }
            _ => None,
        }
    }
}

/// backend for the `@raw` pass-through tag: the client fills the buffer
/// with a CIP request, writes, and reads the raw reply back
pub(crate) struct RawCipTag {
    use_connected: bool,
    request: Option<Arc<Request>>,
}

impl RawCipTag {
    pub(crate) fn new(use_connected: bool) -> RawCipTag {
        RawCipTag {
            use_connected,
            request: None,
        }
    }
}

impl TagOps for RawCipTag {
    fn start_read(&mut self, _ctx: &TagContext<'_>, _state: &mut TagState) -> Result<()> {
        log::warn!("@raw tags only support write");
        Err(Status::Err(ErrorCode::NotAllowed))
    }

    fn start_write(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        if state.data.is_empty() {
            return Err(Status::Err(ErrorCode::NoData));
        }
        let body = state.data.clone();
        self.request = Some(enqueue(ctx, body, false, !self.use_connected)?);
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(req) = self.request.take() {
            req.abort();
        }
    }

    fn tick(&mut self, _ctx: &TagContext<'_>, state: &mut TagState) {
        let Some(req) = self.request.as_ref() else {
            return;
        };
        let Some((transport, bytes)) = req.take_response() else {
            return;
        };
        self.request = None;
        state.status = if transport.is_err() {
            transport
        } else {
            // the whole reply, status bytes included, goes to the client
            state.data = bytes;
            state.elem_size = 1;
            state.elem_count = state.data.len();
            Status::Ok
        };
        state.write_complete = true;
    }
}

/// backend for `@tags` / `PROGRAM:name.@tags` controller and program tag
/// listing. the buffer accumulates the raw instance records:
/// `(instance u32, name_len u16, name, type u16, elem_size u16, dims u32×3)`
pub(crate) struct ListingTag {
    program: Option<String>,
    use_connected: bool,
    next_instance: u32,
    request: Option<Arc<Request>>,
}

impl ListingTag {
    /// recognise a listing tag name; `Ok(None)` when it is a plain tag
    pub(crate) fn parse(name: &str, use_connected: bool) -> Result<Option<ListingTag>> {
        let lower = name.to_ascii_lowercase();
        let program = if lower == "@tags" {
            None
        } else if let Some(prefix) = lower.strip_suffix(".@tags") {
            if !prefix.starts_with("program:") {
                log::warn!("listing tag \"{}\" must be PROGRAM:name.@tags", name);
                return Err(Status::Err(ErrorCode::BadParam));
            }
            Some(name[..prefix.len()].to_owned())
        } else {
            return Ok(None);
        };
        Ok(Some(ListingTag {
            program,
            use_connected,
            next_instance: 0,
            request: None,
        }))
    }

    fn issue(&mut self, ctx: &TagContext<'_>) -> Result<()> {
        let body = cip::list_tags_request(self.next_instance, self.program.as_deref());
        self.request = Some(enqueue(ctx, body, false, !self.use_connected)?);
        Ok(())
    }

    /// walk the appended records to find the last instance id
    fn last_instance(payload: &[u8]) -> Result<u32> {
        let mut pos = 0;
        let mut last = None;
        while pos < payload.len() {
            if pos + 6 > payload.len() {
                return Err(Status::Err(ErrorCode::BadData));
            }
            let id = LittleEndian::read_u32(&payload[pos..pos + 4]);
            let name_len = LittleEndian::read_u16(&payload[pos + 4..pos + 6]) as usize;
            pos += 6 + name_len + 2 + 2 + 12;
            if pos > payload.len() {
                return Err(Status::Err(ErrorCode::BadData));
            }
            last = Some(id);
        }
        last.ok_or(Status::Err(ErrorCode::NoData))
    }
}

impl TagOps for ListingTag {
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        state.data.clear();
        self.next_instance = 0;
        self.issue(ctx)
    }

    fn start_write(&mut self, _ctx: &TagContext<'_>, _state: &mut TagState) -> Result<()> {
        Err(Status::Err(ErrorCode::NotAllowed))
    }

    fn abort(&mut self) {
        if let Some(req) = self.request.take() {
            req.abort();
        }
    }

    fn tick(&mut self, ctx: &TagContext<'_>, state: &mut TagState) {
        let Some(req) = self.request.as_ref() else {
            return;
        };
        let Some((transport, bytes)) = req.take_response() else {
            return;
        };
        self.request = None;
        let finish = |state: &mut TagState, status: Status| {
            state.status = status;
            state.read_complete = true;
        };
        if transport.is_err() {
            finish(state, transport);
            return;
        }
        let reply = match cip::parse_reply(&bytes) {
            Ok(reply) => reply,
            Err(status) => return finish(state, status),
        };
        let partial = reply.general_status == cip::STATUS_PARTIAL;
        if reply.general_status != cip::STATUS_OK && !partial {
            return finish(state, reply.status());
        }
        state.data.extend_from_slice(reply.payload);
        if partial {
            match Self::last_instance(reply.payload) {
                Ok(last) => {
                    self.next_instance = last + 1;
                    if let Err(status) = self.issue(ctx) {
                        finish(state, status);
                    }
                }
                Err(status) => finish(state, status),
            }
            return;
        }
        state.elem_size = 1;
        state.elem_count = state.data.len();
        finish(state, Status::Ok);
    }
}

enum UdtPhase {
    Attrs,
    Template,
}

/// backend for `@udt/<id>` template metadata: a Get Attribute List reply
/// header followed by the raw template definition bytes
pub(crate) struct UdtTag {
    udt_id: u16,
    use_connected: bool,
    phase: UdtPhase,
    template_offset: u32,
    template_size: u32,
    request: Option<Arc<Request>>,
}

impl UdtTag {
    pub(crate) fn parse(name: &str, use_connected: bool) -> Result<Option<UdtTag>> {
        let Some(rest) = name.strip_prefix("@udt/") else {
            return Ok(None);
        };
        let udt_id: u16 = rest.parse().map_err(|_| {
            log::warn!("bad UDT id in \"{}\"", name);
            Status::Err(ErrorCode::BadParam)
        })?;
        Ok(Some(UdtTag {
            udt_id,
            use_connected,
            phase: UdtPhase::Attrs,
            template_offset: 0,
            template_size: 0,
            request: None,
        }))
    }

    /// pull the definition size (attribute 4, in 32-bit words) out of the
    /// Get Attribute List reply
    fn parse_attr_reply(payload: &[u8]) -> Result<u32> {
        if payload.len() < 2 {
            return Err(Status::Err(ErrorCode::TooSmall));
        }
        let count = LittleEndian::read_u16(&payload[0..2]) as usize;
        let mut pos = 2;
        for _ in 0..count {
            if pos + 4 > payload.len() {
                return Err(Status::Err(ErrorCode::BadData));
            }
            let attr = LittleEndian::read_u16(&payload[pos..pos + 2]);
            let status = LittleEndian::read_u16(&payload[pos + 2..pos + 4]);
            pos += 4;
            let width = match attr {
                4 | 5 => 4,
                2 | 1 => 2,
                _ => return Err(Status::Err(ErrorCode::BadData)),
            };
            if pos + width > payload.len() {
                return Err(Status::Err(ErrorCode::TooSmall));
            }
            if attr == 4 && status == 0 {
                let words = LittleEndian::read_u32(&payload[pos..pos + 4]);
                // the definition bytes exclude the 23-byte header the
                // controller keeps internally
                return Ok((words * 4).saturating_sub(23));
            }
            pos += width;
        }
        Err(Status::Err(ErrorCode::NoData))
    }

    fn issue_template_read(&mut self, ctx: &TagContext<'_>) -> Result<()> {
        let session = ctx.session.ok_or(Status::Err(ErrorCode::BadConnection))?;
        let remaining = self.template_size - self.template_offset;
        let chunk = remaining.min(session.max_payload().saturating_sub(REQUEST_OVERHEAD) as u32);
        let body = cip::udt_read_request(self.udt_id, self.template_offset, chunk as u16);
        self.request = Some(enqueue(ctx, body, false, !self.use_connected)?);
        Ok(())
    }
}

impl TagOps for UdtTag {
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        state.data.clear();
        self.phase = UdtPhase::Attrs;
        self.template_offset = 0;
        self.template_size = 0;
        let body = cip::udt_attrs_request(self.udt_id);
        self.request = Some(enqueue(ctx, body, false, !self.use_connected)?);
        Ok(())
    }

    fn start_write(&mut self, _ctx: &TagContext<'_>, _state: &mut TagState) -> Result<()> {
        Err(Status::Err(ErrorCode::NotAllowed))
    }

    fn abort(&mut self) {
        if let Some(req) = self.request.take() {
            req.abort();
        }
    }

    fn tick(&mut self, ctx: &TagContext<'_>, state: &mut TagState) {
        let Some(req) = self.request.as_ref() else {
            return;
        };
        let Some((transport, bytes)) = req.take_response() else {
            return;
        };
        self.request = None;
        let finish = |state: &mut TagState, status: Status| {
            state.status = status;
            state.read_complete = true;
        };
        if transport.is_err() {
            finish(state, transport);
            return;
        }
        let reply = match cip::parse_reply(&bytes) {
            Ok(reply) => reply,
            Err(status) => return finish(state, status),
        };
        let partial = reply.general_status == cip::STATUS_PARTIAL;
        if reply.general_status != cip::STATUS_OK && !partial {
            return finish(state, reply.status());
        }
        match self.phase {
            UdtPhase::Attrs => {
                match Self::parse_attr_reply(reply.payload) {
                    Ok(size) => {
                        state.data.extend_from_slice(reply.payload);
                        self.template_size = size;
                        self.phase = UdtPhase::Template;
                        if size == 0 {
                            state.elem_size = 1;
                            state.elem_count = state.data.len();
                            finish(state, Status::Ok);
                            return;
                        }
                        if let Err(status) = self.issue_template_read(ctx) {
                            finish(state, status);
                        }
                    }
                    Err(status) => finish(state, status),
                }
            }
            UdtPhase::Template => {
                state.data.extend_from_slice(reply.payload);
                self.template_offset += reply.payload.len() as u32;
                if partial && self.template_offset < self.template_size {
                    if let Err(status) = self.issue_template_read(ctx) {
                        finish(state, status);
                    }
                    return;
                }
                state.elem_size = 1;
                state.elem_count = state.data.len();
                finish(state, Status::Ok);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_elem_type() {
        let order = crate::byte_order::LOGIX.clone();
        assert_eq!(
            parse_elem_type("dint", &order).unwrap(),
            (4, vec![TYPE_DINT, 0x00])
        );
        assert_eq!(
            parse_elem_type("REAL", &order).unwrap(),
            (4, vec![TYPE_REAL, 0x00])
        );
        assert_eq!(parse_elem_type("lreal", &order).unwrap().0, 8);
        // logix strings are 88 bytes on the wire
        assert_eq!(parse_elem_type("string", &order).unwrap(), (88, vec![]));
        assert!(parse_elem_type("quaternion", &order).is_err());
    }

    #[test]
    fn test_split_type_info() {
        let payload = [TYPE_DINT, 0x00, 1, 2, 3, 4];
        let (info, data) = split_type_info(&payload).unwrap();
        assert_eq!(info, &[TYPE_DINT, 0x00]);
        assert_eq!(data, &[1, 2, 3, 4]);

        let payload = [TYPE_STRUCT_LO, TYPE_STRUCT_HI, 0x34, 0x12, 9, 9];
        let (info, data) = split_type_info(&payload).unwrap();
        assert_eq!(info.len(), 4);
        assert_eq!(data, &[9, 9]);
    }

    #[test]
    fn test_listing_name_parse() {
        assert!(ListingTag::parse("@tags", true).unwrap().is_some());
        let listing = ListingTag::parse("Program:Main.@tags", true)
            .unwrap()
            .unwrap();
        assert_eq!(listing.program.as_deref(), Some("Program:Main"));
        assert!(ListingTag::parse("MyTag", true).unwrap().is_none());
        assert!(ListingTag::parse("Main.@tags", true).is_err());
    }

    #[test]
    fn test_listing_last_instance() {
        let mut payload = Vec::new();
        for (id, name) in [(5u32, "Alpha"), (9u32, "Beta")] {
            payload.extend_from_slice(&id.to_le_bytes());
            payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
            payload.extend_from_slice(name.as_bytes());
            payload.extend_from_slice(&0xC4u16.to_le_bytes());
            payload.extend_from_slice(&4u16.to_le_bytes());
            payload.extend_from_slice(&[0u8; 12]);
        }
        assert_eq!(ListingTag::last_instance(&payload).unwrap(), 9);
        assert!(ListingTag::last_instance(&payload[..3]).is_err());
    }

    #[test]
    fn test_udt_name_parse() {
        let udt = UdtTag::parse("@udt/258", true).unwrap().unwrap();
        assert_eq!(udt.udt_id, 258);
        assert!(UdtTag::parse("@udt/banana", true).is_err());
        assert!(UdtTag::parse("MyTag", true).unwrap().is_none());
    }

    #[test]
    fn test_udt_attr_reply_parse() {
        // count=4, attrs {4,5,2,1} in request order
        let mut payload = Vec::new();
        payload.extend_from_slice(&4u16.to_le_bytes());
        payload.extend_from_slice(&4u16.to_le_bytes()); // attr 4
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&100u32.to_le_bytes()); // 100 words
        payload.extend_from_slice(&5u16.to_le_bytes()); // attr 5
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&48u32.to_le_bytes());
        payload.extend_from_slice(&2u16.to_le_bytes()); // attr 2
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&3u16.to_le_bytes());
        payload.extend_from_slice(&1u16.to_le_bytes()); // attr 1
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&0xFFF1u16.to_le_bytes());
        assert_eq!(UdtTag::parse_attr_reply(&payload).unwrap(), 100 * 4 - 23);
    }
}
