// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! the core tag object
//!
//! a tag owns its raw data buffer, byte-order descriptor, operation flags
//! and pending events, all guarded by the API mutex. the protocol-specific
//! work lives in a [`Backend`] variant driven through the [`TagOps`]
//! capability trait; the registry tickler advances in-flight operations and
//! dispatches events outside the mutex.

use crate::attr::AttributeMap;
use crate::byte_order::{self, ByteOrder};
use crate::event::{Event, EventCallback, EventSet};
use crate::plc::PlcKind;
use crate::session::{self, Session, SessionConfig};
use crate::system::SystemTag;
use crate::{ab, mb, registry};
use crate::{ErrorCode, Result, Status};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tag Identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(pub(crate) i32);

impl TagId {
    /// raw integer value of the id
    #[inline]
    pub fn value(&self) -> i32 {
        self.0
    }
}

/// shared per-operation context handed to backends
pub(crate) struct TagContext<'a> {
    pub id: TagId,
    pub session: Option<&'a Arc<Session>>,
}

/// capability set every backend implements
pub(crate) trait TagOps {
    /// begin a read; either enqueue a request or complete synchronously by
    /// setting `state.read_complete`
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()>;
    /// begin a write, mirror of [`start_read`](TagOps::start_read)
    fn start_write(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()>;
    /// drop any in-flight request
    fn abort(&mut self);
    /// advance in-flight operations (fragment continuation, response
    /// parsing); called from the tickler thread
    fn tick(&mut self, ctx: &TagContext<'_>, state: &mut TagState);
    /// backend specific integer attributes
    fn get_int_attr(&self, _state: &TagState, _name: &str) -> Option<i32> {
        None
    }
    /// backend specific integer attributes
    fn set_int_attr(&mut self, _state: &mut TagState, _name: &str, _value: i32) -> Result<()> {
        Err(Status::Err(ErrorCode::Unsupported))
    }
}

/// the protocol backends; dispatch is static
pub(crate) enum Backend {
    Cip(ab::tag::CipTag),
    RawCip(ab::tag::RawCipTag),
    Listing(ab::tag::ListingTag),
    Udt(ab::tag::UdtTag),
    Plc5(ab::pccc_tag::Plc5Tag),
    Slc(ab::pccc_tag::SlcTag),
    Dhp(ab::pccc_tag::DhpTag),
    Modbus(mb::ModbusTag),
    System(SystemTag),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident, $expr:expr) => {
        match $self {
            Backend::Cip($inner) => $expr,
            Backend::RawCip($inner) => $expr,
            Backend::Listing($inner) => $expr,
            Backend::Udt($inner) => $expr,
            Backend::Plc5($inner) => $expr,
            Backend::Slc($inner) => $expr,
            Backend::Dhp($inner) => $expr,
            Backend::Modbus($inner) => $expr,
            Backend::System($inner) => $expr,
        }
    };
}

impl TagOps for Backend {
    fn start_read(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        dispatch!(self, b, b.start_read(ctx, state))
    }

    fn start_write(&mut self, ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        dispatch!(self, b, b.start_write(ctx, state))
    }

    fn abort(&mut self) {
        dispatch!(self, b, b.abort())
    }

    fn tick(&mut self, ctx: &TagContext<'_>, state: &mut TagState) {
        dispatch!(self, b, b.tick(ctx, state))
    }

    fn get_int_attr(&self, state: &TagState, name: &str) -> Option<i32> {
        dispatch!(self, b, b.get_int_attr(state, name))
    }

    fn set_int_attr(&mut self, state: &mut TagState, name: &str, value: i32) -> Result<()> {
        dispatch!(self, b, b.set_int_attr(state, name, value))
    }
}

/// mutable tag state guarded by the API mutex
pub(crate) struct TagState {
    pub data: Vec<u8>,
    pub elem_size: usize,
    pub elem_count: usize,
    /// bit selected by the tag name, for bit-within-word tags
    pub bit: Option<u8>,
    pub byte_order: Arc<ByteOrder>,
    pub status: Status,
    pub read_in_flight: bool,
    pub write_in_flight: bool,
    /// transient: set by the backend when a read lands, cleared by
    /// [`TagCore::process_completions`]
    pub read_complete: bool,
    pub write_complete: bool,
    /// client changed the buffer since the last write
    pub dirty: bool,
    pub read_cache_ms: u64,
    pub read_cache_expire: Option<Instant>,
    pub auto_sync_read_ms: u64,
    pub auto_sync_write_ms: u64,
    pub auto_sync_next_read: Option<Instant>,
    pub auto_sync_next_write: Option<Instant>,
    pub events: EventSet,
}

impl TagState {
    pub(crate) fn new(byte_order: Arc<ByteOrder>) -> Self {
        TagState {
            data: Vec::new(),
            elem_size: 0,
            elem_count: 1,
            bit: None,
            byte_order,
            status: Status::Ok,
            read_in_flight: false,
            write_in_flight: false,
            read_complete: false,
            write_complete: false,
            dirty: false,
            read_cache_ms: 0,
            read_cache_expire: None,
            auto_sync_read_ms: 0,
            auto_sync_write_ms: 0,
            auto_sync_next_read: None,
            auto_sync_next_write: None,
            events: EventSet::default(),
        }
    }
}

/// state + backend behind one mutex so both sides can be borrowed at once
pub(crate) struct TagInner {
    pub state: TagState,
    pub backend: Backend,
}

impl TagInner {
    #[inline]
    pub(crate) fn split(&mut self) -> (&mut TagState, &mut Backend) {
        (&mut self.state, &mut self.backend)
    }
}

/// one tag handle's shared core
pub(crate) struct TagCore {
    id: AtomicI32,
    session: Option<Arc<Session>>,
    pub(crate) api: Mutex<TagInner>,
    /// signalled when an operation reaches a terminal state
    pub(crate) cond: Condvar,
    /// client-visible lock/unlock for compound operations
    external: Mutex<bool>,
    external_cond: Condvar,
    callback: Mutex<Option<EventCallback>>,
}

impl TagCore {
    fn new(state: TagState, backend: Backend, session: Option<Arc<Session>>) -> Arc<TagCore> {
        Arc::new(TagCore {
            id: AtomicI32::new(0),
            session,
            api: Mutex::new(TagInner { state, backend }),
            cond: Condvar::new(),
            external: Mutex::new(false),
            external_cond: Condvar::new(),
            callback: Mutex::new(None),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> TagId {
        TagId(self.id.load(Ordering::Relaxed))
    }

    pub(crate) fn set_id(&self, id: i32) {
        self.id.store(id, Ordering::Relaxed);
    }

    fn ctx(&self) -> TagContext<'_> {
        TagContext {
            id: self.id(),
            session: self.session.as_ref(),
        }
    }

    pub(crate) fn set_callback(&self, callback: Option<EventCallback>) {
        *self.callback.lock() = callback;
    }

    pub(crate) fn dispatch_events(&self, events: Vec<(Event, Status)>) {
        if events.is_empty() {
            return;
        }
        let id = self.id();
        let mut callback = self.callback.lock();
        if let Some(cb) = callback.as_mut() {
            for (event, status) in events {
                log::debug!("tag {} event {:?} status {}", id.value(), event, status);
                cb(id, event, status);
            }
        }
    }

    /// drain pending events under the API mutex, dispatch after release
    fn flush_events(&self) {
        let events = {
            let mut inner = self.api.lock();
            if inner.state.events.has_pending() {
                inner.state.events.drain()
            } else {
                Vec::new()
            }
        };
        self.dispatch_events(events);
    }

    /// translate backend completion flags into events, cache bookkeeping
    /// and waiter wake-ups
    pub(crate) fn process_completions(&self, inner: &mut TagInner) {
        let state = &mut inner.state;
        let mut done = false;
        if state.read_complete {
            state.read_complete = false;
            state.read_in_flight = false;
            if state.status.is_ok() && state.read_cache_ms > 0 {
                state.read_cache_expire =
                    Some(Instant::now() + Duration::from_millis(state.read_cache_ms));
            }
            state.events.raise(Event::ReadCompleted, state.status);
            done = true;
        }
        if state.write_complete {
            state.write_complete = false;
            state.write_in_flight = false;
            if state.status.is_ok() {
                state.dirty = false;
            }
            state.events.raise(Event::WriteCompleted, state.status);
            done = true;
        }
        if done {
            self.cond.notify_all();
        }
    }

    fn abort_locked(&self, inner: &mut TagInner) {
        let was_in_flight = inner.state.read_in_flight || inner.state.write_in_flight;
        inner.backend.abort();
        inner.state.read_in_flight = false;
        inner.state.write_in_flight = false;
        inner.state.read_complete = false;
        inner.state.write_complete = false;
        if was_in_flight {
            inner.state.status = Status::err_abort();
            inner.state.events.raise(Event::Aborted, Status::err_abort());
            log::info!("tag {} operation aborted", self.id().value());
        }
        self.cond.notify_all();
        if let Some(session) = &self.session {
            session.wake();
        }
    }

    /// public read operation; blocking when `timeout_ms > 0`
    pub(crate) fn read(&self, timeout_ms: u32) -> Status {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        {
            let mut inner = self.api.lock();
            if inner.state.read_in_flight || inner.state.write_in_flight {
                return Status::Err(ErrorCode::Busy);
            }
            // serve from the read cache without a wire round-trip
            if let Some(expire) = inner.state.read_cache_expire {
                if expire > Instant::now() {
                    log::debug!("tag {} read satisfied from cache", self.id().value());
                    inner.state.status = Status::Ok;
                    inner.state.events.raise(Event::ReadStarted, Status::Ok);
                    inner.state.events.raise(Event::ReadCompleted, Status::Ok);
                    drop(inner);
                    self.flush_events();
                    return Status::Ok;
                }
                inner.state.read_cache_expire = None;
            }
            inner.state.status = Status::Pending;
            inner.state.read_in_flight = true;
            inner.state.events.raise(Event::ReadStarted, Status::Ok);
        }
        self.flush_events();

        {
            let mut inner = self.api.lock();
            if !inner.state.read_in_flight {
                // aborted or destroyed while dispatching the event
                return inner.state.status;
            }
            let ctx = TagContext {
                id: self.id(),
                session: self.session.as_ref(),
            };
            let (state, backend) = inner.split();
            if let Err(status) = backend.start_read(&ctx, state) {
                state.read_in_flight = false;
                state.status = status;
                state.events.raise(Event::ReadCompleted, status);
                drop(inner);
                self.flush_events();
                return status;
            }
            self.process_completions(&mut inner);
            if !inner.state.read_in_flight {
                let status = inner.state.status;
                drop(inner);
                self.flush_events();
                return status;
            }
        }

        if timeout_ms == 0 {
            return Status::Pending;
        }
        self.wait_for_read(deadline)
    }

    fn wait_for_read(&self, deadline: Instant) -> Status {
        let mut inner = self.api.lock();
        while inner.state.read_in_flight {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        if inner.state.read_in_flight {
            self.abort_locked(&mut inner);
            inner.state.status = Status::err_timeout();
            drop(inner);
            self.flush_events();
            return Status::err_timeout();
        }
        let status = inner.state.status;
        drop(inner);
        self.flush_events();
        status
    }

    /// public write operation; blocking when `timeout_ms > 0`
    pub(crate) fn write(&self, timeout_ms: u32) -> Status {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        {
            let mut inner = self.api.lock();
            if inner.state.read_in_flight || inner.state.write_in_flight {
                return Status::Err(ErrorCode::Busy);
            }
            inner.state.status = Status::Pending;
            inner.state.write_in_flight = true;
            // raised before the packet is built so a callback may still
            // fill the buffer
            inner.state.events.raise(Event::WriteStarted, Status::Ok);
        }
        self.flush_events();

        {
            let mut inner = self.api.lock();
            if !inner.state.write_in_flight {
                return inner.state.status;
            }
            let ctx = TagContext {
                id: self.id(),
                session: self.session.as_ref(),
            };
            let (state, backend) = inner.split();
            if let Err(status) = backend.start_write(&ctx, state) {
                state.write_in_flight = false;
                state.status = status;
                state.events.raise(Event::WriteCompleted, status);
                drop(inner);
                self.flush_events();
                return status;
            }
            self.process_completions(&mut inner);
            if !inner.state.write_in_flight {
                let status = inner.state.status;
                drop(inner);
                self.flush_events();
                return status;
            }
        }

        if timeout_ms == 0 {
            return Status::Pending;
        }
        let mut inner = self.api.lock();
        while inner.state.write_in_flight {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        if inner.state.write_in_flight {
            self.abort_locked(&mut inner);
            inner.state.status = Status::err_timeout();
            drop(inner);
            self.flush_events();
            return Status::err_timeout();
        }
        let status = inner.state.status;
        drop(inner);
        self.flush_events();
        status
    }

    pub(crate) fn abort(&self) {
        let mut inner = self.api.lock();
        self.abort_locked(&mut inner);
        drop(inner);
        registry::wake();
    }

    pub(crate) fn status(&self) -> Status {
        let inner = self.api.lock();
        if inner.state.read_in_flight || inner.state.write_in_flight {
            Status::Pending
        } else {
            inner.state.status
        }
    }

    /// client-visible lock for compound operations
    pub(crate) fn lock_external(&self) {
        let mut locked = self.external.lock();
        while *locked {
            self.external_cond.wait(&mut locked);
        }
        *locked = true;
    }

    pub(crate) fn unlock_external(&self) -> Result<()> {
        let mut locked = self.external.lock();
        if !*locked {
            return Err(Status::Err(ErrorCode::BadStatus));
        }
        *locked = false;
        self.external_cond.notify_one();
        Ok(())
    }

    /// the earliest auto-sync deadline, for tickler scheduling
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let inner = self.api.try_lock()?;
        let read = inner.state.auto_sync_next_read;
        let write = inner.state.auto_sync_next_write;
        match (read, write) {
            (Some(r), Some(w)) => Some(r.min(w)),
            (Some(r), None) => Some(r),
            (None, Some(w)) => Some(w),
            (None, None) => None,
        }
    }

    /// one tickler pass: auto-sync pacing, backend progress, completion
    /// translation and event dispatch. non-blocking on the API mutex.
    pub(crate) fn tick(&self) {
        let events = {
            let Some(mut inner) = self.api.try_lock() else {
                return;
            };
            let now = Instant::now();
            self.tick_auto_sync(&mut inner, now);
            let ctx = TagContext {
                id: self.id(),
                session: self.session.as_ref(),
            };
            let (state, backend) = inner.split();
            backend.tick(&ctx, state);
            self.process_completions(&mut inner);
            if inner.state.events.has_pending() {
                inner.state.events.drain()
            } else {
                Vec::new()
            }
        };
        self.dispatch_events(events);
    }

    fn tick_auto_sync(&self, inner: &mut TagInner, now: Instant) {
        // pending writes beat pending reads
        if inner.state.dirty && inner.state.auto_sync_write_ms > 0 {
            let period = Duration::from_millis(inner.state.auto_sync_write_ms);
            match inner.state.auto_sync_next_write {
                None => {
                    if inner.state.read_in_flight {
                        self.abort_locked(inner);
                    }
                    inner.state.auto_sync_next_write = Some(now + period);
                }
                Some(deadline) if now >= deadline && !inner.state.write_in_flight => {
                    inner.state.auto_sync_next_write = None;
                    inner.state.status = Status::Pending;
                    inner.state.write_in_flight = true;
                    inner.state.events.raise(Event::WriteStarted, Status::Ok);
                    let ctx = TagContext {
                        id: self.id(),
                        session: self.session.as_ref(),
                    };
                    let (state, backend) = inner.split();
                    if let Err(status) = backend.start_write(&ctx, state) {
                        state.write_in_flight = false;
                        state.status = status;
                        state.events.raise(Event::WriteCompleted, status);
                    }
                }
                _ => {}
            }
        }
        if inner.state.auto_sync_read_ms > 0
            && !inner.state.read_in_flight
            && !inner.state.write_in_flight
            && !inner.state.dirty
        {
            let period_ms = inner.state.auto_sync_read_ms;
            let period = Duration::from_millis(period_ms);
            match inner.state.auto_sync_next_read {
                None => {
                    // random jitter spreads polling load across tags
                    let jitter = rand::random::<u64>() % period_ms;
                    inner.state.auto_sync_next_read =
                        Some(now + Duration::from_millis(jitter));
                }
                Some(deadline) if now >= deadline => {
                    // round up whole periods so the phase never drifts
                    let missed = now.duration_since(deadline).as_millis() as u64 / period_ms;
                    if missed > 0 {
                        log::warn!(
                            "tag {} auto read skipped {} period(s)",
                            self.id().value(),
                            missed
                        );
                    }
                    inner.state.auto_sync_next_read =
                        Some(deadline + period * (missed as u32 + 1));
                    inner.state.status = Status::Pending;
                    inner.state.read_in_flight = true;
                    inner.state.events.raise(Event::ReadStarted, Status::Ok);
                    let ctx = TagContext {
                        id: self.id(),
                        session: self.session.as_ref(),
                    };
                    let (state, backend) = inner.split();
                    if let Err(status) = backend.start_read(&ctx, state) {
                        state.read_in_flight = false;
                        state.status = status;
                        state.events.raise(Event::ReadCompleted, status);
                    }
                }
                _ => {}
            }
        }
    }

    /// generic integer attributes, falling back to the backend's
    pub(crate) fn get_int_attr(&self, name: &str) -> Option<i32> {
        let inner = self.api.lock();
        let v = match name {
            "size" => inner.state.data.len() as i32,
            "elem_size" => inner.state.elem_size as i32,
            "elem_count" => inner.state.elem_count as i32,
            "read_cache_ms" => inner.state.read_cache_ms as i32,
            "auto_sync_read_ms" => inner.state.auto_sync_read_ms as i32,
            "auto_sync_write_ms" => inner.state.auto_sync_write_ms as i32,
            "bit_num" => inner.state.bit.map(|b| b as i32).unwrap_or(-1),
            _ => return inner.backend.get_int_attr(&inner.state, name),
        };
        Some(v)
    }

    pub(crate) fn set_int_attr(&self, name: &str, value: i32) -> Result<()> {
        let mut inner = self.api.lock();
        if value < 0 {
            return Err(Status::Err(ErrorCode::BadParam));
        }
        match name {
            "read_cache_ms" => inner.state.read_cache_ms = value as u64,
            "auto_sync_read_ms" => {
                inner.state.auto_sync_read_ms = value as u64;
                inner.state.auto_sync_next_read = None;
            }
            "auto_sync_write_ms" => {
                inner.state.auto_sync_write_ms = value as u64;
                inner.state.auto_sync_next_write = None;
            }
            _ => {
                let (state, backend) = inner.split();
                return backend.set_int_attr(state, name, value);
            }
        }
        Ok(())
    }

    /// run a closure against the tag state under the API mutex
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut TagState) -> R) -> R {
        let mut inner = self.api.lock();
        f(&mut inner.state)
    }
}

/// create a tag from an attribute string, register it, fire the initial
/// read and optionally wait for it
pub(crate) fn create(
    attrs: &str,
    callback: Option<EventCallback>,
    timeout_ms: u32,
) -> Result<TagId> {
    log::info!("creating tag from \"{}\"", attrs);
    let attrs = AttributeMap::parse(attrs)?;
    if let Some(level) = attrs.get("debug") {
        if let Ok(level) = level.parse::<u8>() {
            crate::debug::set_debug_level(level.into());
        }
    }

    let core = build_tag(&attrs)?;
    core.set_callback(callback);
    let id = match registry::insert(Arc::clone(&core)) {
        Ok(id) => id,
        Err(status) => {
            if let Some(session) = &core.session {
                session.detach();
            }
            return Err(status);
        }
    };
    {
        let mut inner = core.api.lock();
        inner.state.events.raise(Event::Created, Status::Ok);
    }
    core.flush_events();

    // prime the tag: discovers CIP type info and fills the buffer
    let initial_read = !matches!(core.api.lock().backend, Backend::RawCip(_));
    if initial_read {
        let status = core.read(timeout_ms);
        if status.is_err() {
            log::warn!("initial read failed for tag {}: {}", id.value(), status);
            if timeout_ms > 0 {
                destroy(id)?;
                return Err(status);
            }
        }
    }
    Ok(id)
}

/// remove the tag from the registry, abort anything in flight, raise
/// DESTROYED exactly once and release the session reference
pub(crate) fn destroy(id: TagId) -> Result<()> {
    let Some(core) = registry::remove(id) else {
        return Err(Status::Err(ErrorCode::NotFound));
    };
    log::info!("destroying tag {}", id.value());
    let events = {
        let mut inner = core.api.lock();
        core.abort_locked(&mut inner);
        inner.state.events.raise(Event::Destroyed, Status::Ok);
        inner.state.events.drain()
    };
    core.dispatch_events(events);
    if let Some(session) = &core.session {
        session.detach();
    }
    Ok(())
}

/// construct the backend and session for a parsed attribute map
fn build_tag(attrs: &AttributeMap) -> Result<Arc<TagCore>> {
    // in-process system tags: make=system&family=library
    if attrs.get("make").map(|m| m.eq_ignore_ascii_case("system")) == Some(true) {
        return build_system_tag(attrs);
    }
    let protocol = attrs
        .get("protocol")
        .ok_or_else(|| {
            log::warn!("protocol attribute is required");
            Status::Err(ErrorCode::BadParam)
        })?
        .to_ascii_lowercase();
    match protocol.as_str() {
        "ab_eip" | "ab-eip" => build_ab_tag(attrs),
        "modbus_tcp" | "modbus-tcp" | "mb_tcp" | "mb-tcp" => build_modbus_tag(attrs),
        _ => {
            log::warn!("unknown protocol \"{}\"", protocol);
            Err(Status::Err(ErrorCode::BadParam))
        }
    }
}

fn build_system_tag(attrs: &AttributeMap) -> Result<Arc<TagCore>> {
    let name = attrs.get("name").unwrap_or_default();
    let system = SystemTag::parse(name)?;
    let mut state = TagState::new(Arc::new(byte_order::HOST.clone()));
    state.elem_size = system.elem_size();
    state.elem_count = system.elem_count();
    state.data = vec![0u8; state.elem_size * state.elem_count];
    Ok(TagCore::new(state, Backend::System(system), None))
}

/// common attribute plumbing shared by the network backends
struct CommonConfig {
    elem_count: u16,
    read_cache_ms: u64,
    auto_sync_read_ms: u64,
    auto_sync_write_ms: u64,
}

fn parse_common(attrs: &AttributeMap) -> Result<CommonConfig> {
    Ok(CommonConfig {
        elem_count: attrs.get_int("elem_count", 1u16)?,
        read_cache_ms: attrs.get_int("read_cache_ms", 0u64)?,
        auto_sync_read_ms: attrs.get_int("auto_sync_read_ms", 0u64)?,
        auto_sync_write_ms: attrs.get_int("auto_sync_write_ms", 0u64)?,
    })
}

fn apply_common(state: &mut TagState, common: &CommonConfig) {
    state.elem_count = common.elem_count as usize;
    state.read_cache_ms = common.read_cache_ms;
    state.auto_sync_read_ms = common.auto_sync_read_ms;
    state.auto_sync_write_ms = common.auto_sync_write_ms;
}

fn session_config(
    attrs: &AttributeMap,
    plc: Option<PlcKind>,
    use_connected_msg: bool,
) -> Result<SessionConfig> {
    let gateway = attrs
        .get("gateway")
        .ok_or_else(|| {
            log::warn!("gateway attribute is required");
            Status::Err(ErrorCode::BadParam)
        })?
        .to_owned();
    let path = attrs.get("path").unwrap_or_default().to_owned();
    let group = attrs.get_int_clamped("connection_group_id", 0, 0, 32767)? as i32;
    let auto_disconnect_ms = match attrs.get("auto_disconnect_ms") {
        Some(_) => Some(attrs.get_int("auto_disconnect_ms", 0u64)?),
        None => None,
    };
    let max_requests_in_flight =
        attrs.get_int_clamped("max_requests_in_flight", 1, 1, 16)? as usize;
    let share_session = attrs.get_bool("share_session", true)?;
    let unit_id = if plc.is_none() {
        // Modbus: the path attribute is the server unit id
        match path.parse::<u8>() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("modbus path must be a unit id in 0-255, got \"{}\"", path);
                return Err(Status::Err(ErrorCode::BadParam));
            }
        }
    } else {
        0
    };
    let conn_path = match plc {
        Some(kind) => ab::cip::encode_conn_path(&path, kind, use_connected_msg)?,
        None => Default::default(),
    };
    Ok(SessionConfig {
        gateway,
        path,
        group,
        plc,
        unit_id,
        conn_path,
        use_connected_msg,
        auto_disconnect_ms,
        max_requests_in_flight,
        share_session,
    })
}

fn build_ab_tag(attrs: &AttributeMap) -> Result<Arc<TagCore>> {
    let plc = attrs
        .get("plc")
        .or_else(|| attrs.get("cpu"))
        .ok_or_else(|| {
            log::warn!("plc/cpu attribute is required for ab_eip");
            Status::Err(ErrorCode::BadParam)
        })?;
    let kind = PlcKind::parse(plc)?;
    let name = attrs
        .get("name")
        .ok_or_else(|| {
            log::warn!("name attribute is required");
            Status::Err(ErrorCode::BadParam)
        })?
        .to_owned();
    let common = parse_common(attrs)?;

    let default_order = if kind.is_pccc() {
        &byte_order::PCCC
    } else if kind == PlcKind::OmronNjnx {
        &byte_order::OMRON
    } else {
        &byte_order::LOGIX
    };
    let order = Arc::new(ByteOrder::from_attrs(default_order, attrs)?);

    let mut use_connected = attrs.get_bool("use_connected_msg", kind.use_connected_msg_default())?;
    let path = attrs.get("path").unwrap_or_default();
    let probe = ab::cip::encode_conn_path(path, kind, true)?;
    if probe.is_dhp {
        // DH+ bridging only works over a connection
        use_connected = true;
    }
    let allow_packing = attrs.get_bool("allow_packing", kind.allow_packing_default())?;

    // build the backend before the session so a malformed tag name never
    // leaves an orphaned connection behind
    let mut state = TagState::new(order);
    apply_common(&mut state, &common);

    let backend = if kind.is_pccc() {
        if probe.is_dhp && kind == PlcKind::Plc5 {
            let tag = ab::pccc_tag::DhpTag::parse(&name, common.elem_count, &mut state)?;
            Backend::Dhp(tag)
        } else if kind == PlcKind::Plc5 {
            let tag = ab::pccc_tag::Plc5Tag::parse(&name, common.elem_count, &mut state)?;
            Backend::Plc5(tag)
        } else {
            // SLC, MicroLogix and Logix-PCCC speak protected typed logical
            let tag = ab::pccc_tag::SlcTag::parse(&name, common.elem_count, &mut state)?;
            Backend::Slc(tag)
        }
    } else if name == "@raw" {
        Backend::RawCip(ab::tag::RawCipTag::new(use_connected))
    } else if let Some(listing) = ab::tag::ListingTag::parse(&name, use_connected)? {
        Backend::Listing(listing)
    } else if let Some(udt) = ab::tag::UdtTag::parse(&name, use_connected)? {
        Backend::Udt(udt)
    } else {
        let tag = ab::tag::CipTag::parse(&name, attrs, kind, use_connected, allow_packing, &mut state)?;
        Backend::Cip(tag)
    };
    let session = session::find_or_create(session_config(attrs, Some(kind), use_connected)?)?;
    Ok(TagCore::new(state, backend, Some(session)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// a detached system tag core for registry tests
    pub(crate) fn new_system_core() -> Arc<TagCore> {
        let system = SystemTag::parse("debug").unwrap();
        let mut state = TagState::new(Arc::new(byte_order::HOST.clone()));
        state.elem_size = system.elem_size();
        state.elem_count = system.elem_count();
        state.data = vec![0u8; state.elem_size * state.elem_count];
        TagCore::new(state, Backend::System(system), None)
    }
}

fn build_modbus_tag(attrs: &AttributeMap) -> Result<Arc<TagCore>> {
    let name = attrs
        .get("name")
        .ok_or_else(|| {
            log::warn!("name attribute is required");
            Status::Err(ErrorCode::BadParam)
        })?
        .to_owned();
    let common = parse_common(attrs)?;
    let order = Arc::new(ByteOrder::from_attrs(&byte_order::MODBUS, attrs)?);
    let mut state = TagState::new(order);
    apply_common(&mut state, &common);
    let tag = mb::ModbusTag::parse(&name, common.elem_count, attrs, &mut state)?;
    let session = session::find_or_create(session_config(attrs, None, false)?)?;
    Ok(TagCore::new(state, Backend::Modbus(tag), Some(session)))
}
