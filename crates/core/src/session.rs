// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! per-PLC sessions: connection state machine and request scheduler
//!
//! one session owns one TCP connection and one thread. the thread walks
//! the connect → register → ForwardOpen → idle → teardown state machine,
//! packs queued requests into CIP Multiple Service Packets when they fit,
//! transmits under the per-session sequence-number discipline and routes
//! replies back to the owning requests. Modbus sessions reuse the same
//! machinery with MBAP framing and transaction-id matching instead of the
//! EIP handshake.
//!
//! sessions are pooled by `(gateway, path, connection_group_id, family)`
//! while `share_session` is enabled.

use crate::ab::cip::{self, ConnPath, ForwardOpenResult};
use crate::ab::{eip, VENDOR_ID};
use crate::plc::{PlcKind, EIP_DEFAULT_PORT, MODBUS_DEFAULT_PORT};
use crate::sock::TcpSock;
use crate::tag::TagId;
use crate::{mb, registry};
use crate::{ErrorCode, Result, Status};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// wait between connect retries after a hard connect failure
const RETRY_WAIT_MS: u64 = 5000;
/// bound on every idle wait so aborts and termination are noticed promptly
const IDLE_WAIT: Duration = Duration::from_millis(20);
/// bound on one socket send/receive
const SOCKET_OP_TIMEOUT: Duration = Duration::from_secs(10);
/// TCP connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// most requests packed into one Multiple Service Packet
const MAX_BATCH: usize = 16;
/// request-failure backoff window
const BACKOFF_MIN_MS: u64 = 50;
const BACKOFF_MAX_MS: u64 = 5000;
/// give up ForwardOpen negotiation after this many refusals
const MAX_FORWARD_OPEN_ATTEMPTS: u32 = 8;
/// smallest payload guess worth trying
const MIN_PAYLOAD_GUESS: u16 = 100;

/// protocol family half of the pooling identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SessionFamily {
    Eip(PlcKind),
    Modbus,
}

/// pooling identity of a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SessionKey {
    gateway: String,
    path: String,
    group: i32,
    family: SessionFamily,
}

/// everything a tag needs to describe its PLC connection
pub(crate) struct SessionConfig {
    pub gateway: String,
    pub path: String,
    pub group: i32,
    /// None selects Modbus
    pub plc: Option<PlcKind>,
    pub unit_id: u8,
    pub conn_path: ConnPath,
    pub use_connected_msg: bool,
    pub auto_disconnect_ms: Option<u64>,
    pub max_requests_in_flight: usize,
    pub share_session: bool,
}

/// a queued request: one pre-built protocol body plus completion state
pub(crate) struct Request {
    tag_id: TagId,
    allow_packing: bool,
    /// EIP: route via SendRRData instead of the connected channel
    unconnected: bool,
    body: Vec<u8>,
    state: Mutex<RequestState>,
}

struct RequestState {
    aborted: bool,
    resp: Option<(Status, Vec<u8>)>,
}

impl Request {
    pub(crate) fn new(
        tag_id: TagId,
        body: Vec<u8>,
        allow_packing: bool,
        unconnected: bool,
    ) -> Arc<Request> {
        Arc::new(Request {
            tag_id,
            allow_packing,
            unconnected,
            body,
            state: Mutex::new(RequestState {
                aborted: false,
                resp: None,
            }),
        })
    }

    #[inline]
    pub(crate) fn tag_id(&self) -> TagId {
        self.tag_id
    }

    #[inline]
    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }

    /// flag the request for the session thread to reap
    pub(crate) fn abort(&self) {
        self.state.lock().aborted = true;
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// deliver the response (or failure) and wake the tickler
    pub(crate) fn complete(&self, status: Status, resp: Vec<u8>) {
        {
            let mut state = self.state.lock();
            if state.resp.is_some() {
                return;
            }
            state.resp = Some((status, resp));
        }
        registry::wake();
    }

    /// take the response once it has arrived
    pub(crate) fn take_response(&self) -> Option<(Status, Vec<u8>)> {
        self.state.lock().resp.take()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    OpenSocket,
    Register,
    SendForwardOpen,
    ReceiveForwardOpen,
    Idle,
    Disconnect,
    Unregister,
    CloseSocket,
    StartRetry,
    WaitRetry,
    WaitReconnect,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CloseReason {
    Error,
    AutoIdle,
}

struct Inner {
    state: State,
    requests: Vec<Arc<Request>>,
    terminating: bool,
    close_reason: CloseReason,
    session_handle: u32,
    orig_connection_id: u32,
    targ_connection_id: u32,
    conn_serial_number: u16,
    max_payload_guess: u16,
    /// negotiated after ForwardOpen; non-decreasing within one connection
    max_payload: u16,
    only_use_old_forward_open: bool,
    connected: bool,
    registered: bool,
    fo_attempts: u32,
    backoff_ms: u64,
    retry_at: Option<Instant>,
    last_activity: Instant,
}

/// thread-local I/O state of the session thread
#[derive(Default)]
struct IoState {
    sock: Option<TcpSock>,
    /// Modbus requests on the wire, by transaction id
    mb_in_flight: Vec<(u16, Arc<Request>)>,
    /// Modbus receive reassembly buffer
    mb_buf: Vec<u8>,
}

/// one session per unique PLC identity
pub(crate) struct Session {
    key: SessionKey,
    pooled: bool,
    gateway: String,
    default_port: u16,
    plc: Option<PlcKind>,
    unit_id: u8,
    conn_path: ConnPath,
    use_connected_msg: bool,
    auto_disconnect_ms: Option<u64>,
    max_requests_in_flight: usize,
    vendor_serial: u32,
    inner: Mutex<Inner>,
    cond: Condvar,
    /// sender context; statistical uniqueness, allocated only on send
    session_seq_id: AtomicU64,
    conn_seq: AtomicU16,
    tnsw: AtomicU16,
    use_count: AtomicUsize,
    thread: Mutex<Option<JoinHandle<()>>>,
}

static SESSIONS: Lazy<Mutex<HashMap<SessionKey, Weak<Session>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// look up a pooled session by identity or create (and start) a new one
pub(crate) fn find_or_create(cfg: SessionConfig) -> Result<Arc<Session>> {
    let family = match cfg.plc {
        Some(kind) => SessionFamily::Eip(kind),
        None => SessionFamily::Modbus,
    };
    let key = SessionKey {
        gateway: cfg.gateway.clone(),
        path: cfg.path.clone(),
        group: cfg.group,
        family,
    };
    if cfg.share_session {
        let mut pool = SESSIONS.lock();
        if let Some(existing) = pool.get(&key).and_then(|w| w.upgrade()) {
            existing.attach();
            return Ok(existing);
        }
        let session = Session::start(key.clone(), true, cfg)?;
        pool.insert(key, Arc::downgrade(&session));
        Ok(session)
    } else {
        Session::start(key, false, cfg)
    }
}

impl Session {
    fn start(key: SessionKey, pooled: bool, cfg: SessionConfig) -> Result<Arc<Session>> {
        let default_port = match cfg.plc {
            Some(_) => EIP_DEFAULT_PORT,
            None => MODBUS_DEFAULT_PORT,
        };
        let max_payload_guess = cfg.plc.map(|k| k.max_payload_guess()).unwrap_or(0);
        let session = Arc::new(Session {
            key,
            pooled,
            gateway: cfg.gateway,
            default_port,
            plc: cfg.plc,
            unit_id: cfg.unit_id,
            conn_path: cfg.conn_path,
            use_connected_msg: cfg.use_connected_msg,
            auto_disconnect_ms: cfg.auto_disconnect_ms,
            max_requests_in_flight: cfg.max_requests_in_flight,
            vendor_serial: rand::random(),
            inner: Mutex::new(Inner {
                state: State::OpenSocket,
                requests: Vec::new(),
                terminating: false,
                close_reason: CloseReason::Error,
                session_handle: 0,
                orig_connection_id: 0,
                targ_connection_id: 0,
                conn_serial_number: rand::random(),
                max_payload_guess,
                max_payload: max_payload_guess,
                only_use_old_forward_open: false,
                connected: false,
                registered: false,
                fo_attempts: 0,
                backoff_ms: 0,
                retry_at: None,
                last_activity: Instant::now(),
            }),
            cond: Condvar::new(),
            session_seq_id: AtomicU64::new(rand::random()),
            conn_seq: AtomicU16::new(rand::random()),
            tnsw: AtomicU16::new(rand::random::<u16>() | 1),
            use_count: AtomicUsize::new(1),
            thread: Mutex::new(None),
        });
        let handle = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name(format!("plctag-session-{}", session.gateway))
                .spawn(move || session.run())
                .map_err(|e| {
                    log::error!("cannot spawn session thread: {}", e);
                    Status::Err(ErrorCode::ThreadCreate)
                })?
        };
        *session.thread.lock() = Some(handle);
        log::info!("session started for {}", session.gateway);
        Ok(session)
    }

    /// another tag begins using this session
    pub(crate) fn attach(&self) {
        self.use_count.fetch_add(1, Ordering::AcqRel);
    }

    /// a tag released the session; the last release terminates and joins
    /// the session thread
    pub(crate) fn detach(&self) {
        if self.use_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        {
            let mut inner = self.inner.lock();
            inner.terminating = true;
            self.cond.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                log::warn!("session thread for {} panicked", self.gateway);
            }
        }
        if self.pooled {
            let mut pool = SESSIONS.lock();
            if let Some(weak) = pool.get(&self.key) {
                if weak.upgrade().is_none() {
                    pool.remove(&self.key);
                }
            }
        }
        log::info!("session for {} closed", self.gateway);
    }

    /// queue a request and wake the session thread
    pub(crate) fn enqueue(&self, req: Arc<Request>) {
        let mut inner = self.inner.lock();
        inner.requests.push(req);
        inner.last_activity = Instant::now();
        self.cond.notify_all();
    }

    pub(crate) fn wake(&self) {
        self.cond.notify_all();
    }

    /// negotiated (or family-default) payload budget in bytes
    pub(crate) fn max_payload(&self) -> usize {
        self.inner.lock().max_payload as usize
    }

    #[inline]
    pub(crate) fn use_connected(&self) -> bool {
        self.use_connected_msg
    }

    /// `(src_node, dest_node)` of the DH+ hop
    #[inline]
    pub(crate) fn dhp_nodes(&self) -> (u8, u8) {
        (self.conn_path.dhp_src, self.conn_path.dhp_dest)
    }

    /// a local PLC with no routing path takes bare CIP in SendRRData
    #[inline]
    pub(crate) fn has_conn_path(&self) -> bool {
        !self.conn_path.bytes.is_empty()
    }

    #[inline]
    pub(crate) fn vendor_serial(&self) -> u32 {
        self.vendor_serial
    }

    /// next PCCC transaction number; never zero
    pub(crate) fn next_tnsw(&self) -> u16 {
        loop {
            let v = self.tnsw.fetch_add(1, Ordering::AcqRel);
            if v != 0 {
                return v;
            }
        }
    }

    fn next_session_seq(&self) -> u64 {
        self.session_seq_id.fetch_add(1, Ordering::AcqRel)
    }

    fn next_conn_seq(&self) -> u16 {
        self.conn_seq.fetch_add(1, Ordering::AcqRel)
    }

    fn terminating(&self) -> bool {
        self.inner.lock().terminating
    }

    // ------------------------------------------------------------------
    // state machine
    // ------------------------------------------------------------------

    fn run(self: Arc<Session>) {
        let mut io = IoState::default();
        loop {
            if self.terminating() {
                break;
            }
            let state = self.inner.lock().state;
            let next = match state {
                State::OpenSocket => self.do_open(&mut io),
                State::Register => self.do_register(&mut io),
                State::SendForwardOpen => self.do_send_forward_open(&mut io),
                State::ReceiveForwardOpen => self.do_receive_forward_open(&mut io),
                State::Idle => self.do_idle(&mut io),
                State::Disconnect => self.do_disconnect(&mut io),
                State::Unregister => self.do_unregister(&mut io),
                State::CloseSocket => self.do_close(&mut io),
                State::StartRetry => self.do_start_retry(),
                State::WaitRetry => self.do_wait_retry(),
                State::WaitReconnect => self.do_wait_reconnect(),
            };
            self.inner.lock().state = next;
        }
        self.cleanup(&mut io);
    }

    fn do_open(&self, io: &mut IoState) -> State {
        match TcpSock::connect(&self.gateway, self.default_port, CONNECT_TIMEOUT) {
            Ok(sock) => {
                io.sock = Some(sock);
                io.mb_buf.clear();
                self.inner.lock().last_activity = Instant::now();
                if self.plc.is_some() {
                    State::Register
                } else {
                    self.inner.lock().backoff_ms = 0;
                    State::Idle
                }
            }
            Err(status) => {
                log::warn!("cannot open socket to {}: {}", self.gateway, status);
                self.inner.lock().backoff_ms = RETRY_WAIT_MS;
                State::StartRetry
            }
        }
    }

    fn do_register(&self, io: &mut IoState) -> State {
        let ctx = self.next_session_seq();
        let frame = eip::register_session(ctx);
        match self.eip_round_trip(io, &frame) {
            Ok((header, _body)) => match eip::parse_register_session_reply(&header) {
                Ok(handle) => {
                    log::info!("EIP session registered, handle {:#x}", handle);
                    let mut inner = self.inner.lock();
                    inner.session_handle = handle;
                    inner.registered = true;
                    inner.fo_attempts = 0;
                    if self.use_connected_msg {
                        drop(inner);
                        State::SendForwardOpen
                    } else {
                        inner.backoff_ms = 0;
                        State::Idle
                    }
                }
                Err(status) => {
                    log::warn!("RegisterSession failed: {}", status);
                    self.error_close()
                }
            },
            Err(_) => self.error_close(),
        }
    }

    fn do_send_forward_open(&self, io: &mut IoState) -> State {
        let (request, ex) = {
            let mut inner = self.inner.lock();
            inner.fo_attempts += 1;
            if inner.fo_attempts > MAX_FORWARD_OPEN_ATTEMPTS {
                log::warn!("giving up ForwardOpen after {} attempts", inner.fo_attempts - 1);
                return State::Unregister;
            }
            // a fresh serial number and originator connection id per attempt
            inner.conn_serial_number = inner.conn_serial_number.wrapping_add(1);
            inner.orig_connection_id = rand::random();
            let ex = !inner.only_use_old_forward_open;
            let cap = self
                .plc
                .map(|k| k.max_payload_cap())
                .unwrap_or(inner.max_payload_guess);
            let size = if ex {
                inner.max_payload_guess.min(cap)
            } else {
                // legacy ForwardOpen caps the size field at 9 bits
                inner.max_payload_guess.min(0x01FF)
            };
            inner.max_payload_guess = size;
            let fo = cip::ForwardOpen {
                orig_connection_id: inner.orig_connection_id,
                conn_serial_number: inner.conn_serial_number,
                vendor_id: VENDOR_ID,
                orig_serial_number: self.vendor_serial,
                payload_size: size,
                conn_path: &self.conn_path.bytes,
            };
            (cip::forward_open_request(ex, &fo), ex)
        };
        log::debug!(
            "sending {} with payload guess {}",
            if ex { "ForwardOpenEx" } else { "ForwardOpen" },
            self.inner.lock().max_payload_guess
        );
        let ctx = self.next_session_seq();
        let handle = self.inner.lock().session_handle;
        let frame = eip::send_rr_data(handle, ctx, &request);
        let deadline = Instant::now() + SOCKET_OP_TIMEOUT;
        let Some(sock) = io.sock.as_mut() else {
            return self.error_close();
        };
        match sock.send_all(&frame, deadline, || self.terminating()) {
            Ok(()) => State::ReceiveForwardOpen,
            Err(status) => {
                log::warn!("ForwardOpen send failed: {}", status);
                self.error_close()
            }
        }
    }

    fn do_receive_forward_open(&self, io: &mut IoState) -> State {
        let reply = match self.read_eip_frame(io) {
            Ok((_, body)) => body,
            Err(_) => return self.error_close(),
        };
        let cip_reply = match eip::unwrap_unconnected(&reply) {
            Ok(cip) => cip,
            Err(status) => {
                log::warn!("bad ForwardOpen reply: {}", status);
                return State::Unregister;
            }
        };
        match cip::parse_forward_open_reply(cip_reply) {
            Ok(ForwardOpenResult::Open { targ_connection_id }) => {
                let mut inner = self.inner.lock();
                inner.targ_connection_id = targ_connection_id;
                inner.connected = true;
                inner.max_payload = inner.max_payload_guess;
                inner.fo_attempts = 0;
                inner.backoff_ms = 0;
                log::info!(
                    "CIP connection open, id {:#x}, payload {}",
                    targ_connection_id,
                    inner.max_payload
                );
                State::Idle
            }
            Ok(ForwardOpenResult::Refused {
                general_status,
                ext_status,
                supported_size,
            }) => {
                log::warn!(
                    "ForwardOpen refused: {}",
                    cip::decode_status(general_status, Some(ext_status))
                );
                let mut inner = self.inner.lock();
                match (general_status, ext_status) {
                    (cip::STATUS_EXTENDED, cip::EXT_DUPLICATE_CONNECTION) => {
                        // retry with the next serial number
                        State::SendForwardOpen
                    }
                    (cip::STATUS_EXTENDED, cip::EXT_INVALID_SIZE) => {
                        let next = supported_size
                            .unwrap_or(inner.max_payload_guess / 2)
                            .max(MIN_PAYLOAD_GUESS);
                        log::info!("shrinking payload guess to {}", next);
                        if next >= inner.max_payload_guess {
                            return State::Unregister;
                        }
                        inner.max_payload_guess = next;
                        State::SendForwardOpen
                    }
                    (cip::STATUS_UNSUPPORTED, _) if !inner.only_use_old_forward_open => {
                        log::info!("falling back to legacy ForwardOpen");
                        inner.only_use_old_forward_open = true;
                        State::SendForwardOpen
                    }
                    _ => State::Unregister,
                }
            }
            Err(status) => {
                log::warn!("cannot parse ForwardOpen reply: {}", status);
                State::Unregister
            }
        }
    }

    fn do_idle(&self, io: &mut IoState) -> State {
        self.purge_aborted();
        if self.plc.is_none() {
            return self.modbus_idle(io);
        }
        let batch = self.next_batch();
        if batch.is_empty() {
            if self.auto_disconnect_due() {
                log::info!("auto-disconnecting idle session for {}", self.gateway);
                let mut inner = self.inner.lock();
                inner.close_reason = CloseReason::AutoIdle;
                let connected = inner.connected;
                drop(inner);
                return if connected {
                    State::Disconnect
                } else {
                    State::Unregister
                };
            }
            let mut inner = self.inner.lock();
            if inner.requests.is_empty() && !inner.terminating {
                self.cond.wait_for(&mut inner, IDLE_WAIT);
            }
            return State::Idle;
        }
        match self.transact(io, &batch) {
            Ok(()) => State::Idle,
            Err(status) => {
                for req in &batch {
                    req.complete(status, Vec::new());
                }
                self.bump_backoff();
                let mut inner = self.inner.lock();
                inner.close_reason = CloseReason::Error;
                let connected = inner.connected;
                drop(inner);
                if connected {
                    State::Disconnect
                } else {
                    State::Unregister
                }
            }
        }
    }

    /// ForwardClose is best effort and bounded so teardown stays prompt;
    /// it must run even when the session is terminating
    fn do_disconnect(&self, io: &mut IoState) -> State {
        let (serial, connected, handle) = {
            let inner = self.inner.lock();
            (inner.conn_serial_number, inner.connected, inner.session_handle)
        };
        if connected {
            if let Some(sock) = io.sock.as_mut() {
                let close = cip::forward_close_request(
                    serial,
                    VENDOR_ID,
                    self.vendor_serial,
                    &self.conn_path.bytes,
                );
                let ctx = self.next_session_seq();
                let frame = eip::send_rr_data(handle, ctx, &close);
                let deadline = Instant::now() + Duration::from_millis(1000);
                let sent = sock.send_all(&frame, deadline, || false).is_ok();
                if sent {
                    let mut header_buf = [0u8; eip::HEADER_SIZE];
                    if sock.recv_exact(&mut header_buf, deadline, || false).is_ok() {
                        if let Ok(header) = eip::Header::parse(&header_buf) {
                            let mut body = vec![0u8; header.length as usize];
                            let _ = sock.recv_exact(&mut body, deadline, || false);
                        }
                    }
                } else {
                    log::info!("ForwardClose failed, closing anyway");
                }
            }
            self.inner.lock().connected = false;
        }
        State::Unregister
    }

    fn do_unregister(&self, io: &mut IoState) -> State {
        let (registered, handle) = {
            let inner = self.inner.lock();
            (inner.registered, inner.session_handle)
        };
        if registered {
            if let Some(sock) = io.sock.as_mut() {
                let frame = eip::unregister_session(handle, self.next_session_seq());
                let deadline = Instant::now() + Duration::from_millis(500);
                let _ = sock.send_all(&frame, deadline, || false);
            }
            let mut inner = self.inner.lock();
            inner.registered = false;
            inner.session_handle = 0;
        }
        State::CloseSocket
    }

    fn do_close(&self, io: &mut IoState) -> State {
        io.sock = None;
        io.mb_buf.clear();
        for (_, req) in io.mb_in_flight.drain(..) {
            req.complete(Status::Err(ErrorCode::BadConnection), Vec::new());
        }
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.registered = false;
        match inner.close_reason {
            CloseReason::AutoIdle => State::WaitReconnect,
            CloseReason::Error => State::StartRetry,
        }
    }

    fn do_start_retry(&self) -> State {
        let mut inner = self.inner.lock();
        let backoff = inner.backoff_ms.max(BACKOFF_MIN_MS);
        let jitter = rand::random::<u64>() % (backoff / 2 + 1);
        inner.retry_at = Some(Instant::now() + Duration::from_millis(backoff + jitter));
        log::info!("retrying {} in {} ms", self.gateway, backoff + jitter);
        State::WaitRetry
    }

    fn do_wait_retry(&self) -> State {
        let mut inner = self.inner.lock();
        let Some(retry_at) = inner.retry_at else {
            return State::OpenSocket;
        };
        if Instant::now() >= retry_at {
            inner.retry_at = None;
            return State::OpenSocket;
        }
        if !inner.terminating {
            self.cond.wait_until(&mut inner, retry_at.min(Instant::now() + IDLE_WAIT));
        }
        State::WaitRetry
    }

    fn do_wait_reconnect(&self) -> State {
        let mut inner = self.inner.lock();
        if !inner.requests.is_empty() {
            return State::OpenSocket;
        }
        if !inner.terminating {
            self.cond.wait_for(&mut inner, IDLE_WAIT);
        }
        State::WaitReconnect
    }

    fn error_close(&self) -> State {
        self.bump_backoff();
        self.inner.lock().close_reason = CloseReason::Error;
        State::CloseSocket
    }

    fn bump_backoff(&self) {
        let mut inner = self.inner.lock();
        inner.backoff_ms = (inner.backoff_ms * 2).clamp(BACKOFF_MIN_MS, BACKOFF_MAX_MS);
    }

    fn auto_disconnect_due(&self) -> bool {
        let Some(ms) = self.auto_disconnect_ms else {
            return false;
        };
        let inner = self.inner.lock();
        inner.requests.is_empty()
            && inner.last_activity.elapsed() >= Duration::from_millis(ms)
            && (inner.connected || inner.registered || self.plc.is_none())
    }

    /// reap every request whose tag flagged an abort, replying `ERR_ABORT`
    fn purge_aborted(&self) {
        let purged: Vec<Arc<Request>> = {
            let mut inner = self.inner.lock();
            let mut purged = Vec::new();
            inner.requests.retain(|req| {
                if req.is_aborted() {
                    purged.push(Arc::clone(req));
                    false
                } else {
                    true
                }
            });
            purged
        };
        for req in purged {
            log::debug!("purging aborted request from tag {}", req.tag_id().value());
            req.complete(Status::err_abort(), Vec::new());
        }
    }

    // ------------------------------------------------------------------
    // EIP scheduler
    // ------------------------------------------------------------------

    /// pop the next batch: the head request, plus as many packable
    /// followers as fit into the negotiated payload
    fn next_batch(&self) -> Vec<Arc<Request>> {
        let mut inner = self.inner.lock();
        if inner.requests.is_empty() {
            return Vec::new();
        }
        let head = inner.requests.remove(0);
        let mut batch = vec![head];
        if !batch[0].allow_packing {
            return batch;
        }
        let budget = inner.max_payload as usize;
        let mut remaining = budget
            .saturating_sub(cip::multi_header_size())
            .saturating_sub(batch[0].body.len() + cip::multi_entry_overhead());
        while batch.len() < MAX_BATCH && !inner.requests.is_empty() {
            let next = &inner.requests[0];
            if !next.allow_packing || next.unconnected != batch[0].unconnected {
                break;
            }
            let cost = next.body.len() + cip::multi_entry_overhead();
            if remaining < cost {
                break;
            }
            remaining -= cost;
            batch.push(inner.requests.remove(0));
        }
        inner.last_activity = Instant::now();
        batch
    }

    /// one EIP round trip for a batch: pack, frame, send, receive, demux
    fn transact(&self, io: &mut IoState, batch: &[Arc<Request>]) -> std::result::Result<(), Status> {
        let unconnected = batch[0].unconnected;
        let payload = if batch.len() == 1 {
            batch[0].body.clone()
        } else {
            let bodies: Vec<&[u8]> = batch.iter().map(|r| r.body.as_slice()).collect();
            cip::multi_service_request(&bodies)
        };
        let limit = self.max_payload() + cip::multi_header_size();
        if payload.len() > limit {
            log::warn!(
                "request payload {} exceeds negotiated limit {}",
                payload.len(),
                limit
            );
            for req in batch {
                req.complete(Status::Err(ErrorCode::TooLarge), Vec::new());
            }
            return Ok(());
        }

        let ctx = self.next_session_seq();
        let (handle, conn_id) = {
            let inner = self.inner.lock();
            (inner.session_handle, inner.targ_connection_id)
        };
        let (frame, sent_seq) = if unconnected {
            let cip_bytes = if self.has_conn_path() {
                cip::unconnected_send(&payload, &self.conn_path.bytes)
            } else {
                payload
            };
            (eip::send_rr_data(handle, ctx, &cip_bytes), 0u16)
        } else {
            let seq = self.next_conn_seq();
            (
                eip::send_unit_data(handle, ctx, conn_id, seq, &payload),
                seq,
            )
        };

        let deadline = Instant::now() + SOCKET_OP_TIMEOUT;
        let sock = io.sock.as_mut().ok_or(Status::Err(ErrorCode::BadConnection))?;
        sock.send_all(&frame, deadline, || self.terminating())?;

        let (header, body) = self.read_eip_frame(io)?;
        if header.status != 0 {
            log::warn!("EIP status {:#x} in reply", header.status);
            self.fail_batch(batch, Status::Err(ErrorCode::RemoteErr));
            return Ok(());
        }
        let delivered = if unconnected {
            if header.command != eip::SEND_RR_DATA || header.sender_context != ctx {
                log::warn!("mismatched unconnected reply (context {:#x})", header.sender_context);
                self.fail_batch(batch, Status::Err(ErrorCode::BadReply));
                return Ok(());
            }
            eip::unwrap_unconnected(&body)
        } else {
            if header.command != eip::SEND_UNIT_DATA {
                self.fail_batch(batch, Status::Err(ErrorCode::BadReply));
                return Ok(());
            }
            match eip::unwrap_connected(&body) {
                Ok((reply_conn, reply_seq, cip_bytes)) => {
                    let orig = self.inner.lock().orig_connection_id;
                    if reply_conn != orig || reply_seq != sent_seq {
                        log::warn!(
                            "mismatched connected reply (conn {:#x} seq {})",
                            reply_conn,
                            reply_seq
                        );
                        self.fail_batch(batch, Status::Err(ErrorCode::BadReply));
                        return Ok(());
                    }
                    Ok(cip_bytes)
                }
                Err(e) => Err(e),
            }
        };
        match delivered {
            Ok(cip_bytes) => self.deliver(batch, cip_bytes),
            Err(status) => self.fail_batch(batch, status),
        }
        self.inner.lock().last_activity = Instant::now();
        Ok(())
    }

    /// split a (possibly multi-service) reply back onto the batch members
    fn deliver(&self, batch: &[Arc<Request>], cip_bytes: &[u8]) {
        if batch.len() == 1 {
            batch[0].complete(Status::Ok, cip_bytes.to_vec());
            return;
        }
        let reply = match cip::parse_reply(cip_bytes) {
            Ok(reply) => reply,
            Err(status) => return self.fail_batch(batch, status),
        };
        if reply.service != cip::SERVICE_MULTI
            || (reply.general_status != cip::STATUS_OK
                && reply.general_status != cip::STATUS_MULTI_PARTIAL)
        {
            log::warn!(
                "multi service reply failed: {}",
                cip::decode_status(reply.general_status, reply.ext_status.first().copied())
            );
            return self.fail_batch(batch, reply.status());
        }
        match cip::parse_multi_service_reply(reply.payload) {
            Ok(parts) if parts.len() == batch.len() => {
                // replies match positionally by offset index; individual
                // members may still carry their own error status
                for (req, part) in batch.iter().zip(parts) {
                    req.complete(Status::Ok, part.to_vec());
                }
            }
            Ok(parts) => {
                log::warn!(
                    "multi service reply has {} parts for {} requests",
                    parts.len(),
                    batch.len()
                );
                self.fail_batch(batch, Status::Err(ErrorCode::BadReply));
            }
            Err(status) => self.fail_batch(batch, status),
        }
    }

    fn fail_batch(&self, batch: &[Arc<Request>], status: Status) {
        for req in batch {
            req.complete(status, Vec::new());
        }
    }

    fn eip_round_trip(
        &self,
        io: &mut IoState,
        frame: &[u8],
    ) -> std::result::Result<(eip::Header, Vec<u8>), Status> {
        let deadline = Instant::now() + SOCKET_OP_TIMEOUT;
        let sock = io.sock.as_mut().ok_or(Status::Err(ErrorCode::BadConnection))?;
        sock.send_all(frame, deadline, || self.terminating())?;
        self.read_eip_frame(io)
    }

    fn read_eip_frame(
        &self,
        io: &mut IoState,
    ) -> std::result::Result<(eip::Header, Vec<u8>), Status> {
        let deadline = Instant::now() + SOCKET_OP_TIMEOUT;
        let sock = io.sock.as_mut().ok_or(Status::Err(ErrorCode::BadConnection))?;
        let mut header_buf = [0u8; eip::HEADER_SIZE];
        sock.recv_exact(&mut header_buf, deadline, || self.terminating())?;
        let header = eip::Header::parse(&header_buf)?;
        let mut body = vec![0u8; header.length as usize];
        if !body.is_empty() {
            sock.recv_exact(&mut body, deadline, || self.terminating())?;
        }
        if crate::debug::dump_packets() {
            log::debug!(
                "recv EIP frame cmd {:#06x}:\n{}",
                header.command,
                crate::debug::hex_dump(&body)
            );
        }
        Ok((header, body))
    }

    // ------------------------------------------------------------------
    // Modbus scheduler
    // ------------------------------------------------------------------

    /// pump the Modbus connection: keep up to `max_requests_in_flight`
    /// requests on the wire, matching replies by transaction id
    fn modbus_idle(&self, io: &mut IoState) -> State {
        // launch queued requests while slots remain
        while io.mb_in_flight.len() < self.max_requests_in_flight {
            let req = {
                let mut inner = self.inner.lock();
                if inner.requests.is_empty() {
                    None
                } else {
                    Some(inner.requests.remove(0))
                }
            };
            let Some(req) = req else { break };
            if req.is_aborted() {
                req.complete(Status::err_abort(), Vec::new());
                continue;
            }
            let tid = self.next_conn_seq();
            let frame = mb::mbap_frame(tid, self.unit_id, req.body());
            let deadline = Instant::now() + SOCKET_OP_TIMEOUT;
            let Some(sock) = io.sock.as_mut() else {
                req.complete(Status::Err(ErrorCode::BadConnection), Vec::new());
                return self.error_close();
            };
            match sock.send_all(&frame, deadline, || self.terminating()) {
                Ok(()) => {
                    self.inner.lock().last_activity = Instant::now();
                    io.mb_in_flight.push((tid, req));
                }
                Err(status) => {
                    log::warn!("modbus send failed: {}", status);
                    req.complete(status, Vec::new());
                    return self.error_close();
                }
            }
        }

        // pull in whatever arrived and deliver complete frames
        if !io.mb_in_flight.is_empty() {
            let Some(sock) = io.sock.as_mut() else {
                return self.error_close();
            };
            if let Err(status) = sock.recv_available(&mut io.mb_buf) {
                log::warn!("modbus receive failed: {}", status);
                return self.error_close();
            }
            loop {
                match mb::parse_mbap(&io.mb_buf) {
                    Ok(Some(frame)) => {
                        let pdu = io.mb_buf[frame.pdu_start..frame.frame_len].to_vec();
                        io.mb_buf.drain(..frame.frame_len);
                        match io
                            .mb_in_flight
                            .iter()
                            .position(|(tid, _)| *tid == frame.tid)
                        {
                            Some(pos) => {
                                let (_, req) = io.mb_in_flight.remove(pos);
                                req.complete(Status::Ok, pdu);
                                self.inner.lock().last_activity = Instant::now();
                            }
                            None => {
                                log::warn!("modbus reply with unknown tid {}", frame.tid);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        log::warn!("modbus framing error: {}", status);
                        return self.error_close();
                    }
                }
            }
        } else {
            if self.auto_disconnect_due() {
                log::info!("auto-disconnecting idle modbus session for {}", self.gateway);
                self.inner.lock().close_reason = CloseReason::AutoIdle;
                return State::CloseSocket;
            }
            let mut inner = self.inner.lock();
            if inner.requests.is_empty() && !inner.terminating {
                self.cond.wait_for(&mut inner, IDLE_WAIT);
            }
        }
        State::Idle
    }

    /// final teardown when the session terminates
    fn cleanup(&self, io: &mut IoState) {
        let pending: Vec<Arc<Request>> = {
            let mut inner = self.inner.lock();
            inner.requests.drain(..).collect()
        };
        for req in pending {
            req.complete(Status::err_abort(), Vec::new());
        }
        for (_, req) in io.mb_in_flight.drain(..) {
            req.complete(Status::err_abort(), Vec::new());
        }
        if io.sock.is_some() {
            // orderly teardown: ForwardClose, UnregisterSession, close;
            // each step checks its own negotiated flag
            let _ = self.do_disconnect(io);
            let _ = self.do_unregister(io);
        }
        io.sock = None;
        log::debug!("session thread for {} exited", self.gateway);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(gateway: &str, group: i32) -> SessionConfig {
        SessionConfig {
            gateway: gateway.to_owned(),
            path: "1,0".to_owned(),
            group,
            plc: Some(PlcKind::ControlLogix),
            unit_id: 0,
            conn_path: cip::encode_conn_path("1,0", PlcKind::ControlLogix, true).unwrap(),
            use_connected_msg: true,
            auto_disconnect_ms: None,
            max_requests_in_flight: 1,
            share_session: true,
        }
    }

    #[test]
    fn test_session_pooling_by_identity() {
        // nothing listens on this address; the session thread just retries
        let a = find_or_create(test_config("127.0.0.1:49999", 0)).unwrap();
        let b = find_or_create(test_config("127.0.0.1:49999", 0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // a different connection group partitions the pool
        let c = find_or_create(test_config("127.0.0.1:49999", 7)).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        c.detach();
        b.detach();
        a.detach();
    }

    #[test]
    fn test_unshared_sessions_are_distinct() {
        let mut cfg = test_config("127.0.0.1:49998", 0);
        cfg.share_session = false;
        let a = find_or_create(cfg).unwrap();
        let mut cfg = test_config("127.0.0.1:49998", 0);
        cfg.share_session = false;
        let b = find_or_create(cfg).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        a.detach();
        b.detach();
    }

    #[test]
    fn test_request_lifecycle() {
        let req = Request::new(TagId(1), vec![0x4C, 0x00], true, false);
        assert!(!req.is_aborted());
        assert!(req.take_response().is_none());
        req.complete(Status::Ok, vec![0xCC]);
        // double completion is ignored
        req.complete(Status::err_abort(), vec![]);
        let (status, resp) = req.take_response().unwrap();
        assert!(status.is_ok());
        assert_eq!(resp, vec![0xCC]);
    }

    #[test]
    fn test_tnsw_never_zero() {
        let session = find_or_create(test_config("127.0.0.1:49997", 0)).unwrap();
        for _ in 0..200 {
            assert_ne!(session.next_tnsw(), 0);
        }
        session.detach();
    }
}
