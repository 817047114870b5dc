// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! TCP plumbing for the session threads
//!
//! sockets are blocking with short read-timeout slices so the session
//! thread stays responsive to termination and aborts; partial reads and
//! writes resume from the current offset. cross-thread wake-ups go
//! through the session condition variable instead of a self-pipe.

use crate::{ErrorCode, Result, Status};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// how long one read slice blocks before control returns to the caller
const READ_SLICE: Duration = Duration::from_millis(20);

/// a connected TCP socket
pub(crate) struct TcpSock {
    stream: TcpStream,
}

impl TcpSock {
    /// resolve `host[:port]` (IPv4 literal or DNS) and connect with a timeout
    pub(crate) fn connect(gateway: &str, default_port: u16, timeout: Duration) -> Result<TcpSock> {
        let target = if gateway.contains(':') {
            gateway.to_owned()
        } else {
            format!("{}:{}", gateway, default_port)
        };
        let addrs: Vec<_> = target
            .to_socket_addrs()
            .map_err(|e| {
                log::warn!("cannot resolve gateway \"{}\": {}", gateway, e);
                Status::Err(ErrorCode::BadGateway)
            })?
            .collect();
        let mut last = Status::Err(ErrorCode::BadGateway);
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    stream.set_read_timeout(Some(READ_SLICE)).ok();
                    stream.set_write_timeout(Some(Duration::from_secs(10))).ok();
                    log::info!("connected to {}", addr);
                    return Ok(TcpSock { stream });
                }
                Err(e) => {
                    log::warn!("connect to {} failed: {}", addr, e);
                    last = e.into();
                }
            }
        }
        Err(last)
    }

    /// write the whole buffer, resuming across partial writes, until
    /// `deadline` or `stop()` fires
    pub(crate) fn send_all<F: Fn() -> bool>(
        &mut self,
        buf: &[u8],
        deadline: Instant,
        stop: F,
    ) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            if stop() {
                return Err(Status::err_abort());
            }
            if Instant::now() >= deadline {
                return Err(Status::err_timeout());
            }
            match self.stream.write(&buf[offset..]) {
                Ok(0) => return Err(Status::Err(ErrorCode::BadConnection)),
                Ok(n) => offset += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("socket write failed: {}", e);
                    return Err(Status::Err(ErrorCode::Write));
                }
            }
        }
        Ok(())
    }

    /// read exactly `buf.len()` bytes, resuming across short reads, until
    /// `deadline` or `stop()` fires
    pub(crate) fn recv_exact<F: Fn() -> bool>(
        &mut self,
        buf: &mut [u8],
        deadline: Instant,
        stop: F,
    ) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            if stop() {
                return Err(Status::err_abort());
            }
            if Instant::now() >= deadline {
                return Err(Status::err_timeout());
            }
            match self.stream.read(&mut buf[offset..]) {
                Ok(0) => {
                    log::warn!("peer closed the connection");
                    return Err(Status::Err(ErrorCode::BadConnection));
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("socket read failed: {}", e);
                    return Err(Status::Err(ErrorCode::Read));
                }
            }
        }
        Ok(())
    }

    /// append whatever arrives within one read slice; returns the number
    /// of bytes read, 0 when the slice elapsed quietly
    pub(crate) fn recv_available(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = [0u8; 1024];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                log::warn!("peer closed the connection");
                Err(Status::Err(ErrorCode::BadConnection))
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => {
                log::warn!("socket read failed: {}", e);
                Err(Status::Err(ErrorCode::Read))
            }
        }
    }
}
