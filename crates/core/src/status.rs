// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

use std::fmt;
use std::result;

/// STATUS_OK = 0
pub const STATUS_OK: i32 = 0;
/// STATUS_PENDING = 1
pub const STATUS_PENDING: i32 = 1;

/// plctag result
pub type Result<T> = result::Result<T, Status>;

/// flat library error codes, stable across versions
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// operation was aborted by the client
    Abort = -1,
    /// the tag attribute string is malformed or inconsistent
    BadConfig = -2,
    /// the connection to the PLC is broken
    BadConnection = -3,
    /// data received from the PLC could not be decoded
    BadData = -4,
    /// the PLC reported an internal device failure
    BadDevice = -5,
    /// the gateway address could not be resolved or reached
    BadGateway = -6,
    /// an argument or attribute value is out of range
    BadParam = -7,
    /// the PLC reply did not match the request
    BadReply = -8,
    /// the PLC reply carried a non-zero protocol status
    BadStatus = -9,
    /// closing the connection failed
    Close = -10,
    /// tag creation failed
    Create = -11,
    /// duplicate resource (e.g. CIP connection already in use)
    Duplicate = -12,
    /// encoding a request failed
    Encode = -13,
    /// mutex teardown failed
    MutexDestroy = -14,
    /// mutex setup failed
    MutexInit = -15,
    /// mutex lock failed
    MutexLock = -16,
    /// mutex unlock failed
    MutexUnlock = -17,
    /// the operation is not allowed on this tag
    NotAllowed = -18,
    /// the named item does not exist on the PLC
    NotFound = -19,
    /// the operation is not implemented
    NotImplemented = -20,
    /// no data available
    NoData = -21,
    /// no match for the request
    NoMatch = -22,
    /// out of memory
    NoMem = -23,
    /// out of internal resources (e.g. request slots)
    NoResources = -24,
    /// unexpected null/missing object
    NullPtr = -25,
    /// opening the connection failed
    Open = -26,
    /// a client access fell outside the tag buffer
    OutOfBounds = -27,
    /// reading from the socket failed
    Read = -28,
    /// the PLC reported a remote error
    RemoteErr = -29,
    /// spawning an internal thread failed
    ThreadCreate = -30,
    /// joining an internal thread failed
    ThreadJoin = -31,
    /// the operation timed out
    Timeout = -32,
    /// the request or reply was too large for the negotiated payload
    TooLarge = -33,
    /// the request or reply was too small
    TooSmall = -34,
    /// the PLC does not support the requested service
    Unsupported = -35,
    /// low-level socket subsystem error
    Winsock = -36,
    /// writing to the socket failed
    Write = -37,
    /// partial result; more data expected
    Partial = -38,
    /// the resource is busy
    Busy = -39,
}

impl ErrorCode {
    /// decode the error code to its stable name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::Abort => "PLCTAG_ERR_ABORT",
            ErrorCode::BadConfig => "PLCTAG_ERR_BAD_CONFIG",
            ErrorCode::BadConnection => "PLCTAG_ERR_BAD_CONNECTION",
            ErrorCode::BadData => "PLCTAG_ERR_BAD_DATA",
            ErrorCode::BadDevice => "PLCTAG_ERR_BAD_DEVICE",
            ErrorCode::BadGateway => "PLCTAG_ERR_BAD_GATEWAY",
            ErrorCode::BadParam => "PLCTAG_ERR_BAD_PARAM",
            ErrorCode::BadReply => "PLCTAG_ERR_BAD_REPLY",
            ErrorCode::BadStatus => "PLCTAG_ERR_BAD_STATUS",
            ErrorCode::Close => "PLCTAG_ERR_CLOSE",
            ErrorCode::Create => "PLCTAG_ERR_CREATE",
            ErrorCode::Duplicate => "PLCTAG_ERR_DUPLICATE",
            ErrorCode::Encode => "PLCTAG_ERR_ENCODE",
            ErrorCode::MutexDestroy => "PLCTAG_ERR_MUTEX_DESTROY",
            ErrorCode::MutexInit => "PLCTAG_ERR_MUTEX_INIT",
            ErrorCode::MutexLock => "PLCTAG_ERR_MUTEX_LOCK",
            ErrorCode::MutexUnlock => "PLCTAG_ERR_MUTEX_UNLOCK",
            ErrorCode::NotAllowed => "PLCTAG_ERR_NOT_ALLOWED",
            ErrorCode::NotFound => "PLCTAG_ERR_NOT_FOUND",
            ErrorCode::NotImplemented => "PLCTAG_ERR_NOT_IMPLEMENTED",
            ErrorCode::NoData => "PLCTAG_ERR_NO_DATA",
            ErrorCode::NoMatch => "PLCTAG_ERR_NO_MATCH",
            ErrorCode::NoMem => "PLCTAG_ERR_NO_MEM",
            ErrorCode::NoResources => "PLCTAG_ERR_NO_RESOURCES",
            ErrorCode::NullPtr => "PLCTAG_ERR_NULL_PTR",
            ErrorCode::Open => "PLCTAG_ERR_OPEN",
            ErrorCode::OutOfBounds => "PLCTAG_ERR_OUT_OF_BOUNDS",
            ErrorCode::Read => "PLCTAG_ERR_READ",
            ErrorCode::RemoteErr => "PLCTAG_ERR_REMOTE_ERR",
            ErrorCode::ThreadCreate => "PLCTAG_ERR_THREAD_CREATE",
            ErrorCode::ThreadJoin => "PLCTAG_ERR_THREAD_JOIN",
            ErrorCode::Timeout => "PLCTAG_ERR_TIMEOUT",
            ErrorCode::TooLarge => "PLCTAG_ERR_TOO_LARGE",
            ErrorCode::TooSmall => "PLCTAG_ERR_TOO_SMALL",
            ErrorCode::Unsupported => "PLCTAG_ERR_UNSUPPORTED",
            ErrorCode::Winsock => "PLCTAG_ERR_WINSOCK",
            ErrorCode::Write => "PLCTAG_ERR_WRITE",
            ErrorCode::Partial => "PLCTAG_ERR_PARTIAL",
            ErrorCode::Busy => "PLCTAG_ERR_BUSY",
        }
    }

    /// map a raw i32 code back to an [`ErrorCode`], if it is one
    pub fn from_raw(rc: i32) -> Option<ErrorCode> {
        if (-39..=-1).contains(&rc) {
            // repr(i32) values are dense, transmute-free mapping via match
            Some(match rc {
                -1 => ErrorCode::Abort,
                -2 => ErrorCode::BadConfig,
                -3 => ErrorCode::BadConnection,
                -4 => ErrorCode::BadData,
                -5 => ErrorCode::BadDevice,
                -6 => ErrorCode::BadGateway,
                -7 => ErrorCode::BadParam,
                -8 => ErrorCode::BadReply,
                -9 => ErrorCode::BadStatus,
                -10 => ErrorCode::Close,
                -11 => ErrorCode::Create,
                -12 => ErrorCode::Duplicate,
                -13 => ErrorCode::Encode,
                -14 => ErrorCode::MutexDestroy,
                -15 => ErrorCode::MutexInit,
                -16 => ErrorCode::MutexLock,
                -17 => ErrorCode::MutexUnlock,
                -18 => ErrorCode::NotAllowed,
                -19 => ErrorCode::NotFound,
                -20 => ErrorCode::NotImplemented,
                -21 => ErrorCode::NoData,
                -22 => ErrorCode::NoMatch,
                -23 => ErrorCode::NoMem,
                -24 => ErrorCode::NoResources,
                -25 => ErrorCode::NullPtr,
                -26 => ErrorCode::Open,
                -27 => ErrorCode::OutOfBounds,
                -28 => ErrorCode::Read,
                -29 => ErrorCode::RemoteErr,
                -30 => ErrorCode::ThreadCreate,
                -31 => ErrorCode::ThreadJoin,
                -32 => ErrorCode::Timeout,
                -33 => ErrorCode::TooLarge,
                -34 => ErrorCode::TooSmall,
                -35 => ErrorCode::Unsupported,
                -36 => ErrorCode::Winsock,
                -37 => ErrorCode::Write,
                -38 => ErrorCode::Partial,
                _ => ErrorCode::Busy,
            })
        } else {
            None
        }
    }
}

/// tag status
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// STATUS_OK = 0
    Ok,
    /// STATUS_PENDING = 1
    Pending,
    /// error codes
    Err(ErrorCode),
}

impl Status {
    /// build a status from a raw status code
    #[inline]
    pub fn new(rc: i32) -> Self {
        match rc {
            STATUS_OK => Status::Ok,
            STATUS_PENDING => Status::Pending,
            _ => Status::Err(ErrorCode::from_raw(rc).unwrap_or(ErrorCode::RemoteErr)),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    #[inline]
    pub fn is_err(&self) -> bool {
        matches!(self, Status::Err(_))
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Status::Pending)
    }

    /// true if the status is `ERR_TIMEOUT`
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Status::Err(ErrorCode::Timeout))
    }

    #[inline]
    pub fn into_result(self) -> Result<()> {
        if self.is_err() {
            Err(self)
        } else {
            Ok(())
        }
    }

    /// decode status to its stable `PLCTAG_*` name
    ///
    /// # Examples
    /// ```rust
    /// use plctag_core::Status;
    ///
    /// let status = Status::Ok;
    /// let msg = status.decode();
    /// assert_eq!(msg, "PLCTAG_STATUS_OK");
    /// ```
    #[inline]
    pub fn decode(&self) -> &'static str {
        match self {
            Status::Ok => "PLCTAG_STATUS_OK",
            Status::Pending => "PLCTAG_STATUS_PENDING",
            Status::Err(e) => e.name(),
        }
    }

    #[doc(hidden)]
    #[inline]
    pub(crate) fn err_timeout() -> Self {
        Status::Err(ErrorCode::Timeout)
    }

    #[doc(hidden)]
    #[inline]
    pub(crate) fn err_abort() -> Self {
        Status::Err(ErrorCode::Abort)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.decode())
    }
}

impl std::error::Error for Status {}

impl From<ErrorCode> for Status {
    #[inline]
    fn from(e: ErrorCode) -> Status {
        Status::Err(e)
    }
}

impl From<Status> for Result<()> {
    #[inline]
    fn from(status: Status) -> Result<()> {
        status.into_result()
    }
}

impl From<i32> for Status {
    #[inline]
    fn from(rc: i32) -> Status {
        Status::new(rc)
    }
}

impl From<Status> for i32 {
    #[inline]
    fn from(status: Status) -> i32 {
        match status {
            Status::Ok => STATUS_OK,
            Status::Pending => STATUS_PENDING,
            Status::Err(e) => e as i32,
        }
    }
}

impl From<std::io::Error> for Status {
    fn from(e: std::io::Error) -> Status {
        use std::io::ErrorKind;
        let code = match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ErrorCode::Timeout,
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionAborted => ErrorCode::Open,
            ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => ErrorCode::BadConnection,
            ErrorKind::NotFound | ErrorKind::AddrNotAvailable => ErrorCode::BadGateway,
            ErrorKind::UnexpectedEof => ErrorCode::BadConnection,
            _ => ErrorCode::Winsock,
        };
        Status::Err(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok() {
        let status = Status::Ok;
        assert_eq!(status.decode(), "PLCTAG_STATUS_OK");
        assert_eq!(i32::from(status), 0);
    }

    #[test]
    fn test_status_pending() {
        let status = Status::Pending;
        assert_eq!(status.decode(), "PLCTAG_STATUS_PENDING");
        assert_eq!(i32::from(status), 1);
    }

    #[test]
    fn test_error_codes_roundtrip() {
        for rc in -39..=-1 {
            let code = ErrorCode::from_raw(rc).unwrap();
            assert_eq!(code as i32, rc);
            assert_eq!(i32::from(Status::Err(code)), rc);
        }
        assert!(ErrorCode::from_raw(0).is_none());
        assert!(ErrorCode::from_raw(-40).is_none());
    }

    #[test]
    fn test_timeout() {
        let status = Status::new(-32);
        assert!(status.is_timeout());
        assert_eq!(status.decode(), "PLCTAG_ERR_TIMEOUT");
    }
}
