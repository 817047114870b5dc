// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

/*!
# plctag-async

tokio based async wrapper for `plctag-core`.

## How to use

Add `plctag-async` to your Cargo.toml

```toml
[dependencies]
plctag-async = "0.4"
```

## Examples

```rust,ignore
use plctag_async::{AsyncTag, Error};
use std::time::Duration;
use tokio::runtime;

let rt = runtime::Runtime::new().unwrap();
rt.block_on(async {
    let path = "protocol=ab_eip&plc=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1";
    let tag = AsyncTag::create(path).await.unwrap();
    let offset = 0;
    let value: u16 = tag.read_value(offset, Duration::from_millis(500)).await.unwrap();
    println!("tag value: {}", value);

    tag.write_value(offset, value + 10, Duration::from_millis(500)).await.unwrap();
});
```

## Thread-safety

It's thread-safe to perform operations with `plctag-async`.

## License

MIT
*/
#![warn(missing_docs)]

extern crate plctag_core;
extern crate tokio;
#[macro_use]
extern crate log;

mod op;

pub use op::AsyncTag;
pub use plctag_core::{Status, TagId};

use std::fmt;
use tokio::task::{self, JoinError};

/// result for `plctag-async`
pub type Result<T> = std::result::Result<T, Error>;

/// errors for `plctag-async`
#[derive(Debug)]
pub enum Error {
    /// plc tag error
    TagError(Status),
    /// tokio task join error
    JoinError(JoinError),
    /// other error
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::TagError(_) => None,
            Error::JoinError(e) => Some(e),
            Error::Other(e) => Some(e.as_ref()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TagError(e) => write!(f, "TagError - {}", e),
            Error::JoinError(e) => write!(f, "{}", e),
            Error::Other(e) => write!(f, "{}", e),
        }
    }
}

impl From<Status> for Error {
    fn from(s: Status) -> Self {
        Error::TagError(s)
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Error::JoinError(e)
    }
}

/// run a blocking core call on the tokio blocking pool
pub(crate) async fn asyncify<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> plctag_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(f).await {
        Ok(res) => res.map_err(Error::from),
        Err(e) => Err(Error::JoinError(e)),
    }
}
