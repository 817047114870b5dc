// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

use crate::{asyncify, Error, Result};
use plctag_core::{RawTag, Status, TagId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;

/// async wrapper over a [`RawTag`]
///
/// operations are serialized per tag; a read or write holds the tag until
/// it completes, times out (aborting the pending operation) or fails.
pub struct AsyncTag {
    tag: Arc<RawTag>,
    lock: Mutex<()>,
}

impl AsyncTag {
    /// create the tag and wait for its initial read to settle
    pub async fn create(path: impl Into<String>) -> Result<AsyncTag> {
        let path = path.into();
        let tag = asyncify(move || RawTag::new(path, 0)).await?;
        let tag = Arc::new(tag);
        let this = AsyncTag {
            tag: Arc::clone(&tag),
            lock: Mutex::new(()),
        };
        let status = this.wait_ready().await;
        if status.is_err() {
            return Err(Error::TagError(status));
        }
        Ok(this)
    }

    /// tag id
    #[inline]
    pub fn id(&self) -> TagId {
        self.tag.id()
    }

    /// poll tag status
    #[inline]
    pub fn status(&self) -> Status {
        self.tag.status()
    }

    /// direct access to the wrapped tag
    #[inline]
    pub fn as_raw(&self) -> &RawTag {
        &self.tag
    }

    async fn wait_ready(&self) -> Status {
        loop {
            let status = self.tag.status();
            if !status.is_pending() {
                return status;
            }
            time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn wait_with_timeout(&self, timeout: Duration) -> Result<()> {
        match time::timeout(timeout, self.wait_ready()).await {
            Ok(status) => status.into_result().map_err(Error::from),
            Err(_) => {
                // abort the pending operation before reporting the timeout
                if let Err(e) = self.tag.abort() {
                    warn!("abort after timeout failed: {}", e);
                }
                Err(Error::TagError(Status::new(-32)))
            }
        }
    }

    /// perform a read, waiting at most `timeout`
    pub async fn read(&self, timeout: Duration) -> Result<()> {
        let _guard = self.lock.lock().await;
        let tag = Arc::clone(&self.tag);
        let status = asyncify(move || Ok(tag.read(0))).await?;
        if status.is_err() {
            return Err(Error::TagError(status));
        }
        if status.is_pending() {
            self.wait_with_timeout(timeout).await?;
        }
        Ok(())
    }

    /// perform a write, waiting at most `timeout`
    pub async fn write(&self, timeout: Duration) -> Result<()> {
        let _guard = self.lock.lock().await;
        let tag = Arc::clone(&self.tag);
        let status = asyncify(move || Ok(tag.write(0))).await?;
        if status.is_err() {
            return Err(Error::TagError(status));
        }
        if status.is_pending() {
            self.wait_with_timeout(timeout).await?;
        }
        Ok(())
    }

    /// abort the in-flight operation, if any
    pub async fn abort(&self) -> Result<()> {
        let tag = Arc::clone(&self.tag);
        asyncify(move || tag.abort()).await
    }
}

#[cfg(feature = "value")]
impl AsyncTag {
    /// read the tag then decode the value at `byte_offset`
    pub async fn read_value<T>(&self, byte_offset: u32, timeout: Duration) -> Result<T>
    where
        T: plctag_core::Decode + Send + 'static,
    {
        self.read(timeout).await?;
        let tag = Arc::clone(&self.tag);
        asyncify(move || tag.get_value(byte_offset)).await
    }

    /// encode the value at `byte_offset` then write the tag
    pub async fn write_value<T>(&self, byte_offset: u32, value: T, timeout: Duration) -> Result<()>
    where
        T: plctag_core::Encode + Send + 'static,
    {
        {
            let tag = Arc::clone(&self.tag);
            asyncify(move || tag.set_value(byte_offset, value)).await?;
        }
        self.write(timeout).await
    }
}
