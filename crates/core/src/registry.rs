// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! process-wide tag registry and the global tickler thread
//!
//! tags live in an id-keyed map; ids are dense 28-bit integers, never zero,
//! reused only after a full wrap. the tickler thread iterates the registry
//! at most every 100 ms, earlier when an auto-sync deadline is nearer or
//! when signalled, advancing in-flight operations and dispatching events.

use crate::tag::{TagCore, TagId};
use crate::{ErrorCode, Result, Status};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// tag ids are masked to 28 bits
const TAG_ID_MASK: i32 = 0x0FFF_FFFF;
/// longest the tickler sleeps between passes
const TICKLER_PERIOD: Duration = Duration::from_millis(100);

struct Tables {
    tags: HashMap<i32, Arc<TagCore>>,
    next_id: i32,
    tickler: Option<JoinHandle<()>>,
    wake: bool,
    shutdown: bool,
}

struct Registry {
    tables: Mutex<Tables>,
    cond: Condvar,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    tables: Mutex::new(Tables {
        tags: HashMap::new(),
        next_id: 1,
        tickler: None,
        wake: false,
        shutdown: false,
    }),
    cond: Condvar::new(),
});

/// register a tag, allocating its id; spawns the tickler on first use
pub(crate) fn insert(tag: Arc<TagCore>) -> Result<TagId> {
    let mut tables = REGISTRY.tables.lock();
    if tables.tags.len() >= TAG_ID_MASK as usize {
        return Err(Status::Err(ErrorCode::NoResources));
    }
    let mut id = tables.next_id;
    loop {
        if id != 0 && !tables.tags.contains_key(&id) {
            break;
        }
        id = (id + 1) & TAG_ID_MASK;
    }
    tables.next_id = (id + 1) & TAG_ID_MASK;
    tag.set_id(id);
    tables.tags.insert(id, tag);
    tables.shutdown = false;
    if tables.tickler.is_none() {
        tables.tickler = Some(
            thread::Builder::new()
                .name("plctag-tickler".into())
                .spawn(tickler_loop)
                .map_err(|e| {
                    log::error!("cannot spawn tickler thread: {}", e);
                    Status::Err(ErrorCode::ThreadCreate)
                })?,
        );
    }
    log::debug!("tag registered with id {}", id);
    Ok(TagId(id))
}

pub(crate) fn get(id: TagId) -> Option<Arc<TagCore>> {
    let tables = REGISTRY.tables.lock();
    tables.tags.get(&id.0).cloned()
}

pub(crate) fn remove(id: TagId) -> Option<Arc<TagCore>> {
    let mut tables = REGISTRY.tables.lock();
    tables.tags.remove(&id.0)
}

/// wake the tickler for an early pass (a response landed, an abort was
/// requested, ...)
pub(crate) fn wake() {
    let mut tables = REGISTRY.tables.lock();
    tables.wake = true;
    REGISTRY.cond.notify_all();
}

fn snapshot() -> Vec<Arc<TagCore>> {
    let tables = REGISTRY.tables.lock();
    tables.tags.values().cloned().collect()
}

fn tickler_loop() {
    log::debug!("tickler thread started");
    loop {
        // sleep until the default period or the nearest auto-sync deadline,
        // whichever comes first, unless a wake is already pending
        let mut deadline = Instant::now() + TICKLER_PERIOD;
        for tag in snapshot() {
            if let Some(d) = tag.next_deadline() {
                if d < deadline {
                    deadline = d;
                }
            }
        }
        {
            let mut tables = REGISTRY.tables.lock();
            if tables.shutdown {
                break;
            }
            if !tables.wake {
                REGISTRY.cond.wait_until(&mut tables, deadline);
            }
            if tables.shutdown {
                break;
            }
            tables.wake = false;
        }
        for tag in snapshot() {
            tag.tick();
        }
    }
    log::debug!("tickler thread stopped");
}

/// tear the library down: destroy all remaining tags and stop the tickler.
/// tags created afterwards restart the machinery lazily.
pub fn shutdown() {
    let ids: Vec<TagId> = {
        let tables = REGISTRY.tables.lock();
        tables.tags.keys().map(|id| TagId(*id)).collect()
    };
    for id in ids {
        if let Err(e) = crate::tag::destroy(id) {
            log::warn!("destroy of tag {} during shutdown failed: {}", id.value(), e);
        }
    }
    let handle = {
        let mut tables = REGISTRY.tables.lock();
        tables.shutdown = true;
        REGISTRY.cond.notify_all();
        tables.tickler.take()
    };
    if let Some(handle) = handle {
        if handle.join().is_err() {
            log::warn!("tickler thread panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_tag() -> Arc<TagCore> {
        crate::tag::test_support::new_system_core()
    }

    #[test]
    fn test_id_allocation_dense_nonzero() {
        let a = insert(fake_tag()).unwrap();
        let b = insert(fake_tag()).unwrap();
        assert_ne!(a.value(), 0);
        assert_ne!(b.value(), 0);
        assert_ne!(a, b);
        assert!(get(a).is_some());
        assert!(remove(a).is_some());
        assert!(get(a).is_none());
        remove(b);
    }

    #[test]
    fn test_id_wrap_skips_in_use() {
        let a = insert(fake_tag()).unwrap();
        {
            let mut tables = REGISTRY.tables.lock();
            // force the allocator to wrap onto the live id
            tables.next_id = a.value();
        }
        let b = insert(fake_tag()).unwrap();
        assert_ne!(a, b);
        remove(a);
        remove(b);
    }
}
