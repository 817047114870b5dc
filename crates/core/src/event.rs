// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! tag event handling
//!
//! a tag raises discrete events as operations progress. events pend on the
//! tag until the tickler thread (or the destroy path) drains them and invokes
//! the registered callback. repeated raises before a drain coalesce to the
//! latest status.

use crate::{Status, TagId};

/// discrete tag events, stable integer values
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Event {
    /// the tag was created and registered
    Created = 1,
    /// a read operation was started
    ReadStarted = 2,
    /// a read operation finished
    ReadCompleted = 3,
    /// a write operation was started; raised before the write packet is
    /// built so the callback may still fill the tag buffer
    WriteStarted = 4,
    /// a write operation finished
    WriteCompleted = 5,
    /// an in-flight operation was aborted
    Aborted = 6,
    /// the tag is being destroyed; always the last event, delivered once
    Destroyed = 7,
}

/// dispatch order within one drain. `Destroyed` is always last.
const DISPATCH_ORDER: [Event; 7] = [
    Event::Created,
    Event::ReadStarted,
    Event::WriteStarted,
    Event::Aborted,
    Event::ReadCompleted,
    Event::WriteCompleted,
    Event::Destroyed,
];

/// per-tag event callback
pub type EventCallback = Box<dyn FnMut(TagId, Event, Status) + Send>;

/// pending-event bookkeeping held inside the tag, guarded by the API mutex
#[derive(Default)]
pub(crate) struct EventSet {
    pending: [bool; 7],
    status: [Option<Status>; 7],
    destroyed_fired: bool,
}

impl EventSet {
    #[inline]
    fn slot(event: Event) -> usize {
        event as usize - 1
    }

    /// mark an event pending; a later raise of the same event before the
    /// next drain overwrites the status
    pub(crate) fn raise(&mut self, event: Event, status: Status) {
        if event == Event::Destroyed && self.destroyed_fired {
            return;
        }
        let slot = Self::slot(event);
        self.pending[slot] = true;
        self.status[slot] = Some(status);
    }

    /// take all pending events in dispatch order
    pub(crate) fn drain(&mut self) -> Vec<(Event, Status)> {
        let mut out = Vec::new();
        for &event in DISPATCH_ORDER.iter() {
            let slot = Self::slot(event);
            if self.pending[slot] {
                self.pending[slot] = false;
                if event == Event::Destroyed {
                    self.destroyed_fired = true;
                }
                out.push((event, self.status[slot].take().unwrap_or(Status::Ok)));
            }
        }
        out
    }

    #[inline]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.iter().any(|p| *p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_dispatch_order() {
        let mut set = EventSet::default();
        set.raise(Event::Destroyed, Status::Ok);
        set.raise(Event::ReadCompleted, Status::Ok);
        set.raise(Event::ReadStarted, Status::Ok);
        set.raise(Event::Created, Status::Ok);
        let order: Vec<Event> = set.drain().into_iter().map(|(e, _)| e).collect();
        assert_eq!(
            order,
            vec![
                Event::Created,
                Event::ReadStarted,
                Event::ReadCompleted,
                Event::Destroyed
            ]
        );
        assert!(!set.has_pending());
    }

    #[test]
    fn test_coalesce_to_latest_status() {
        let mut set = EventSet::default();
        set.raise(Event::ReadCompleted, Status::Err(ErrorCode::Timeout));
        set.raise(Event::ReadCompleted, Status::Ok);
        let drained = set.drain();
        assert_eq!(drained, vec![(Event::ReadCompleted, Status::Ok)]);
    }

    #[test]
    fn test_destroyed_only_once() {
        let mut set = EventSet::default();
        set.raise(Event::Destroyed, Status::Ok);
        assert_eq!(set.drain().len(), 1);
        set.raise(Event::Destroyed, Status::Ok);
        assert!(set.drain().is_empty());
    }
}
