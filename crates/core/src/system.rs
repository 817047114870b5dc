// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! in-process system tags
//!
//! `make=system&family=library&name=version` and `...&name=debug` never
//! touch a socket; they complete synchronously against library state.

use crate::debug::{get_debug_level, set_debug_level, DebugLevel};
use crate::tag::{TagContext, TagOps, TagState};
use crate::{ErrorCode, Result, Status};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SystemKind {
    /// three u32s: major, minor, patch
    Version,
    /// one u32 debug level, writable
    Debug,
}

/// virtual tag backend for library internals
pub(crate) struct SystemTag {
    kind: SystemKind,
}

impl SystemTag {
    pub(crate) fn parse(name: &str) -> Result<SystemTag> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "version" => SystemKind::Version,
            "debug" => SystemKind::Debug,
            _ => {
                log::warn!("unknown system tag \"{}\"", name);
                return Err(Status::Err(ErrorCode::NotFound));
            }
        };
        Ok(SystemTag { kind })
    }

    pub(crate) fn elem_size(&self) -> usize {
        4
    }

    pub(crate) fn elem_count(&self) -> usize {
        match self.kind {
            SystemKind::Version => 3,
            SystemKind::Debug => 1,
        }
    }
}

impl TagOps for SystemTag {
    fn start_read(&mut self, _ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        match self.kind {
            SystemKind::Version => {
                let (major, minor, patch) = crate::lib_version();
                state.data[0..4].copy_from_slice(&major.to_le_bytes());
                state.data[4..8].copy_from_slice(&minor.to_le_bytes());
                state.data[8..12].copy_from_slice(&patch.to_le_bytes());
            }
            SystemKind::Debug => {
                let level = get_debug_level() as u32;
                state.data[0..4].copy_from_slice(&level.to_le_bytes());
            }
        }
        state.status = Status::Ok;
        state.read_complete = true;
        Ok(())
    }

    fn start_write(&mut self, _ctx: &TagContext<'_>, state: &mut TagState) -> Result<()> {
        match self.kind {
            SystemKind::Version => {
                log::warn!("the version system tag is read-only");
                return Err(Status::Err(ErrorCode::NotAllowed));
            }
            SystemKind::Debug => {
                let level = u32::from_le_bytes(state.data[0..4].try_into().unwrap_or_default());
                set_debug_level(DebugLevel::from(level as u8));
            }
        }
        state.status = Status::Ok;
        state.write_complete = true;
        Ok(())
    }

    fn abort(&mut self) {}

    fn tick(&mut self, _ctx: &TagContext<'_>, _state: &mut TagState) {}

    fn get_int_attr(&self, _state: &TagState, name: &str) -> Option<i32> {
        match name {
            "debug" => Some(get_debug_level() as i32),
            "version_major" => Some(crate::lib_version().0 as i32),
            "version_minor" => Some(crate::lib_version().1 as i32),
            "version_patch" => Some(crate::lib_version().2 as i32),
            _ => None,
        }
    }

    fn set_int_attr(&mut self, _state: &mut TagState, name: &str, value: i32) -> Result<()> {
        match name {
            "debug" => {
                set_debug_level(DebugLevel::from(value as u8));
                Ok(())
            }
            _ => Err(Status::Err(ErrorCode::Unsupported)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert!(SystemTag::parse("version").is_ok());
        assert!(SystemTag::parse("Debug").is_ok());
        assert!(SystemTag::parse("bogus").is_err());
    }

    #[test]
    fn test_sizes() {
        let version = SystemTag::parse("version").unwrap();
        assert_eq!(version.elem_count(), 3);
        let debug = SystemTag::parse("debug").unwrap();
        assert_eq!(debug.elem_count(), 1);
        assert_eq!(debug.elem_size(), 4);
    }
}
