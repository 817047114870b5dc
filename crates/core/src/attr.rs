// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! tag attribute string parsing
//!
//! an attribute string is an ampersand separated list of `key=value` pairs,
//! e.g. `protocol=ab_eip&gateway=10.0.0.5&path=1,0&name=MyTag`. keys are
//! case-insensitive; values are taken verbatim.

use crate::{ErrorCode, Result, Status};
use std::collections::HashMap;
use std::str::FromStr;

/// parsed attribute map
#[derive(Debug, Clone, Default)]
pub(crate) struct AttributeMap {
    map: HashMap<String, String>,
}

impl AttributeMap {
    /// parse an attribute string
    pub(crate) fn parse(attrs: &str) -> Result<Self> {
        let mut map = HashMap::new();
        for part in attrs.split('&') {
            if part.is_empty() {
                continue;
            }
            let (key, value) = match part.split_once('=') {
                Some(kv) => kv,
                None => {
                    log::warn!("attribute \"{}\" has no value", part);
                    return Err(Status::Err(ErrorCode::BadParam));
                }
            };
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(Status::Err(ErrorCode::BadParam));
            }
            if map.insert(key.clone(), value.to_owned()).is_some() {
                log::warn!("attribute \"{}\" given more than once", key);
            }
        }
        Ok(Self { map })
    }

    #[inline]
    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|v| v.as_str())
    }

    /// parse an integer attribute, falling back to `default` when absent
    pub(crate) fn get_int<T: FromStr + Copy>(&self, key: &str, default: T) -> Result<T> {
        match self.map.get(key) {
            Some(v) => v.parse().map_err(|_| {
                log::warn!("attribute \"{}\" has invalid value \"{}\"", key, v);
                Status::Err(ErrorCode::BadParam)
            }),
            None => Ok(default),
        }
    }

    /// parse a 0/1 boolean attribute
    pub(crate) fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.map.get(key).map(|v| v.as_str()) {
            Some("0") => Ok(false),
            Some("1") => Ok(true),
            Some(v) => {
                log::warn!("attribute \"{}\" must be 0 or 1, got \"{}\"", key, v);
                Err(Status::Err(ErrorCode::BadParam))
            }
            None => Ok(default),
        }
    }

    /// parse an integer attribute and clamp it into `lo..=hi`
    pub(crate) fn get_int_clamped(&self, key: &str, default: i64, lo: i64, hi: i64) -> Result<i64> {
        let v: i64 = self.get_int(key, default)?;
        Ok(v.clamp(lo, hi))
    }
}
