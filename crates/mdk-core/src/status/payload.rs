//! Untyped status payloads delivered by vendor progress callbacks.
//!
//! The vendor hands every callback a string-keyed dictionary. Backends
//! convert it into a [`StatusPayload`] at the FFI boundary; only the
//! decoder looks inside it.

use std::collections::HashMap;

pub const KEY_STATUS: &str = "Status";
pub const KEY_PERCENT_COMPLETE: &str = "PercentComplete";
pub const KEY_TOTAL_FILES: &str = "TotalFiles";
pub const KEY_TOTAL_BYTES: &str = "TotalBytes";
pub const KEY_NUM_FILES: &str = "NumFiles";
pub const KEY_NUM_BYTES: &str = "NumBytes";
pub const KEY_PATH: &str = "Path";

/// A single value inside a status payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Data(Vec<u8>),
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::String(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::String(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Integer(value)
    }
}

impl From<i32> for PayloadValue {
    fn from(value: i32) -> Self {
        PayloadValue::Integer(value.into())
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Boolean(value)
    }
}

impl From<Vec<u8>> for PayloadValue {
    fn from(value: Vec<u8>) -> Self {
        PayloadValue::Data(value)
    }
}

/// String-keyed mapping reported by a progress callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPayload {
    entries: HashMap<String, PayloadValue>,
}

impl StatusPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            PayloadValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            PayloadValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer value that must not be negative (counts and sizes).
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_i64(key).and_then(|n| u64::try_from(n).ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for StatusPayload
where
    K: Into<String>,
    V: Into<PayloadValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
