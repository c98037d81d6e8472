//! Stream tags and the per-buffer tag store.
//!
//! A [`Tag`] is an immutable key/value annotation attached to an absolute
//! sample position in a stream. Tags ride alongside the data in an
//! offset-ordered side channel — the [`TagStore`] — owned by the buffer they
//! were attached to, and are garbage-collected once the slowest consumer has
//! read past their offset.
//!
//! [`Value`] doubles as the payload type for the message-port domain.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::graph::BlockId;

/// Payload carried by a [`Tag`] or a message-port message.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No payload (marker tags such as packet boundaries).
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer (sample counts, packet lengths).
    Int(i64),
    /// Floating point (rate changes, frequencies).
    Float(f64),
    /// Text.
    Str(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// An annotation attached to an absolute item offset in a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Absolute item index since stream start.
    pub offset: u64,
    /// Tag key (e.g. `"rx_rate"`, `"packet_len"`).
    pub key: String,
    /// Tag payload.
    pub value: Value,
    /// Block that attached the tag.
    pub src: BlockId,
}

impl Tag {
    /// Creates a new tag.
    pub fn new(offset: u64, key: impl Into<String>, value: Value, src: BlockId) -> Self {
        Self {
            offset,
            key: key.into(),
            value,
            src,
        }
    }
}

/// How the executor maps a block's consumed input tags onto its output.
///
/// Whatever the policy, the runtime never silently drops a tag: a tag
/// disappears only when the owning block explicitly consumes it (policy
/// [`Manual`](Self::Manual) with no re-emission).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TagPropagation {
    /// Tags on input port *i* are copied to output port *i*, with offsets
    /// scaled by the block's relative rate (identity for 1:1 blocks).
    #[default]
    OneToOne,
    /// Every consumed input tag is copied to every output port, offsets
    /// scaled by the relative rate.
    AllToAll,
    /// The block moves tags itself inside `work()`; the executor does not
    /// propagate anything.
    Manual,
}

/// Offset-ordered multimap of tags for one buffer.
///
/// Inserts are O(log n); multiple tags may share an offset and keep their
/// insertion order. The producer mutates the store and all consumers read it,
/// so it is guarded by a mutex — unlike the cursor handoff, tag traffic is
/// low-frequency.
#[derive(Debug, Default)]
pub struct TagStore {
    inner: Mutex<BTreeMap<u64, Vec<Tag>>>,
}

impl TagStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tag at its offset.
    pub fn add(&self, tag: Tag) {
        let mut map = self.inner.lock().expect("tag store poisoned");
        map.entry(tag.offset).or_default().push(tag);
    }

    /// Returns all tags with `start <= offset < end`, in ascending offset
    /// order (insertion order within one offset).
    pub fn range(&self, start: u64, end: u64) -> Vec<Tag> {
        if start >= end {
            return Vec::new();
        }
        let map = self.inner.lock().expect("tag store poisoned");
        map.range(start..end)
            .flat_map(|(_, tags)| tags.iter().cloned())
            .collect()
    }

    /// Drops every tag below `min_offset` — called once the slowest consumer
    /// has read past it.
    pub fn prune(&self, min_offset: u64) {
        let mut map = self.inner.lock().expect("tag store poisoned");
        *map = map.split_off(&min_offset);
    }

    /// Number of tags currently retained.
    pub fn len(&self) -> usize {
        let map = self.inner.lock().expect("tag store poisoned");
        map.values().map(Vec::len).sum()
    }

    /// Returns true if no tags are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
