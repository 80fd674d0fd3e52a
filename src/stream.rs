//! Stream table and context descriptor storage
//!
//! Two lookup-only maps: per-device configuration keyed by Stream ID and
//! per-address-space configuration keyed by (Stream ID, ASID). Reads of
//! absent keys return the invalid default entry, which the pipeline
//! treats as a translation fault. Writes replace; entries are never
//! garbage-collected.

use std::collections::HashMap;

use crate::types::{Asid, ContextDescriptor, StreamId, StreamTableEntry};

/// Per-device configuration table
#[derive(Default)]
pub struct StreamTable {
    entries: HashMap<StreamId, StreamTableEntry>,
}

impl StreamTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the entry for a stream
    pub fn configure(&mut self, stream_id: StreamId, ste: StreamTableEntry) {
        self.entries.insert(stream_id, ste);
    }

    /// Fetch the entry for a stream, invalid when absent
    pub fn get(&self, stream_id: StreamId) -> StreamTableEntry {
        self.entries
            .get(&stream_id)
            .copied()
            .unwrap_or_default()
    }

    /// Number of configured streams
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any stream is configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-(stream, address space) configuration table
#[derive(Default)]
pub struct ContextDescriptorTable {
    entries: HashMap<u64, ContextDescriptor>,
}

impl ContextDescriptorTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    // The 16-bit ASID packs into the low bits without colliding with the
    // stream id
    fn key(stream_id: StreamId, asid: Asid) -> u64 {
        (stream_id as u64) << 16 | asid as u64
    }

    /// Install or replace the descriptor for (stream, asid)
    pub fn configure(&mut self, stream_id: StreamId, asid: Asid, cd: ContextDescriptor) {
        self.entries.insert(Self::key(stream_id, asid), cd);
    }

    /// Fetch the descriptor for (stream, asid), invalid when absent
    pub fn get(&self, stream_id: StreamId, asid: Asid) -> ContextDescriptor {
        self.entries
            .get(&Self::key(stream_id, asid))
            .copied()
            .unwrap_or_default()
    }

    /// Number of configured descriptors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any descriptor is configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
