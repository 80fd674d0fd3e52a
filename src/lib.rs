//! Functional model of an ARM-style System Memory Management Unit (SMMU).
//!
//! An SMMU sits between DMA-capable devices and system memory. Each device
//! transaction carries a Stream ID; the SMMU looks up the per-device
//! configuration, walks one or two stages of VMSAv8-64 long-descriptor page
//! tables, caches the result in a TLB and reports faults through an event
//! queue. Privileged software invalidates cached state through a command
//! queue.
//!
//! The model is single-threaded and synchronous: a call to
//! [`Smmu::translate`](smmu::Smmu::translate) runs to completion, including
//! any page-table reads, before returning. Memory is only ever read through
//! the descriptor read callback installed by
//! [`Smmu::set_memory`](smmu::Smmu::set_memory).
//!
//! Reference: ARM IHI 0070 (SMMU architecture), ARM DDI 0487 D8 (VMSAv8-64
//! translation).

/// Shared address, identifier and configuration types
pub mod types;

/// Physical memory backing store and descriptor read callback
pub mod mem;

/// Long-descriptor page-table walker
pub mod walker;

/// Translation lookaside buffer with LRU replacement
pub mod tlb;

/// Stream table and context descriptor storage
pub mod stream;

/// Command and event queues
pub mod queue;

/// Memory-mapped register file (SMMUv3 subset)
pub mod registers;

/// The translation pipeline
pub mod smmu;

// Re-export commonly used types
pub use mem::{PageTableBuilder, SysMemory};
pub use queue::{Command, Event};
pub use smmu::{Smmu, SmmuConfig, Statistics};
pub use tlb::TlbEntry;
pub use types::{
    AccessKind, AccessPermission, Asid, FaultType, MemoryType, PageSize, PhysicalAddress,
    StreamId, TranslationResult, TranslationStage, VirtualAddress, Vmid,
};
pub use types::{ContextDescriptor, StreamTableEntry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
