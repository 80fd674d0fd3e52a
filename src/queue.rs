//! Command and event queues
//!
//! Both queues are bounded FIFOs with silently-dropping producers, the
//! way the hardware behaves when software lets a queue fill up: the
//! producer never blocks and overflow is observable only through the
//! producer/consumer indices, or here through the statistics.

use std::collections::VecDeque;

use crate::types::{Asid, FaultType, StreamId, VirtualAddress, Vmid};

/// A command submitted by privileged software
///
/// Invalidation payloads are carried in the variant; SYNC, the prefetch
/// hints and CFGI_ALL carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Completion barrier, a counted no-op in this model
    Sync,
    /// Configuration prefetch hint
    PrefetchConfig,
    /// Address prefetch hint
    PrefetchAddr,
    /// Invalidate the cached stream table entry for one stream
    CfgiSte {
        /// Stream whose configuration changed
        stream_id: StreamId,
    },
    /// Invalidate the cached context descriptor for one address space
    CfgiCd {
        /// Stream whose descriptor changed
        stream_id: StreamId,
        /// Address space whose descriptor changed
        asid: Asid,
    },
    /// Invalidate all cached configuration
    CfgiAll,
    /// Invalidate every TLB entry
    TlbiNhAll,
    /// Invalidate TLB entries for one address space
    TlbiNhAsid {
        /// Address space to invalidate
        asid: Asid,
    },
    /// Invalidate TLB entries for one address within an address space
    TlbiNhVa {
        /// Virtual address to invalidate
        va: VirtualAddress,
        /// Address space the address belongs to
        asid: Asid,
    },
    /// Invalidate every TLB entry of one virtual machine
    TlbiS12Vmall {
        /// Virtual machine to invalidate
        vmid: Vmid,
    },
}

/// Bounded command FIFO
pub struct CommandQueue {
    queue: VecDeque<Command>,
    capacity: usize,
}

impl CommandQueue {
    /// Create a queue of the given depth
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue a command, dropping it silently when the queue is full
    pub fn submit(&mut self, cmd: Command) {
        if self.queue.len() < self.capacity {
            self.queue.push_back(cmd);
        } else {
            log::debug!("command queue full, dropping {:?}", cmd);
        }
    }

    /// Dequeue the oldest command
    pub fn pop(&mut self) -> Option<Command> {
        self.queue.pop_front()
    }

    /// Number of pending commands
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether any command is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// A fault report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Fault classification
    pub fault_type: FaultType,
    /// Stream the faulting transaction belonged to
    pub stream_id: StreamId,
    /// Address space of the faulting transaction
    pub asid: Asid,
    /// Virtual machine of the faulting transaction
    pub vmid: Vmid,
    /// Faulting virtual address
    pub va: VirtualAddress,
    /// Human-readable description
    pub description: String,
    /// Generation timestamp
    pub timestamp: u64,
}

/// Bounded event FIFO
pub struct EventQueue {
    queue: VecDeque<Event>,
    capacity: usize,
}

impl EventQueue {
    /// Create a queue of the given depth
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue an event; returns false when the queue was full and the
    /// event was dropped
    pub fn push(&mut self, event: Event) -> bool {
        if self.queue.len() < self.capacity {
            self.queue.push_back(event);
            true
        } else {
            log::debug!("event queue full, dropping {:?}", event.fault_type);
            false
        }
    }

    /// Dequeue the oldest event
    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Whether any event is pending
    pub fn has_events(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
