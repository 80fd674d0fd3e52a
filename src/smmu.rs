//! SMMU translation pipeline
//!
//! Ties the caches, tables, walker and queues together. A translation
//! probes the TLB, falls back to the stream table and context descriptor
//! to find the translation tables, walks stage 1 and optionally stage 2,
//! caches the outcome and finally checks the access kind against the
//! mapping's permission. Faults are reported in-band and mirrored into
//! the event queue.

use std::cell::RefCell;
use std::rc::Rc;

use crate::mem::{read_callback, SysMemory};
use crate::queue::{Command, CommandQueue, Event, EventQueue};
use crate::stream::{ContextDescriptorTable, StreamTable};
use crate::tlb::{Tlb, TlbEntry};
use crate::types::{
    AccessKind, Asid, ContextDescriptor, FaultType, PageSize, PhysicalAddress, StreamId,
    StreamTableEntry, TranslationResult, TranslationStage, VirtualAddress, Vmid,
};
use crate::walker::PageTableWalker;

/// Model configuration
#[derive(Debug, Clone, Copy)]
pub struct SmmuConfig {
    /// TLB capacity in entries
    pub tlb_size: usize,
    /// Stream table capacity hint
    pub stream_table_size: usize,
    /// Command queue depth
    pub command_queue_size: usize,
    /// Event queue depth
    pub event_queue_size: usize,
    /// Default stage-1 enable for newly modelled streams
    pub stage1_enabled: bool,
    /// Default stage-2 enable for newly modelled streams
    pub stage2_enabled: bool,
}

impl Default for SmmuConfig {
    fn default() -> Self {
        Self {
            tlb_size: 128,
            stream_table_size: 256,
            command_queue_size: 64,
            event_queue_size: 64,
            stage1_enabled: true,
            stage2_enabled: false,
        }
    }
}

/// Pipeline counters
///
/// All counters are non-decreasing for the lifetime of an instance,
/// except across [`Smmu::reset_statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Translation requests received, including ones that faulted
    pub total_translations: u64,
    /// Requests answered from the TLB
    pub tlb_hits: u64,
    /// Requests that required a walk
    pub tlb_misses: u64,
    /// Individual walker invocations (two per nested translation)
    pub page_table_walks: u64,
    /// Requests that ended in a translation fault
    pub translation_faults: u64,
    /// Requests that ended in a permission fault
    pub permission_faults: u64,
    /// Commands drained from the command queue
    pub commands_processed: u64,
    /// Events successfully enqueued
    pub events_generated: u64,
}

/// The SMMU functional model
///
/// Single-threaded and synchronous; callers serialize access to an
/// instance. Two instances are fully independent.
pub struct Smmu {
    config: SmmuConfig,
    enabled: bool,
    tlb: Tlb,
    walker: Option<PageTableWalker>,
    stream_table: StreamTable,
    context_descriptors: ContextDescriptorTable,
    command_queue: CommandQueue,
    event_queue: EventQueue,
    stats: Statistics,
    timestamp_counter: u64,
}

impl Smmu {
    /// Create an SMMU with the given configuration, initially disabled
    pub fn new(config: SmmuConfig) -> Self {
        Self {
            config,
            enabled: false,
            tlb: Tlb::new(config.tlb_size),
            walker: None,
            stream_table: StreamTable::new(),
            context_descriptors: ContextDescriptorTable::new(),
            command_queue: CommandQueue::new(config.command_queue_size),
            event_queue: EventQueue::new(config.event_queue_size),
            stats: Statistics::default(),
            timestamp_counter: 0,
        }
    }

    /// Attach the physical memory the translation tables live in
    ///
    /// The walker reads descriptors through the shared handle; the model
    /// never writes to memory. The backing store must stay alive for as
    /// long as translations are issued, which the shared ownership
    /// guarantees.
    pub fn set_memory(&mut self, memory: Rc<RefCell<SysMemory>>) {
        self.walker = Some(PageTableWalker::new(read_callback(memory)));
    }

    /// Install or replace the configuration for a stream
    pub fn configure_stream_table_entry(&mut self, stream_id: StreamId, ste: StreamTableEntry) {
        self.stream_table.configure(stream_id, ste);
    }

    /// Fetch a stream's configuration, invalid when absent
    pub fn stream_table_entry(&self, stream_id: StreamId) -> StreamTableEntry {
        self.stream_table.get(stream_id)
    }

    /// Install or replace a context descriptor
    pub fn configure_context_descriptor(
        &mut self,
        stream_id: StreamId,
        asid: Asid,
        cd: ContextDescriptor,
    ) {
        self.context_descriptors.configure(stream_id, asid, cd);
    }

    /// Fetch a context descriptor, invalid when absent
    pub fn context_descriptor(&self, stream_id: StreamId, asid: Asid) -> ContextDescriptor {
        self.context_descriptors.get(stream_id, asid)
    }

    /// Translate a read transaction
    pub fn translate(
        &mut self,
        va: VirtualAddress,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
    ) -> TranslationResult {
        self.translate_access(va, stream_id, asid, vmid, AccessKind::Read)
    }

    /// Translate a transaction of the given access kind
    ///
    /// Permission is checked against the mapping after translation, on
    /// both the TLB hit and walk paths. A denied access still leaves the
    /// cached entry in place; the mapping itself is valid, only this
    /// transaction is refused.
    pub fn translate_access(
        &mut self,
        va: VirtualAddress,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
        kind: AccessKind,
    ) -> TranslationResult {
        self.stats.total_translations += 1;

        if !self.enabled {
            return TranslationResult::fault("SMMU is disabled");
        }

        // Fast path
        if let Some(entry) = self.tlb.lookup(va, stream_id, asid, vmid) {
            self.stats.tlb_hits += 1;
            let result = TranslationResult {
                success: true,
                physical_addr: entry.translate(va),
                memory_type: entry.memory_type,
                permission: entry.permission,
                cacheable: entry.cacheable,
                shareable: entry.shareable,
                fault_reason: String::new(),
            };
            return self.enforce_permission(result, va, stream_id, asid, vmid, kind);
        }
        self.stats.tlb_misses += 1;

        let ste = self.stream_table.get(stream_id);
        if !ste.valid {
            let reason = "Invalid stream table entry";
            self.generate_event(FaultType::Translation, stream_id, asid, vmid, va, reason);
            self.stats.translation_faults += 1;
            return TranslationResult::fault(reason);
        }

        let result = if ste.s1_enabled {
            let cd = self.context_descriptors.get(stream_id, asid);
            let mut result = self.translate_stage1(va, stream_id, &ste, &cd);
            if result.success && ste.s2_enabled {
                // Stage-1 output is the IPA fed into stage 2
                let ipa = result.physical_addr;
                result = self.translate_stage2(ipa, stream_id, &ste);
            }
            result
        } else if ste.s2_enabled {
            self.translate_stage2(va, stream_id, &ste)
        } else {
            let reason = "No translation stages enabled";
            self.generate_event(FaultType::Translation, stream_id, asid, vmid, va, reason);
            self.stats.translation_faults += 1;
            return TranslationResult::fault(reason);
        };

        if !result.success {
            return result;
        }

        // Cache the completed translation. Block sizes discovered by the
        // walk are not propagated; every cached mapping is 4KB.
        let stage = if ste.s1_enabled {
            TranslationStage::Stage1
        } else {
            TranslationStage::Stage2
        };
        self.tlb.insert(TlbEntry {
            va,
            pa: result.physical_addr,
            stream_id,
            asid,
            vmid,
            page_size: PageSize::Size4K,
            memory_type: result.memory_type,
            permission: result.permission,
            cacheable: result.cacheable,
            shareable: result.shareable,
            stage,
            timestamp: 0,
        });

        self.enforce_permission(result, va, stream_id, asid, vmid, kind)
    }

    fn translate_stage1(
        &mut self,
        va: VirtualAddress,
        stream_id: StreamId,
        ste: &StreamTableEntry,
        cd: &ContextDescriptor,
    ) -> TranslationResult {
        if !cd.valid {
            let reason = "Invalid context descriptor";
            self.generate_event(FaultType::Translation, stream_id, cd.asid, ste.vmid, va, reason);
            self.stats.translation_faults += 1;
            return TranslationResult::fault(reason);
        }

        let walker = match &self.walker {
            Some(walker) => walker,
            None => return TranslationResult::fault("No memory attached"),
        };

        let result = walker.translate(
            va,
            cd.translation_table_base,
            cd.translation_granule,
            cd.ips,
            TranslationStage::Stage1,
        );
        self.stats.page_table_walks += 1;

        if !result.success {
            self.generate_event(
                FaultType::Translation,
                stream_id,
                cd.asid,
                ste.vmid,
                va,
                result.fault_reason.as_str(),
            );
            self.stats.translation_faults += 1;
        }
        result
    }

    fn translate_stage2(
        &mut self,
        ipa: PhysicalAddress,
        stream_id: StreamId,
        ste: &StreamTableEntry,
    ) -> TranslationResult {
        let walker = match &self.walker {
            Some(walker) => walker,
            None => return TranslationResult::fault("No memory attached"),
        };

        // Stage-2 tables map the full 48-bit intermediate address space
        let result = walker.translate(
            ipa,
            ste.s2_translation_table_base,
            ste.s2_granule,
            48,
            TranslationStage::Stage2,
        );
        self.stats.page_table_walks += 1;

        if !result.success {
            self.generate_event(
                FaultType::Translation,
                stream_id,
                0,
                ste.vmid,
                ipa,
                result.fault_reason.as_str(),
            );
            self.stats.translation_faults += 1;
        }
        result
    }

    fn enforce_permission(
        &mut self,
        result: TranslationResult,
        va: VirtualAddress,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
        kind: AccessKind,
    ) -> TranslationResult {
        if result.permission.allows(kind) {
            return result;
        }

        let reason = match kind {
            AccessKind::Write => "Permission fault: write not allowed",
            AccessKind::Read => "Permission fault: read not allowed",
        };
        self.generate_event(FaultType::Permission, stream_id, asid, vmid, va, reason);
        self.stats.permission_faults += 1;
        TranslationResult::fault(reason)
    }

    /// Submit a command; full queues drop it silently
    pub fn submit_command(&mut self, cmd: Command) {
        self.command_queue.submit(cmd);
    }

    /// Drain the command queue, executing commands in submission order
    pub fn process_commands(&mut self) {
        while let Some(cmd) = self.command_queue.pop() {
            self.process_command(cmd);
        }
    }

    fn process_command(&mut self, cmd: Command) {
        log::debug!("processing {:?}", cmd);
        match cmd {
            // Barriers and prefetch hints are counted no-ops; every
            // command is complete once processed
            Command::Sync | Command::PrefetchConfig | Command::PrefetchAddr => {}
            // Configuration entries are not cached separately in this
            // model, so configuration invalidation flushes the affected
            // translations instead
            Command::CfgiSte { stream_id } => self.tlb.invalidate_by_stream(stream_id),
            Command::CfgiCd { asid, .. } => self.tlb.invalidate_by_asid(asid),
            Command::CfgiAll => self.tlb.invalidate_all(),
            Command::TlbiNhAll => self.tlb.invalidate_all(),
            Command::TlbiNhAsid { asid } => self.tlb.invalidate_by_asid(asid),
            Command::TlbiNhVa { va, asid } => self.tlb.invalidate_by_va(va, asid),
            Command::TlbiS12Vmall { vmid } => self.tlb.invalidate_by_vmid(vmid),
        }
        self.stats.commands_processed += 1;
    }

    fn generate_event(
        &mut self,
        fault_type: FaultType,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
        va: VirtualAddress,
        description: impl Into<String>,
    ) {
        self.timestamp_counter += 1;
        let event = Event {
            fault_type,
            stream_id,
            asid,
            vmid,
            va,
            description: description.into(),
            timestamp: self.timestamp_counter,
        };
        log::debug!(
            "fault {:?} stream={} asid={} va={:#x}",
            fault_type,
            stream_id,
            asid,
            va
        );
        if self.event_queue.push(event) {
            self.stats.events_generated += 1;
        }
    }

    /// Whether any fault reports are pending
    pub fn has_events(&self) -> bool {
        self.event_queue.has_events()
    }

    /// Pop the oldest pending fault report
    pub fn pop_event(&mut self) -> Option<Event> {
        self.event_queue.pop()
    }

    /// Invalidate every TLB entry, bypassing the command queue
    pub fn invalidate_tlb_all(&mut self) {
        self.tlb.invalidate_all();
    }

    /// Invalidate TLB entries for an address space
    pub fn invalidate_tlb_by_asid(&mut self, asid: Asid) {
        self.tlb.invalidate_by_asid(asid);
    }

    /// Invalidate TLB entries for a virtual machine
    pub fn invalidate_tlb_by_vmid(&mut self, vmid: Vmid) {
        self.tlb.invalidate_by_vmid(vmid);
    }

    /// Invalidate TLB entries for an address within an address space
    pub fn invalidate_tlb_by_va(&mut self, va: VirtualAddress, asid: Asid) {
        self.tlb.invalidate_by_va(va, asid);
    }

    /// Invalidate TLB entries for a stream
    pub fn invalidate_tlb_by_stream(&mut self, stream_id: StreamId) {
        self.tlb.invalidate_by_stream(stream_id);
    }

    /// Enable translation
    pub fn enable(&mut self) {
        self.enabled = true;
        log::info!("SMMU enabled");
    }

    /// Disable translation; requests fault until re-enabled
    pub fn disable(&mut self) {
        self.enabled = false;
        log::info!("SMMU disabled");
    }

    /// Whether translation is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Snapshot of the pipeline counters
    pub fn get_statistics(&self) -> Statistics {
        self.stats
    }

    /// Clear all pipeline counters
    pub fn reset_statistics(&mut self) {
        self.stats = Statistics::default();
    }

    /// The configuration the instance was created with
    pub fn config(&self) -> &SmmuConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::PageTableBuilder;
    use crate::types::AccessPermission;

    fn smmu_with_memory() -> (Smmu, Rc<RefCell<SysMemory>>) {
        let memory = Rc::new(RefCell::new(SysMemory::new()));
        let mut smmu = Smmu::new(SmmuConfig::default());
        smmu.set_memory(memory.clone());
        (smmu, memory)
    }

    fn configure_s1_stream(smmu: &mut Smmu, stream_id: StreamId, asid: Asid, ttb: u64) {
        smmu.configure_stream_table_entry(
            stream_id,
            StreamTableEntry {
                valid: true,
                s1_enabled: true,
                ..Default::default()
            },
        );
        smmu.configure_context_descriptor(
            stream_id,
            asid,
            ContextDescriptor {
                valid: true,
                translation_table_base: ttb,
                asid,
                translation_granule: 12,
                ips: 48,
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_disabled_smmu_faults_without_walking() {
        let (mut smmu, _memory) = smmu_with_memory();
        let result = smmu.translate(0x1000, 0, 1, 0);
        assert!(!result.success);
        assert_eq!(result.fault_reason, "SMMU is disabled");

        let stats = smmu.get_statistics();
        assert_eq!(stats.total_translations, 1);
        assert_eq!(stats.page_table_walks, 0);
        assert!(!smmu.has_events());
    }

    #[test]
    fn test_invalid_stream_faults() {
        let (mut smmu, _memory) = smmu_with_memory();
        smmu.enable();

        let result = smmu.translate(0x1000, 9, 1, 0);
        assert!(!result.success);
        assert_eq!(result.fault_reason, "Invalid stream table entry");

        let event = smmu.pop_event().expect("fault event");
        assert_eq!(event.fault_type, FaultType::Translation);
        assert_eq!(event.stream_id, 9);
        assert_eq!(smmu.get_statistics().translation_faults, 1);
    }

    #[test]
    fn test_invalid_context_descriptor_faults() {
        let (mut smmu, _memory) = smmu_with_memory();
        smmu.enable();
        smmu.configure_stream_table_entry(
            0,
            StreamTableEntry {
                valid: true,
                s1_enabled: true,
                ..Default::default()
            },
        );

        let result = smmu.translate(0x1000, 0, 1, 0);
        assert!(!result.success);
        assert_eq!(result.fault_reason, "Invalid context descriptor");
        assert!(smmu.has_events());
    }

    #[test]
    fn test_no_stages_enabled_faults() {
        let (mut smmu, _memory) = smmu_with_memory();
        smmu.enable();
        smmu.configure_stream_table_entry(
            0,
            StreamTableEntry {
                valid: true,
                ..Default::default()
            },
        );

        let result = smmu.translate(0x1000, 0, 1, 0);
        assert!(!result.success);
        assert_eq!(result.fault_reason, "No translation stages enabled");
    }

    #[test]
    fn test_stage1_translation_and_caching() {
        let (mut smmu, memory) = smmu_with_memory();
        let mut builder = PageTableBuilder::new(memory.clone());
        builder.map(0x1000, 0x10_1000, AccessPermission::ReadWrite);
        configure_s1_stream(&mut smmu, 0, 1, builder.root());
        smmu.enable();

        let first = smmu.translate(0x1000, 0, 1, 0);
        assert!(first.success, "{}", first.fault_reason);
        assert_eq!(first.physical_addr, 0x10_1000);

        let second = smmu.translate(0x1000, 0, 1, 0);
        assert_eq!(second, first);

        let stats = smmu.get_statistics();
        assert_eq!(stats.tlb_misses, 1);
        assert_eq!(stats.tlb_hits, 1);
        assert_eq!(stats.page_table_walks, 1);
    }

    #[test]
    fn test_stage2_only_translation() {
        let (mut smmu, memory) = smmu_with_memory();
        let mut builder = PageTableBuilder::new(memory.clone());
        builder.map(0x8000, 0x30_0000, AccessPermission::ReadWrite);
        smmu.configure_stream_table_entry(
            0,
            StreamTableEntry {
                valid: true,
                s2_enabled: true,
                s2_translation_table_base: builder.root(),
                s2_granule: 12,
                vmid: 3,
                ..Default::default()
            },
        );
        smmu.enable();

        let result = smmu.translate(0x8000, 0, 0, 3);
        assert!(result.success, "{}", result.fault_reason);
        assert_eq!(result.physical_addr, 0x30_0000);
        assert_eq!(smmu.get_statistics().page_table_walks, 1);
    }

    #[test]
    fn test_nested_two_stage_translation() {
        let (mut smmu, memory) = smmu_with_memory();

        // Stage 1 maps VA 0x1000 to IPA 0x10_0000, stage 2 relocates the
        // IPA page to PA 0x40_0000
        let mut s1 = PageTableBuilder::new(memory.clone());
        s1.map(0x1000, 0x10_0000, AccessPermission::ReadWrite);
        let mut s2 = PageTableBuilder::new(memory.clone());
        s2.map(0x10_0000, 0x40_0000, AccessPermission::ReadWrite);

        smmu.configure_stream_table_entry(
            0,
            StreamTableEntry {
                valid: true,
                s1_enabled: true,
                s2_enabled: true,
                s2_translation_table_base: s2.root(),
                s2_granule: 12,
                vmid: 1,
                ..Default::default()
            },
        );
        smmu.configure_context_descriptor(
            0,
            1,
            ContextDescriptor {
                valid: true,
                translation_table_base: s1.root(),
                asid: 1,
                translation_granule: 12,
                ips: 48,
                ..Default::default()
            },
        );
        smmu.enable();

        let result = smmu.translate(0x1000, 0, 1, 1);
        assert!(result.success, "{}", result.fault_reason);
        assert_eq!(result.physical_addr, 0x40_0000);
        // Both stages walked
        assert_eq!(smmu.get_statistics().page_table_walks, 2);
    }

    #[test]
    fn test_permission_fault_on_write() {
        let (mut smmu, memory) = smmu_with_memory();
        let mut builder = PageTableBuilder::new(memory.clone());
        builder.map(0x2000, 0x20_0000, AccessPermission::ReadOnly);
        configure_s1_stream(&mut smmu, 0, 1, builder.root());
        smmu.enable();

        let read = smmu.translate_access(0x2000, 0, 1, 0, AccessKind::Read);
        assert!(read.success);

        let write = smmu.translate_access(0x2000, 0, 1, 0, AccessKind::Write);
        assert!(!write.success);
        assert_eq!(write.fault_reason, "Permission fault: write not allowed");

        let stats = smmu.get_statistics();
        assert_eq!(stats.permission_faults, 1);
        assert_eq!(stats.translation_faults, 0);

        let event = smmu.pop_event().expect("denial must be reported");
        assert_eq!(event.fault_type, FaultType::Permission);
        assert!(smmu.pop_event().is_none());
    }

    #[test]
    fn test_commands_drive_invalidation() {
        let (mut smmu, memory) = smmu_with_memory();
        let mut builder = PageTableBuilder::new(memory.clone());
        builder.map(0x1000, 0x10_1000, AccessPermission::ReadWrite);
        configure_s1_stream(&mut smmu, 0, 1, builder.root());
        smmu.enable();

        smmu.translate(0x1000, 0, 1, 0);
        smmu.submit_command(Command::Sync);
        smmu.submit_command(Command::TlbiNhAsid { asid: 1 });
        smmu.process_commands();

        assert_eq!(smmu.get_statistics().commands_processed, 2);

        // Re-translation must walk again
        smmu.translate(0x1000, 0, 1, 0);
        assert_eq!(smmu.get_statistics().tlb_misses, 2);
    }

    #[test]
    fn test_event_counter_skips_dropped_events() {
        let (mut smmu, _memory) = smmu_with_memory();
        smmu.enable();

        // Stream 5 is never configured; every translation faults. The
        // event queue holds 64, the rest drop.
        for i in 0..70u64 {
            smmu.translate(i * 0x1000, 5, 1, 0);
        }

        let stats = smmu.get_statistics();
        assert_eq!(stats.translation_faults, 70);
        assert_eq!(stats.events_generated, 64);

        let mut drained = 0;
        while smmu.pop_event().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 64);
    }

    #[test]
    fn test_event_timestamps_increase() {
        let (mut smmu, _memory) = smmu_with_memory();
        smmu.enable();
        smmu.translate(0x1000, 5, 1, 0);
        smmu.translate(0x2000, 5, 1, 0);

        let first = smmu.pop_event().unwrap();
        let second = smmu.pop_event().unwrap();
        assert!(second.timestamp > first.timestamp);
    }

    #[test]
    fn test_reset_statistics() {
        let (mut smmu, _memory) = smmu_with_memory();
        smmu.enable();
        smmu.translate(0x1000, 5, 1, 0);
        assert_ne!(smmu.get_statistics(), Statistics::default());

        smmu.reset_statistics();
        assert_eq!(smmu.get_statistics(), Statistics::default());
    }
}
