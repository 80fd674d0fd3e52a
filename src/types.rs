//! Core types for the SMMU model
//!
//! Address and identifier aliases, page sizes, memory attributes and the
//! per-device configuration structures (stream table entries and context
//! descriptors).
//! Reference: ARM IHI 0070, chapter 5 - Data structures

/// Physical address (output side of a translation)
pub type PhysicalAddress = u64;

/// Virtual address (input side of a translation)
pub type VirtualAddress = u64;

/// Stream ID, carried on every upstream transaction to identify the device
pub type StreamId = u32;

/// Address Space ID, tags translations belonging to one address space
pub type Asid = u16;

/// Virtual Machine ID, tags translations belonging to one guest
pub type Vmid = u16;

/// Translation granule and block sizes
///
/// Each variant is numerically equal to its size in bytes, so page masks
/// can be derived directly from the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum PageSize {
    /// 4KB page (4KB granule, L2/L3)
    Size4K = 0x1000,
    /// 16KB page (16KB granule, L2/L3)
    Size16K = 0x4000,
    /// 64KB page (64KB granule, L2/L3)
    Size64K = 0x10000,
    /// 2MB block (4KB granule, L1)
    Size2M = 0x20_0000,
    /// 32MB block (16KB granule, L1)
    Size32M = 0x200_0000,
    /// 512MB block (4KB granule L0, 64KB granule L1)
    Size512M = 0x2000_0000,
    /// 1GB block (16KB granule, L0)
    Size1G = 0x4000_0000,
}

impl PageSize {
    /// Size in bytes
    pub fn bytes(self) -> u64 {
        self as u64
    }

    /// Page-align an address downwards for this size
    pub fn base(self, addr: u64) -> u64 {
        addr & !(self.bytes() - 1)
    }

    /// Offset of an address within a page of this size
    pub fn offset(self, addr: u64) -> u64 {
        addr & (self.bytes() - 1)
    }
}

/// Memory attribute of a mapping
///
/// Device variants are ordered by increasing permissiveness: gathering,
/// reordering and early write acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Device, non-gathering, non-reordering, no early write ack
    DeviceNGnRnE,
    /// Device, non-gathering, non-reordering, early write ack
    DeviceNGnRE,
    /// Device, non-gathering, reordering, early write ack
    DeviceNGRE,
    /// Device, gathering, reordering, early write ack
    DeviceGRE,
    /// Normal memory, non-cacheable
    NormalNc,
    /// Normal memory, write-through
    NormalWt,
    /// Normal memory, write-back
    NormalWb,
}

impl MemoryType {
    /// Whether a mapping with this attribute may be cached
    pub fn is_cacheable(self) -> bool {
        matches!(self, MemoryType::NormalWb | MemoryType::NormalWt)
    }
}

/// Access permission decoded from the descriptor AP bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPermission {
    /// No access
    None,
    /// Read-only
    ReadOnly,
    /// Write-only
    WriteOnly,
    /// Read and write
    ReadWrite,
}

impl AccessPermission {
    /// Whether this permission allows the given access kind
    pub fn allows(self, kind: AccessKind) -> bool {
        match kind {
            AccessKind::Read => {
                matches!(self, AccessPermission::ReadOnly | AccessPermission::ReadWrite)
            }
            AccessKind::Write => {
                matches!(self, AccessPermission::WriteOnly | AccessPermission::ReadWrite)
            }
        }
    }
}

/// Kind of access a device transaction performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Read transaction
    Read,
    /// Write transaction
    Write,
}

/// Which translation stage(s) produced a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationStage {
    /// Stage 1 (VA to IPA)
    Stage1,
    /// Stage 2 (IPA to PA)
    Stage2,
    /// Nested stage 1 and stage 2
    Stage1And2,
}

/// Fault classification reported through the event queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// No fault
    None,
    /// Translation fault (invalid descriptor or configuration)
    Translation,
    /// Permission fault (access kind not allowed by the mapping)
    Permission,
    /// Access flag fault
    Access,
    /// Address size fault
    AddressSize,
    /// TLB conflict abort
    TlbConflict,
    /// Unsupported upstream transaction
    UnsupportedUpstream,
}

/// Result of a translation request
///
/// Translation never aborts the caller; failures are reported in-band with
/// `success` cleared and a human-readable `fault_reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    /// Whether the translation succeeded
    pub success: bool,
    /// Translated physical address
    pub physical_addr: PhysicalAddress,
    /// Memory attribute of the mapping
    pub memory_type: MemoryType,
    /// Access permission of the mapping
    pub permission: AccessPermission,
    /// Whether the mapping is cacheable
    pub cacheable: bool,
    /// Whether the mapping is shareable
    pub shareable: bool,
    /// Failure description when `success` is false
    pub fault_reason: String,
}

impl Default for TranslationResult {
    fn default() -> Self {
        Self {
            success: false,
            physical_addr: 0,
            memory_type: MemoryType::NormalWb,
            permission: AccessPermission::None,
            cacheable: true,
            shareable: false,
            fault_reason: String::new(),
        }
    }
}

impl TranslationResult {
    /// Build a failed result carrying a fault reason
    pub fn fault(reason: impl Into<String>) -> Self {
        Self {
            fault_reason: reason.into(),
            ..Self::default()
        }
    }
}

/// Stream table entry: per-device translation configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTableEntry {
    /// Whether this entry is valid
    pub valid: bool,
    /// Whether stage-1 translation is enabled
    pub s1_enabled: bool,
    /// Whether stage-2 translation is enabled
    pub s2_enabled: bool,
    /// Pointer to the stage-1 context descriptor
    pub s1_context_ptr: PhysicalAddress,
    /// Stage-2 translation table base
    pub s2_translation_table_base: PhysicalAddress,
    /// Virtual machine ID for stage-2 translations
    pub vmid: Vmid,
    /// Stage-1 table format
    pub s1_format: u8,
    /// Stage-2 translation granule (12, 14 or 16)
    pub s2_granule: u8,
}

impl Default for StreamTableEntry {
    fn default() -> Self {
        Self {
            valid: false,
            s1_enabled: false,
            s2_enabled: false,
            s1_context_ptr: 0,
            s2_translation_table_base: 0,
            vmid: 0,
            s1_format: 0,
            s2_granule: 0,
        }
    }
}

/// Context descriptor: per-address-space translation configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextDescriptor {
    /// Whether this descriptor is valid
    pub valid: bool,
    /// Stage-1 translation table base
    pub translation_table_base: PhysicalAddress,
    /// Address space ID
    pub asid: Asid,
    /// Translation granule (12 = 4KB, 14 = 16KB, 16 = 64KB)
    pub translation_granule: u8,
    /// Intermediate physical address size in bits
    pub ips: u8,
    /// Translation granule field as encoded in the descriptor
    pub tg: u8,
    /// Shareability attribute
    pub sh: u8,
    /// Outer cacheability attribute
    pub orgn: u8,
    /// Inner cacheability attribute
    pub irgn: u8,
}

impl Default for ContextDescriptor {
    fn default() -> Self {
        Self {
            valid: false,
            translation_table_base: 0,
            asid: 0,
            translation_granule: 0,
            ips: 0,
            tg: 0,
            sh: 0,
            orgn: 0,
            irgn: 0,
        }
    }
}
