//! Long-descriptor page-table walker
//!
//! Walks VMSAv8-64 translation tables for the 4KB, 16KB and 64KB granules
//! and decodes block and page descriptors into their structured form. The
//! walker owns no memory; every descriptor fetch goes through the read
//! callback it was constructed with.
//! Reference: ARM DDI 0487, D8.3 - Translation table walks

use crate::mem::MemoryReadFn;
use crate::types::{
    AccessPermission, MemoryType, PageSize, PhysicalAddress, TranslationResult, TranslationStage,
    VirtualAddress,
};

/// Output address field of a descriptor, bits [47:12]
const DESC_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// Decoded page-table descriptor
#[derive(Debug, Clone, Copy)]
pub struct PageTableDescriptor {
    /// Whether the descriptor is valid (bit 0)
    pub valid: bool,
    /// Table descriptor (points to the next level) vs block/page
    pub is_table: bool,
    /// Output address: next-level table or final physical page
    pub address: PhysicalAddress,
    /// Access permission from AP[1:0]
    pub ap: AccessPermission,
    /// Memory attribute from AttrIndx
    pub mem_attr: MemoryType,
    /// Shareability, non-zero SH field
    pub shareable: bool,
    /// Access flag (bit 10)
    pub access_flag: bool,
    /// Dirty state (bit 51)
    pub dirty: bool,
    /// Contiguous hint (bit 52)
    pub contiguous: bool,
    /// Privileged execute-never (bit 53)
    pub pxn: bool,
    /// Execute-never (bit 54)
    pub xn: bool,
}

impl Default for PageTableDescriptor {
    fn default() -> Self {
        Self {
            valid: false,
            is_table: false,
            address: 0,
            ap: AccessPermission::None,
            mem_attr: MemoryType::NormalWb,
            shareable: false,
            access_flag: false,
            dirty: false,
            contiguous: false,
            pxn: false,
            xn: false,
        }
    }
}

/// Decode a raw 64-bit descriptor at the given level
pub fn parse_descriptor(desc: u64, level: u8, _granule_size: u8) -> PageTableDescriptor {
    let mut result = PageTableDescriptor::default();

    result.valid = (desc & 0x1) != 0;
    if !result.valid {
        return result;
    }

    // Bit 1 selects table vs block below level 3; level 3 entries are
    // always terminal pages.
    result.is_table = level < 3 && (desc >> 1) & 0x1 == 1;

    result.address = desc & DESC_ADDR_MASK;

    // AP[1:0] at bits [7:6]; AP[1] selects read-only
    result.ap = match (desc >> 6) & 0x3 {
        0 | 1 => AccessPermission::ReadWrite,
        _ => AccessPermission::ReadOnly,
    };

    // SH[1:0] at bits [9:8]; any non-zero value is shareable
    result.shareable = (desc >> 8) & 0x3 != 0;

    result.access_flag = (desc >> 10) & 0x1 != 0;

    // AttrIndx[2:0] at bits [4:2]
    result.mem_attr = match (desc >> 2) & 0x7 {
        0 => MemoryType::DeviceNGnRnE,
        1 => MemoryType::DeviceNGnRE,
        2 => MemoryType::NormalNc,
        3 => MemoryType::NormalWt,
        _ => MemoryType::NormalWb,
    };

    result.dirty = (desc >> 51) & 0x1 != 0;
    result.contiguous = (desc >> 52) & 0x1 != 0;
    result.pxn = (desc >> 53) & 0x1 != 0;
    result.xn = (desc >> 54) & 0x1 != 0;

    result
}

/// Block or page size reached when a walk terminates at `level`
pub fn page_size_at(level: u8, granule_size: u8) -> PageSize {
    match granule_size {
        12 => match level {
            0 => PageSize::Size512M,
            1 => PageSize::Size2M,
            _ => PageSize::Size4K,
        },
        14 => match level {
            0 => PageSize::Size1G,
            1 => PageSize::Size32M,
            _ => PageSize::Size16K,
        },
        16 => match level {
            1 => PageSize::Size512M,
            _ => PageSize::Size64K,
        },
        _ => PageSize::Size4K,
    }
}

/// Index into the table at `level` for a virtual address
///
/// Descriptors are 8 bytes, so each level resolves `granule_size - 3`
/// bits of the address.
pub fn index_at(va: VirtualAddress, level: u8, granule_size: u8) -> u64 {
    let bits_per_level = granule_size - 3;
    let shift = granule_size as u64 + (3 - level) as u64 * bits_per_level as u64;
    (va >> shift) & ((1u64 << bits_per_level) - 1)
}

struct WalkContext {
    va: VirtualAddress,
    ttb: PhysicalAddress,
    granule_size: u8,
    ips_bits: u8,
    start_level: u8,
    max_level: u8,
    stage: TranslationStage,
}

/// Multi-level table walker
pub struct PageTableWalker {
    memory_read: MemoryReadFn,
}

impl PageTableWalker {
    /// Create a walker reading descriptors through the given callback
    pub fn new(memory_read: MemoryReadFn) -> Self {
        Self { memory_read }
    }

    /// Translate a virtual address against a translation table
    ///
    /// `granule_size` is the log2 of the granule (12, 14 or 16); any other
    /// value faults immediately. `ips_bits` is the configured intermediate
    /// physical address width.
    pub fn translate(
        &self,
        va: VirtualAddress,
        ttb: PhysicalAddress,
        granule_size: u8,
        ips_bits: u8,
        stage: TranslationStage,
    ) -> TranslationResult {
        // 64KB tables have no level 0; the top level resolves fewer bits
        let start_level = match granule_size {
            12 | 14 => 0,
            16 => 1,
            _ => return TranslationResult::fault("Invalid granule size"),
        };

        let ctx = WalkContext {
            va,
            ttb,
            granule_size,
            ips_bits,
            start_level,
            max_level: 3,
            stage,
        };
        self.walk(&ctx)
    }

    fn walk(&self, ctx: &WalkContext) -> TranslationResult {
        log::trace!(
            "walk va={:#x} ttb={:#x} granule={} ips={} stage={:?}",
            ctx.va,
            ctx.ttb,
            ctx.granule_size,
            ctx.ips_bits,
            ctx.stage
        );

        let mut table_base = ctx.ttb;
        let mut level = ctx.start_level;

        while level <= ctx.max_level {
            let index = index_at(ctx.va, level, ctx.granule_size);
            // A corrupt table pointer must surface as a failed read, so
            // the address math wraps instead of trapping
            let desc_addr = table_base.wrapping_add(index * 8);

            let raw = match (self.memory_read)(desc_addr, 8) {
                Some(raw) => raw,
                None => return TranslationResult::fault("Failed to read descriptor"),
            };

            let desc = parse_descriptor(raw, level, ctx.granule_size);
            if !desc.valid {
                return TranslationResult::fault("Translation fault: invalid descriptor");
            }

            if !desc.is_table {
                // Terminal block or page descriptor
                let page_size = page_size_at(level, ctx.granule_size);
                return TranslationResult {
                    success: true,
                    physical_addr: desc.address + page_size.offset(ctx.va),
                    permission: desc.ap,
                    memory_type: desc.mem_attr,
                    cacheable: desc.mem_attr.is_cacheable(),
                    shareable: desc.shareable,
                    fault_reason: String::new(),
                };
            }

            table_base = desc.address;
            level += 1;
        }

        TranslationResult::fault("Translation fault: exceeded max level")
    }
}
