//! Translation lookaside buffer
//!
//! A bounded associative cache of completed translations keyed by
//! (page base, stream, ASID, VMID). A hash map gives constant-time
//! lookup while a recency list drives LRU eviction; the two structures
//! always hold the same key set. Invalidation is linear over the cache
//! along the requested axis.

use std::collections::{HashMap, VecDeque};

use crate::types::{
    AccessPermission, Asid, MemoryType, PageSize, PhysicalAddress, StreamId, TranslationStage,
    VirtualAddress, Vmid,
};

/// Page sizes probed on lookup, largest first
const LOOKUP_SIZES: [PageSize; 4] = [
    PageSize::Size1G,
    PageSize::Size2M,
    PageSize::Size64K,
    PageSize::Size4K,
];

/// A cached translation
#[derive(Debug, Clone)]
pub struct TlbEntry {
    /// Virtual address the entry was created for
    pub va: VirtualAddress,
    /// Physical address the walk produced for `va`
    pub pa: PhysicalAddress,
    /// Stream the translation belongs to
    pub stream_id: StreamId,
    /// Address space the translation belongs to
    pub asid: Asid,
    /// Virtual machine the translation belongs to
    pub vmid: Vmid,
    /// Size of the mapped page
    pub page_size: PageSize,
    /// Memory attribute of the mapping
    pub memory_type: MemoryType,
    /// Access permission of the mapping
    pub permission: AccessPermission,
    /// Whether the mapping is cacheable
    pub cacheable: bool,
    /// Whether the mapping is shareable
    pub shareable: bool,
    /// Stage(s) that produced the mapping
    pub stage: TranslationStage,
    /// Insertion timestamp, assigned by the TLB
    pub timestamp: u64,
}

impl TlbEntry {
    /// Page-aligned base of the entry's virtual address
    pub fn va_base(&self) -> VirtualAddress {
        self.page_size.base(self.va)
    }

    /// Translate an address inside this entry's page
    pub fn translate(&self, va: VirtualAddress) -> PhysicalAddress {
        self.page_size.base(self.pa) | self.page_size.offset(va)
    }

    /// Whether the entry's page covers the given address
    pub fn covers(&self, va: VirtualAddress) -> bool {
        self.page_size.base(va) == self.va_base()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TlbKey {
    va_base: VirtualAddress,
    stream_id: StreamId,
    asid: Asid,
    vmid: Vmid,
}

/// Software TLB with LRU replacement
pub struct Tlb {
    capacity: usize,
    timestamp_counter: u64,
    hit_count: u64,
    miss_count: u64,
    entries: HashMap<TlbKey, TlbEntry>,
    // Recency order, front is most recently used
    lru: VecDeque<TlbKey>,
}

impl Tlb {
    /// Create a TLB holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            timestamp_counter: 0,
            hit_count: 0,
            miss_count: 0,
            entries: HashMap::with_capacity(capacity),
            lru: VecDeque::with_capacity(capacity),
        }
    }

    /// Look up a translation
    ///
    /// Probes each candidate page size from largest to smallest. A probe
    /// only hits when the stored entry itself covers the address at its
    /// own page size; a small mapping that happens to share a
    /// larger-granule-aligned base is not a match.
    pub fn lookup(
        &mut self,
        va: VirtualAddress,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
    ) -> Option<TlbEntry> {
        for size in LOOKUP_SIZES {
            let key = TlbKey {
                va_base: size.base(va),
                stream_id,
                asid,
                vmid,
            };
            if let Some(entry) = self.entries.get(&key) {
                if !entry.covers(va) {
                    continue;
                }
                let entry = entry.clone();
                self.touch(key);
                self.hit_count += 1;
                return Some(entry);
            }
        }
        self.miss_count += 1;
        None
    }

    /// Insert or refresh a translation
    ///
    /// An existing entry for the same key is replaced in place; otherwise
    /// the least recently used entry is evicted when at capacity.
    pub fn insert(&mut self, mut entry: TlbEntry) {
        let key = TlbKey {
            va_base: entry.va_base(),
            stream_id: entry.stream_id,
            asid: entry.asid,
            vmid: entry.vmid,
        };

        if self.entries.contains_key(&key) {
            self.lru.retain(|k| k != &key);
        } else if self.entries.len() >= self.capacity {
            self.evict_lru();
        }

        self.timestamp_counter += 1;
        entry.timestamp = self.timestamp_counter;
        self.entries.insert(key, entry);
        self.lru.push_front(key);
    }

    fn touch(&mut self, key: TlbKey) {
        self.lru.retain(|k| k != &key);
        self.lru.push_front(key);
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self.lru.pop_back() {
            self.entries.remove(&key);
            log::trace!("TLB evict va_base={:#x} asid={}", key.va_base, key.asid);
        }
    }

    /// Drop every entry
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.lru.clear();
        log::debug!("TLB invalidate all");
    }

    /// Drop entries belonging to an address space
    pub fn invalidate_by_asid(&mut self, asid: Asid) {
        self.remove_where(|e| e.asid == asid);
        log::debug!("TLB invalidate asid={}", asid);
    }

    /// Drop entries belonging to a virtual machine
    pub fn invalidate_by_vmid(&mut self, vmid: Vmid) {
        self.remove_where(|e| e.vmid == vmid);
        log::debug!("TLB invalidate vmid={}", vmid);
    }

    /// Drop entries belonging to a stream
    pub fn invalidate_by_stream(&mut self, stream_id: StreamId) {
        self.remove_where(|e| e.stream_id == stream_id);
        log::debug!("TLB invalidate stream={}", stream_id);
    }

    /// Drop entries mapping a virtual address within an address space
    ///
    /// The page size that mapped `va` is unknown, so every candidate size
    /// is tried; an entry goes when its own page-aligned base matches the
    /// candidate base and its ASID matches.
    pub fn invalidate_by_va(&mut self, va: VirtualAddress, asid: Asid) {
        for size in LOOKUP_SIZES {
            let va_base = size.base(va);
            self.remove_where(|e| e.asid == asid && e.va_base() == va_base);
        }
        log::debug!("TLB invalidate va={:#x} asid={}", va, asid);
    }

    fn remove_where<F: Fn(&TlbEntry) -> bool>(&mut self, pred: F) {
        self.entries.retain(|_, e| !pred(e));
        let entries = &self.entries;
        self.lru.retain(|k| entries.contains_key(k));
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lookups that hit
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// Lookups that missed
    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    #[cfg(test)]
    fn is_coherent(&self) -> bool {
        self.lru.len() == self.entries.len()
            && self.lru.iter().all(|k| self.entries.contains_key(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(va: u64, pa: u64, asid: Asid) -> TlbEntry {
        entry_for(va, pa, 0, asid, 0, PageSize::Size4K)
    }

    fn entry_for(
        va: u64,
        pa: u64,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
        page_size: PageSize,
    ) -> TlbEntry {
        TlbEntry {
            va,
            pa,
            stream_id,
            asid,
            vmid,
            page_size,
            memory_type: MemoryType::NormalWb,
            permission: AccessPermission::ReadWrite,
            cacheable: true,
            shareable: false,
            stage: TranslationStage::Stage1,
            timestamp: 0,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry(0x1000, 0x10_1000, 1));

        let hit = tlb.lookup(0x1000, 0, 1, 0);
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().pa, 0x10_1000);
        assert_eq!(tlb.hit_count(), 1);
        assert_eq!(tlb.miss_count(), 0);
        assert!(tlb.is_coherent());
    }

    #[test]
    fn test_lookup_within_page() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry(0x1000, 0x10_1000, 1));

        let hit = tlb.lookup(0x1abc, 0, 1, 0).expect("same page should hit");
        assert_eq!(hit.translate(0x1abc), 0x10_1abc);
    }

    #[test]
    fn test_miss_on_wrong_axis() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry(0x1000, 0x10_1000, 1));

        assert!(tlb.lookup(0x1000, 0, 2, 0).is_none()); // other asid
        assert!(tlb.lookup(0x1000, 1, 1, 0).is_none()); // other stream
        assert!(tlb.lookup(0x1000, 0, 1, 7).is_none()); // other vmid
        assert!(tlb.lookup(0x2000, 0, 1, 0).is_none()); // other page
        assert_eq!(tlb.miss_count(), 4);
    }

    #[test]
    fn test_no_alias_across_page_sizes() {
        let mut tlb = Tlb::new(8);
        // 4KB mapping whose base happens to be 1GB-aligned
        tlb.insert(entry(0x4000_0000, 0x10_0000, 1));

        // An address 1MB into the gigabyte shares the 1GB-aligned base but
        // is outside the 4KB page; the probe must not return the entry
        assert!(tlb.lookup(0x4010_0000, 0, 1, 0).is_none());
        assert!(tlb.lookup(0x4000_0000, 0, 1, 0).is_some());
    }

    #[test]
    fn test_large_page_lookup() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry_for(
            0x4000_0000,
            0x8000_0000,
            0,
            1,
            0,
            PageSize::Size2M,
        ));

        let hit = tlb.lookup(0x4012_3456, 0, 1, 0).expect("2MB entry covers");
        assert_eq!(hit.translate(0x4012_3456), 0x8012_3456);
    }

    #[test]
    fn test_upsert_keeps_single_entry() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry(0x1000, 0x10_1000, 1));
        tlb.insert(entry(0x1000, 0x20_2000, 1));

        assert_eq!(tlb.len(), 1);
        assert_eq!(tlb.lookup(0x1000, 0, 1, 0).unwrap().pa, 0x20_2000);
        assert!(tlb.is_coherent());
    }

    #[test]
    fn test_lru_eviction() {
        let mut tlb = Tlb::new(2);
        tlb.insert(entry(0x1000, 0xA000, 1));
        tlb.insert(entry(0x2000, 0xB000, 1));

        // Touch 0x1000 so 0x2000 becomes the eviction candidate
        assert!(tlb.lookup(0x1000, 0, 1, 0).is_some());
        tlb.insert(entry(0x3000, 0xC000, 1));

        assert!(tlb.lookup(0x1000, 0, 1, 0).is_some());
        assert!(tlb.lookup(0x2000, 0, 1, 0).is_none());
        assert!(tlb.lookup(0x3000, 0, 1, 0).is_some());
        assert_eq!(tlb.len(), 2);
        assert!(tlb.is_coherent());
    }

    #[test]
    fn test_timestamps_monotonic() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry(0x1000, 0xA000, 1));
        tlb.insert(entry(0x2000, 0xB000, 1));
        let t1 = tlb.lookup(0x1000, 0, 1, 0).unwrap().timestamp;
        let t2 = tlb.lookup(0x2000, 0, 1, 0).unwrap().timestamp;
        assert!(t2 > t1);
    }

    #[test]
    fn test_invalidate_all() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry(0x1000, 0xA000, 1));
        tlb.insert(entry(0x2000, 0xB000, 2));
        tlb.invalidate_all();
        assert!(tlb.is_empty());
        assert!(tlb.is_coherent());
    }

    #[test]
    fn test_invalidate_by_asid() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry(0x1000, 0xA000, 1));
        tlb.insert(entry(0x2000, 0xB000, 1));
        tlb.insert(entry(0x3000, 0xC000, 2));

        tlb.invalidate_by_asid(1);
        assert_eq!(tlb.len(), 1);
        assert!(tlb.lookup(0x1000, 0, 1, 0).is_none());
        assert!(tlb.lookup(0x3000, 0, 2, 0).is_some());
        assert!(tlb.is_coherent());
    }

    #[test]
    fn test_invalidate_by_vmid() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry_for(0x1000, 0xA000, 0, 1, 5, PageSize::Size4K));
        tlb.insert(entry_for(0x2000, 0xB000, 0, 1, 6, PageSize::Size4K));

        tlb.invalidate_by_vmid(5);
        assert!(tlb.lookup(0x1000, 0, 1, 5).is_none());
        assert!(tlb.lookup(0x2000, 0, 1, 6).is_some());
    }

    #[test]
    fn test_invalidate_by_stream() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry_for(0x1000, 0xA000, 3, 1, 0, PageSize::Size4K));
        tlb.insert(entry_for(0x1000, 0xB000, 4, 1, 0, PageSize::Size4K));

        tlb.invalidate_by_stream(3);
        assert!(tlb.lookup(0x1000, 3, 1, 0).is_none());
        assert!(tlb.lookup(0x1000, 4, 1, 0).is_some());
    }

    #[test]
    fn test_invalidate_by_va_matches_asid() {
        let mut tlb = Tlb::new(8);
        tlb.insert(entry(0x5000, 0xA000, 1));
        tlb.insert(entry(0x5000, 0xB000, 2));
        tlb.insert(entry(0x6000, 0xC000, 1));

        tlb.invalidate_by_va(0x5000, 1);
        assert!(tlb.lookup(0x5000, 0, 1, 0).is_none());
        assert!(tlb.lookup(0x5000, 0, 2, 0).is_some());
        assert!(tlb.lookup(0x6000, 0, 1, 0).is_some());
        assert!(tlb.is_coherent());
    }

    #[test]
    fn test_capacity_bound() {
        let mut tlb = Tlb::new(4);
        for i in 0..16u64 {
            tlb.insert(entry(i * 0x1000, i * 0x1_0000, 1));
            assert!(tlb.len() <= 4);
            assert!(tlb.is_coherent());
        }
        assert_eq!(tlb.len(), 4);
    }
}
