//! Memory-mapped register file
//!
//! A sparse 32-bit register store covering the SMMUv3 subset the model
//! cares about. Identification registers are read-only; CR0 and IRQ_CTRL
//! writes are acknowledged by mirroring into their ACK registers, the
//! handshake software polls after reconfiguration. 64-bit registers
//! occupy two consecutive 32-bit cells, low word first.
//! Reference: ARM IHI 0070, chapter 6 - Memory map and registers

use bitflags::bitflags;
use std::collections::HashMap;

/// Register offsets within the SMMU page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegisterOffset {
    /// Identification register 0, feature support
    Idr0 = 0x0000,
    /// Identification register 1, queue and table sizes
    Idr1 = 0x0004,
    /// Identification register 5, output address size
    Idr5 = 0x0014,
    /// Control register 0
    Cr0 = 0x0020,
    /// Control register 0 acknowledge
    Cr0Ack = 0x0024,
    /// Control register 1, queue attributes
    Cr1 = 0x0028,
    /// Control register 2
    Cr2 = 0x002C,
    /// Status register
    Statusr = 0x0040,
    /// Global bypass attributes
    Gbpa = 0x0044,
    /// Interrupt control
    IrqCtrl = 0x0050,
    /// Interrupt control acknowledge
    IrqCtrlAck = 0x0054,
    /// Stream table base (64-bit)
    StrtabBase = 0x0080,
    /// Stream table base configuration
    StrtabBaseCfg = 0x0088,
    /// Command queue base (64-bit)
    CmdqBase = 0x0090,
    /// Command queue producer index
    CmdqProd = 0x0098,
    /// Command queue consumer index
    CmdqCons = 0x009C,
    /// Event queue base (64-bit)
    EventqBase = 0x00A0,
    /// Event queue producer index
    EventqProd = 0x00A8,
    /// Event queue consumer index
    EventqCons = 0x00AC,
}

bitflags! {
    /// CR0 control bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Cr0: u32 {
        /// Global SMMU enable
        const SMMUEN = 1 << 0;
        /// Event queue enable
        const EVENTQEN = 1 << 1;
        /// Command queue enable
        const CMDQEN = 1 << 2;
        /// ATS translation check enable
        const ATSCHK = 1 << 4;
    }
}

bitflags! {
    /// IDR0 feature bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Idr0: u32 {
        /// Stage-1 translation supported
        const S1P = 1 << 1;
        /// Stage-2 translation supported
        const S2P = 1 << 2;
        /// AArch64 translation table format
        const TTF_AARCH64 = 2 << 4;
        /// Coherent access to tables and queues
        const COHACC = 1 << 6;
        /// 16-bit ASID supported
        const ASID16 = 1 << 12;
        /// 16-bit VMID supported
        const VMID16 = 1 << 18;
    }
}

/// Sparse register store with SMMUv3 write side-effects
pub struct RegisterFile {
    registers: HashMap<u32, u32>,
}

impl RegisterFile {
    /// Create a register file with the identification registers set
    pub fn new() -> Self {
        let mut file = Self {
            registers: HashMap::new(),
        };
        file.init_idr_registers();
        file
    }

    fn init_idr_registers(&mut self) {
        let idr0 = Idr0::S1P
            | Idr0::S2P
            | Idr0::TTF_AARCH64
            | Idr0::COHACC
            | Idr0::ASID16
            | Idr0::VMID16;
        self.registers.insert(RegisterOffset::Idr0 as u32, idr0.bits());
        self.registers.insert(RegisterOffset::Idr1 as u32, 0);
        self.registers.insert(RegisterOffset::Idr5 as u32, 0);
    }

    fn read_raw(&self, offset: u32) -> u32 {
        self.registers.get(&offset).copied().unwrap_or(0)
    }

    fn write_raw(&mut self, offset: u32, value: u32) {
        // Identification registers ignore writes
        if offset == RegisterOffset::Idr0 as u32
            || offset == RegisterOffset::Idr1 as u32
            || offset == RegisterOffset::Idr5 as u32
        {
            return;
        }

        self.registers.insert(offset, value);

        // Control writes are acknowledged in the paired ACK register
        if offset == RegisterOffset::Cr0 as u32 {
            self.registers.insert(RegisterOffset::Cr0Ack as u32, value);
        } else if offset == RegisterOffset::IrqCtrl as u32 {
            self.registers
                .insert(RegisterOffset::IrqCtrlAck as u32, value);
        }
    }

    /// Read a 32-bit register
    pub fn read(&self, offset: RegisterOffset) -> u32 {
        self.read_raw(offset as u32)
    }

    /// Write a 32-bit register
    pub fn write(&mut self, offset: RegisterOffset, value: u32) {
        self.write_raw(offset as u32, value);
    }

    /// Read a 64-bit register from two consecutive cells
    pub fn read64(&self, offset: RegisterOffset) -> u64 {
        let low = self.read_raw(offset as u32) as u64;
        let high = self.read_raw(offset as u32 + 4) as u64;
        high << 32 | low
    }

    /// Write a 64-bit register into two consecutive cells
    pub fn write64(&mut self, offset: RegisterOffset, value: u64) {
        self.write_raw(offset as u32, value as u32);
        self.write_raw(offset as u32 + 4, (value >> 32) as u32);
    }

    fn cr0(&self) -> Cr0 {
        Cr0::from_bits_truncate(self.read(RegisterOffset::Cr0))
    }

    fn set_cr0_flag(&mut self, flag: Cr0, set: bool) {
        let mut cr0 = self.cr0();
        cr0.set(flag, set);
        self.write(RegisterOffset::Cr0, cr0.bits());
    }

    /// Whether the global enable bit is set
    pub fn is_smmu_enabled(&self) -> bool {
        self.cr0().contains(Cr0::SMMUEN)
    }

    /// Set or clear the global enable bit
    pub fn set_smmu_enabled(&mut self, enabled: bool) {
        self.set_cr0_flag(Cr0::SMMUEN, enabled);
    }

    /// Whether the command queue is enabled
    pub fn is_cmdq_enabled(&self) -> bool {
        self.cr0().contains(Cr0::CMDQEN)
    }

    /// Set or clear the command queue enable bit
    pub fn set_cmdq_enabled(&mut self, enabled: bool) {
        self.set_cr0_flag(Cr0::CMDQEN, enabled);
    }

    /// Whether the event queue is enabled
    pub fn is_eventq_enabled(&self) -> bool {
        self.cr0().contains(Cr0::EVENTQEN)
    }

    /// Set or clear the event queue enable bit
    pub fn set_eventq_enabled(&mut self, enabled: bool) {
        self.set_cr0_flag(Cr0::EVENTQEN, enabled);
    }

    /// Stream table base address
    pub fn stream_table_base(&self) -> u64 {
        self.read64(RegisterOffset::StrtabBase)
    }

    /// Set the stream table base address
    pub fn set_stream_table_base(&mut self, base: u64) {
        self.write64(RegisterOffset::StrtabBase, base);
    }

    /// Command queue base address
    pub fn cmdq_base(&self) -> u64 {
        self.read64(RegisterOffset::CmdqBase)
    }

    /// Set the command queue base address
    pub fn set_cmdq_base(&mut self, base: u64) {
        self.write64(RegisterOffset::CmdqBase, base);
    }

    /// Event queue base address
    pub fn eventq_base(&self) -> u64 {
        self.read64(RegisterOffset::EventqBase)
    }

    /// Set the event queue base address
    pub fn set_eventq_base(&mut self, base: u64) {
        self.write64(RegisterOffset::EventqBase, base);
    }

    /// Command queue producer index
    pub fn cmdq_prod(&self) -> u32 {
        self.read(RegisterOffset::CmdqProd)
    }

    /// Set the command queue producer index
    pub fn set_cmdq_prod(&mut self, prod: u32) {
        self.write(RegisterOffset::CmdqProd, prod);
    }

    /// Command queue consumer index
    pub fn cmdq_cons(&self) -> u32 {
        self.read(RegisterOffset::CmdqCons)
    }

    /// Set the command queue consumer index
    pub fn set_cmdq_cons(&mut self, cons: u32) {
        self.write(RegisterOffset::CmdqCons, cons);
    }

    /// Event queue producer index
    pub fn eventq_prod(&self) -> u32 {
        self.read(RegisterOffset::EventqProd)
    }

    /// Set the event queue producer index
    pub fn set_eventq_prod(&mut self, prod: u32) {
        self.write(RegisterOffset::EventqProd, prod);
    }

    /// Event queue consumer index
    pub fn eventq_cons(&self) -> u32 {
        self.read(RegisterOffset::EventqCons)
    }

    /// Set the event queue consumer index
    pub fn set_eventq_cons(&mut self, cons: u32) {
        self.write(RegisterOffset::EventqCons, cons);
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idr0_features() {
        let regs = RegisterFile::new();
        let idr0 = Idr0::from_bits_truncate(regs.read(RegisterOffset::Idr0));
        assert!(idr0.contains(Idr0::S1P));
        assert!(idr0.contains(Idr0::S2P));
        assert!(idr0.contains(Idr0::ASID16));
        assert!(idr0.contains(Idr0::VMID16));
    }

    #[test]
    fn test_idr_registers_read_only() {
        let mut regs = RegisterFile::new();
        let before = regs.read(RegisterOffset::Idr0);
        regs.write(RegisterOffset::Idr0, 0xDEAD_BEEF);
        regs.write(RegisterOffset::Idr1, 0xDEAD_BEEF);
        regs.write(RegisterOffset::Idr5, 0xDEAD_BEEF);
        assert_eq!(regs.read(RegisterOffset::Idr0), before);
        assert_eq!(regs.read(RegisterOffset::Idr1), 0);
        assert_eq!(regs.read(RegisterOffset::Idr5), 0);
    }

    #[test]
    fn test_cr0_mirrors_into_ack() {
        let mut regs = RegisterFile::new();
        regs.write(RegisterOffset::Cr0, Cr0::SMMUEN.bits() | Cr0::CMDQEN.bits());
        assert_eq!(
            regs.read(RegisterOffset::Cr0Ack),
            Cr0::SMMUEN.bits() | Cr0::CMDQEN.bits()
        );
    }

    #[test]
    fn test_irq_ctrl_mirrors_into_ack() {
        let mut regs = RegisterFile::new();
        regs.write(RegisterOffset::IrqCtrl, 0x7);
        assert_eq!(regs.read(RegisterOffset::IrqCtrlAck), 0x7);
    }

    #[test]
    fn test_64bit_split_access() {
        let mut regs = RegisterFile::new();
        regs.set_cmdq_base(0x1234_5678_9ABC_DEF0);
        assert_eq!(regs.cmdq_base(), 0x1234_5678_9ABC_DEF0);
        assert_eq!(regs.read(RegisterOffset::CmdqBase), 0x9ABC_DEF0);
        assert_eq!(regs.read_raw(RegisterOffset::CmdqBase as u32 + 4), 0x1234_5678);
    }

    #[test]
    fn test_enable_helpers() {
        let mut regs = RegisterFile::new();
        assert!(!regs.is_smmu_enabled());

        regs.set_smmu_enabled(true);
        regs.set_cmdq_enabled(true);
        regs.set_eventq_enabled(true);
        assert!(regs.is_smmu_enabled());
        assert!(regs.is_cmdq_enabled());
        assert!(regs.is_eventq_enabled());

        regs.set_smmu_enabled(false);
        assert!(!regs.is_smmu_enabled());
        assert!(regs.is_cmdq_enabled());
    }

    #[test]
    fn test_queue_indices() {
        let mut regs = RegisterFile::new();
        regs.set_cmdq_prod(5);
        regs.set_cmdq_cons(3);
        regs.set_eventq_prod(8);
        regs.set_eventq_cons(2);
        assert_eq!(regs.cmdq_prod(), 5);
        assert_eq!(regs.cmdq_cons(), 3);
        assert_eq!(regs.eventq_prod(), 8);
        assert_eq!(regs.eventq_cons(), 2);
    }

    #[test]
    fn test_unwritten_register_reads_zero() {
        let regs = RegisterFile::new();
        assert_eq!(regs.read(RegisterOffset::Statusr), 0);
        assert_eq!(regs.read(RegisterOffset::Gbpa), 0);
    }
}
