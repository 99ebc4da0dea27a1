//! Implementation of [`PageTableEntry`] and [`PageTable`].
//!
//! 这里是软件模拟的页表：叶子项直接按虚拟页号存放，访问位和脏位由
//! [`PageTable::access`] 按 MMU 的规则维护

use bitflags::bitflags;
use defines::error::{errno, KResult};
use hashbrown::HashMap;
use klocks::SpinMutex;
use triomphe::Arc;

use crate::{PhysPageNum, VirtPageNum};

bitflags! {
    /// page table entry flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PTEFlags: u16 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// page table entry structure
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct PageTableEntry {
    bits: usize,
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PageTableEntry {
            bits: ppn.0 << 10 | flags.bits() as usize,
        }
    }

    pub fn ppn(&self) -> PhysPageNum {
        const LOW_44_MASK: usize = (1 << 44) - 1;
        PhysPageNum((self.bits >> 10) & LOW_44_MASK)
    }

    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u16)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::V)
    }

    pub fn is_writable(&self) -> bool {
        self.flags().contains(PTEFlags::W)
    }

    pub fn is_accessed(&self) -> bool {
        self.flags().contains(PTEFlags::A)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(PTEFlags::D)
    }

    fn set_flag(&mut self, flag: PTEFlags, value: bool) {
        let mut flags = self.flags();
        flags.set(flag, value);
        *self = Self::new(self.ppn(), flags);
    }
}

/// MMU 访问失败的原因，对应缺页异常中的 not present 位
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessFault {
    NotPresent,
    ReadOnly,
}

pub type PageTableRef = Arc<SpinMutex<PageTable>>;

/// 某个进程的页表
#[derive(Default)]
pub struct PageTable {
    entries: HashMap<VirtPageNum, PageTableEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建立 `vpn` 到 `ppn` 的用户映射。`vpn` 已被映射时返回 `EEXIST`
    pub fn map(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, writable: bool) -> KResult<()> {
        let mut flags = PTEFlags::V | PTEFlags::R | PTEFlags::U;
        if writable {
            flags |= PTEFlags::W;
        }
        match self.entries.entry(vpn) {
            hashbrown::hash_map::Entry::Occupied(_) => Err(errno::EEXIST),
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert(PageTableEntry::new(ppn, flags));
                Ok(())
            }
        }
    }

    /// 取消映射，返回原来的页表项，便于调用方检查脏位
    pub fn unmap(&mut self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.remove(&vpn)
    }

    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied()
    }

    pub fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.entries.get(&vpn).is_some_and(PageTableEntry::is_dirty)
    }

    pub fn set_dirty(&mut self, vpn: VirtPageNum, dirty: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.set_flag(PTEFlags::D, dirty);
        }
    }

    pub fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.entries.get(&vpn).is_some_and(PageTableEntry::is_accessed)
    }

    pub fn set_accessed(&mut self, vpn: VirtPageNum, accessed: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.set_flag(PTEFlags::A, accessed);
        }
    }

    /// 模拟 MMU 的一次访存：检查权限，置访问位，写访问再置脏位
    pub fn access(&mut self, vpn: VirtPageNum, write: bool) -> Result<PhysPageNum, AccessFault> {
        let pte = self.entries.get_mut(&vpn).ok_or(AccessFault::NotPresent)?;
        if write && !pte.is_writable() {
            return Err(AccessFault::ReadOnly);
        }
        pte.set_flag(PTEFlags::A, true);
        if write {
            pte.set_flag(PTEFlags::D, true);
        }
        Ok(pte.ppn())
    }

    pub fn mapped_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use defines::error::errno;

    use super::{AccessFault, PageTable};
    use crate::{PhysPageNum, VirtPageNum};

    #[test]
    fn map_and_unmap() {
        let mut pt = PageTable::new();
        let vpn = VirtPageNum(0x10);
        pt.map(vpn, PhysPageNum(0x80), true).unwrap();
        assert_eq!(pt.map(vpn, PhysPageNum(0x81), true), Err(errno::EEXIST));
        let pte = pt.translate(vpn).unwrap();
        assert!(pte.is_valid() && pte.is_writable());
        assert_eq!(pte.ppn(), PhysPageNum(0x80));
        assert!(pt.unmap(vpn).is_some());
        assert!(pt.translate(vpn).is_none());
        assert!(pt.unmap(vpn).is_none());
    }

    #[test]
    fn access_sets_accessed_and_dirty() {
        let mut pt = PageTable::new();
        let vpn = VirtPageNum(1);
        pt.map(vpn, PhysPageNum(7), true).unwrap();
        assert!(!pt.is_accessed(vpn) && !pt.is_dirty(vpn));

        assert_eq!(pt.access(vpn, false), Ok(PhysPageNum(7)));
        assert!(pt.is_accessed(vpn));
        assert!(!pt.is_dirty(vpn));

        assert_eq!(pt.access(vpn, true), Ok(PhysPageNum(7)));
        assert!(pt.is_dirty(vpn));

        pt.set_accessed(vpn, false);
        pt.set_dirty(vpn, false);
        assert!(!pt.is_accessed(vpn) && !pt.is_dirty(vpn));
        assert_eq!(pt.translate(vpn).unwrap().ppn(), PhysPageNum(7));
    }

    #[test]
    fn access_faults() {
        let mut pt = PageTable::new();
        assert_eq!(pt.access(VirtPageNum(3), false), Err(AccessFault::NotPresent));
        pt.map(VirtPageNum(3), PhysPageNum(9), false).unwrap();
        assert_eq!(pt.access(VirtPageNum(3), true), Err(AccessFault::ReadOnly));
        assert!(!pt.is_dirty(VirtPageNum(3)));
    }
}
