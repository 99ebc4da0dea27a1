//! 补充页表：进程的虚拟页号到 [`Page`] 的映射，描述每个用户地址的含义

use defines::error::{errno, KResult};
use hashbrown::HashMap;
use klocks::SpinMutex;
use triomphe::Arc;

use crate::{Page, PageRef, PageTable, VirtAddr, VirtPageNum, VirtualMemory};

/// 只属于一个进程，只有 fork 时会被另一个进程读取
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: HashMap<VirtPageNum, PageRef>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 该地址已有页时返回 `EEXIST`
    pub fn insert(&mut self, page: Page) -> KResult<PageRef> {
        let vpn = page.vpn();
        if self.pages.contains_key(&vpn) {
            return Err(errno::EEXIST);
        }
        let page = Arc::new(SpinMutex::new(page));
        self.pages.insert(vpn, Arc::clone(&page));
        Ok(page)
    }

    /// 按所在的页查找，`addr` 不必对齐
    pub fn find(&self, addr: VirtAddr) -> Option<&PageRef> {
        self.get(addr.vpn_floor())
    }

    pub fn get(&self, vpn: VirtPageNum) -> Option<&PageRef> {
        self.pages.get(&vpn)
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.pages.contains_key(&vpn)
    }

    /// 只移除表项而不销毁页
    pub fn take(&mut self, vpn: VirtPageNum) -> Option<PageRef> {
        self.pages.remove(&vpn)
    }

    /// 移除表项并销毁页，返回该页是否存在
    pub fn remove(&mut self, vpn: VirtPageNum, vm: &VirtualMemory, page_table: &SpinMutex<PageTable>) -> bool {
        match self.pages.remove(&vpn) {
            Some(page) => {
                vm.destroy_page(&page, page_table);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VirtPageNum, &PageRef)> {
        self.pages.iter()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (VirtPageNum, PageRef)> + '_ {
        self.pages.drain()
    }
}

#[cfg(test)]
mod tests {
    use defines::error::errno;

    use super::SupplementalPageTable;
    use crate::{Initializer, Page, PageType, VirtAddr, VirtPageNum};

    #[test]
    fn insert_rejects_duplicates() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(Page::new_uninit(VirtPageNum(5), true, Initializer::Zeroed))
            .unwrap();
        assert_eq!(
            spt.insert(Page::new_uninit(VirtPageNum(5), false, Initializer::Zeroed))
                .err(),
            Some(errno::EEXIST)
        );
        assert_eq!(spt.len(), 1);
        // 原来的页没有被覆盖
        assert!(spt.get(VirtPageNum(5)).unwrap().lock().is_writable());
    }

    #[test]
    fn find_rounds_down() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(Page::new_stack(VirtPageNum(0x10))).unwrap();
        let page = spt.find(VirtAddr(0x10fff)).unwrap().lock();
        assert_eq!(page.vpn(), VirtPageNum(0x10));
        assert_eq!(page.page_type(), PageType::Uninit);
        assert_eq!(page.target_type(), PageType::Anonymous);
        assert!(page.is_stack());
        drop(page);
        assert!(spt.find(VirtAddr(0x11000)).is_none());
        assert!(spt.take(VirtPageNum(0x10)).is_some());
        assert!(spt.is_empty());
    }
}
