//! 文件的内存映射

use alloc::vec::Vec;

use common::config::PAGE_SIZE;
use defines::error::{errno, KResult};
use scopeguard::ScopeGuard;

use super::MemorySpace;
use crate::{
    hal::FileRef,
    page::{FileSlice, Initializer, Page, PageRef},
    VirtAddr,
};

fn mapping_has_next(page: Option<&PageRef>) -> Option<bool> {
    page.and_then(|page| page.lock().mapping_has_next())
}

impl MemorySpace {
    /// 把 `file` 从 `offset` 开始的 `length` 字节映射到 `addr`，返回映射的起始地址
    ///
    /// 映射持有重新打开的文件。所有页都是懒加载的，超出文件末尾的部分读出为零，也不会被写回
    pub fn mmap(
        &mut self,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &FileRef,
        offset: usize,
    ) -> KResult<VirtAddr> {
        if addr.is_null() || !addr.is_page_aligned() || offset % PAGE_SIZE != 0 || length == 0 {
            return Err(errno::EINVAL);
        }
        let end = addr.0.checked_add(length).ok_or(errno::EINVAL)?;
        if addr.is_kernel() || VirtAddr(end - 1).is_kernel() {
            return Err(errno::EINVAL);
        }
        let file_len = file.len();
        if file_len == 0 {
            return Err(errno::EINVAL);
        }
        let page_count = length.div_ceil(PAGE_SIZE);
        offset
            .checked_add(page_count * PAGE_SIZE)
            .ok_or(errno::EINVAL)?;
        let start = addr.vpn_floor();
        if (0..page_count).any(|i| self.spt.contains(start + i)) {
            return Err(errno::EEXIST);
        }
        let file = file.reopen()?;
        debug!("mmap {addr:?}, {length:#x} bytes from file offset {offset:#x}");

        // 中途失败时移除已插入的页，它们都还未初始化，不持有任何资源
        let mut guard = scopeguard::guard((&mut self.spt, Vec::new()), |(spt, inserted)| {
            for vpn in inserted {
                spt.take(vpn);
            }
        });
        for i in 0..page_count {
            let page_offset = offset + i * PAGE_SIZE;
            let read_bytes = PAGE_SIZE
                .min(length - i * PAGE_SIZE)
                .min(file_len.saturating_sub(page_offset));
            let slice = FileSlice::new(
                FileRef::clone(&file),
                page_offset,
                read_bytes,
            );
            let init = Initializer::Mapping {
                slice,
                has_next: i + 1 < page_count,
            };
            let (spt, inserted) = &mut *guard;
            spt.insert(Page::new_uninit(start + i, writable, init))?;
            inserted.push(start + i);
        }
        ScopeGuard::into_inner(guard);
        Ok(addr)
    }

    /// 解除从 `addr` 开始的整个映射，脏页写回文件
    ///
    /// `addr` 必须是某个映射的第一页
    pub fn munmap(&mut self, addr: VirtAddr) -> KResult<()> {
        if !addr.is_page_aligned() {
            return Err(errno::EINVAL);
        }
        let mut vpn = addr.vpn_floor();
        if mapping_has_next(self.spt.get(vpn)).is_none() {
            return Err(errno::EINVAL);
        }
        // 前一页属于同一个映射，说明 `addr` 在映射中间
        if vpn.0 > 0 && mapping_has_next(self.spt.get(vpn - 1)) == Some(true) {
            return Err(errno::EINVAL);
        }
        debug!("munmap {addr:?}");
        loop {
            let Some(page) = self.spt.take(vpn) else {
                warn!("mapping ends early at {vpn:?}");
                break;
            };
            let has_next = page.lock().mapping_has_next() == Some(true);
            self.vm.destroy_page(&page, &self.page_table);
            if !has_next {
                break;
            }
            vpn = vpn + 1;
        }
        Ok(())
    }
}
