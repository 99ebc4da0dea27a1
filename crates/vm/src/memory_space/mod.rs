use common::config::{PAGE_SIZE, USER_STACK};
use defines::error::{errno, KResult};
use klocks::SpinMutex;
use triomphe::Arc;

use self::page_table::{PageTable, PageTableRef};
use crate::{
    frame::Resident,
    hal::FileRef,
    page::{FileSlice, Initializer, Page, PageKind, PageRef, PageType},
    Frame, SupplementalPageTable, VirtAddr, VirtPageNum, VirtualMemory,
};

pub mod fault;
mod mmap;
pub mod page_table;
mod user_access;

/// 进程的用户地址空间
pub struct MemorySpace {
    vm: Arc<VirtualMemory>,
    page_table: PageTableRef,
    spt: SupplementalPageTable,
    // 进入系统调用时记录的用户栈指针，内核态访问用户内存缺页时用它判断栈增长
    saved_user_sp: usize,
}

impl MemorySpace {
    pub fn new(vm: Arc<VirtualMemory>) -> Self {
        Self {
            vm,
            page_table: Arc::new(SpinMutex::new(PageTable::new())),
            spt: SupplementalPageTable::new(),
            saved_user_sp: USER_STACK,
        }
    }

    /// 复制一个地址空间，见 [`Self::copy_from`]
    pub fn from_other(parent: &Self) -> KResult<Self> {
        let mut memory_space = Self::new(Arc::clone(&parent.vm));
        memory_space.copy_from(parent)?;
        Ok(memory_space)
    }

    pub fn page_table(&self) -> &PageTableRef {
        &self.page_table
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn find_page(&self, addr: VirtAddr) -> Option<PageRef> {
        self.spt.find(addr).map(Arc::clone)
    }

    pub fn page_type(&self, addr: VirtAddr) -> Option<PageType> {
        self.spt.find(addr).map(|page| page.lock().page_type())
    }

    pub fn saved_user_sp(&self) -> usize {
        self.saved_user_sp
    }

    pub fn set_saved_user_sp(&mut self, sp: usize) {
        self.saved_user_sp = sp;
    }

    /// 在 `addr` 处登记一个懒加载的页，第一次访问时由 `init` 初始化
    pub fn alloc_page(&mut self, addr: VirtAddr, writable: bool, init: Initializer) -> KResult<()> {
        if !addr.is_page_aligned() || addr.is_kernel() {
            return Err(errno::EINVAL);
        }
        self.spt
            .insert(Page::new_uninit(addr.vpn_floor(), writable, init))?;
        Ok(())
    }

    /// 让 `addr` 所在的页立即驻留
    pub fn claim_page(&self, addr: VirtAddr) -> bool {
        self.try_claim_page(addr).is_ok()
    }

    pub fn try_claim_page(&self, addr: VirtAddr) -> KResult<()> {
        let page = self.spt.find(addr).ok_or(errno::EFAULT)?;
        self.do_claim(page)
    }

    /// 为页获取帧，建立映射，再把内容载入帧中
    fn do_claim(&self, page: &PageRef) -> KResult<()> {
        if page.lock().is_resident() {
            return Ok(());
        }
        let frame = self.vm.get_frame();
        match self.fill_frame(page, frame) {
            Ok(vpn) => {
                self.vm.attach_frame(
                    frame,
                    Resident {
                        vpn,
                        page: Arc::clone(page),
                        page_table: Arc::clone(&self.page_table),
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.vm.free_frame(frame);
                Err(e)
            }
        }
    }

    fn fill_frame(&self, page: &PageRef, frame: Frame) -> KResult<VirtPageNum> {
        let mut page = page.lock();
        let vpn = page.vpn();
        trace!("claim {vpn:?} with {:?}", frame.ppn());
        self.page_table
            .lock()
            .map(vpn, frame.ppn(), page.is_writable())?;
        // SAFETY: 帧还未 attach，只有当前线程能访问它
        let bytes = unsafe { self.vm.frame_bytes(frame.ppn()) };
        if let Err(e) = page.swap_in(self.vm.swap(), bytes) {
            self.page_table.lock().unmap(vpn);
            return Err(e);
        }
        page.set_frame(frame);
        Ok(vpn)
    }

    /// 移除并销毁 `addr` 所在的页
    pub fn remove_page(&mut self, addr: VirtAddr) -> bool {
        self.spt.remove(addr.vpn_floor(), &self.vm, &self.page_table)
    }

    /// 初始化用户栈：紧挨着栈顶的一页立即驻留，返回初始的栈指针
    pub fn setup_stack(&mut self) -> KResult<VirtAddr> {
        let vpn = VirtAddr(USER_STACK - PAGE_SIZE).vpn_floor();
        self.grow_stack(vpn)?;
        self.saved_user_sp = USER_STACK;
        Ok(VirtAddr(USER_STACK))
    }

    fn grow_stack(&mut self, vpn: VirtPageNum) -> KResult<()> {
        debug!("grow stack to {:?}", vpn.page_start());
        let page = self.spt.insert(Page::new_stack(vpn))?;
        if let Err(e) = self.do_claim(&page) {
            self.spt.take(vpn);
            return Err(e);
        }
        Ok(())
    }

    /// 懒加载可执行文件的一个段。从文件 `offset` 处读 `read_bytes` 字节到 `upage`，
    /// 之后 `zero_bytes` 字节填零。这些页初始化后是匿名页
    pub fn load_segment(
        &mut self,
        file: &FileRef,
        offset: usize,
        upage: VirtAddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> KResult<()> {
        let total = read_bytes.checked_add(zero_bytes).ok_or(errno::EINVAL)?;
        if !upage.is_page_aligned() || offset % PAGE_SIZE != 0 || total % PAGE_SIZE != 0 {
            return Err(errno::EINVAL);
        }
        // 段在文件里的末尾也得能表示出来
        offset.checked_add(total).ok_or(errno::EINVAL)?;
        let page_count = total / PAGE_SIZE;
        let start = upage.vpn_floor();
        if (0..page_count).any(|i| self.spt.contains(start + i)) {
            return Err(errno::EEXIST);
        }
        debug!(
            "load segment at {upage:?}, {read_bytes:#x} bytes from file offset {offset:#x}"
        );
        let mut remaining = read_bytes;
        for i in 0..page_count {
            let page_read = remaining.min(PAGE_SIZE);
            let init = if page_read == 0 {
                Initializer::Zeroed
            } else {
                Initializer::Segment(FileSlice::new(
                    FileRef::clone(file),
                    offset + i * PAGE_SIZE,
                    page_read,
                ))
            };
            self.alloc_page((start + i).page_start(), writable, init)?;
            remaining -= page_read;
        }
        Ok(())
    }

    /// 复制父进程的地址空间
    ///
    /// 未初始化的页各自复制一份初始化器；文件页与父进程共享同一个帧；
    /// 匿名页则分配新的帧并复制内容。失败时已复制的页全部回收
    pub fn copy_from(&mut self, parent: &Self) -> KResult<()> {
        debug!("copy {} pages from parent", parent.spt.len());
        for (&vpn, src) in parent.spt.iter() {
            if let Err(e) = self.copy_page(vpn, src) {
                warn!("failed to copy {vpn:?}: {e}");
                self.recycle_user_pages();
                return Err(e);
            }
        }
        Ok(())
    }

    fn copy_page(&mut self, vpn: VirtPageNum, src: &PageRef) -> KResult<()> {
        let page_type = src.lock().page_type();
        match page_type {
            PageType::Uninit => {
                let src = src.lock();
                let PageKind::Uninit(init) = src.kind() else {
                    unreachable!()
                };
                let page = Page::new_uninit(vpn, src.is_writable(), init.duplicate()?)
                    .with_stack_marker(src.is_stack());
                self.spt.insert(page)?;
            }
            PageType::FileBacked => self.share_file_page(vpn, src)?,
            PageType::Anonymous => self.copy_anon_page(vpn, src)?,
        }
        Ok(())
    }

    fn share_file_page(&mut self, vpn: VirtPageNum, src: &PageRef) -> KResult<()> {
        let mut frames = self.vm.frames().lock();
        let src = src.lock();
        let PageKind::FileBacked(file) = src.kind() else {
            unreachable!()
        };
        let page = Page::from_file_page(vpn, src.is_writable(), file.duplicate()?);
        let page = self.spt.insert(page)?;
        // 父进程的页已被换出时，子进程的页之后从文件重新载入
        if let Some(frame) = src.frame() {
            self.page_table
                .lock()
                .map(vpn, frame.ppn(), src.is_writable())?;
            page.lock().set_frame(frame);
            frames.attach(
                frame.handle(),
                Resident {
                    vpn,
                    page,
                    page_table: Arc::clone(&self.page_table),
                },
            );
        }
        Ok(())
    }

    fn copy_anon_page(&mut self, vpn: VirtPageNum, src: &PageRef) -> KResult<()> {
        let (writable, is_stack) = {
            let src = src.lock();
            (src.is_writable(), src.is_stack())
        };
        let page = self.spt.insert(Page::new_anon(vpn, writable, is_stack))?;
        let frame = self.vm.get_frame();
        if let Err(e) = self.copy_anon_frame(src, &page, frame) {
            self.vm.free_frame(frame);
            return Err(e);
        }
        self.vm.attach_frame(
            frame,
            Resident {
                vpn,
                page,
                page_table: Arc::clone(&self.page_table),
            },
        );
        Ok(())
    }

    /// 父进程的页被换出时直接读交换槽，但不归还它
    fn copy_anon_frame(&self, src: &PageRef, page: &PageRef, frame: Frame) -> KResult<()> {
        {
            let src = src.lock();
            // SAFETY: 新帧未 attach。持有父进程的页锁，它的帧不会被换出
            let dst = unsafe { self.vm.frame_bytes(frame.ppn()) };
            match (src.frame(), src.kind()) {
                (Some(src_frame), _) => {
                    // SAFETY: 父进程的页锁在手，它的帧不会被换出或复用，这里只读
                    dst.copy_from_slice(unsafe { self.vm.frame_bytes(src_frame.ppn()) });
                }
                (None, PageKind::Anonymous(anon)) => anon.read_swapped(self.vm.swap(), dst)?,
                (None, _) => unreachable!(),
            }
        }
        let mut page = page.lock();
        self.page_table
            .lock()
            .map(page.vpn(), frame.ppn(), page.is_writable())?;
        page.set_frame(frame);
        Ok(())
    }

    /// 回收所有用户页
    pub fn recycle_user_pages(&mut self) {
        if self.spt.is_empty() {
            return;
        }
        debug!("recycle {} user pages", self.spt.len());
        for (_, page) in self.spt.drain() {
            self.vm.destroy_page(&page, &self.page_table);
        }
    }
}

impl Drop for MemorySpace {
    fn drop(&mut self) {
        self.recycle_user_pages();
    }
}
