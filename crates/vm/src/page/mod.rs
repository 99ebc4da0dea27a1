//! 虚拟页。页有三种：尚未初始化的 [`PageKind::Uninit`]，
//! 以交换区为后备的 [`PageKind::Anonymous`] 和以文件为后备的 [`PageKind::FileBacked`]

mod anon;
mod file;
mod uninit;

use core::fmt;

use common::config::PAGE_SIZE;
use defines::error::KResult;
use klocks::SpinMutex;
use triomphe::Arc;

pub use self::{
    anon::AnonPage,
    file::{FilePage, FileSlice},
    uninit::Initializer,
};
use crate::{
    frame::FrameTable, swap::SwapStore, Frame, PageTable, VirtPageNum, VirtualMemory,
};

pub type PageRef = Arc<SpinMutex<Page>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageType {
    Uninit,
    Anonymous,
    FileBacked,
}

pub enum PageKind {
    Uninit(Initializer),
    Anonymous(AnonPage),
    FileBacked(FilePage),
}

pub struct Page {
    vpn: VirtPageNum,
    writable: bool,
    is_stack: bool,
    frame: Option<Frame>,
    kind: PageKind,
}

impl Page {
    pub fn new_uninit(vpn: VirtPageNum, writable: bool, init: Initializer) -> Self {
        Self {
            vpn,
            writable,
            is_stack: false,
            frame: None,
            kind: PageKind::Uninit(init),
        }
    }

    pub(crate) fn new_anon(vpn: VirtPageNum, writable: bool, is_stack: bool) -> Self {
        Self {
            vpn,
            writable,
            is_stack,
            frame: None,
            kind: PageKind::Anonymous(AnonPage::new()),
        }
    }

    pub(crate) fn from_file_page(vpn: VirtPageNum, writable: bool, file: FilePage) -> Self {
        Self {
            vpn,
            writable,
            is_stack: false,
            frame: None,
            kind: PageKind::FileBacked(file),
        }
    }

    /// 栈页，即全零的可写匿名页，并带上栈标记
    pub fn new_stack(vpn: VirtPageNum) -> Self {
        Self::new_uninit(vpn, true, Initializer::Zeroed).with_stack_marker(true)
    }

    pub(crate) fn with_stack_marker(self, is_stack: bool) -> Self {
        Self { is_stack, ..self }
    }

    pub fn vpn(&self) -> VirtPageNum {
        self.vpn
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_stack(&self) -> bool {
        self.is_stack
    }

    pub fn frame(&self) -> Option<Frame> {
        self.frame
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    pub fn page_type(&self) -> PageType {
        match &self.kind {
            PageKind::Uninit(_) => PageType::Uninit,
            PageKind::Anonymous(_) => PageType::Anonymous,
            PageKind::FileBacked(_) => PageType::FileBacked,
        }
    }

    /// 页现在的类型，或初始化后将成为的类型
    pub fn target_type(&self) -> PageType {
        match &self.kind {
            PageKind::Uninit(init) => init.target_type(),
            _ => self.page_type(),
        }
    }

    /// 若是 mmap 映射的页，返回映射在它之后是否还有页
    pub fn mapping_has_next(&self) -> Option<bool> {
        match &self.kind {
            PageKind::Uninit(Initializer::Mapping { has_next, .. }) => Some(*has_next),
            PageKind::FileBacked(file) => Some(file.has_next()),
            _ => None,
        }
    }

    pub(crate) fn set_frame(&mut self, frame: Frame) {
        debug_assert!(self.frame.is_none());
        self.frame = Some(frame);
    }

    /// 调用初始化器填充 `bytes`，成功后页变为具体的类型。初始化器随之被消耗
    fn materialize(&mut self, bytes: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        let PageKind::Uninit(init) = &self.kind else {
            return Ok(());
        };
        init.fill(bytes)?;
        if let PageKind::Uninit(init) =
            core::mem::replace(&mut self.kind, PageKind::Anonymous(AnonPage::new()))
        {
            self.kind = init.into_kind();
        }
        debug!("{:?} materialized as {:?}", self.vpn, self.page_type());
        Ok(())
    }

    /// 将页的内容载入 `bytes` 所在的新帧
    pub(crate) fn swap_in(&mut self, swap: &SwapStore, bytes: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        trace!("swap in {:?}", self.vpn);
        match &mut self.kind {
            PageKind::Uninit(_) => self.materialize(bytes),
            PageKind::Anonymous(anon) => anon.swap_in(swap, bytes),
            PageKind::FileBacked(file) => file.swap_in(bytes),
        }
    }

    /// 换出页，先取消映射再保存内容，之后页不再驻留
    pub(crate) fn swap_out(&mut self, vm: &VirtualMemory, page_table: &SpinMutex<PageTable>) -> KResult<()> {
        let Some(frame) = self.frame else {
            return Ok(());
        };
        trace!("swap out {:?} from {:?}", self.vpn, frame.ppn());
        let dirty = page_table
            .lock()
            .unmap(self.vpn)
            .is_some_and(|pte| pte.is_dirty());
        // SAFETY: 持有页锁，且映射已取消，没有别人会访问这个帧
        let bytes = unsafe { vm.frame_bytes(frame.ppn()) };
        match &mut self.kind {
            PageKind::Anonymous(anon) => anon.swap_out(vm.swap(), bytes)?,
            PageKind::FileBacked(file) => file.swap_out(bytes, dirty)?,
            PageKind::Uninit(_) => unreachable!("uninit page {:?} is resident", self.vpn),
        }
        self.frame = None;
        Ok(())
    }

    /// 销毁页：取消映射，脏的文件页写回，释放帧和交换槽。对同一个页多次调用是安全的
    ///
    /// 调用者需持有帧表的锁。`this` 是指向 `self` 的引用，用于在帧上定位
    pub(crate) fn destroy(
        &mut self,
        vm: &VirtualMemory,
        frames: &mut FrameTable,
        page_table: &SpinMutex<PageTable>,
        this: &PageRef,
    ) {
        if let Some(frame) = self.frame.take() {
            let dirty = page_table
                .lock()
                .unmap(self.vpn)
                .is_some_and(|pte| pte.is_dirty());
            if let PageKind::FileBacked(file) = &self.kind {
                // SAFETY: 持有帧表锁，帧不会被换出或释放
                let bytes = unsafe { vm.frame_bytes(frame.ppn()) };
                if let Err(e) = file.swap_out(bytes, dirty) {
                    warn!("failed to write back {:?} on destroy: {e}", self.vpn);
                }
            }
            if let Some(ppn) = frames.detach(frame.handle(), this) {
                // SAFETY: 帧已从帧表中移除，没有页再持有它
                unsafe { vm.release_ppn(ppn) };
            }
        }
        if let PageKind::Anonymous(anon) = &mut self.kind {
            anon.release(vm.swap());
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("vpn", &self.vpn)
            .field("type", &self.page_type())
            .field("writable", &self.writable)
            .field("frame", &self.frame)
            .finish()
    }
}
