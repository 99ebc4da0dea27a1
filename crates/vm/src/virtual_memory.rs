use alloc::sync::Arc;

use common::config::PAGE_SIZE;
use klocks::SpinMutex;

use crate::{
    frame::{FrameTable, Resident, Victim},
    hal::{BlockDevice, PhysMemory},
    swap::SwapStore,
    Frame, FrameHandle, PageRef, PageTable, PhysPageNum,
};

/// 虚拟内存子系统的全局状态：物理页分配器、所有进程共享的帧表以及交换区
///
/// 锁的顺序由外到内是：帧表、页、页表、交换区位图。持有页锁时不能再去拿帧表的锁
pub struct VirtualMemory {
    phys: Arc<dyn PhysMemory>,
    frames: SpinMutex<FrameTable>,
    swap: SwapStore,
}

impl VirtualMemory {
    pub fn init(phys: Arc<dyn PhysMemory>, swap_disk: Arc<dyn BlockDevice>) -> Self {
        let swap = SwapStore::new(swap_disk);
        info!(
            "virtual memory: {} frames, {} swap slots",
            phys.total_frames(),
            swap.slot_count()
        );
        Self {
            phys,
            frames: SpinMutex::new(FrameTable::new()),
            swap,
        }
    }

    pub fn shutdown(self) {
        let resident = self.resident_frames();
        if resident != 0 {
            warn!("virtual memory shut down with {resident} frames still in use");
        }
        info!(
            "virtual memory shut down, {} of {} swap slots free",
            self.free_swap_slots(),
            self.swap_slots()
        );
    }

    pub fn resident_frames(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn free_swap_slots(&self) -> usize {
        self.swap.free_slots()
    }

    pub fn swap_slots(&self) -> usize {
        self.swap.slot_count()
    }

    pub(crate) fn swap(&self) -> &SwapStore {
        &self.swap
    }

    pub(crate) fn frames(&self) -> &SpinMutex<FrameTable> {
        &self.frames
    }

    /// 获取一个全零的帧。物理内存耗尽时换出一个帧来用
    ///
    /// 返回的帧还没有 attach，填充并映射完成后需调用 [`Self::attach_frame`]，
    /// 失败则调用 [`Self::free_frame`]。调用时不能持有任何页锁
    ///
    /// 所有帧都还在被其他线程填充时，放开帧表的锁等它们完成后重试
    pub fn get_frame(&self) -> Frame {
        loop {
            let mut frames = self.frames.lock();
            if let Some(ppn) = self.phys.alloc_zeroed() {
                return frames.insert(ppn);
            }
            match frames.pick_victim() {
                Victim::Found(handle) => return self.evict_frame(&mut frames, handle),
                Victim::InFlight => {
                    drop(frames);
                    core::hint::spin_loop();
                }
                Victim::Empty => {
                    error!("out of memory and no frame can be evicted");
                    panic!("no frame to evict");
                }
            }
        }
    }

    /// 整个换出过程都持有帧表的锁，两个线程不会选中同一个牺牲者
    fn evict_frame(&self, frames: &mut FrameTable, handle: FrameHandle) -> Frame {
        for resident in frames.take_residents(handle) {
            let mut page = resident.page.lock();
            if let Err(e) = page.swap_out(self, &resident.page_table) {
                error!("failed to swap out {:?}: {e}", resident.vpn);
                panic!("eviction failed");
            }
        }
        let frame = frames.frame(handle);
        debug!("evicted {:?}", frame.ppn());
        // SAFETY: 帧上已经没有驻留的页，也不在任何页表中
        unsafe { self.frame_bytes(frame.ppn()) }.fill(0);
        frame
    }

    pub(crate) fn attach_frame(&self, frame: Frame, resident: Resident) {
        self.frames.lock().attach(frame.handle(), resident);
    }

    /// 释放一个未 attach 的帧
    pub(crate) fn free_frame(&self, frame: Frame) {
        let ppn = self.frames.lock().remove(frame.handle());
        // SAFETY: 帧未 attach，从表中移除后没有人再持有它
        unsafe { self.release_ppn(ppn) };
    }

    /// 销毁页并将它从帧上摘下
    pub(crate) fn destroy_page(&self, page: &PageRef, page_table: &SpinMutex<PageTable>) {
        let mut frames = self.frames.lock();
        page.lock().destroy(self, &mut frames, page_table, page);
    }

    /// # Safety
    ///
    /// `ppn` 必须已经不在帧表中
    pub(crate) unsafe fn release_ppn(&self, ppn: PhysPageNum) {
        unsafe { self.phys.free(ppn) };
    }

    /// # Safety
    ///
    /// `ppn` 必须是帧表中的帧，且调用者对其内容有独占访问权
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn frame_bytes<'a>(&self, ppn: PhysPageNum) -> &'a mut [u8; PAGE_SIZE] {
        unsafe { self.phys.kernel_view(ppn).as_mut() }
    }

    /// 持有 `page` 的帧的数量
    #[cfg(test)]
    pub(crate) fn holders_of(&self, page: &PageRef) -> usize {
        self.frames.lock().holders_of(page)
    }
}
