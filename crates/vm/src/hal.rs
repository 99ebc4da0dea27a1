//! 虚拟内存子系统所依赖的外部组件：物理页分配器、交换盘、文件
//!
//! 内核的其他部分实现这些 trait，测试中则有对应的内存模拟

use alloc::sync::Arc;
use core::ptr::NonNull;

use common::config::{PAGE_SIZE, SECTOR_SIZE};
use defines::error::KResult;

use crate::PhysPageNum;

/// 底层的物理页分配器
pub trait PhysMemory: Send + Sync {
    /// 分配一个清零的物理页，内存耗尽时返回 `None`
    fn alloc_zeroed(&self) -> Option<PhysPageNum>;

    /// # Safety
    ///
    /// `ppn` 必须由 [`PhysMemory::alloc_zeroed`] 分配，且释放后不再被访问
    unsafe fn free(&self, ppn: PhysPageNum);

    /// 物理页在内核线性映射中的位置
    fn kernel_view(&self, ppn: PhysPageNum) -> NonNull<[u8; PAGE_SIZE]>;

    fn total_frames(&self) -> usize;
}

/// 块设备的抽象，读写都以扇区为单位进行
pub trait BlockDevice: Send + Sync {
    fn sector_count(&self) -> u64;
    fn read_sector(&self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> KResult<()>;
    fn write_sector(&self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> KResult<()>;
}

/// 打开的文件。每个句柄有自己的读写位置，关闭即 drop
pub trait File: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn seek(&self, pos: usize);

    /// 从当前位置读取，返回实际读到的字节数
    fn read(&self, buf: &mut [u8]) -> KResult<usize>;

    /// 在 `offset` 处写入，不影响读写位置
    fn write_at(&self, buf: &[u8], offset: usize) -> KResult<usize>;

    /// 打开同一个文件的新句柄，读写位置独立
    fn reopen(&self) -> KResult<FileRef>;
}

pub type DynFile = dyn File;
pub type FileRef = Arc<DynFile>;
