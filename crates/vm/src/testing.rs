//! 测试用的内存模拟：物理页池、内存盘和内存文件

use std::{cell::UnsafeCell, ptr::NonNull, sync::Arc};

use common::config::{PAGE_SIZE, SECTOR_SIZE};
use defines::error::{errno, KResult};
use klocks::SpinMutex;

use crate::{
    hal::{BlockDevice, File, FileRef, PhysMemory},
    PhysPageNum, VirtualMemory,
};

const BASE_PPN: usize = 0x80200;

/// 固定大小的物理页池
pub struct FramePool {
    pages: Box<[UnsafeCell<[u8; PAGE_SIZE]>]>,
    free: SpinMutex<Vec<usize>>,
}

// 页的内容由虚拟内存子系统的锁保护
unsafe impl Sync for FramePool {}

impl FramePool {
    pub fn new(frames: usize) -> Self {
        Self {
            pages: (0..frames).map(|_| UnsafeCell::new([0; PAGE_SIZE])).collect(),
            free: SpinMutex::new((0..frames).rev().collect()),
        }
    }

    pub fn allocated(&self) -> usize {
        self.pages.len() - self.free.lock().len()
    }
}

impl PhysMemory for FramePool {
    fn alloc_zeroed(&self) -> Option<PhysPageNum> {
        let idx = self.free.lock().pop()?;
        unsafe { (*self.pages[idx].get()).fill(0) };
        Some(PhysPageNum(BASE_PPN + idx))
    }

    unsafe fn free(&self, ppn: PhysPageNum) {
        let idx = ppn.0 - BASE_PPN;
        let mut free = self.free.lock();
        assert!(!free.contains(&idx), "double free of {ppn:?}");
        free.push(idx);
    }

    fn kernel_view(&self, ppn: PhysPageNum) -> NonNull<[u8; PAGE_SIZE]> {
        NonNull::new(self.pages[ppn.0 - BASE_PPN].get()).unwrap()
    }

    fn total_frames(&self) -> usize {
        self.pages.len()
    }
}

/// 内存中的块设备
pub struct RamDisk {
    sectors: SpinMutex<Vec<[u8; SECTOR_SIZE]>>,
    // 读这个扇区时返回 EIO
    bad_sector: SpinMutex<Option<u64>>,
}

impl RamDisk {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: SpinMutex::new(vec![[0; SECTOR_SIZE]; sector_count]),
            bad_sector: SpinMutex::new(None),
        }
    }

    pub fn fail_reads_at(&self, sector: Option<u64>) {
        *self.bad_sector.lock() = sector;
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> u64 {
        self.sectors.lock().len() as u64
    }

    fn read_sector(&self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> KResult<()> {
        if *self.bad_sector.lock() == Some(sector) {
            return Err(errno::EIO);
        }
        let sectors = self.sectors.lock();
        *buf = *sectors.get(sector as usize).ok_or(errno::EIO)?;
        Ok(())
    }

    fn write_sector(&self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> KResult<()> {
        let mut sectors = self.sectors.lock();
        *sectors.get_mut(sector as usize).ok_or(errno::EIO)? = *buf;
        Ok(())
    }
}

/// 内存文件的内容，所有句柄共享
#[derive(Default)]
pub struct MemInode {
    data: SpinMutex<Vec<u8>>,
    // (offset, len)
    writes: SpinMutex<Vec<(usize, usize)>>,
}

impl MemInode {
    pub fn with_data(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: SpinMutex::new(data),
            writes: SpinMutex::default(),
        })
    }

    pub fn open(self: &Arc<Self>) -> FileRef {
        Arc::new(MemFile {
            inode: Arc::clone(self),
            pos: SpinMutex::new(0),
        })
    }

    pub fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn writes(&self) -> Vec<(usize, usize)> {
        self.writes.lock().clone()
    }
}

/// 打开的内存文件，读写位置属于句柄
pub struct MemFile {
    inode: Arc<MemInode>,
    pos: SpinMutex<usize>,
}

impl File for MemFile {
    fn len(&self) -> usize {
        self.inode.data.lock().len()
    }

    fn seek(&self, pos: usize) {
        *self.pos.lock() = pos;
    }

    fn read(&self, buf: &mut [u8]) -> KResult<usize> {
        let data = self.inode.data.lock();
        let mut pos = self.pos.lock();
        let start = (*pos).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        *pos += len;
        Ok(len)
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> KResult<usize> {
        let mut data = self.inode.data.lock();
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        self.inode.writes.lock().push((offset, buf.len()));
        Ok(buf.len())
    }

    fn reopen(&self) -> KResult<FileRef> {
        Ok(self.inode.open())
    }
}

/// `frames` 个物理页，`swap_pages` 页交换区
pub fn virtual_memory(frames: usize, swap_pages: usize) -> (triomphe::Arc<VirtualMemory>, Arc<FramePool>) {
    let (vm, pool, _) = virtual_memory_with_disk(frames, swap_pages);
    (vm, pool)
}

/// 同 [`virtual_memory`]，另外返回交换盘以便注入读错误
pub fn virtual_memory_with_disk(
    frames: usize,
    swap_pages: usize,
) -> (triomphe::Arc<VirtualMemory>, Arc<FramePool>, Arc<RamDisk>) {
    simple_logger::init();
    let pool = Arc::new(FramePool::new(frames));
    let disk = Arc::new(RamDisk::new(swap_pages * common::config::SECTORS_PER_PAGE));
    let vm = VirtualMemory::init(
        Arc::clone(&pool) as Arc<dyn PhysMemory>,
        Arc::clone(&disk) as Arc<dyn BlockDevice>,
    );
    (triomphe::Arc::new(vm), pool, disk)
}
